//! Bounded-concurrency dispatcher for per-project work.

mod dispatcher;
mod error;
mod report;

pub use dispatcher::{run, Dispatcher, FailurePolicy};
pub use error::DispatchError;
pub use report::{DispatchOutcome, DispatchReport, Outcome, UnitReport};
