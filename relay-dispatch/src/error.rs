use thiserror::Error;

/// Failures of the dispatcher itself. Unit failures are reported, not raised.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("cannot start async runtime: {0}")]
    Runtime(#[source] std::io::Error),
}
