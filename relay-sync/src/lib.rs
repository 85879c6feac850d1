//! # relay-sync
//!
//! Planners and collaborators for publishing a unit to the review server.
//!
//! - [`refs`]: [`RefSyncPlanner`] computes branch/tag push mappings
//! - [`tree`]: [`TreeSyncPlanner`] mirrors a filtered file tree
//! - [`vcs`]: the [`VcsExecutor`] seam and its `git` implementation
//! - [`remote_registry`]: cached project listing on the server
//! - [`pipeline`]: per-unit push / mirror steps run by the dispatcher

pub mod diff;
pub mod error;
pub mod filter;
pub mod pipeline;
pub mod refs;
pub mod remote_registry;
pub mod tree;
pub mod vcs;

pub use diff::{diff_unit, DiffUnitResult, FileDiff};
pub use error::{RegistryClientError, SyncError, VcsError};
pub use filter::TreeFilter;
pub use pipeline::{mirror_unit, push_unit, MirrorOptions, MirrorOutcome, PushOptions, PushOutcome};
pub use refs::{HeadPlanOptions, RefSyncPlanner, Selection, TagPlanOptions};
pub use remote_registry::{CachedRegistry, CreateOptions, HttpRegistry, RemoteRegistry, SshRegistry};
pub use tree::{TreeSyncPlanner, TreeSyncReport};
pub use vcs::{GitExecutor, RefMap, VcsExecutor};
