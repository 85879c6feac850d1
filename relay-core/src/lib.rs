//! relay core library: domain types, the pattern rule engine, manifest
//! persistence, errors.
//!
//! - [`pattern`]: [`PatternRuleSet`] and the category constants
//! - [`types`]: [`ProjectUnit`], [`RefMapping`], [`TreeChange`]
//! - [`manifest`]: load / save / resolve units
//! - [`error`]: [`PatternError`], [`ManifestError`]

pub mod error;
pub mod manifest;
pub mod pattern;
mod token;
pub mod types;

pub use error::{ManifestError, PatternError};
pub use manifest::{Defaults, Manifest, ProjectEntry, RegistryConfig};
pub use pattern::{PatternRule, PatternRuleSet, RewriteStep};
pub use types::{ProjectName, ProjectUnit, RefMapping, TreeChange, TreeChangeKind, TreeSource};
