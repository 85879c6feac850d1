//! Domain types shared by the planners, the dispatcher and the CLI.
//!
//! All path fields use `PathBuf`. A [`ProjectUnit`] is plain data: nothing in
//! here talks to git or the filesystem.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::pattern::PatternRuleSet;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Logical project name, as known to the review server.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProjectName(pub String);

impl ProjectName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProjectName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for ProjectName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ProjectName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Project units
// ---------------------------------------------------------------------------

/// Where a mirrored file tree comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeSource {
    /// Directory whose contents are mirrored into the unit's working copy.
    pub source: PathBuf,
    #[serde(default = "default_true")]
    pub preserve_symlinks: bool,
    /// Wipe and recopy instead of computing a minimal diff.
    #[serde(default)]
    pub quick_copy: bool,
}

fn default_true() -> bool {
    true
}

/// One project to plan and apply, resolved from the manifest.
///
/// Built once per run and never mutated while its work is in flight.
#[derive(Debug, Clone)]
pub struct ProjectUnit {
    pub name: ProjectName,
    /// Local working copy.
    pub path: PathBuf,
    /// Push target (URL or configured remote name).
    pub remote: String,
    /// Single revision to push instead of every local head.
    pub revision: Option<String>,
    pub rules: PatternRuleSet,
    /// `false` keeps the unit out of the parallel dispatch pass.
    pub parallel: bool,
    pub tree: Option<TreeSource>,
}

impl ProjectUnit {
    /// A unit with no rules, no fixed revision and no tree source.
    pub fn new(name: impl Into<ProjectName>, path: impl Into<PathBuf>, remote: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            remote: remote.into(),
            revision: None,
            rules: PatternRuleSet::new(),
            parallel: true,
            tree: None,
        }
    }

    pub fn with_rules(mut self, rules: PatternRuleSet) -> Self {
        self.rules = rules;
        self
    }

    pub fn with_revision(mut self, revision: impl Into<String>) -> Self {
        self.revision = Some(revision.into());
        self
    }
}

impl fmt::Display for ProjectUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.name.fmt(f)
    }
}

// ---------------------------------------------------------------------------
// Plan outputs
// ---------------------------------------------------------------------------

/// One `local:remote` push mapping.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RefMapping {
    pub local: String,
    pub remote: String,
    pub force: bool,
}

impl RefMapping {
    pub fn new(local: impl Into<String>, remote: impl Into<String>, force: bool) -> Self {
        Self {
            local: local.into(),
            remote: remote.into(),
            force,
        }
    }

    /// The refspec handed to `git push`; force mappings carry a leading `+`.
    pub fn refspec(&self) -> String {
        let marker = if self.force { "+" } else { "" };
        format!("{marker}{}:{}", self.local, self.remote)
    }
}

impl fmt::Display for RefMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.refspec())
    }
}

/// What a tree sync does to one path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TreeChangeKind {
    Add,
    Update,
    Remove,
    Relink,
}

impl fmt::Display for TreeChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TreeChangeKind::Add => write!(f, "add"),
            TreeChangeKind::Update => write!(f, "update"),
            TreeChangeKind::Remove => write!(f, "remove"),
            TreeChangeKind::Relink => write!(f, "relink"),
        }
    }
}

/// A single tree difference, relative to the tree roots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeChange {
    pub kind: TreeChangeKind,
    pub path: PathBuf,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refspec_marks_force() {
        assert_eq!(
            RefMapping::new("refs/heads/main", "refs/heads/main", false).refspec(),
            "refs/heads/main:refs/heads/main"
        );
        assert_eq!(
            RefMapping::new("abc", "refs/tags/t", true).to_string(),
            "+abc:refs/tags/t"
        );
    }

    #[test]
    fn unit_displays_its_name() {
        let unit = ProjectUnit::new("platform/build", "/src/build", "ssh://review/platform/build");
        assert_eq!(unit.to_string(), "platform/build");
        assert!(unit.parallel);
        assert!(unit.rules.is_empty());
    }

    #[test]
    fn tree_source_defaults() {
        let tree: TreeSource = serde_yaml::from_str("source: /upstream\n").expect("deserialize");
        assert!(tree.preserve_symlinks);
        assert!(!tree.quick_copy);
    }

    #[test]
    fn change_kind_display() {
        assert_eq!(TreeChangeKind::Relink.to_string(), "relink");
        let json = serde_yaml::to_string(&TreeChangeKind::Remove).expect("serialize");
        assert_eq!(json.trim(), "remove");
    }
}
