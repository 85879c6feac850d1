//! File/directory filter for tree sync.
//!
//! Built on the `file`, `dir` and `path` categories of a [`PatternRuleSet`]:
//!
//! - `dir` excludes are checked against every directory name on the way
//!   down, so an excluded directory hides everything nested under it. A
//!   `dir` include list keeps files whose directory chain has at least one
//!   matching name (files at the tree root have none);
//! - `file` is checked against the file name;
//! - `path` excludes prune directories and files by their `/`-joined
//!   relative path; `path` includes select files only.
//!
//! Include lists never prune a directory walk: a directory that does not
//! match may still hold files that do.
//!
//! VCS metadata directories are never part of a sync, whatever the rules say.

use std::path::{Component, Path};

use relay_core::pattern::{DIR, FILE, PATH};
use relay_core::{PatternRule, PatternRuleSet};

/// Names that are always skipped on both sides of a sync.
pub const VCS_METADATA: &[&str] = &[".git", ".hg", ".svn", ".bzr", "CVS", ".repo"];

pub fn is_vcs_metadata(name: &str) -> bool {
    VCS_METADATA.contains(&name)
}

#[derive(Debug, Clone, Default)]
pub struct TreeFilter {
    rules: PatternRuleSet,
    scope: Option<String>,
}

impl TreeFilter {
    pub fn new(rules: PatternRuleSet) -> Self {
        Self { rules, scope: None }
    }

    /// Evaluate name-keyed rules against `project`.
    pub fn scoped(mut self, project: impl Into<String>) -> Self {
        self.scope = Some(project.into());
        self
    }

    /// Whether the walk descends into directory `rel`: no component is VCS
    /// metadata or `dir`-excluded, and no prefix of it is `path`-excluded.
    pub fn enters_dir(&self, rel: &Path) -> bool {
        let names = names(rel);
        let mut prefix = String::new();
        for name in &names {
            if is_vcs_metadata(name) || self.excluded(DIR, name) {
                return false;
            }
            if !prefix.is_empty() {
                prefix.push('/');
            }
            prefix.push_str(name);
            if self.excluded(PATH, &prefix) {
                return false;
            }
        }
        true
    }

    /// Whether directory `rel` is synced as an entry of its own. A directory
    /// the walk enters but that fails an include list only appears in the
    /// destination when one of its files is synced.
    pub fn allows_dir(&self, rel: &Path) -> bool {
        self.enters_dir(rel)
            && self.dir_chain_included(rel)
            && self.included(PATH, &slash_path(rel))
    }

    /// Whether file `rel` (relative to the tree root) is synced.
    pub fn allows_file(&self, rel: &Path) -> bool {
        let Some(name) = rel.file_name().map(|n| n.to_string_lossy()) else {
            return false;
        };
        if is_vcs_metadata(&name) {
            return false;
        }
        let parent = rel.parent().unwrap_or(Path::new(""));
        let path = slash_path(rel);
        self.enters_dir(parent)
            && self.dir_chain_included(parent)
            && self.rule(FILE).map_or(true, |r| r.is_match(&name))
            && self.rule(PATH).map_or(true, |r| r.is_match(&path))
    }

    /// A `dir` include list is met by any one name in the chain.
    fn dir_chain_included(&self, rel: &Path) -> bool {
        match self.rule(DIR).filter(|r| r.has_includes()) {
            Some(rule) => names(rel).iter().any(|name| rule.is_included(name)),
            None => true,
        }
    }

    fn rule(&self, category: &str) -> Option<&PatternRule> {
        self.rules.select(category, self.scope.as_deref(), false)
    }

    fn excluded(&self, category: &str, value: &str) -> bool {
        self.rule(category).is_some_and(|r| r.is_excluded(value))
    }

    fn included(&self, category: &str, value: &str) -> bool {
        self.rule(category).map_or(true, |r| r.is_included(value))
    }
}

fn names(rel: &Path) -> Vec<String> {
    rel.components()
        .filter_map(|c| match c {
            Component::Normal(name) => Some(name.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect()
}

fn slash_path(rel: &Path) -> String {
    names(rel).join("/")
}
