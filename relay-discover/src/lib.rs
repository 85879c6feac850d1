//! Working-copy discovery for `relay-discover`.
//!
//! `discover(root, max_depth)` walks a directory tree and reports every git
//! working copy it finds, with the URL of its `origin` remote when one is
//! configured. Results are sorted by name so repeated scans are stable.

use std::fs;
use std::path::{Path, PathBuf};

use relay_core::ProjectEntry;
use serde::Serialize;
use thiserror::Error;

/// Directories never entered while scanning.
const SKIPPED_DIRS: &[&str] = &[".git", ".hg", ".svn", ".repo", "node_modules", "target"];

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// A working copy found under the scan root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveredRepo {
    /// Path relative to the scan root, `/`-separated. The root itself is
    /// named after its directory.
    pub name: String,
    pub path: PathBuf,
    pub remote_url: Option<String>,
}

impl DiscoveredRepo {
    /// Manifest entry for this working copy, with its path made relative to
    /// `base` when possible.
    pub fn to_entry(&self, base: &Path) -> ProjectEntry {
        let path = self
            .path
            .strip_prefix(base)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| self.path.clone());
        let mut entry = ProjectEntry::new(self.name.as_str(), path);
        entry.remote = self.remote_url.clone();
        entry
    }
}

#[derive(Debug, Error)]
pub enum DiscoverError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("scan root '{path}' is not a directory")]
    RootNotFound { path: PathBuf },
}

fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> DiscoverError {
    DiscoverError::Io {
        path: path.into(),
        source,
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Find git working copies at most `max_depth` levels below `root`.
///
/// Depth 0 only inspects `root` itself. Nested working copies are reported
/// too; symlinked directories are not followed.
pub fn discover(root: &Path, max_depth: usize) -> Result<Vec<DiscoveredRepo>, DiscoverError> {
    if !root.is_dir() {
        return Err(DiscoverError::RootNotFound {
            path: root.to_path_buf(),
        });
    }

    let mut found = Vec::new();
    let mut pending = vec![(root.to_path_buf(), 0usize)];
    while let Some((dir, depth)) = pending.pop() {
        if let Some(git_dir) = git_dir_of(&dir) {
            let name = repo_name(root, &dir);
            let remote_url = read_remote_url(&git_dir);
            tracing::debug!(name = %name, path = %dir.display(), remote = ?remote_url, "found working copy");
            found.push(DiscoveredRepo {
                name,
                path: dir.clone(),
                remote_url,
            });
        }
        if depth >= max_depth {
            continue;
        }

        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if dir != root => {
                tracing::warn!(path = %dir.display(), error = %err, "cannot read directory; skipped");
                continue;
            }
            Err(err) => return Err(io_err(&dir, err)),
        };
        for entry in entries {
            let entry = entry.map_err(|e| io_err(&dir, e))?;
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            if !file_type.is_dir() {
                continue;
            }
            let name = entry.file_name();
            if SKIPPED_DIRS.iter().any(|skip| name == *skip) {
                continue;
            }
            pending.push((entry.path(), depth + 1));
        }
    }

    found.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(found)
}

// ---------------------------------------------------------------------------
// Git metadata
// ---------------------------------------------------------------------------

/// The git directory of `dir`: `.git` itself, or the target of a
/// `gitdir:` pointer file (worktrees and submodules).
fn git_dir_of(dir: &Path) -> Option<PathBuf> {
    let dot_git = dir.join(".git");
    let meta = fs::symlink_metadata(&dot_git).ok()?;
    if meta.is_dir() {
        return Some(dot_git);
    }
    let content = fs::read_to_string(&dot_git).ok()?;
    let target = content.lines().find_map(|l| l.strip_prefix("gitdir:"))?.trim();
    let target = Path::new(target);
    Some(if target.is_absolute() {
        target.to_path_buf()
    } else {
        dir.join(target)
    })
}

/// `config` lives in the common directory for linked worktrees.
fn config_path(git_dir: &Path) -> PathBuf {
    match fs::read_to_string(git_dir.join("commondir")) {
        Ok(common) => {
            let common = Path::new(common.trim());
            if common.is_absolute() {
                common.join("config")
            } else {
                git_dir.join(common).join("config")
            }
        }
        Err(_) => git_dir.join("config"),
    }
}

fn read_remote_url(git_dir: &Path) -> Option<String> {
    let content = fs::read_to_string(config_path(git_dir)).ok()?;
    parse_remote_url(&content)
}

/// URL of `origin`, else of the first remote that has one.
pub fn parse_remote_url(config: &str) -> Option<String> {
    let mut section: Option<String> = None;
    let mut first: Option<String> = None;
    for line in config.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if let Some(header) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            section = remote_section(header);
            continue;
        }
        let Some(remote) = section.as_deref() else {
            continue;
        };
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        if !key.trim().eq_ignore_ascii_case("url") {
            continue;
        }
        let url = value.trim().trim_matches('"').to_string();
        if remote == "origin" {
            return Some(url);
        }
        first.get_or_insert(url);
    }
    first
}

/// `remote "name"` → `name`.
fn remote_section(header: &str) -> Option<String> {
    let (kind, rest) = header.trim().split_once(char::is_whitespace)?;
    if !kind.eq_ignore_ascii_case("remote") {
        return None;
    }
    Some(rest.trim().trim_matches('"').to_string())
}

fn repo_name(root: &Path, dir: &Path) -> String {
    let rel = dir.strip_prefix(root).unwrap_or(dir);
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if !parts.is_empty() {
        return parts.join("/");
    }
    root.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| root.display().to_string())
}
