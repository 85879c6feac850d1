//! Preview of a tree sync for `relay diff`.

use std::io::ErrorKind;
use std::path::Path;

use serde::Serialize;
use similar::TextDiff;

use relay_core::{ProjectUnit, TreeChange, TreeChangeKind};

use crate::error::{io_err, SyncError};
use crate::tree::TreeSyncPlanner;

/// One planned change, with a unified diff when both sides are text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileDiff {
    pub change: TreeChange,
    pub unified_diff: Option<String>,
}

/// Everything `sync` would do to a unit's working copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiffUnitResult {
    pub project: String,
    pub diffs: Vec<FileDiff>,
}

/// Compare the unit's tree source to its working copy. No files are written.
pub fn diff_unit(unit: &ProjectUnit) -> Result<DiffUnitResult, SyncError> {
    let planner = TreeSyncPlanner::for_unit(unit)?;
    let mut diffs = Vec::new();
    for change in planner.changes()? {
        let unified_diff = match change.kind {
            TreeChangeKind::Add | TreeChangeKind::Update => {
                text_diff(planner.source(), planner.dest(), &change.path)?
            }
            TreeChangeKind::Remove | TreeChangeKind::Relink => None,
        };
        diffs.push(FileDiff {
            change,
            unified_diff,
        });
    }
    Ok(DiffUnitResult {
        project: unit.name.to_string(),
        diffs,
    })
}

fn text_diff(source: &Path, dest: &Path, rel: &Path) -> Result<Option<String>, SyncError> {
    let src = source.join(rel);
    if !src.is_file() {
        return Ok(None);
    }
    let (Some(new), Some(old)) = (read_text(&src)?, read_text(&dest.join(rel))?) else {
        return Ok(None);
    };
    if old == new {
        return Ok(None);
    }
    let old_header = format!("a/{}", rel.display());
    let new_header = format!("b/{}", rel.display());
    let unified = TextDiff::from_lines(&old, &new)
        .unified_diff()
        .header(&old_header, &new_header)
        .context_radius(3)
        .to_string();
    Ok(Some(unified))
}

/// File contents as text; empty for a missing file, `None` for binary.
fn read_text(path: &Path) -> Result<Option<String>, SyncError> {
    if path.is_dir() {
        return Ok(None);
    }
    match std::fs::read(path) {
        Ok(bytes) => Ok(String::from_utf8(bytes)
            .ok()
            .map(|s| s.replace("\r\n", "\n"))),
        Err(err) if err.kind() == ErrorKind::NotFound || !path.exists() => Ok(Some(String::new())),
        Err(err) => Err(io_err(path, err)),
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use relay_core::TreeSource;
    use tempfile::TempDir;

    use super::*;

    fn unit(root: &Path) -> ProjectUnit {
        let mut unit = ProjectUnit::new("docs", root.join("dst"), "ssh://review/docs");
        unit.tree = Some(TreeSource {
            source: root.join("src"),
            preserve_symlinks: true,
            quick_copy: false,
        });
        unit
    }

    #[test]
    fn identical_trees_have_no_diff() {
        let root = TempDir::new().expect("tempdir");
        fs::create_dir_all(root.path().join("src")).unwrap();
        fs::create_dir_all(root.path().join("dst")).unwrap();
        fs::write(root.path().join("src/a.md"), "same\n").unwrap();
        fs::write(root.path().join("dst/a.md"), "same\n").unwrap();
        let result = diff_unit(&unit(root.path())).expect("diff");
        assert!(result.diffs.is_empty());
    }

    #[test]
    fn edited_file_produces_unified_diff() {
        let root = TempDir::new().expect("tempdir");
        fs::create_dir_all(root.path().join("src/guide")).unwrap();
        fs::create_dir_all(root.path().join("dst/guide")).unwrap();
        fs::write(root.path().join("src/guide/a.md"), "one\ntwo\n").unwrap();
        fs::write(root.path().join("dst/guide/a.md"), "one\n").unwrap();
        fs::write(root.path().join("dst/stale.md"), "bye\n").unwrap();

        let result = diff_unit(&unit(root.path())).expect("diff");
        let edit = result
            .diffs
            .iter()
            .find(|d| d.change.path.ends_with("a.md"))
            .expect("a.md diff");
        assert_eq!(edit.change.kind, TreeChangeKind::Update);
        let text = edit.unified_diff.as_deref().expect("text diff");
        assert!(text.contains("--- a/guide/a.md"));
        assert!(text.contains("+++ b/guide/a.md"));
        assert!(text.contains("+two"));

        let stale = result
            .diffs
            .iter()
            .find(|d| d.change.kind == TreeChangeKind::Remove)
            .expect("removal");
        assert_eq!(stale.change.path, PathBuf::from("stale.md"));
        assert!(stale.unified_diff.is_none());
    }

    #[test]
    fn unit_without_tree_is_rejected() {
        let unit = ProjectUnit::new("x", "/nowhere", "r");
        assert!(matches!(diff_unit(&unit).unwrap_err(), SyncError::Validation(_)));
    }
}
