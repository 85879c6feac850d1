//! File-tree mirroring.
//!
//! ## Two-pass sync
//!
//! 1. Removal: walk the destination; anything the filtered source no longer
//!    has (or has as a different kind of entry) is deleted.
//! 2. Addition: walk the source; create what is missing, rewrite changed
//!    symlinks, overwrite files whose bytes differ.
//!
//! The same walk runs in three modes: apply changes, collect them without
//! touching the disk, or stop at the first difference.

use std::fs::{self, File, Metadata};
use std::io::{BufReader, Read};
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

use relay_core::{ProjectUnit, TreeChange, TreeChangeKind};

use crate::error::{io_err, SyncError};
use crate::filter::{is_vcs_metadata, TreeFilter};

const TMP_SUFFIX: &str = ".relay.tmp";

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// Counts of what a sync did, plus the newest source mtime seen.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TreeSyncReport {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
    pub relinked: usize,
    /// Suitable as the date of the commit recording this sync.
    pub latest_mtime: Option<DateTime<Utc>>,
}

impl TreeSyncReport {
    /// Total number of changes; zero means nothing to commit.
    pub fn changes(&self) -> usize {
        self.added + self.updated + self.removed + self.relinked
    }

    pub fn is_empty(&self) -> bool {
        self.changes() == 0
    }

    pub fn tally(changes: &[TreeChange]) -> Self {
        let mut report = Self::default();
        for change in changes {
            report.record(change.kind);
        }
        report
    }

    fn record(&mut self, kind: TreeChangeKind) {
        match kind {
            TreeChangeKind::Add => self.added += 1,
            TreeChangeKind::Update => self.updated += 1,
            TreeChangeKind::Remove => self.removed += 1,
            TreeChangeKind::Relink => self.relinked += 1,
        }
    }

    fn observe(&mut self, meta: &Metadata) {
        if let Ok(modified) = meta.modified() {
            let modified = DateTime::<Utc>::from(modified);
            if self.latest_mtime.map_or(true, |latest| modified > latest) {
                self.latest_mtime = Some(modified);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Planner
// ---------------------------------------------------------------------------

/// Mirrors a filtered source tree into a destination tree.
#[derive(Debug, Clone)]
pub struct TreeSyncPlanner {
    source: PathBuf,
    dest: PathBuf,
    filter: TreeFilter,
    preserve_symlinks: bool,
}

impl TreeSyncPlanner {
    pub fn new(source: impl Into<PathBuf>, dest: impl Into<PathBuf>, filter: TreeFilter) -> Self {
        Self {
            source: source.into(),
            dest: dest.into(),
            filter,
            preserve_symlinks: true,
        }
    }

    /// Copy symlinks as links (default) or follow them.
    pub fn preserve_symlinks(mut self, preserve: bool) -> Self {
        self.preserve_symlinks = preserve;
        self
    }

    /// Planner mirroring the unit's tree source into its working copy.
    pub fn for_unit(unit: &ProjectUnit) -> Result<Self, SyncError> {
        let tree = unit.tree.as_ref().ok_or_else(|| {
            SyncError::Validation(format!("project '{}' has no tree source", unit.name))
        })?;
        let filter = TreeFilter::new(unit.rules.clone()).scoped(unit.name.as_str());
        Ok(Self::new(&tree.source, &unit.path, filter).preserve_symlinks(tree.preserve_symlinks))
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn dest(&self) -> &Path {
        &self.dest
    }

    /// Bring the destination in line with the source.
    pub fn sync(&self) -> Result<TreeSyncReport, SyncError> {
        self.validate()?;
        fs::create_dir_all(&self.dest).map_err(|e| io_err(&self.dest, e))?;
        let mut walk = Walk::new(self, Mode::Apply);
        walk.run()?;
        tracing::info!(
            dest = %self.dest.display(),
            added = walk.report.added,
            updated = walk.report.updated,
            removed = walk.report.removed,
            relinked = walk.report.relinked,
            "tree synced"
        );
        Ok(walk.report)
    }

    /// Whether a [`sync`](Self::sync) would change anything. Never writes.
    pub fn diff(&self) -> Result<bool, SyncError> {
        self.validate()?;
        let mut walk = Walk::new(self, Mode::Probe);
        Ok(walk.run()?.is_break())
    }

    /// Every change a [`sync`](Self::sync) would make. Never writes.
    pub fn changes(&self) -> Result<Vec<TreeChange>, SyncError> {
        self.validate()?;
        let mut walk = Walk::new(self, Mode::Collect);
        walk.run()?;
        Ok(walk.changes)
    }

    /// Wipe the destination (VCS metadata excepted) and copy the filtered
    /// source over it.
    pub fn quick_copy(&self) -> Result<TreeSyncReport, SyncError> {
        self.validate()?;
        fs::create_dir_all(&self.dest).map_err(|e| io_err(&self.dest, e))?;
        let mut walk = Walk::new(self, Mode::Apply);
        for entry in sorted_entries(&self.dest)? {
            let name = entry.to_string_lossy();
            if is_vcs_metadata(&name) {
                continue;
            }
            let path = self.dest.join(&entry);
            remove_entry(&path)?;
            walk.report.record(TreeChangeKind::Remove);
        }
        let _ = walk.add(Path::new(""))?;
        tracing::info!(dest = %self.dest.display(), copied = walk.report.added, "tree quick-copied");
        Ok(walk.report)
    }

    fn validate(&self) -> Result<(), SyncError> {
        if !self.source.is_dir() {
            return Err(SyncError::Validation(format!(
                "tree source {} is not a directory",
                self.source.display()
            )));
        }
        Ok(())
    }

    fn source_meta(&self, path: &Path) -> Option<Metadata> {
        if self.preserve_symlinks {
            fs::symlink_metadata(path).ok()
        } else {
            fs::metadata(path).ok()
        }
    }
}

// ---------------------------------------------------------------------------
// Walk
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Apply,
    Collect,
    Probe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Dir,
    File,
    Link,
}

fn kind_of(meta: &Metadata) -> Kind {
    let ft = meta.file_type();
    if ft.is_symlink() {
        Kind::Link
    } else if ft.is_dir() {
        Kind::Dir
    } else {
        Kind::File
    }
}

/// Directories only pair with directories; files and links may replace
/// each other in place.
fn compatible(a: Kind, b: Kind) -> bool {
    (a == Kind::Dir) == (b == Kind::Dir)
}

struct Walk<'a> {
    planner: &'a TreeSyncPlanner,
    mode: Mode,
    report: TreeSyncReport,
    changes: Vec<TreeChange>,
}

type Flow = ControlFlow<()>;

impl<'a> Walk<'a> {
    fn new(planner: &'a TreeSyncPlanner, mode: Mode) -> Self {
        Self {
            planner,
            mode,
            report: TreeSyncReport::default(),
            changes: Vec::new(),
        }
    }

    fn run(&mut self) -> Result<Flow, SyncError> {
        if self.planner.dest.is_dir() && self.prune(Path::new(""))?.is_break() {
            return Ok(ControlFlow::Break(()));
        }
        self.add(Path::new(""))
    }

    fn apply(&self) -> bool {
        self.mode == Mode::Apply
    }

    fn record(&mut self, kind: TreeChangeKind, rel: &Path) -> Flow {
        tracing::debug!(kind = %kind, path = %rel.display(), "tree change");
        match self.mode {
            Mode::Probe => return ControlFlow::Break(()),
            Mode::Collect => self.changes.push(TreeChange {
                kind,
                path: rel.to_path_buf(),
            }),
            Mode::Apply => {}
        }
        self.report.record(kind);
        ControlFlow::Continue(())
    }

    /// Removal pass over `dest/<rel>`.
    fn prune(&mut self, rel: &Path) -> Result<Flow, SyncError> {
        let dest_dir = self.planner.dest.join(rel);
        for name in sorted_entries(&dest_dir)? {
            if is_vcs_metadata(&name.to_string_lossy()) {
                continue;
            }
            let rel = rel.join(&name);
            let dest = self.planner.dest.join(&rel);
            let dest_meta = fs::symlink_metadata(&dest).map_err(|e| io_err(&dest, e))?;
            let dest_kind = kind_of(&dest_meta);

            let keep = match self.planner.source_meta(&self.planner.source.join(&rel)) {
                None => false,
                Some(src_meta) => {
                    let src_kind = kind_of(&src_meta);
                    compatible(src_kind, dest_kind)
                        && if src_kind == Kind::Dir {
                            self.planner.filter.enters_dir(&rel)
                        } else {
                            self.planner.filter.allows_file(&rel)
                        }
                }
            };

            if !keep {
                if self.record(TreeChangeKind::Remove, &rel).is_break() {
                    return Ok(ControlFlow::Break(()));
                }
                if self.apply() {
                    remove_entry(&dest)?;
                }
            } else if dest_kind == Kind::Dir && self.prune(&rel)?.is_break() {
                return Ok(ControlFlow::Break(()));
            }
        }
        Ok(ControlFlow::Continue(()))
    }

    /// Addition/update pass over `source/<rel>`.
    fn add(&mut self, rel: &Path) -> Result<Flow, SyncError> {
        let src_dir = self.planner.source.join(rel);
        for name in sorted_entries(&src_dir)? {
            if is_vcs_metadata(&name.to_string_lossy()) {
                continue;
            }
            let rel = rel.join(&name);
            let src = self.planner.source.join(&rel);
            let dest = self.planner.dest.join(&rel);
            let Some(src_meta) = self.planner.source_meta(&src) else {
                // Dangling link while following symlinks.
                tracing::warn!(path = %src.display(), "unreadable source entry skipped");
                continue;
            };
            // In dry modes an incompatible entry was only reported as removed;
            // treat it as gone here too.
            let dest_kind = fs::symlink_metadata(&dest)
                .ok()
                .map(|m| kind_of(&m))
                .filter(|k| self.apply() || compatible(kind_of(&src_meta), *k));

            let flow = match kind_of(&src_meta) {
                Kind::Dir => self.add_dir(&rel, &dest, dest_kind)?,
                Kind::Link => {
                    self.report.observe(&src_meta);
                    self.add_link(&rel, &src, &dest, dest_kind)?
                }
                Kind::File => {
                    self.report.observe(&src_meta);
                    self.add_file(&rel, &src, &dest, dest_kind)?
                }
            };
            if flow.is_break() {
                return Ok(flow);
            }
        }
        Ok(ControlFlow::Continue(()))
    }

    fn add_dir(&mut self, rel: &Path, dest: &Path, dest_kind: Option<Kind>) -> Result<Flow, SyncError> {
        let filter = &self.planner.filter;
        if !filter.enters_dir(rel) {
            return Ok(ControlFlow::Continue(()));
        }
        // Directories failing an include list are created on demand by
        // the files they hold.
        let materialize = filter.allows_dir(rel);
        match dest_kind {
            Some(Kind::Dir) => {}
            _ if !materialize => {}
            other => {
                if self.apply() {
                    if other.is_some() {
                        remove_entry(dest)?;
                    }
                    fs::create_dir_all(dest).map_err(|e| io_err(dest, e))?;
                }
                if self.record(TreeChangeKind::Add, rel).is_break() {
                    return Ok(ControlFlow::Break(()));
                }
            }
        }
        self.add(rel)
    }

    fn add_link(
        &mut self,
        rel: &Path,
        src: &Path,
        dest: &Path,
        dest_kind: Option<Kind>,
    ) -> Result<Flow, SyncError> {
        if !self.planner.filter.allows_file(rel) {
            return Ok(ControlFlow::Continue(()));
        }
        let target = fs::read_link(src).map_err(|e| io_err(src, e))?;
        let kind = match dest_kind {
            Some(Kind::Link) => {
                let current = fs::read_link(dest).map_err(|e| io_err(dest, e))?;
                if current == target {
                    return Ok(ControlFlow::Continue(()));
                }
                TreeChangeKind::Relink
            }
            Some(_) => TreeChangeKind::Update,
            None => TreeChangeKind::Add,
        };
        if self.apply() {
            if dest_kind.is_some() {
                remove_entry(dest)?;
            }
            ensure_parent(dest)?;
            make_symlink(&target, dest)?;
        }
        Ok(self.record(kind, rel))
    }

    fn add_file(
        &mut self,
        rel: &Path,
        src: &Path,
        dest: &Path,
        dest_kind: Option<Kind>,
    ) -> Result<Flow, SyncError> {
        if !self.planner.filter.allows_file(rel) {
            return Ok(ControlFlow::Continue(()));
        }
        let kind = match dest_kind {
            None => TreeChangeKind::Add,
            Some(Kind::File) => {
                if same_contents(src, dest)? {
                    return Ok(ControlFlow::Continue(()));
                }
                TreeChangeKind::Update
            }
            Some(_) => TreeChangeKind::Update,
        };
        if self.apply() {
            if matches!(dest_kind, Some(Kind::Dir) | Some(Kind::Link)) {
                remove_entry(dest)?;
            }
            ensure_parent(dest)?;
            copy_file(src, dest)?;
        }
        Ok(self.record(kind, rel))
    }
}

// ---------------------------------------------------------------------------
// Leaf I/O
// ---------------------------------------------------------------------------

fn sorted_entries(dir: &Path) -> Result<Vec<std::ffi::OsString>, SyncError> {
    let mut names: Vec<_> = fs::read_dir(dir)
        .map_err(|e| io_err(dir, e))?
        .filter_map(|e| e.ok())
        .map(|e| e.file_name())
        .collect();
    names.sort();
    Ok(names)
}

fn remove_entry(path: &Path) -> Result<(), SyncError> {
    let meta = fs::symlink_metadata(path).map_err(|e| io_err(path, e))?;
    let result = if meta.file_type().is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    result.map_err(|e| io_err(path, e))
}

fn ensure_parent(path: &Path) -> Result<(), SyncError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    Ok(())
}

/// Copy through a sibling temp file so a reader never sees half a file.
fn copy_file(src: &Path, dest: &Path) -> Result<(), SyncError> {
    let mut tmp_name = dest.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    tmp_name.push(TMP_SUFFIX);
    let tmp = dest.with_file_name(tmp_name);
    fs::copy(src, &tmp).map_err(|e| io_err(src, e))?;
    if let Err(e) = fs::rename(&tmp, dest) {
        let _ = fs::remove_file(&tmp);
        return Err(io_err(dest, e));
    }
    Ok(())
}

#[cfg(unix)]
fn make_symlink(target: &Path, link: &Path) -> Result<(), SyncError> {
    std::os::unix::fs::symlink(target, link).map_err(|e| io_err(link, e))
}

#[cfg(not(unix))]
fn make_symlink(target: &Path, link: &Path) -> Result<(), SyncError> {
    let resolved = link.parent().map_or_else(|| target.to_path_buf(), |p| p.join(target));
    let result = if resolved.is_dir() {
        std::os::windows::fs::symlink_dir(target, link)
    } else {
        std::os::windows::fs::symlink_file(target, link)
    };
    result.map_err(|e| io_err(link, e))
}

fn same_contents(a: &Path, b: &Path) -> Result<bool, SyncError> {
    let len_a = fs::metadata(a).map_err(|e| io_err(a, e))?.len();
    let len_b = fs::metadata(b).map_err(|e| io_err(b, e))?.len();
    if len_a != len_b {
        return Ok(false);
    }
    let mut ra = BufReader::new(File::open(a).map_err(|e| io_err(a, e))?);
    let mut rb = BufReader::new(File::open(b).map_err(|e| io_err(b, e))?);
    let mut buf_a = [0u8; 8192];
    let mut buf_b = [0u8; 8192];
    loop {
        let n = ra.read(&mut buf_a).map_err(|e| io_err(a, e))?;
        if n == 0 {
            return Ok(true);
        }
        rb.read_exact(&mut buf_b[..n]).map_err(|e| io_err(b, e))?;
        if buf_a[..n] != buf_b[..n] {
            return Ok(false);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
