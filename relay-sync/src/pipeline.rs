//! Per-unit apply steps shared by the CLI commands.
//!
//! Each function plans, applies through the [`VcsExecutor`], and returns a
//! summary. They are the worker functions handed to the dispatcher.

use chrono::Utc;
use serde::Serialize;

use relay_core::{ProjectUnit, RefMapping};

use crate::error::SyncError;
use crate::refs::{HeadPlanOptions, RefSyncPlanner, TagPlanOptions};
use crate::tree::{TreeSyncPlanner, TreeSyncReport};
use crate::vcs::VcsExecutor;

/// What to push for a unit.
#[derive(Debug, Clone, Default)]
pub struct PushOptions {
    /// `None` skips branches.
    pub heads: Option<HeadPlanOptions>,
    /// `None` skips tags.
    pub tags: Option<TagPlanOptions>,
    /// Plan only.
    pub dry_run: bool,
}

/// Result of [`push_unit`].
#[derive(Debug, Clone, Serialize)]
pub struct PushOutcome {
    pub project: String,
    pub mappings: Vec<RefMapping>,
    pub pushed: bool,
}

/// Plan heads and tags, then push everything in a single batch.
pub fn push_unit(
    unit: &ProjectUnit,
    vcs: &dyn VcsExecutor,
    opts: &PushOptions,
) -> Result<PushOutcome, SyncError> {
    let planner = RefSyncPlanner::new(unit, vcs);
    let mut mappings = Vec::new();
    if let Some(heads) = &opts.heads {
        mappings.extend(planner.plan_heads(heads)?);
    }
    if let Some(tags) = &opts.tags {
        mappings.extend(planner.plan_tags(tags)?);
    }

    let mut outcome = PushOutcome {
        project: unit.name.to_string(),
        mappings,
        pushed: false,
    };
    if outcome.mappings.is_empty() {
        tracing::info!(project = %unit.name, "remote up to date");
        return Ok(outcome);
    }

    let refspecs: Vec<String> = outcome.mappings.iter().map(RefMapping::refspec).collect();
    if opts.dry_run {
        tracing::info!(project = %unit.name, refspecs = ?refspecs, "[dry-run] would push");
        return Ok(outcome);
    }

    vcs.push(&unit.remote, &refspecs)
        .map_err(|source| SyncError::Apply {
            project: unit.name.to_string(),
            source,
        })?;
    tracing::info!(project = %unit.name, count = refspecs.len(), "pushed");
    outcome.pushed = true;
    Ok(outcome)
}

/// How to mirror a unit's tree source.
#[derive(Debug, Clone, Default)]
pub struct MirrorOptions {
    /// Force quick-copy; `None` uses the unit's own setting.
    pub quick: Option<bool>,
    pub dry_run: bool,
    /// Commit message; defaults to `Mirror <source>`.
    pub message: Option<String>,
    /// Push after committing.
    pub push: Option<PushOptions>,
}

/// Result of [`mirror_unit`].
#[derive(Debug, Clone, Serialize)]
pub struct MirrorOutcome {
    pub project: String,
    pub report: TreeSyncReport,
    pub committed: bool,
    pub push: Option<PushOutcome>,
}

/// Sync the tree, commit it dated at the newest source mtime, then push.
pub fn mirror_unit(
    unit: &ProjectUnit,
    vcs: &dyn VcsExecutor,
    opts: &MirrorOptions,
) -> Result<MirrorOutcome, SyncError> {
    let planner = TreeSyncPlanner::for_unit(unit)?;
    let quick = opts
        .quick
        .or_else(|| unit.tree.as_ref().map(|t| t.quick_copy))
        .unwrap_or(false);

    let apply = |source: crate::error::VcsError| SyncError::Apply {
        project: unit.name.to_string(),
        source,
    };

    if opts.dry_run {
        let report = TreeSyncReport::tally(&planner.changes()?);
        tracing::info!(project = %unit.name, changes = report.changes(), "[dry-run] tree changes");
        return Ok(MirrorOutcome {
            project: unit.name.to_string(),
            report,
            committed: false,
            push: None,
        });
    }

    let report = if quick {
        planner.quick_copy()?
    } else {
        planner.sync()?
    };

    let mut committed = false;
    if !report.is_empty() {
        vcs.stage_all().map_err(apply)?;
        if vcs.has_staged_changes().map_err(apply)? {
            let message = opts
                .message
                .clone()
                .unwrap_or_else(|| format!("Mirror {}", planner.source().display()));
            let date = report.latest_mtime.unwrap_or_else(Utc::now);
            vcs.commit(&message, date).map_err(apply)?;
            committed = true;
            tracing::info!(project = %unit.name, date = %date, "committed tree sync");
        }
    }

    let push = match &opts.push {
        Some(push) => Some(push_unit(unit, vcs, push)?),
        None => None,
    };

    Ok(MirrorOutcome {
        project: unit.name.to_string(),
        report,
        committed,
        push,
    })
}
