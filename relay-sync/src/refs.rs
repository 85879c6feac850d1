//! Branch and tag push planning.
//!
//! The planner turns local refs into the smallest list of [`RefMapping`]s
//! that brings the remote up to date, after the unit's `project`,
//! `revision` and `tags` rules had their say. Nothing is pushed here.

use std::collections::HashSet;

use relay_core::pattern::{PROJECT, REVISION, TAGS};
use relay_core::{ProjectUnit, RefMapping};

use crate::error::SyncError;
use crate::vcs::{RefMap, VcsExecutor};

const HEADS: &str = "refs/heads/";
const TAGS_PREFIX: &str = "refs/tags/";

/// Which heads to consider.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Selection {
    /// Every local branch.
    #[default]
    All,
    /// Only these refs (branch names, full refs or commit ids).
    Explicit(Vec<String>),
}

/// Knobs for [`RefSyncPlanner::plan_heads`].
#[derive(Debug, Clone, Default)]
pub struct HeadPlanOptions {
    pub selection: Selection,
    /// Prepended to every destination branch name.
    pub ref_prefix: String,
    /// Keep hierarchical names instead of reducing to the basename.
    pub fullname: bool,
    pub force: bool,
    /// When the pushed revision is a commit id, also tag it as this name.
    pub sha_tag: Option<String>,
}

/// Knobs for [`RefSyncPlanner::plan_tags`].
#[derive(Debug, Clone)]
pub struct TagPlanOptions {
    /// Explicit tag list; `None` pushes every local tag.
    pub tags: Option<Vec<String>>,
    pub ref_prefix: String,
    pub fullname: bool,
    pub force: bool,
}

impl Default for TagPlanOptions {
    fn default() -> Self {
        Self {
            tags: None,
            ref_prefix: String::new(),
            fullname: true,
            force: false,
        }
    }
}

/// Computes push mappings for one unit.
pub struct RefSyncPlanner<'a> {
    unit: &'a ProjectUnit,
    vcs: &'a dyn VcsExecutor,
}

impl<'a> RefSyncPlanner<'a> {
    pub fn new(unit: &'a ProjectUnit, vcs: &'a dyn VcsExecutor) -> Self {
        Self { unit, vcs }
    }

    /// Plan branch pushes.
    ///
    /// Returns an empty plan when the unit's `project` rules exclude it.
    /// Refs that cannot be resolved are logged and left out; a failing
    /// remote listing fails the whole plan.
    pub fn plan_heads(&self, opts: &HeadPlanOptions) -> Result<Vec<RefMapping>, SyncError> {
        self.validate()?;
        if !self.project_selected() {
            return Ok(Vec::new());
        }
        let unit = self.unit;
        let rules = &unit.rules;

        let local_heads = match &opts.selection {
            Selection::All => Some(self.vcs.list_local_heads()?),
            Selection::Explicit(_) => None,
        };
        let origins: Vec<String> = match (&opts.selection, &local_heads) {
            (Selection::Explicit(refs), _) => refs.clone(),
            (_, Some(heads)) => heads.keys().cloned().collect(),
            (_, None) => Vec::new(),
        };

        let remote_heads = self.remote_refs(|vcs, remote| vcs.list_remote_heads(remote))?;

        let wildcard = local_heads
            .as_ref()
            .and_then(|heads| self.wildcard(opts, heads));
        if let (Some(wildcard), Some(heads)) = (wildcard, &local_heads) {
            let up_to_date = heads.iter().all(|(head, sha)| {
                let dest = format!("{HEADS}{}{}", opts.ref_prefix, strip_head_prefix(head));
                remote_heads.get(&dest).is_some_and(|remote| same_commit(remote, sha))
            });
            if up_to_date {
                tracing::debug!(project = %unit.name, "remote already has every head");
                return Ok(Vec::new());
            }
            tracing::debug!(project = %unit.name, refspec = %wildcard, "pushing all heads by wildcard");
            return Ok(vec![wildcard]);
        }

        let mut remote_tags: Option<RefMap> = None;
        let mut seen = HashSet::new();
        let mut mappings = Vec::new();

        for origin in &origins {
            let normalized = strip_head_prefix(origin);
            if !seen.insert(normalized.to_string()) {
                continue;
            }

            let name = if opts.fullname {
                normalized.to_string()
            } else {
                basename(normalized).to_string()
            };
            if name.is_empty() {
                continue;
            }

            let scope = Some(unit.name.as_str());
            if !rules.is_match_with(REVISION, origin, scope, false)
                || !rules.is_match_with(REVISION, &name, scope, false)
            {
                tracing::debug!(project = %unit.name, revision = %origin, "revision filtered out");
                continue;
            }

            let Some(sha) = self.resolve(origin, &[HEADS]) else {
                continue;
            };

            let dest_name = self.destination(REVISION, &opts.ref_prefix, &name);
            let dest = format!("{HEADS}{dest_name}");
            if basename(&dest_name) == sha && !opts.force {
                tracing::warn!(
                    project = %unit.name,
                    revision = %origin,
                    "destination branch is named after its own commit id; use force to push it"
                );
            } else if remote_heads.get(&dest).is_some_and(|remote| same_commit(remote, &sha)) {
                tracing::debug!(project = %unit.name, dest = %dest, "remote already up to date");
            } else {
                mappings.push(RefMapping::new(sha.clone(), dest, opts.force));
            }

            if let Some(tag) = opts.sha_tag.as_deref().filter(|_| looks_like_sha(normalized)) {
                // Remote tags are only listed once a commit id is actually pushed.
                let tags = match remote_tags.take() {
                    Some(tags) => tags,
                    None => self.remote_refs(|vcs, remote| vcs.list_remote_tags(remote))?,
                };
                let dest = format!("{TAGS_PREFIX}{tag}");
                match tags.get(&dest) {
                    Some(remote) if same_commit(remote, &sha) => {}
                    existing => {
                        let force = opts.force || existing.is_some();
                        mappings.push(RefMapping::new(sha.clone(), dest, force));
                    }
                }
                remote_tags = Some(tags);
            }
        }

        Ok(mappings)
    }

    /// Plan tag pushes.
    ///
    /// Tags are compared by the commit they point at but pushed by ref
    /// name, so an annotated tag arrives as an annotated tag.
    /// A tag that already exists on the remote at another commit is pushed
    /// with force; one that is missing uses `opts.force`.
    pub fn plan_tags(&self, opts: &TagPlanOptions) -> Result<Vec<RefMapping>, SyncError> {
        self.validate()?;
        if !self.project_selected() {
            return Ok(Vec::new());
        }
        let unit = self.unit;
        let rules = &unit.rules;

        let remote_tags = self.remote_refs(|vcs, remote| vcs.list_remote_tags(remote))?;
        let local_tags = self.vcs.list_local_tags()?;

        let candidates: Vec<(String, Option<String>)> = match &opts.tags {
            None => local_tags.into_iter().map(|(name, sha)| (name, Some(sha))).collect(),
            Some(tags) => tags
                .iter()
                .map(|tag| {
                    let full = if tag.starts_with(TAGS_PREFIX) {
                        tag.clone()
                    } else {
                        format!("{TAGS_PREFIX}{tag}")
                    };
                    let sha = local_tags.get(&full).cloned();
                    (full, sha)
                })
                .collect(),
        };

        let mut mappings = Vec::new();
        for (full, known_sha) in candidates {
            let short = full.strip_prefix(TAGS_PREFIX).unwrap_or(&full);
            let name = if opts.fullname { short } else { basename(short) };
            if name.is_empty() {
                continue;
            }

            let scope = Some(unit.name.as_str());
            if !rules.is_match_with(TAGS, &full, scope, false)
                || !rules.is_match_with(TAGS, name, scope, false)
            {
                tracing::debug!(project = %unit.name, tag = %full, "tag filtered out");
                continue;
            }

            let sha = match known_sha {
                Some(sha) => sha,
                None => match self.resolve(&full, &[]) {
                    Some(sha) => sha,
                    None => continue,
                },
            };

            let dest_name = self.destination(TAGS, &opts.ref_prefix, name);
            if basename(&dest_name) == sha && !opts.force {
                tracing::warn!(project = %unit.name, tag = %full, "tag is named after its own commit id; skipped");
                continue;
            }

            let dest = format!("{TAGS_PREFIX}{dest_name}");
            let force = match remote_tags.get(&dest) {
                Some(remote) if same_commit(remote, &sha) => {
                    tracing::debug!(project = %unit.name, dest = %dest, "remote tag already up to date");
                    continue;
                }
                Some(_) => true,
                None => opts.force,
            };
            // The tag ref itself, so annotated tags keep their tag object.
            mappings.push(RefMapping::new(full.clone(), dest, force));
        }

        Ok(mappings)
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn validate(&self) -> Result<(), SyncError> {
        if self.unit.remote.trim().is_empty() {
            return Err(SyncError::Validation(format!(
                "project '{}' has an empty remote",
                self.unit.name
            )));
        }
        Ok(())
    }

    fn project_selected(&self) -> bool {
        let name = self.unit.name.as_str();
        let selected = self.unit.rules.is_match_with(PROJECT, name, Some(name), false);
        if !selected {
            tracing::info!(project = %self.unit.name, "project excluded by rules");
        }
        selected
    }

    /// The single `refs/heads/*` mapping, when nothing needs per-ref work.
    ///
    /// Without force, a head whose destination would be named after its own
    /// commit id sends the plan down the per-ref path, which skips it.
    fn wildcard(&self, opts: &HeadPlanOptions, heads: &RefMap) -> Option<RefMapping> {
        let names_after_sha = || {
            heads.iter().any(|(head, sha)| {
                let dest = format!("{}{}", opts.ref_prefix, strip_head_prefix(head));
                basename(&dest) == sha
            })
        };
        let eligible = opts.selection == Selection::All
            && opts.sha_tag.is_none()
            && !self.unit.rules.has_category(REVISION)
            && (opts.fullname || heads.keys().all(|h| !strip_head_prefix(h).contains('/')))
            && (opts.force || !names_after_sha());
        eligible.then(|| {
            RefMapping::new(
                format!("{HEADS}*"),
                format!("{HEADS}{}*", opts.ref_prefix),
                opts.force,
            )
        })
    }

    fn remote_refs<F>(&self, list: F) -> Result<RefMap, SyncError>
    where
        F: FnOnce(&dyn VcsExecutor, &str) -> Result<RefMap, crate::error::VcsError>,
    {
        list(self.vcs, &self.unit.remote).map_err(|source| {
            tracing::error!(project = %self.unit.name, remote = %self.unit.remote, error = %source, "remote query failed");
            SyncError::RemoteQuery {
                remote: self.unit.remote.clone(),
                source,
            }
        })
    }

    /// Try `origin`, `refs/<origin>`, then `<prefix><origin>` for each prefix.
    fn resolve(&self, origin: &str, prefixes: &[&str]) -> Option<String> {
        let mut candidates = vec![origin.to_string()];
        if !origin.starts_with("refs/") {
            candidates.push(format!("refs/{origin}"));
            candidates.extend(prefixes.iter().map(|p| format!("{p}{origin}")));
        }
        for candidate in &candidates {
            match self.vcs.resolve_revision(candidate) {
                Ok(Some(sha)) => return Some(sha),
                Ok(None) => {}
                Err(err) => {
                    tracing::error!(project = %self.unit.name, revision = %candidate, error = %err, "cannot resolve revision");
                    return None;
                }
            }
        }
        tracing::error!(project = %self.unit.name, revision = %origin, "revision not found; skipped");
        None
    }

    /// Rewrite `name`; a changed name gets the prefix, an unchanged one is
    /// rewritten again with the prefix attached.
    fn destination(&self, category: &str, prefix: &str, name: &str) -> String {
        let scope = Some(self.unit.name.as_str());
        let rewritten = self.unit.rules.replace(category, name, scope);
        if rewritten != name {
            format!("{prefix}{rewritten}")
        } else {
            self.unit
                .rules
                .replace(category, &format!("{prefix}{name}"), scope)
        }
    }
}

/// Strip `refs/remotes/<r>/`, `remotes/<r>/` and `refs/heads/`.
pub fn strip_head_prefix(origin: &str) -> &str {
    for marker in ["refs/remotes/", "remotes/"] {
        if let Some(rest) = origin.strip_prefix(marker) {
            if let Some((_, branch)) = rest.split_once('/') {
                return branch;
            }
        }
    }
    origin.strip_prefix(HEADS).unwrap_or(origin)
}

fn basename(name: &str) -> &str {
    name.rsplit('/').next().unwrap_or(name)
}

/// 7 to 40 lowercase or uppercase hex digits.
pub fn looks_like_sha(value: &str) -> bool {
    (7..=40).contains(&value.len()) && value.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Equal up to the shorter of the two (abbreviated ids match their full form).
pub fn same_commit(a: &str, b: &str) -> bool {
    !a.is_empty() && !b.is_empty() && (a.starts_with(b) || b.starts_with(a))
}
