//! `relay push`: plan branch and tag mappings per project and push them.

use anyhow::Result;
use clap::Args;

use relay_core::{ProjectUnit, RefMapping};
use relay_sync::{
    push_unit, GitExecutor, HeadPlanOptions, PushOptions, PushOutcome, Selection, TagPlanOptions,
};

use super::{dispatch, finish, print_report, GlobalArgs, UnitResult, Workspace};

/// Arguments for `relay push`.
#[derive(Args, Debug, Clone)]
pub struct PushArgs {
    /// Projects to push; every project when omitted.
    pub projects: Vec<String>,

    /// Branch, ref or commit id to push instead of the project's revision.
    #[arg(long = "rev", value_name = "REF")]
    pub revisions: Vec<String>,

    /// Push every local branch.
    #[arg(long, conflicts_with = "revisions")]
    pub all_heads: bool,

    /// Push tags as well.
    #[arg(long)]
    pub tags: bool,

    /// Overwrite remote refs that moved.
    #[arg(long)]
    pub force: bool,

    /// Destination name prefix (default: manifest `ref_prefix`).
    #[arg(long, value_name = "PREFIX")]
    pub prefix: Option<String>,

    /// Keep hierarchical branch names instead of their last component.
    #[arg(long)]
    pub fullname: bool,

    /// Tag a pushed commit id with this name as well.
    #[arg(long, value_name = "TAG")]
    pub sha_tag: Option<String>,

    /// Show the mappings without pushing.
    #[arg(long)]
    pub dry_run: bool,
}

impl PushArgs {
    pub fn run(self, global: &GlobalArgs) -> Result<()> {
        let workspace = Workspace::load(global)?;
        let units = workspace.units(&self.projects)?;
        let prefix = self
            .prefix
            .clone()
            .unwrap_or_else(|| workspace.manifest.defaults.ref_prefix.clone());
        let dry_run = self.dry_run;

        let report = dispatch(&workspace.dispatcher(global), units, move |unit| {
            let vcs = GitExecutor::new(&unit.path);
            let result = push_unit(unit, &vcs, &self.options(unit, &prefix));
            UnitResult::from_sync(result, "push", unit.name.as_str())
        })?;

        print_report(&report, global.json, |result| {
            result.describe(|outcome| describe(outcome, dry_run))
        })?;
        finish(&report)
    }

    fn options(&self, unit: &ProjectUnit, prefix: &str) -> PushOptions {
        let selection = if self.all_heads {
            Selection::All
        } else if !self.revisions.is_empty() {
            Selection::Explicit(self.revisions.clone())
        } else {
            match &unit.revision {
                Some(rev) => Selection::Explicit(vec![rev.clone()]),
                None => Selection::All,
            }
        };
        PushOptions {
            heads: Some(HeadPlanOptions {
                selection,
                ref_prefix: prefix.to_string(),
                fullname: self.fullname,
                force: self.force,
                sha_tag: self.sha_tag.clone(),
            }),
            tags: self.tags.then(|| TagPlanOptions {
                ref_prefix: prefix.to_string(),
                force: self.force,
                ..TagPlanOptions::default()
            }),
            dry_run: self.dry_run,
        }
    }
}

fn describe(outcome: &PushOutcome, dry_run: bool) -> String {
    if outcome.mappings.is_empty() {
        return "up to date".to_string();
    }
    let refspecs: Vec<String> = outcome.mappings.iter().map(RefMapping::refspec).collect();
    let verb = if dry_run { "would push" } else { "pushed" };
    format!("{verb}:\n{}", refspecs.join("\n"))
}
