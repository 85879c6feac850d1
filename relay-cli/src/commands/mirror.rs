//! `relay mirror`: copy each project's tree source into its working copy,
//! commit the result and push it.

use anyhow::Result;
use clap::Args;

use relay_sync::{
    mirror_unit, GitExecutor, HeadPlanOptions, MirrorOptions, MirrorOutcome, PushOptions, Selection,
};

use super::{dispatch, finish, print_report, GlobalArgs, UnitResult, Workspace};

/// Arguments for `relay mirror`.
#[derive(Args, Debug, Clone)]
pub struct MirrorArgs {
    /// Projects to mirror; every project with a tree source when omitted.
    pub projects: Vec<String>,

    /// Replace the working copy wholesale instead of syncing file by file.
    #[arg(long)]
    pub quick: bool,

    /// Report the tree changes without touching anything.
    #[arg(long)]
    pub dry_run: bool,

    /// Commit message (default: `Mirror <source>`).
    #[arg(long, short = 'm', value_name = "MESSAGE")]
    pub message: Option<String>,

    /// Commit only; do not push.
    #[arg(long)]
    pub no_push: bool,

    /// Overwrite remote branches that moved.
    #[arg(long)]
    pub force: bool,
}

impl MirrorArgs {
    pub fn run(self, global: &GlobalArgs) -> Result<()> {
        let workspace = Workspace::load(global)?;
        let mut units = workspace.units(&self.projects)?;
        if self.projects.is_empty() {
            units.retain(|unit| unit.tree.is_some());
        }
        if units.is_empty() {
            println!("No projects with a tree source.");
            return Ok(());
        }
        let prefix = workspace.manifest.defaults.ref_prefix.clone();

        let report = dispatch(&workspace.dispatcher(global), units, move |unit| {
            let push = (!self.no_push).then(|| PushOptions {
                heads: Some(HeadPlanOptions {
                    selection: match &unit.revision {
                        Some(rev) => Selection::Explicit(vec![rev.clone()]),
                        None => Selection::All,
                    },
                    ref_prefix: prefix.clone(),
                    force: self.force,
                    ..HeadPlanOptions::default()
                }),
                tags: None,
                dry_run: self.dry_run,
            });
            let opts = MirrorOptions {
                quick: self.quick.then_some(true),
                dry_run: self.dry_run,
                message: self.message.clone(),
                push,
            };
            let vcs = GitExecutor::new(&unit.path);
            UnitResult::from_sync(mirror_unit(unit, &vcs, &opts), "mirror", unit.name.as_str())
        })?;

        print_report(&report, global.json, |result| result.describe(describe))?;
        finish(&report)
    }
}

fn describe(outcome: &MirrorOutcome) -> String {
    let report = &outcome.report;
    if report.is_empty() {
        return "tree unchanged".to_string();
    }
    let mut text = format!(
        "{} added, {} updated, {} removed, {} relinked",
        report.added, report.updated, report.removed, report.relinked
    );
    if outcome.committed {
        text.push_str("; committed");
    }
    if let Some(push) = outcome.push.as_ref().filter(|p| p.pushed) {
        text.push_str(&format!("; pushed {} ref(s)", push.mappings.len()));
    }
    text
}
