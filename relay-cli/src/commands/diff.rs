//! `relay diff <project>`: preview what `relay mirror` would change.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use relay_core::TreeChangeKind;
use relay_sync::diff_unit;

use super::{GlobalArgs, Workspace};

/// Arguments for `relay diff`.
#[derive(Args, Debug)]
pub struct DiffArgs {
    /// Project to diff.
    pub project: String,
}

impl DiffArgs {
    pub fn run(self, global: &GlobalArgs) -> Result<()> {
        let workspace = Workspace::load(global)?;
        let unit = workspace.unit(&self.project)?;
        let result =
            diff_unit(&unit).with_context(|| format!("diff failed for '{}'", self.project))?;

        if global.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&result).context("failed to serialize diff JSON")?
            );
            return Ok(());
        }
        if result.diffs.is_empty() {
            println!("No differences for '{}'.", result.project);
            return Ok(());
        }

        for diff in &result.diffs {
            let marker = match diff.change.kind {
                TreeChangeKind::Add => "A".green(),
                TreeChangeKind::Update => "M".yellow(),
                TreeChangeKind::Remove => "D".red(),
                TreeChangeKind::Relink => "L".cyan(),
            };
            println!("{marker} {}", diff.change.path.display());
            if let Some(text) = &diff.unified_diff {
                print!("{text}");
                if !text.ends_with('\n') {
                    println!();
                }
            }
        }
        println!("{} change(s)", result.diffs.len());
        Ok(())
    }
}
