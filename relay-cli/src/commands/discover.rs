//! `relay discover <root>`: find working copies and optionally add them to
//! the manifest.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use tabled::{settings::Style, Table, Tabled};

use relay_discover::discover;

use super::{GlobalArgs, Workspace};

/// Arguments for `relay discover`.
#[derive(Args, Debug)]
pub struct DiscoverArgs {
    /// Directory to scan.
    pub root: PathBuf,

    /// How many levels below ROOT to look.
    #[arg(long, default_value_t = 3)]
    pub depth: usize,

    /// Add new working copies to the manifest.
    #[arg(long)]
    pub write: bool,
}

#[derive(Tabled)]
struct RepoRow {
    #[tabled(rename = "name")]
    name: String,
    #[tabled(rename = "path")]
    path: String,
    #[tabled(rename = "remote")]
    remote: String,
}

impl DiscoverArgs {
    pub fn run(self, global: &GlobalArgs) -> Result<()> {
        let root = self
            .root
            .canonicalize()
            .with_context(|| format!("cannot resolve path '{}'", self.root.display()))?;
        let repos = discover(&root, self.depth)
            .with_context(|| format!("failed to scan '{}'", root.display()))?;

        if global.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&repos).context("failed to serialize discover JSON")?
            );
        } else if repos.is_empty() {
            println!("No working copies under '{}'.", root.display());
        } else {
            let rows: Vec<RepoRow> = repos
                .iter()
                .map(|repo| RepoRow {
                    name: repo.name.clone(),
                    path: repo.path.display().to_string(),
                    remote: repo.remote_url.clone().unwrap_or_default(),
                })
                .collect();
            let mut table = Table::new(rows);
            table.with(Style::rounded());
            println!("{table}");
        }

        if !self.write || repos.is_empty() {
            return Ok(());
        }

        let mut workspace = Workspace::load_or_default(global)?;
        let base = workspace.base_dir();
        let base = base.canonicalize().unwrap_or(base);
        let added = repos
            .iter()
            .filter(|repo| workspace.manifest.add_project(repo.to_entry(&base)))
            .count();
        workspace.save()?;
        if !global.json {
            println!(
                "✓ Added {added} project(s) to '{}' ({} already listed)",
                workspace.path.display(),
                repos.len() - added
            );
        }
        Ok(())
    }
}
