//! `relay projects list` and `relay projects create <name>`.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use relay_core::RegistryConfig;
use relay_sync::{CachedRegistry, CreateOptions, HttpRegistry, RemoteRegistry, SshRegistry};

use super::{GlobalArgs, Workspace};

/// Query or create projects on the review server.
#[derive(Subcommand, Debug)]
pub enum ProjectsCommand {
    /// List projects known to the server.
    List(ListArgs),

    /// Create a project on the server unless it already exists.
    Create(CreateArgs),
}

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Ignore the cached listing.
    #[arg(long)]
    pub refresh: bool,
}

#[derive(Args, Debug)]
pub struct CreateArgs {
    /// Project name on the server (e.g. "platform/build").
    pub name: String,

    #[arg(long)]
    pub description: Option<String>,

    /// Project to inherit access rights from.
    #[arg(long)]
    pub parent: Option<String>,

    /// Create an initial empty commit.
    #[arg(long)]
    pub empty_commit: bool,
}

pub fn run(cmd: ProjectsCommand, global: &GlobalArgs) -> Result<()> {
    let workspace = Workspace::load(global)?;
    let registry = registry(&workspace)?;
    match cmd {
        ProjectsCommand::List(args) => list(&workspace, registry.as_ref(), args, global.json),
        ProjectsCommand::Create(args) => create(registry.as_ref(), args),
    }
}

/// Build the registry client described by the manifest defaults.
fn registry(workspace: &Workspace) -> Result<Box<dyn RemoteRegistry>> {
    let config = workspace
        .manifest
        .defaults
        .registry
        .clone()
        .context("no registry configured; add `defaults.registry` to the manifest")?;
    Ok(match config {
        RegistryConfig::Ssh { host, port, user } => {
            let mut backend = SshRegistry::new(host);
            if let Some(port) = port {
                backend = backend.port(port);
            }
            if let Some(user) = user {
                backend = backend.user(user);
            }
            Box::new(CachedRegistry::new(backend))
        }
        RegistryConfig::Http { url, token_env } => {
            let mut backend = HttpRegistry::new(url);
            if let Some(var) = token_env {
                let token = std::env::var(&var)
                    .with_context(|| format!("registry token variable '{var}' is not set"))?;
                backend = backend.token(token);
            }
            Box::new(CachedRegistry::new(backend))
        }
    })
}

#[derive(Tabled, Serialize)]
struct ProjectRow {
    #[tabled(rename = "project")]
    name: String,
    #[tabled(rename = "in manifest", display_with = "check_mark")]
    in_manifest: bool,
}

fn check_mark(listed: &bool) -> String {
    if *listed { "✓".to_string() } else { String::new() }
}

fn list(workspace: &Workspace, registry: &dyn RemoteRegistry, args: ListArgs, json: bool) -> Result<()> {
    let projects = registry
        .list_projects(args.refresh)
        .context("failed to list projects on the server")?;

    let rows: Vec<ProjectRow> = projects
        .into_iter()
        .map(|name| ProjectRow {
            in_manifest: workspace.manifest.find(&name).is_some(),
            name,
        })
        .collect();

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&rows).context("failed to serialize project JSON")?
        );
        return Ok(());
    }
    if rows.is_empty() {
        println!("No projects on the server.");
        return Ok(());
    }
    let listed = rows.iter().filter(|r| r.in_manifest).count();
    let total = rows.len();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
    println!("{total} projects on the server, {listed} in the manifest");
    Ok(())
}

fn create(registry: &dyn RemoteRegistry, args: CreateArgs) -> Result<()> {
    let opts = CreateOptions {
        description: args.description,
        parent: args.parent,
        empty_commit: args.empty_commit,
    };
    let created = registry
        .ensure_project(&args.name, &opts)
        .with_context(|| format!("failed to create '{}'", args.name))?;
    if created {
        println!("✓ Created '{}'", args.name);
    } else {
        println!("✓ '{}' already exists", args.name);
    }
    Ok(())
}
