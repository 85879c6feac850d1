//! relay: publish many working copies to a code-review server.
//!
//! # Usage
//!
//! ```text
//! relay push [PROJECT..] [--tags] [--all-heads] [--rev REF..] [--force] [--prefix P] [--dry-run]
//! relay mirror [PROJECT..] [--quick] [--dry-run] [--no-push]
//! relay diff <PROJECT>
//! relay projects list [--refresh]
//! relay projects create <NAME> [--description D] [--parent P] [--empty-commit]
//! relay rules check <CATEGORY> <VALUE> [--name N] [--strict] [--pattern TEXT..]
//! relay rules rewrite <CATEGORY> <VALUE> [--name N] [--pattern TEXT..]
//! relay discover <ROOT> [--depth N] [--write]
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    diff::DiffArgs, discover::DiscoverArgs, mirror::MirrorArgs, projects::ProjectsCommand,
    push::PushArgs, rules::RulesCommand, GlobalArgs,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "relay",
    version,
    about = "Push branches, tags and mirrored trees of many projects to a review server",
    long_about = None,
)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Push branches (and tags) of each project to its remote.
    Push(PushArgs),

    /// Copy each project's tree source into its working copy, commit and push.
    Mirror(MirrorArgs),

    /// Preview what `mirror` would change for one project.
    Diff(DiffArgs),

    /// Query or create projects on the review server.
    Projects {
        #[command(subcommand)]
        command: ProjectsCommand,
    },

    /// Evaluate pattern rules against a value.
    Rules {
        #[command(subcommand)]
        command: RulesCommand,
    },

    /// Find git working copies under a directory.
    Discover(DiscoverArgs),
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    commands::init_tracing(cli.global.verbose, cli.global.log_json);
    match cli.command {
        Commands::Push(args) => args.run(&cli.global),
        Commands::Mirror(args) => args.run(&cli.global),
        Commands::Diff(args) => args.run(&cli.global),
        Commands::Projects { command } => commands::projects::run(command, &cli.global),
        Commands::Rules { command } => commands::rules::run(command, &cli.global),
        Commands::Discover(args) => args.run(&cli.global),
    }
}
