//! `relay rules check|rewrite`: evaluate pattern rules from the command line.

use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand};
use serde_json::json;

use relay_core::PatternRuleSet;

use super::{GlobalArgs, Workspace};

/// Evaluate pattern rules against a value.
#[derive(Subcommand, Debug)]
pub enum RulesCommand {
    /// Exit successfully when VALUE is selected by the rules.
    Check(RuleArgs),

    /// Print VALUE after the category's rewrite steps.
    Rewrite(RuleArgs),
}

#[derive(Args, Debug)]
pub struct RuleArgs {
    /// Rule category: project, revision, tags, file, dir or path.
    /// A leading `!` inverts a check.
    pub category: String,

    pub value: String,

    /// Prefer the rule keyed on this name.
    #[arg(long)]
    pub name: Option<String>,

    /// Ignore the nameless rule when no keyed rule applies.
    #[arg(long)]
    pub strict: bool,

    /// Rule text to evaluate instead of the manifest's (repeatable).
    #[arg(long = "pattern", short = 'p', value_name = "TEXT")]
    pub patterns: Vec<String>,

    /// Use this project's rules from the manifest.
    #[arg(long, conflicts_with = "patterns")]
    pub project: Option<String>,
}

pub fn run(cmd: RulesCommand, global: &GlobalArgs) -> Result<()> {
    match cmd {
        RulesCommand::Check(args) => check(args, global),
        RulesCommand::Rewrite(args) => rewrite(args, global),
    }
}

fn rule_set(args: &RuleArgs, global: &GlobalArgs) -> Result<PatternRuleSet> {
    if !args.patterns.is_empty() {
        let mut rules = PatternRuleSet::new();
        for text in &args.patterns {
            rules
                .try_add(text)
                .with_context(|| format!("invalid rule '{text}'"))?;
        }
        return Ok(rules);
    }
    let workspace = Workspace::load(global)?;
    match &args.project {
        Some(name) => Ok(workspace.unit(name)?.rules),
        None => Ok(workspace.manifest.default_rules()),
    }
}

fn check(args: RuleArgs, global: &GlobalArgs) -> Result<()> {
    let rules = rule_set(&args, global)?;
    let matched = rules.is_match_with(&args.category, &args.value, args.name.as_deref(), args.strict);
    if global.json {
        println!(
            "{}",
            json!({ "category": args.category, "value": args.value, "matched": matched })
        );
    } else if matched {
        println!("✓ '{}' matches {}", args.value, args.category);
    }
    if !matched {
        bail!("'{}' does not match {}", args.value, args.category);
    }
    Ok(())
}

fn rewrite(args: RuleArgs, global: &GlobalArgs) -> Result<()> {
    let rules = rule_set(&args, global)?;
    let rewritten = match rules.select(&args.category, args.name.as_deref(), args.strict) {
        Some(rule) => rule.rewrite(&args.value),
        None => args.value.clone(),
    };
    if global.json {
        println!(
            "{}",
            json!({ "category": args.category, "value": args.value, "rewritten": rewritten })
        );
    } else {
        println!("{rewritten}");
    }
    Ok(())
}
