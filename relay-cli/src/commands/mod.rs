//! Subcommands and the plumbing they share: global flags, manifest loading,
//! two-pass dispatch and result rendering.

pub mod diff;
pub mod discover;
pub mod mirror;
pub mod projects;
pub mod push;
pub mod rules;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use relay_core::{manifest, Manifest, ManifestError, ProjectUnit};
use relay_dispatch::{DispatchOutcome, DispatchReport, Dispatcher, FailurePolicy, Outcome};
use relay_sync::SyncError;

// ---------------------------------------------------------------------------
// Global flags
// ---------------------------------------------------------------------------

#[derive(Args, Debug)]
pub struct GlobalArgs {
    /// Manifest to use instead of ~/.relay/manifest.yaml.
    #[arg(long, global = true, value_name = "PATH")]
    pub manifest: Option<PathBuf>,

    /// Projects processed at once (default: manifest `jobs`, else 1).
    #[arg(long, short = 'j', global = true, value_name = "N")]
    pub jobs: Option<usize>,

    /// Start no new project once one has failed.
    #[arg(long, global = true)]
    pub fail_fast: bool,

    /// More logging (-v debug, -vv trace). `RUST_LOG` takes precedence.
    #[arg(long, short = 'v', global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Emit machine-readable JSON on stdout.
    #[arg(long, global = true)]
    pub json: bool,

    /// Write log lines to stderr as JSON.
    #[arg(long, global = true)]
    pub log_json: bool,
}

pub fn init_tracing(verbose: u8, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

// ---------------------------------------------------------------------------
// Manifest
// ---------------------------------------------------------------------------

/// A loaded manifest and where it came from.
pub struct Workspace {
    pub path: PathBuf,
    pub manifest: Manifest,
}

impl Workspace {
    pub fn manifest_path(global: &GlobalArgs) -> Result<PathBuf> {
        match &global.manifest {
            Some(path) => Ok(path.clone()),
            None => manifest::manifest_path().context("could not determine home directory"),
        }
    }

    pub fn load(global: &GlobalArgs) -> Result<Self> {
        let path = Self::manifest_path(global)?;
        let manifest = manifest::load_from(&path).with_context(|| {
            format!(
                "failed to load manifest '{}'; run `relay discover <root> --write` first",
                path.display()
            )
        })?;
        Ok(Self { path, manifest })
    }

    /// Like [`Workspace::load`], but a missing manifest starts out empty.
    pub fn load_or_default(global: &GlobalArgs) -> Result<Self> {
        let path = Self::manifest_path(global)?;
        let manifest = match manifest::load_from(&path) {
            Ok(manifest) => manifest,
            Err(ManifestError::NotFound { .. }) => Manifest::default(),
            Err(err) => {
                return Err(err).with_context(|| format!("failed to load manifest '{}'", path.display()))
            }
        };
        Ok(Self { path, manifest })
    }

    pub fn save(&mut self) -> Result<()> {
        manifest::save_to(&self.path, &mut self.manifest)
            .with_context(|| format!("failed to save manifest '{}'", self.path.display()))
    }

    /// Directory that relative project paths are resolved against.
    pub fn base_dir(&self) -> PathBuf {
        self.path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Units named in `names`, in manifest order; every unit when empty.
    pub fn units(&self, names: &[String]) -> Result<Vec<ProjectUnit>> {
        let units = self
            .manifest
            .units(&self.base_dir())
            .with_context(|| format!("invalid manifest '{}'", self.path.display()))?;
        if let Some(unknown) = names
            .iter()
            .find(|name| !units.iter().any(|u| u.name.as_str() == name.as_str()))
        {
            bail!("unknown project '{unknown}'");
        }
        if names.is_empty() {
            return Ok(units);
        }
        Ok(units
            .into_iter()
            .filter(|u| names.iter().any(|n| n == u.name.as_str()))
            .collect())
    }

    pub fn unit(&self, name: &str) -> Result<ProjectUnit> {
        let mut units = self.units(&[name.to_string()])?;
        units.pop().with_context(|| format!("unknown project '{name}'"))
    }

    /// Pool size and failure policy from the flags, then the manifest.
    pub fn dispatcher(&self, global: &GlobalArgs) -> Dispatcher {
        let defaults = &self.manifest.defaults;
        let jobs = global.jobs.or(defaults.jobs).unwrap_or(1);
        let policy = if global.fail_fast || defaults.fail_fast {
            FailurePolicy::StopOnFailure
        } else {
            FailurePolicy::KeepGoing
        };
        Dispatcher::new(jobs).policy(policy)
    }
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// Run `work` over `units`: `parallel` units through the pool, then the
/// others one at a time. Both passes end up in one report.
pub fn dispatch<T, F>(dispatcher: &Dispatcher, units: Vec<ProjectUnit>, work: F) -> Result<DispatchReport<T>>
where
    T: Outcome + Send + 'static,
    F: Fn(&ProjectUnit) -> Result<T> + Send + Sync + 'static,
{
    let (parallel, serial): (Vec<_>, Vec<_>) = units.into_iter().partition(|u| u.parallel);
    let work = Arc::new(work);
    let mut report = DispatchReport::default();

    if !parallel.is_empty() {
        let work = work.clone();
        report.absorb(dispatcher.run(parallel, move |unit: &ProjectUnit| work(unit))?);
    }
    if !serial.is_empty() {
        tracing::info!(count = serial.len(), "running non-parallel projects one at a time");
        report.absorb(
            dispatcher
                .sequential()
                .run(serial, move |unit: &ProjectUnit| work(unit))?,
        );
    }
    Ok(report)
}

/// What one project produced: its outcome, or the error that ended it.
///
/// A failed project is a result rather than an error, so the failure
/// policy decides whether the rest of the batch goes on.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum UnitResult<T> {
    Done(T),
    Failed { error: String },
}

impl<T> Outcome for UnitResult<T> {
    fn succeeded(&self) -> bool {
        matches!(self, UnitResult::Done(_))
    }
}

impl<T> UnitResult<T> {
    /// Keep project errors as a failed result; anything that would fail
    /// every project stays an error.
    pub fn from_sync(result: Result<T, SyncError>, action: &str, project: &str) -> Result<Self> {
        match result {
            Ok(value) => Ok(UnitResult::Done(value)),
            Err(err) if err.is_unit_failure() => {
                tracing::error!(project, error = %err, "{action} failed");
                Ok(UnitResult::Failed {
                    error: format!("{action} failed for '{project}': {err}"),
                })
            }
            Err(err) => Err(err).with_context(|| format!("{action} failed for '{project}'")),
        }
    }

    pub fn describe(&self, detail: impl Fn(&T) -> String) -> String {
        match self {
            UnitResult::Done(value) => detail(value),
            UnitResult::Failed { error } => error.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

#[derive(Tabled)]
struct UnitRow {
    #[tabled(rename = "project")]
    project: String,
    #[tabled(rename = "status")]
    status: &'static str,
    #[tabled(rename = "detail")]
    detail: String,
}

/// Print one row per unit, or the whole report as JSON.
pub fn print_report<T, D>(report: &DispatchReport<T>, json: bool, detail: D) -> Result<()>
where
    T: Serialize,
    D: Fn(&T) -> String,
{
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(report).context("failed to serialize report JSON")?
        );
        return Ok(());
    }
    if report.units.is_empty() {
        println!("No projects selected.");
        return Ok(());
    }

    let rows: Vec<UnitRow> = report
        .units
        .iter()
        .map(|unit| UnitRow {
            project: unit.label.clone(),
            status: unit.outcome.as_str(),
            detail: match (&unit.error, &unit.value) {
                (Some(err), _) => err.clone(),
                (None, Some(value)) => detail(value),
                (None, None) => String::new(),
            },
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
    println!("{}", summary(report));
    Ok(())
}

fn summary<T>(report: &DispatchReport<T>) -> String {
    let mut parts = vec![format!("{} ok", report.count(DispatchOutcome::Succeeded))
        .green()
        .to_string()];
    let failed = report.count(DispatchOutcome::Failed);
    if failed > 0 {
        parts.push(format!("{failed} failed").yellow().to_string());
    }
    let errored = report.count(DispatchOutcome::Errored);
    if errored > 0 {
        parts.push(format!("{errored} errored").red().to_string());
    }
    let cancelled = report.count(DispatchOutcome::Cancelled);
    if cancelled > 0 {
        parts.push(format!("{cancelled} cancelled").bright_black().to_string());
    }
    parts.join(", ")
}

/// Turn an unsuccessful batch into a nonzero exit.
pub fn finish<T>(report: &DispatchReport<T>) -> Result<()> {
    if report.success() {
        return Ok(());
    }
    let total = report.units.len();
    let incomplete = total - report.count(DispatchOutcome::Succeeded);
    if report.cancelled {
        bail!("{incomplete} of {total} projects did not complete; batch cancelled");
    }
    bail!("{incomplete} of {total} projects failed")
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_sync::VcsError;

    #[test]
    fn project_error_becomes_a_failed_result() {
        let result: Result<u32, SyncError> = Err(SyncError::Validation("no remote".into()));
        let unit = UnitResult::from_sync(result, "push", "app").expect("unit failure is a value");
        assert!(!unit.succeeded());
        assert_eq!(
            unit.describe(|n| n.to_string()),
            "push failed for 'app': invalid input: no remote"
        );
    }

    #[test]
    fn missing_git_stays_an_error() {
        let result: Result<u32, SyncError> = Err(SyncError::Vcs(VcsError::Spawn {
            program: "git".into(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        }));
        let err = UnitResult::from_sync(result, "push", "app").unwrap_err();
        assert!(err.to_string().contains("push failed for 'app'"));
    }

    #[test]
    fn done_result_succeeds_and_serializes_transparently() {
        let unit = UnitResult::from_sync(Ok(7u32), "push", "app").unwrap();
        assert!(unit.succeeded());
        assert_eq!(serde_json::to_string(&unit).unwrap(), "7");
        let failed: UnitResult<u32> = UnitResult::Failed { error: "boom".into() };
        assert_eq!(serde_json::to_string(&failed).unwrap(), r#"{"error":"boom"}"#);
    }
}
