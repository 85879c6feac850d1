//! Version-control executor.
//!
//! [`VcsExecutor`] is the seam between the planners and the outside world:
//! planners ask it for ref listings and hand it refspecs, nothing else.
//! [`GitExecutor`] implements it by spawning `git` in a working copy, one
//! blocking call at a time.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use chrono::{DateTime, Utc};

use crate::error::VcsError;

/// Full ref name (`refs/heads/main`, `refs/tags/v1`) to commit id.
pub type RefMap = BTreeMap<String, String>;

/// Operations the planners and the apply step need from a VCS.
pub trait VcsExecutor: Send + Sync {
    /// Local branch heads, keyed by full ref name.
    fn list_local_heads(&self) -> Result<RefMap, VcsError>;

    /// Local tags, keyed by full ref name; annotated tags map to the
    /// commit they point at.
    fn list_local_tags(&self) -> Result<RefMap, VcsError>;

    fn list_remote_heads(&self, remote: &str) -> Result<RefMap, VcsError>;

    fn list_remote_tags(&self, remote: &str) -> Result<RefMap, VcsError>;

    /// Commit id for `rev`, or `None` when it does not name a commit.
    fn resolve_revision(&self, rev: &str) -> Result<Option<String>, VcsError>;

    /// Push all `refspecs` to `remote` in one batch.
    fn push(&self, remote: &str, refspecs: &[String]) -> Result<(), VcsError>;

    /// Stage every change in the working copy, deletions included.
    fn stage_all(&self) -> Result<(), VcsError>;

    fn has_staged_changes(&self) -> Result<bool, VcsError>;

    /// Commit the index with `timestamp` as author and committer date.
    fn commit(&self, message: &str, timestamp: DateTime<Utc>) -> Result<(), VcsError>;
}

// ---------------------------------------------------------------------------
// GitExecutor
// ---------------------------------------------------------------------------

/// Runs `git` inside one working copy.
#[derive(Debug, Clone)]
pub struct GitExecutor {
    workdir: PathBuf,
    program: String,
}

impl GitExecutor {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
            program: "git".to_string(),
        }
    }

    /// Use a different `git` binary.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.current_dir(&self.workdir).args(args);
        cmd
    }

    fn output(&self, mut cmd: Command, args: &[&str]) -> Result<Output, VcsError> {
        tracing::debug!(workdir = %self.workdir.display(), "{} {}", self.program, args.join(" "));
        cmd.output().map_err(|source| VcsError::Spawn {
            program: self.program.clone(),
            source,
        })
    }

    /// Run and require success; returns stdout.
    fn run(&self, args: &[&str]) -> Result<String, VcsError> {
        let output = self.output(self.command(args), args)?;
        if !output.status.success() {
            return Err(self.failed(args, &output));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn failed(&self, args: &[&str], output: &Output) -> VcsError {
        VcsError::CommandFailed {
            program: self.program.clone(),
            args: args.iter().map(|a| a.to_string()).collect(),
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        }
    }
}

impl VcsExecutor for GitExecutor {
    fn list_local_heads(&self) -> Result<RefMap, VcsError> {
        let out = self.run(&["for-each-ref", "--format=%(objectname) %(refname)", "refs/heads"])?;
        parse_ref_listing(&self.program, &out)
    }

    fn list_local_tags(&self) -> Result<RefMap, VcsError> {
        let args = ["show-ref", "--tags", "-d"];
        let output = self.output(self.command(&args), &args)?;
        // show-ref exits 1 when there is nothing to show.
        if output.status.code() == Some(1) && output.stdout.is_empty() {
            return Ok(RefMap::new());
        }
        if !output.status.success() {
            return Err(self.failed(&args, &output));
        }
        parse_ref_listing(&self.program, &String::from_utf8_lossy(&output.stdout))
    }

    fn list_remote_heads(&self, remote: &str) -> Result<RefMap, VcsError> {
        let out = self.run(&["ls-remote", "--heads", remote])?;
        parse_ref_listing(&self.program, &out)
    }

    fn list_remote_tags(&self, remote: &str) -> Result<RefMap, VcsError> {
        let out = self.run(&["ls-remote", "--tags", remote])?;
        parse_ref_listing(&self.program, &out)
    }

    fn resolve_revision(&self, rev: &str) -> Result<Option<String>, VcsError> {
        let spec = format!("{rev}^{{commit}}");
        let args = ["rev-parse", "--verify", "--quiet", spec.as_str()];
        let output = self.output(self.command(&args), &args)?;
        if !output.status.success() {
            return Ok(None);
        }
        let sha = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok((!sha.is_empty()).then_some(sha))
    }

    fn push(&self, remote: &str, refspecs: &[String]) -> Result<(), VcsError> {
        let mut args = vec!["push", remote];
        args.extend(refspecs.iter().map(String::as_str));
        self.run(&args)?;
        Ok(())
    }

    fn stage_all(&self) -> Result<(), VcsError> {
        self.run(&["add", "--all", "."])?;
        Ok(())
    }

    fn has_staged_changes(&self) -> Result<bool, VcsError> {
        let args = ["diff", "--cached", "--quiet"];
        let output = self.output(self.command(&args), &args)?;
        match output.status.code() {
            Some(0) => Ok(false),
            Some(1) => Ok(true),
            _ => Err(self.failed(&args, &output)),
        }
    }

    fn commit(&self, message: &str, timestamp: DateTime<Utc>) -> Result<(), VcsError> {
        let args = ["commit", "--quiet", "--message", message];
        let date = timestamp.to_rfc3339();
        let mut cmd = self.command(&args);
        cmd.env("GIT_AUTHOR_DATE", &date)
            .env("GIT_COMMITTER_DATE", &date);
        let output = self.output(cmd, &args)?;
        if !output.status.success() {
            return Err(self.failed(&args, &output));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse `<sha> <ref>` lines (space or tab separated).
///
/// A peeled `<ref>^{}` entry replaces the tag object id with the commit id.
pub fn parse_ref_listing(program: &str, out: &str) -> Result<RefMap, VcsError> {
    let mut refs = RefMap::new();
    let mut peeled = Vec::new();
    for line in out.lines().filter(|l| !l.trim().is_empty()) {
        let mut parts = line.split_whitespace();
        let (Some(sha), Some(name), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(VcsError::Parse {
                program: program.to_string(),
                line: line.to_string(),
            });
        };
        match name.strip_suffix("^{}") {
            Some(base) => peeled.push((base.to_string(), sha.to_string())),
            None => {
                refs.insert(name.to_string(), sha.to_string());
            }
        }
    }
    refs.extend(peeled);
    Ok(refs)
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: &str = "1111111111111111111111111111111111111111";
    const B: &str = "2222222222222222222222222222222222222222";

    #[test]
    fn parses_ls_remote_output() {
        let out = format!("{A}\trefs/heads/main\n{B}\trefs/heads/dev\n");
        let refs = parse_ref_listing("git", &out).expect("parse");
        assert_eq!(refs.get("refs/heads/main").map(String::as_str), Some(A));
        assert_eq!(refs.len(), 2);
    }

    #[test]
    fn peeled_entry_wins_regardless_of_order() {
        let out = format!("{B} refs/tags/v1^{{}}\n{A} refs/tags/v1\n");
        let refs = parse_ref_listing("git", &out).expect("parse");
        assert_eq!(refs.get("refs/tags/v1").map(String::as_str), Some(B));
        assert_eq!(refs.len(), 1);
    }

    #[test]
    fn malformed_line_is_an_error() {
        let err = parse_ref_listing("git", "just-one-field\n").unwrap_err();
        assert!(matches!(err, VcsError::Parse { .. }));
    }

    #[test]
    fn missing_program_is_a_spawn_error() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let git = GitExecutor::new(dir.path()).with_program("relay-no-such-git");
        let err = git.list_local_heads().unwrap_err();
        assert!(matches!(err, VcsError::Spawn { .. }));
    }
}
