//! In-memory `VcsExecutor` for planner tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use relay_sync::{RefMap, VcsError, VcsExecutor};

pub const SHA_A: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
pub const SHA_B: &str = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";
pub const SHA_C: &str = "cccccccccccccccccccccccccccccccccccccccc";

#[derive(Default)]
pub struct FakeVcs {
    pub local_heads: RefMap,
    pub local_tags: RefMap,
    pub remote_heads: RefMap,
    pub remote_tags: RefMap,
    /// Extra revisions `resolve_revision` knows about.
    pub revisions: HashMap<String, String>,
    pub remote_down: bool,
    pub push_fails: bool,
    pub staged: bool,
    pub pushed: Mutex<Vec<(String, Vec<String>)>>,
    pub commits: Mutex<Vec<(String, DateTime<Utc>)>>,
    pub remote_queries: Mutex<usize>,
}

impl FakeVcs {
    pub fn head(mut self, name: &str, sha: &str) -> Self {
        self.local_heads.insert(format!("refs/heads/{name}"), sha.to_string());
        self
    }

    pub fn tag(mut self, name: &str, sha: &str) -> Self {
        self.local_tags.insert(format!("refs/tags/{name}"), sha.to_string());
        self
    }

    pub fn remote_head(mut self, name: &str, sha: &str) -> Self {
        self.remote_heads.insert(format!("refs/heads/{name}"), sha.to_string());
        self
    }

    pub fn remote_tag(mut self, name: &str, sha: &str) -> Self {
        self.remote_tags.insert(format!("refs/tags/{name}"), sha.to_string());
        self
    }

    pub fn pushed(&self) -> Vec<(String, Vec<String>)> {
        self.pushed.lock().unwrap().clone()
    }

    fn remote(&self) -> Result<(), VcsError> {
        *self.remote_queries.lock().unwrap() += 1;
        if self.remote_down {
            return Err(VcsError::Parse {
                program: "git".into(),
                line: "fatal: could not read from remote repository".into(),
            });
        }
        Ok(())
    }
}

impl VcsExecutor for FakeVcs {
    fn list_local_heads(&self) -> Result<RefMap, VcsError> {
        Ok(self.local_heads.clone())
    }

    fn list_local_tags(&self) -> Result<RefMap, VcsError> {
        Ok(self.local_tags.clone())
    }

    fn list_remote_heads(&self, _remote: &str) -> Result<RefMap, VcsError> {
        self.remote()?;
        Ok(self.remote_heads.clone())
    }

    fn list_remote_tags(&self, _remote: &str) -> Result<RefMap, VcsError> {
        self.remote()?;
        Ok(self.remote_tags.clone())
    }

    fn resolve_revision(&self, rev: &str) -> Result<Option<String>, VcsError> {
        if let Some(sha) = self
            .revisions
            .get(rev)
            .or_else(|| self.local_heads.get(rev))
            .or_else(|| self.local_tags.get(rev))
        {
            return Ok(Some(sha.clone()));
        }
        let is_sha = rev.len() == 40 && rev.bytes().all(|b| b.is_ascii_hexdigit());
        Ok(is_sha.then(|| rev.to_string()))
    }

    fn push(&self, remote: &str, refspecs: &[String]) -> Result<(), VcsError> {
        if self.push_fails {
            return Err(VcsError::Parse {
                program: "git".into(),
                line: format!("! [rejected] push to {remote}"),
            });
        }
        self.pushed
            .lock()
            .unwrap()
            .push((remote.to_string(), refspecs.to_vec()));
        Ok(())
    }

    fn stage_all(&self) -> Result<(), VcsError> {
        Ok(())
    }

    fn has_staged_changes(&self) -> Result<bool, VcsError> {
        Ok(self.staged)
    }

    fn commit(&self, message: &str, timestamp: DateTime<Utc>) -> Result<(), VcsError> {
        self.commits
            .lock()
            .unwrap()
            .push((message.to_string(), timestamp));
        Ok(())
    }
}
