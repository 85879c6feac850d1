//! Client for the review server's project list.
//!
//! Backends ([`SshRegistry`], [`HttpRegistry`]) talk to the server; the
//! [`CachedRegistry`] wrapper in front of them is what workers share. A
//! single mutex guards both the cached names and the dirty flag, so of any
//! number of concurrent callers exactly one refreshes a stale cache and the
//! rest reuse its result.

use std::collections::BTreeSet;
use std::process::Command;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;

use crate::error::{RegistryClientError, VcsError};

/// Prefix the server puts in front of JSON bodies.
const XSSI_PREFIX: &str = ")]}'";

/// Options for creating a project on the server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CreateOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(rename = "create_empty_commit")]
    pub empty_commit: bool,
}

/// Raw access to a project registry, no caching.
pub trait RegistryBackend: Send + Sync {
    fn fetch_projects(&self) -> Result<BTreeSet<String>, RegistryClientError>;

    fn create_project(&self, name: &str, opts: &CreateOptions) -> Result<(), RegistryClientError>;
}

/// Project registry as seen by workers.
pub trait RemoteRegistry: Send + Sync {
    /// Known project names; `force_refresh` bypasses the cache.
    fn list_projects(&self, force_refresh: bool) -> Result<BTreeSet<String>, RegistryClientError>;

    fn create_project(&self, name: &str, opts: &CreateOptions) -> Result<(), RegistryClientError>;

    /// Create `name` unless it already exists. Returns whether it was created.
    fn ensure_project(&self, name: &str, opts: &CreateOptions) -> Result<bool, RegistryClientError>;
}

// ---------------------------------------------------------------------------
// CachedRegistry
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct ProjectCache {
    projects: BTreeSet<String>,
    dirty: bool,
}

/// Lock-guarded cache in front of a [`RegistryBackend`].
#[derive(Debug)]
pub struct CachedRegistry<B> {
    backend: B,
    cache: Mutex<ProjectCache>,
}

impl<B: RegistryBackend> CachedRegistry<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            cache: Mutex::new(ProjectCache {
                projects: BTreeSet::new(),
                dirty: true,
            }),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    fn lock(&self) -> MutexGuard<'_, ProjectCache> {
        // The cache holds no invariant a panicking holder could break.
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn refresh(&self, cache: &mut ProjectCache) -> Result<(), RegistryClientError> {
        cache.projects = self.backend.fetch_projects()?;
        cache.dirty = false;
        tracing::debug!(count = cache.projects.len(), "project list refreshed");
        Ok(())
    }
}

impl<B: RegistryBackend> RemoteRegistry for CachedRegistry<B> {
    fn list_projects(&self, force_refresh: bool) -> Result<BTreeSet<String>, RegistryClientError> {
        let mut cache = self.lock();
        if force_refresh || cache.dirty {
            self.refresh(&mut cache)?;
        }
        Ok(cache.projects.clone())
    }

    fn create_project(&self, name: &str, opts: &CreateOptions) -> Result<(), RegistryClientError> {
        let mut cache = self.lock();
        self.backend.create_project(name, opts)?;
        cache.dirty = true;
        tracing::info!(project = %name, "project created on server");
        Ok(())
    }

    fn ensure_project(&self, name: &str, opts: &CreateOptions) -> Result<bool, RegistryClientError> {
        let mut cache = self.lock();
        if cache.dirty {
            self.refresh(&mut cache)?;
        }
        if cache.projects.contains(name) {
            return Ok(false);
        }
        self.backend.create_project(name, opts)?;
        cache.projects.insert(name.to_string());
        cache.dirty = true;
        tracing::info!(project = %name, "project created on server");
        Ok(true)
    }
}

// ---------------------------------------------------------------------------
// SSH backend
// ---------------------------------------------------------------------------

/// `ssh [-p PORT] [USER@]HOST gerrit ...`
#[derive(Debug, Clone)]
pub struct SshRegistry {
    host: String,
    port: Option<u16>,
    user: Option<String>,
    program: String,
}

impl SshRegistry {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: None,
            user: None,
            program: "ssh".to_string(),
        }
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    fn destination(&self) -> String {
        match &self.user {
            Some(user) => format!("{user}@{}", self.host),
            None => self.host.clone(),
        }
    }

    /// Arguments after the program name for a remote `gerrit` command.
    fn args(&self, remote: &[String]) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(port) = self.port {
            args.push("-p".to_string());
            args.push(port.to_string());
        }
        args.push(self.destination());
        args.push("gerrit".to_string());
        args.extend(remote.iter().cloned());
        args
    }

    fn run(&self, remote: &[String]) -> Result<String, VcsError> {
        let args = self.args(remote);
        tracing::debug!(host = %self.host, "{} {}", self.program, args.join(" "));
        let output = Command::new(&self.program)
            .args(&args)
            .output()
            .map_err(|source| VcsError::Spawn {
                program: self.program.clone(),
                source,
            })?;
        if !output.status.success() {
            return Err(VcsError::CommandFailed {
                program: self.program.clone(),
                args,
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn create_args(name: &str, opts: &CreateOptions) -> Vec<String> {
        let mut remote = vec!["create-project".to_string(), shell_quote(name)];
        if let Some(description) = &opts.description {
            remote.push("--description".to_string());
            remote.push(shell_quote(description));
        }
        if let Some(parent) = &opts.parent {
            remote.push("--parent".to_string());
            remote.push(shell_quote(parent));
        }
        if opts.empty_commit {
            remote.push("--empty-commit".to_string());
        }
        remote
    }
}

impl RegistryBackend for SshRegistry {
    fn fetch_projects(&self) -> Result<BTreeSet<String>, RegistryClientError> {
        let out = self.run(&["ls-projects".to_string()])?;
        Ok(parse_line_listing(&out))
    }

    fn create_project(&self, name: &str, opts: &CreateOptions) -> Result<(), RegistryClientError> {
        self.run(&Self::create_args(name, opts))?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// HTTP backend
// ---------------------------------------------------------------------------

/// REST backend: `GET <base>/projects/?d`, `PUT <base>/projects/<name>`.
#[derive(Debug, Clone)]
pub struct HttpRegistry {
    base: String,
    token: Option<String>,
}

impl HttpRegistry {
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            base: base.into().trim_end_matches('/').to_string(),
            token: None,
        }
    }

    /// Send `Authorization: Bearer <token>` with every request.
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    fn authorize(&self, request: ureq::Request) -> ureq::Request {
        match &self.token {
            Some(token) => request.set("Authorization", &format!("Bearer {token}")),
            None => request,
        }
    }
}

fn http_err(url: &str, err: impl std::fmt::Display) -> RegistryClientError {
    RegistryClientError::Http {
        url: url.to_string(),
        message: err.to_string(),
    }
}

impl RegistryBackend for HttpRegistry {
    fn fetch_projects(&self) -> Result<BTreeSet<String>, RegistryClientError> {
        let url = format!("{}/projects/?d", self.base);
        let response = self
            .authorize(ureq::get(&url))
            .call()
            .map_err(|e| http_err(&url, e))?;
        let body = response.into_string().map_err(|e| http_err(&url, e))?;
        parse_json_listing(&body)
    }

    fn create_project(&self, name: &str, opts: &CreateOptions) -> Result<(), RegistryClientError> {
        let url = format!("{}/projects/{}", self.base, encode_segment(name));
        self.authorize(ureq::put(&url))
            .send_json(opts)
            .map_err(|e| http_err(&url, e))?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Parsing helpers
// ---------------------------------------------------------------------------

/// One project name per line.
pub fn parse_line_listing(out: &str) -> BTreeSet<String> {
    out.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

/// A JSON object keyed by project name, optionally behind the XSSI prefix.
pub fn parse_json_listing(body: &str) -> Result<BTreeSet<String>, RegistryClientError> {
    let body = body.trim_start();
    let body = body.strip_prefix(XSSI_PREFIX).unwrap_or(body);
    let projects: serde_json::Map<String, serde_json::Value> = serde_json::from_str(body)?;
    Ok(projects.keys().cloned().collect())
}

fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

fn encode_segment(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for b in value.bytes() {
        if b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'~') {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{b:02X}"));
        }
    }
    out
}
