//! YAML manifest of project units.
//!
//! # Storage layout
//!
//! ```text
//! ~/.relay/
//!   manifest.yaml     (mode 0600, directory mode 0700)
//! ```
//!
//! # API pattern
//!
//! Every function touching the default location has two forms:
//! - `fn_at(home: &Path, …)`: explicit home, used by tests with `TempDir`
//! - `fn(…)`: derives home from `dirs::home_dir()`, delegates to `_at`
//!
//! `load_from` / `save_to` take the manifest path itself, for `--manifest`.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ManifestError;
use crate::pattern::PatternRuleSet;
use crate::types::{ProjectName, ProjectUnit, TreeSource};

pub const MANIFEST_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// Document
// ---------------------------------------------------------------------------

/// Settings inherited by every project entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Defaults {
    /// Base URL; a project without its own remote pushes to `<remote>/<name>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote: Option<String>,
    /// Destination prefix for pushed heads and tags, e.g. `mirror/`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ref_prefix: String,
    /// Rule texts merged after each project's own rules.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub patterns: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jobs: Option<usize>,
    #[serde(default)]
    pub fail_fast: bool,
    /// Server answering `relay projects`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry: Option<RegistryConfig>,
}

/// How to reach the project registry of the review server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RegistryConfig {
    Ssh {
        host: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        port: Option<u16>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user: Option<String>,
    },
    Http {
        url: String,
        /// Environment variable holding a bearer token.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token_env: Option<String>,
    },
}

/// One `projects[]` entry as written in the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectEntry {
    pub name: ProjectName,
    /// Working copy; relative paths resolve against the manifest's directory.
    pub path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub patterns: Vec<String>,
    #[serde(default = "default_parallel")]
    pub parallel: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tree: Option<TreeSource>,
}

fn default_parallel() -> bool {
    true
}

impl ProjectEntry {
    pub fn new(name: impl Into<ProjectName>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            remote: None,
            revision: None,
            patterns: Vec::new(),
            parallel: true,
            tree: None,
        }
    }
}

/// Root of `manifest.yaml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub version: u32,
    #[serde(default)]
    pub defaults: Defaults,
    #[serde(default)]
    pub projects: Vec<ProjectEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Default for Manifest {
    fn default() -> Self {
        Self {
            version: MANIFEST_VERSION,
            defaults: Defaults::default(),
            projects: Vec::new(),
            updated_at: None,
        }
    }
}

impl Manifest {
    pub fn find(&self, name: &str) -> Option<&ProjectEntry> {
        self.projects.iter().find(|p| p.name.0 == name)
    }

    /// Append `entry` unless a project of the same name is already listed.
    ///
    /// Idempotent: returns `false` and leaves the manifest untouched when
    /// the name exists.
    pub fn add_project(&mut self, entry: ProjectEntry) -> bool {
        if self.find(&entry.name.0).is_some() {
            return false;
        }
        self.projects.push(entry);
        true
    }

    /// The default rule set shared by all projects.
    pub fn default_rules(&self) -> PatternRuleSet {
        PatternRuleSet::from_texts(&self.defaults.patterns)
    }

    /// Resolve every entry into a [`ProjectUnit`].
    ///
    /// Relative paths are joined onto `base_dir`. Each unit's rules are its
    /// own patterns followed by the defaults, so project rules are consulted
    /// first.
    pub fn units(&self, base_dir: &Path) -> Result<Vec<ProjectUnit>, ManifestError> {
        let defaults = self.default_rules();
        let mut seen = HashSet::new();
        let mut units = Vec::with_capacity(self.projects.len());

        for entry in &self.projects {
            if !seen.insert(entry.name.0.as_str()) {
                return Err(ManifestError::DuplicateProject {
                    name: entry.name.0.clone(),
                });
            }

            let remote = match (&entry.remote, &self.defaults.remote) {
                (Some(remote), _) => remote.clone(),
                (None, Some(base)) => format!("{}/{}", base.trim_end_matches('/'), entry.name),
                (None, None) => {
                    return Err(ManifestError::MissingRemote {
                        project: entry.name.0.clone(),
                    })
                }
            };

            let mut rules = PatternRuleSet::from_texts(&entry.patterns);
            rules.merge(&defaults);

            let tree = entry.tree.as_ref().map(|tree| TreeSource {
                source: base_dir.join(&tree.source),
                ..tree.clone()
            });

            units.push(ProjectUnit {
                name: entry.name.clone(),
                path: base_dir.join(&entry.path),
                remote,
                revision: entry.revision.clone(),
                rules,
                parallel: entry.parallel,
                tree,
            });
        }
        Ok(units)
    }
}

// ---------------------------------------------------------------------------
// 1. Path helpers
// ---------------------------------------------------------------------------

/// `<home>/.relay/manifest.yaml`, pure.
pub fn manifest_path_at(home: &Path) -> PathBuf {
    home.join(".relay").join("manifest.yaml")
}

/// `manifest_path_at` convenience wrapper.
pub fn manifest_path() -> Result<PathBuf, ManifestError> {
    Ok(manifest_path_at(&home()?))
}

// ---------------------------------------------------------------------------
// 2. Load
// ---------------------------------------------------------------------------

/// Load the manifest at `path`.
///
/// Returns `ManifestError::NotFound` if absent,
/// `ManifestError::Parse` (with path) if malformed YAML.
pub fn load_from(path: &Path) -> Result<Manifest, ManifestError> {
    if !path.exists() {
        return Err(ManifestError::NotFound {
            path: path.to_path_buf(),
        });
    }
    let contents = std::fs::read_to_string(path)?;
    serde_yaml::from_str(&contents).map_err(|source| ManifestError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Load `<home>/.relay/manifest.yaml`.
pub fn load_at(home: &Path) -> Result<Manifest, ManifestError> {
    load_from(&manifest_path_at(home))
}

/// `load_at` convenience wrapper.
pub fn load() -> Result<Manifest, ManifestError> {
    load_at(&home()?)
}

// ---------------------------------------------------------------------------
// 3. Save (atomic)
// ---------------------------------------------------------------------------

/// Atomically write `manifest` to `path`, stamping `updated_at`.
///
/// Write flow: serialize → `.yaml.tmp` sibling → `chmod 0600` → `rename`.
pub fn save_to(path: &Path, manifest: &mut Manifest) -> Result<(), ManifestError> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        if !dir.exists() {
            std::fs::create_dir_all(dir)?;
            set_dir_permissions(dir)?;
        }
    }
    manifest.updated_at = Some(Utc::now());

    let mut tmp_name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    let yaml = serde_yaml::to_string(manifest)?;
    std::fs::write(&tmp_path, yaml)?;
    set_file_permissions(&tmp_path)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Save to `<home>/.relay/manifest.yaml`.
pub fn save_at(home: &Path, manifest: &mut Manifest) -> Result<(), ManifestError> {
    save_to(&manifest_path_at(home), manifest)
}

/// `save_at` convenience wrapper.
pub fn save(manifest: &mut Manifest) -> Result<(), ManifestError> {
    save_at(&home()?, manifest)
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

fn home() -> Result<PathBuf, ManifestError> {
    dirs::home_dir().ok_or(ManifestError::HomeNotFound)
}

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), ManifestError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))?;
    Ok(())
}
#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), ManifestError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), ManifestError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), ManifestError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::REVISION;
    use tempfile::TempDir;

    fn sample() -> Manifest {
        let mut manifest = Manifest::default();
        manifest.defaults.remote = Some("ssh://review:29418/".into());
        manifest.defaults.patterns = vec!["revision:!^tmp/".into()];
        let mut build = ProjectEntry::new("platform/build", "build");
        build.patterns = vec!["revision:^main$,^tmp/keep$".into()];
        manifest.add_project(build);
        let mut tools = ProjectEntry::new("tools/repo", "/abs/repo");
        tools.remote = Some("git@host:tools/repo.git".into());
        tools.parallel = false;
        manifest.add_project(tools);
        manifest
    }

    #[test]
    fn registry_section_is_tagged() {
        let yaml = "version: 1\ndefaults:\n  registry:\n    kind: ssh\n    host: review.example.org\n    port: 29418\n";
        let manifest: Manifest = serde_yaml::from_str(yaml).expect("parse");
        assert_eq!(
            manifest.defaults.registry,
            Some(RegistryConfig::Ssh {
                host: "review.example.org".into(),
                port: Some(29418),
                user: None,
            })
        );
    }

    #[test]
    fn manifest_path_is_correct() {
        let home = TempDir::new().expect("tempdir");
        assert!(manifest_path_at(home.path()).ends_with(".relay/manifest.yaml"));
    }

    #[test]
    fn save_and_load_roundtrip() {
        let home = TempDir::new().expect("tempdir");
        let mut manifest = sample();
        save_at(home.path(), &mut manifest).expect("save");
        let loaded = load_at(home.path()).expect("load");
        assert_eq!(loaded.projects, manifest.projects);
        assert_eq!(loaded.defaults, manifest.defaults);
        assert!(loaded.updated_at.is_some());
    }

    #[test]
    fn save_sets_permissions() {
        let home = TempDir::new().expect("tempdir");
        save_at(home.path(), &mut Manifest::default()).expect("save");
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let path = manifest_path_at(home.path());
            let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
            assert_eq!(mode, 0o600);
            let dir_mode = std::fs::metadata(path.parent().unwrap())
                .unwrap()
                .permissions()
                .mode()
                & 0o777;
            assert_eq!(dir_mode, 0o700);
        }
    }

    #[test]
    fn add_project_is_idempotent() {
        let mut manifest = sample();
        assert!(!manifest.add_project(ProjectEntry::new("tools/repo", "elsewhere")));
        assert_eq!(manifest.projects.len(), 2);
        assert_eq!(manifest.find("tools/repo").unwrap().path, PathBuf::from("/abs/repo"));
    }

    #[test]
    fn units_resolve_paths_and_remotes() {
        let units = sample().units(Path::new("/work")).expect("units");
        assert_eq!(units.len(), 2);
        assert_eq!(units[0].path, PathBuf::from("/work/build"));
        assert_eq!(units[0].remote, "ssh://review:29418/platform/build");
        assert_eq!(units[1].path, PathBuf::from("/abs/repo"));
        assert_eq!(units[1].remote, "git@host:tools/repo.git");
        assert!(!units[1].parallel);
    }

    #[test]
    fn unit_rules_put_project_rules_before_defaults() {
        let units = sample().units(Path::new("/work")).expect("units");
        let rules = &units[0].rules;
        assert!(rules.is_match(REVISION, "main"));
        assert!(!rules.is_match(REVISION, "tmp/keep"), "default exclude still merged in");
        assert!(!rules.is_match(REVISION, "feature"));
        // Defaults alone apply to the second project.
        assert!(units[1].rules.is_match(REVISION, "feature"));
    }

    #[test]
    fn missing_remote_is_reported() {
        let mut manifest = Manifest::default();
        manifest.add_project(ProjectEntry::new("orphan", "orphan"));
        let err = manifest.units(Path::new("/")).unwrap_err();
        assert!(matches!(err, ManifestError::MissingRemote { ref project } if project == "orphan"));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut manifest = sample();
        manifest.projects.push(ProjectEntry::new("platform/build", "again"));
        let err = manifest.units(Path::new("/")).unwrap_err();
        assert!(matches!(err, ManifestError::DuplicateProject { .. }));
    }

    #[test]
    fn home_not_found_error_message() {
        assert!(ManifestError::HomeNotFound.to_string().contains("home directory"));
    }
}
