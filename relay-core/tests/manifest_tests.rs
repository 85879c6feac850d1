//! Manifest load errors, atomic writes and unit resolution.

use assert_fs::prelude::*;
use predicates::prelude::predicate;
use relay_core::{manifest, Manifest, ManifestError, ProjectEntry};
use std::fs;

// ---------------------------------------------------------------------------
// 1. Load error messages
// ---------------------------------------------------------------------------

#[test]
fn load_missing_manifest_returns_not_found() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let err = manifest::load_at(home.path()).unwrap_err();
    assert!(matches!(err, ManifestError::NotFound { .. }), "got: {err}");
    assert!(err.to_string().contains("manifest.yaml"));
}

#[test]
fn load_corrupt_yaml_returns_parse_error_with_path() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    home.child(".relay/manifest.yaml")
        .write_str(": : corrupt : yaml : !!!\n  - broken: [unclosed")
        .expect("write");

    let err = manifest::load_at(home.path()).unwrap_err();
    assert!(matches!(err, ManifestError::Parse { .. }), "got: {err}");
    assert!(err.to_string().contains("manifest.yaml"));
}

#[test]
fn load_minimal_document() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let file = dir.child("relay.yaml");
    file.write_str(
        "version: 1\n\
         defaults:\n  remote: https://review.example.com\n  fail_fast: true\n\
         projects:\n  - name: platform/build\n    path: build\n    parallel: false\n    patterns:\n      - 'revision:^main$'\n",
    )
    .expect("write");

    let loaded = manifest::load_from(file.path()).expect("load");
    assert!(loaded.defaults.fail_fast);
    let units = loaded.units(dir.path()).expect("units");
    assert_eq!(units[0].remote, "https://review.example.com/platform/build");
    assert!(!units[0].parallel);
    assert!(!units[0].rules.is_match("revision", "dev"));
}

// ---------------------------------------------------------------------------
// 2. Atomic write safety
// ---------------------------------------------------------------------------

#[test]
fn save_cleans_up_tmp_file() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let mut doc = Manifest::default();
    doc.add_project(ProjectEntry::new("a", "a"));
    manifest::save_at(home.path(), &mut doc).expect("save");

    home.child(".relay/manifest.yaml").assert(predicate::path::exists());
    home.child(".relay/manifest.yaml.tmp").assert(predicate::path::missing());
}

#[test]
fn save_to_custom_path_creates_parents() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let path = dir.path().join("nested/deeper/relay.yaml");
    manifest::save_to(&path, &mut Manifest::default()).expect("save");
    let written = fs::read_to_string(&path).expect("read");
    assert!(written.contains("version: 1"));
    dir.child("nested/deeper/relay.yaml")
        .assert(predicate::str::contains("updated_at"));
}

#[test]
fn save_overwrites_previous_contents() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let mut doc = Manifest::default();
    doc.add_project(ProjectEntry::new("first", "first"));
    manifest::save_at(home.path(), &mut doc).expect("save");
    doc.add_project(ProjectEntry::new("second", "second"));
    manifest::save_at(home.path(), &mut doc).expect("save again");

    let loaded = manifest::load_at(home.path()).expect("load");
    let names: Vec<_> = loaded.projects.iter().map(|p| p.name.to_string()).collect();
    assert_eq!(names, ["first", "second"]);
}
