//! Branch and tag planning against an in-memory executor.

mod support;

use relay_core::{PatternRuleSet, ProjectUnit, RefMapping};
use relay_sync::{HeadPlanOptions, RefSyncPlanner, Selection, SyncError, TagPlanOptions};
use support::{FakeVcs, SHA_A, SHA_B, SHA_C};

fn unit(rules: &[&str]) -> ProjectUnit {
    ProjectUnit::new("platform/build", "/work/build", "ssh://review/platform/build")
        .with_rules(PatternRuleSet::from_texts(rules))
}

fn explicit(refs: &[&str]) -> HeadPlanOptions {
    HeadPlanOptions {
        selection: Selection::Explicit(refs.iter().map(|r| r.to_string()).collect()),
        ..HeadPlanOptions::default()
    }
}

fn specs(mappings: &[RefMapping]) -> Vec<String> {
    mappings.iter().map(RefMapping::refspec).collect()
}

// ---------------------------------------------------------------------------
// Heads
// ---------------------------------------------------------------------------

#[test]
fn up_to_date_head_produces_no_mapping() {
    let vcs = FakeVcs::default().head("main", SHA_A).remote_head("main", SHA_A);
    let unit = unit(&[]);
    let planner = RefSyncPlanner::new(&unit, &vcs);

    assert!(planner.plan_heads(&explicit(&["main"])).unwrap().is_empty());
    assert!(planner.plan_heads(&HeadPlanOptions::default()).unwrap().is_empty());
}

#[test]
fn new_head_is_pushed_by_commit_id() {
    let vcs = FakeVcs::default().head("main", SHA_A);
    let unit = unit(&[]);
    let plan = RefSyncPlanner::new(&unit, &vcs).plan_heads(&explicit(&["main"])).unwrap();
    assert_eq!(specs(&plan), [format!("{SHA_A}:refs/heads/main")]);
}

#[test]
fn abbreviated_remote_id_counts_as_up_to_date() {
    let vcs = FakeVcs::default().head("main", SHA_A).remote_head("main", &SHA_A[..12]);
    let unit = unit(&[]);
    let plan = RefSyncPlanner::new(&unit, &vcs).plan_heads(&explicit(&["main"])).unwrap();
    assert!(plan.is_empty());
}

#[test]
fn head_named_after_its_commit_needs_force() {
    let vcs = FakeVcs::default().head(SHA_B, SHA_B);
    let unit = unit(&[]);
    let planner = RefSyncPlanner::new(&unit, &vcs);

    assert!(planner.plan_heads(&explicit(&[SHA_B])).unwrap().is_empty());

    let forced = HeadPlanOptions {
        force: true,
        ..explicit(&[SHA_B])
    };
    let plan = planner.plan_heads(&forced).unwrap();
    assert_eq!(specs(&plan), [format!("+{SHA_B}:refs/heads/{SHA_B}")]);
}

#[test]
fn push_all_still_guards_heads_named_after_their_commit() {
    let vcs = FakeVcs::default().head(SHA_B, SHA_B);
    let unit = unit(&[]);
    let planner = RefSyncPlanner::new(&unit, &vcs);
    assert!(planner.plan_heads(&HeadPlanOptions::default()).unwrap().is_empty());

    // The other heads still go out, one by one.
    let mixed = FakeVcs::default().head(SHA_B, SHA_B).head("main", SHA_A);
    let plan = RefSyncPlanner::new(&unit, &mixed)
        .plan_heads(&HeadPlanOptions::default())
        .unwrap();
    assert_eq!(specs(&plan), [format!("{SHA_A}:refs/heads/main")]);

    let forced = HeadPlanOptions {
        force: true,
        ..HeadPlanOptions::default()
    };
    let plan = planner.plan_heads(&forced).unwrap();
    assert_eq!(specs(&plan), ["+refs/heads/*:refs/heads/*"]);
}

#[test]
fn revision_rules_filter_heads() {
    let vcs = FakeVcs::default().head("main", SHA_A).head("wip", SHA_B);
    let unit = unit(&["revision:!^wip"]);
    let plan = RefSyncPlanner::new(&unit, &vcs)
        .plan_heads(&HeadPlanOptions::default())
        .unwrap();
    assert_eq!(specs(&plan), [format!("{SHA_A}:refs/heads/main")]);
}

#[test]
fn excluded_project_plans_nothing_and_skips_remote() {
    let vcs = FakeVcs {
        remote_down: true,
        ..FakeVcs::default().head("main", SHA_A)
    };
    let unit = unit(&["project:!^platform/"]);
    let planner = RefSyncPlanner::new(&unit, &vcs);
    assert!(planner.plan_heads(&HeadPlanOptions::default()).unwrap().is_empty());
    assert!(planner.plan_tags(&TagPlanOptions::default()).unwrap().is_empty());
    assert_eq!(*vcs.remote_queries.lock().unwrap(), 0);
}

#[test]
fn name_keyed_project_rule_excludes_heads_and_tags() {
    let rules = ["project:^platform/@!^platform/build$"];
    let vcs = FakeVcs::default().head("main", SHA_A).tag("v1", SHA_B);

    let excluded = unit(&rules);
    let planner = RefSyncPlanner::new(&excluded, &vcs);
    assert!(planner.plan_heads(&explicit(&["main"])).unwrap().is_empty());
    assert!(planner.plan_tags(&TagPlanOptions::default()).unwrap().is_empty());

    let sibling = ProjectUnit::new("platform/tools", "/work/tools", "ssh://review/platform/tools")
        .with_rules(PatternRuleSet::from_texts(rules));
    let planner = RefSyncPlanner::new(&sibling, &vcs);
    assert_eq!(planner.plan_heads(&explicit(&["main"])).unwrap().len(), 1);
    assert_eq!(planner.plan_tags(&TagPlanOptions::default()).unwrap().len(), 1);
}

#[test]
fn remote_listing_failure_fails_the_plan() {
    let vcs = FakeVcs {
        remote_down: true,
        ..FakeVcs::default().head("main", SHA_A)
    };
    let unit = unit(&[]);
    let err = RefSyncPlanner::new(&unit, &vcs)
        .plan_heads(&explicit(&["main"]))
        .unwrap_err();
    assert!(matches!(err, SyncError::RemoteQuery { .. }), "got: {err}");
}

#[test]
fn empty_remote_is_a_validation_error() {
    let vcs = FakeVcs::default();
    let unit = ProjectUnit::new("x", "/x", " ");
    let err = RefSyncPlanner::new(&unit, &vcs)
        .plan_heads(&HeadPlanOptions::default())
        .unwrap_err();
    assert!(matches!(err, SyncError::Validation(_)));
}

#[test]
fn unresolvable_ref_is_skipped_not_fatal() {
    let vcs = FakeVcs::default().head("main", SHA_A);
    let unit = unit(&[]);
    let plan = RefSyncPlanner::new(&unit, &vcs)
        .plan_heads(&explicit(&["ghost", "main"]))
        .unwrap();
    assert_eq!(specs(&plan), [format!("{SHA_A}:refs/heads/main")]);
}

#[test]
fn changed_name_gets_prefix_unchanged_name_is_rewritten_with_it() {
    let vcs = FakeVcs::default().head("release-1", SHA_A).head("main", SHA_B);
    let unit = unit(&["revision:~^release-~r/~"]);
    let opts = HeadPlanOptions {
        ref_prefix: "mirror/".into(),
        ..explicit(&["release-1", "main"])
    };
    let plan = RefSyncPlanner::new(&unit, &vcs).plan_heads(&opts).unwrap();
    assert_eq!(
        specs(&plan),
        [
            format!("{SHA_A}:refs/heads/mirror/r/1"),
            format!("{SHA_B}:refs/heads/mirror/main"),
        ]
    );
}

#[test]
fn rules_may_key_on_the_prefixed_name() {
    let vcs = FakeVcs::default().head("main", SHA_A);
    let unit = unit(&["revision:~^mirror/main$~mirror/trunk~"]);
    let opts = HeadPlanOptions {
        ref_prefix: "mirror/".into(),
        ..explicit(&["main"])
    };
    let plan = RefSyncPlanner::new(&unit, &vcs).plan_heads(&opts).unwrap();
    assert_eq!(specs(&plan), [format!("{SHA_A}:refs/heads/mirror/trunk")]);
}

#[test]
fn push_all_uses_a_single_wildcard() {
    let vcs = FakeVcs::default()
        .head("main", SHA_A)
        .head("dev", SHA_B)
        .remote_head("main", SHA_A);
    let unit = unit(&[]);
    let opts = HeadPlanOptions {
        ref_prefix: "mirror/".into(),
        ..HeadPlanOptions::default()
    };
    let plan = RefSyncPlanner::new(&unit, &vcs).plan_heads(&opts).unwrap();
    assert_eq!(specs(&plan), ["refs/heads/*:refs/heads/mirror/*"]);
}

#[test]
fn forced_push_all_wildcard_carries_the_marker() {
    let vcs = FakeVcs::default().head("main", SHA_A).remote_head("main", SHA_C);
    let unit = unit(&[]);
    let opts = HeadPlanOptions {
        force: true,
        ..HeadPlanOptions::default()
    };
    let plan = RefSyncPlanner::new(&unit, &vcs).plan_heads(&opts).unwrap();
    assert_eq!(plan, [RefMapping::new("refs/heads/*", "refs/heads/*", true)]);
}

#[test]
fn hierarchical_heads_are_reduced_one_by_one() {
    let vcs = FakeVcs::default().head("feature/x", SHA_A).head("main", SHA_B);
    let unit = unit(&[]);
    let plan = RefSyncPlanner::new(&unit, &vcs)
        .plan_heads(&HeadPlanOptions::default())
        .unwrap();
    assert_eq!(
        specs(&plan),
        [
            format!("{SHA_A}:refs/heads/x"),
            format!("{SHA_B}:refs/heads/main"),
        ]
    );
}

#[test]
fn duplicate_origins_are_planned_once() {
    let mut vcs = FakeVcs::default().head("main", SHA_A);
    vcs.revisions
        .insert("refs/remotes/origin/main".into(), SHA_A.into());
    let unit = unit(&[]);
    let plan = RefSyncPlanner::new(&unit, &vcs)
        .plan_heads(&explicit(&["refs/remotes/origin/main", "main"]))
        .unwrap();
    assert_eq!(plan.len(), 1);
    assert_eq!(plan[0].remote, "refs/heads/main");
}

#[test]
fn commit_id_revision_also_gets_the_sha_tag() {
    let unit = unit(&[]);
    let opts = HeadPlanOptions {
        sha_tag: Some("latest".into()),
        ..explicit(&[SHA_A])
    };

    let fresh = FakeVcs::default();
    let plan = RefSyncPlanner::new(&unit, &fresh).plan_heads(&opts).unwrap();
    assert_eq!(specs(&plan), [format!("{SHA_A}:refs/tags/latest")]);

    let moved = FakeVcs::default().remote_tag("latest", SHA_C);
    let plan = RefSyncPlanner::new(&unit, &moved).plan_heads(&opts).unwrap();
    assert_eq!(specs(&plan), [format!("+{SHA_A}:refs/tags/latest")]);

    let current = FakeVcs::default().remote_tag("latest", SHA_A);
    assert!(RefSyncPlanner::new(&unit, &current).plan_heads(&opts).unwrap().is_empty());
}

// ---------------------------------------------------------------------------
// Tags
// ---------------------------------------------------------------------------

#[test]
fn moved_remote_tag_is_force_refreshed() {
    let vcs = FakeVcs::default()
        .tag("v1", SHA_A)
        .tag("v2", SHA_B)
        .remote_tag("v1", SHA_A)
        .remote_tag("v2", SHA_C);
    let unit = unit(&[]);
    let plan = RefSyncPlanner::new(&unit, &vcs)
        .plan_tags(&TagPlanOptions::default())
        .unwrap();
    assert_eq!(specs(&plan), ["+refs/tags/v2:refs/tags/v2"]);
}

#[test]
fn new_tag_is_pushed_without_force() {
    let vcs = FakeVcs::default().tag("v3", SHA_A);
    let unit = unit(&[]);
    let plan = RefSyncPlanner::new(&unit, &vcs)
        .plan_tags(&TagPlanOptions::default())
        .unwrap();
    assert_eq!(plan, [RefMapping::new("refs/tags/v3", "refs/tags/v3", false)]);
}

#[test]
fn tag_rules_filter_tags() {
    let vcs = FakeVcs::default().tag("v1-rc", SHA_A).tag("v1", SHA_B);
    let unit = unit(&["tags:!-rc$"]);
    let plan = RefSyncPlanner::new(&unit, &vcs)
        .plan_tags(&TagPlanOptions::default())
        .unwrap();
    assert_eq!(specs(&plan), ["refs/tags/v1:refs/tags/v1"]);
}

#[test]
fn explicit_tag_list_limits_the_plan() {
    let vcs = FakeVcs::default()
        .tag("v1", SHA_A)
        .tag("v2", SHA_B)
        .remote_tag("v1", SHA_A);
    let unit = unit(&[]);
    let planner = RefSyncPlanner::new(&unit, &vcs);
    let only = |tags: &[&str]| TagPlanOptions {
        tags: Some(tags.iter().map(|t| t.to_string()).collect()),
        ..TagPlanOptions::default()
    };
    assert!(planner.plan_tags(&only(&["v1"])).unwrap().is_empty());
    assert!(planner.plan_tags(&only(&["missing"])).unwrap().is_empty());
    assert_eq!(
        specs(&planner.plan_tags(&only(&["refs/tags/v2"])).unwrap()),
        ["refs/tags/v2:refs/tags/v2"]
    );
}

#[test]
fn tags_reduced_to_basename_take_the_prefix() {
    let vcs = FakeVcs::default().tag("release/1.0", SHA_A);
    let unit = unit(&[]);
    let opts = TagPlanOptions {
        fullname: false,
        ref_prefix: "mirror-".into(),
        ..TagPlanOptions::default()
    };
    let plan = RefSyncPlanner::new(&unit, &vcs).plan_tags(&opts).unwrap();
    assert_eq!(specs(&plan), ["refs/tags/release/1.0:refs/tags/mirror-1.0"]);
}
