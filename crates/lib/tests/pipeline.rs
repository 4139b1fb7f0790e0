//! End-to-end tests over a workspace scanned from disk: resolution, planning
//! and cleanup sharing one orchestrator.

use std::fs;
use std::path::Path;

use serial_test::serial;
use tempfile::TempDir;

use strata_lib::gc::stale_outputs;
use strata_lib::orchestrator::Orchestrator;
use strata_lib::path::{BuildPath, Path as TargetPath};
use strata_lib::resolve::{ResolveErrorKind, Resolver, Target, into_report};
use strata_lib::rules::Action;
use strata_lib::rules::plan::RulePlan;
use strata_lib::session::Session;

fn write(root: &Path, rel: &str, contents: &str) {
  let path = root.join(rel);
  fs::create_dir_all(path.parent().unwrap()).unwrap();
  fs::write(path, contents).unwrap();
}

fn workspace() -> TempDir {
  let temp = TempDir::new().unwrap();
  let root = temp.path();
  write(root, "strata-project.json", r#"{ "name": "demo", "packages": ["demo"] }"#);
  write(
    root,
    "strata-workspace.json",
    r#"{ "contexts": [ { "name": "default" }, { "name": "release", "profile": "release" } ] }"#,
  );
  write(
    root,
    "src/strata.json",
    r#"{ "stanzas": [ { "kind": "library", "name": "core", "public_name": "demo.core" } ] }"#,
  );
  write(root, "src/a.ml", "let a = 1\n");
  write(root, "tests/smoke.t", "  $ echo hi\n  hi\n");
  temp
}

fn orchestrator(root: &Path) -> Orchestrator {
  Orchestrator::new(Session::load(root).unwrap())
}

#[tokio::test]
#[serial]
async fn resolves_across_contexts_and_reports_every_failure() {
  let temp = workspace();
  let orch = orchestrator(temp.path());
  let resolver = Resolver::new(&orch);

  let texts = vec![
    "src/core.cma".to_string(),
    "src/missing.ml".to_string(),
    "@@%{profile}".to_string(),
  ];
  let results = resolver.resolve_text(&texts).await;
  assert_eq!(results.len(), 3);

  let found = results[0].as_ref().unwrap();
  assert_eq!(found, &vec![
    Target::File {
      path: TargetPath::Build(BuildPath::in_context("default", "src/core.cma")),
    },
    Target::File {
      path: TargetPath::Build(BuildPath::in_context("release", "src/core.cma")),
    },
  ]);

  let missing = results[1].as_ref().unwrap_err();
  assert!(matches!(missing.kind, ResolveErrorKind::DontKnowHowToBuild(_)));
  assert!(missing.hints.contains(&"a.ml".to_string()));
  assert!(missing.hints.contains(&"core.cma".to_string()));

  let variable = results[2].as_ref().unwrap_err();
  assert!(matches!(variable.kind, ResolveErrorKind::AliasHasVariables(_)));

  let report = into_report(results).unwrap_err();
  assert_eq!(report.errors.len(), 2);
  assert!(report.to_string().contains("hint: did you mean"));
}

#[tokio::test]
#[serial]
async fn runtest_plan_includes_test_and_its_script() {
  let temp = workspace();
  let orch = orchestrator(temp.path());
  let resolver = Resolver::new(&orch);

  let targets = into_report(resolver.resolve_text(&["_build/default/tests".to_string(), "@runtest".to_string()]).await)
    .unwrap();
  let runtest: Vec<Target> = targets
    .into_iter()
    .filter(|t| matches!(t, Target::Alias(a) if a.name == "runtest"))
    .collect();
  assert_eq!(runtest.len(), 1);

  let plan = RulePlan::for_targets(&orch, &runtest).await.unwrap();
  let crams: Vec<_> = plan
    .rules()
    .filter(|(_, r)| matches!(&r.action, Action::Progn { actions } if matches!(actions.first(), Some(Action::Cram { .. }))))
    .collect();
  // one per context
  assert_eq!(crams.len(), 2);

  let waves = plan.waves().unwrap();
  assert_eq!(waves.len(), 2);
  assert_eq!(waves[1].len(), 2);
}

#[tokio::test]
#[serial]
async fn install_alias_reaches_public_libraries() {
  let temp = workspace();
  let orch = orchestrator(temp.path());
  let resolver = Resolver::new(&orch);

  let targets = into_report(resolver.resolve_text(&["@@install".to_string()]).await).unwrap();
  let plan = RulePlan::for_targets(&orch, &targets).await.unwrap();

  let installed = BuildPath::in_install("default", "lib/demo/core.cma");
  assert!(plan.rules().any(|(_, r)| r.targets.contains(&installed)));
}

#[tokio::test]
#[serial]
async fn clean_keeps_planned_outputs() {
  let temp = workspace();
  let root = temp.path();
  write(root, "_build/default/src/a.ml", "let a = 1\n");
  write(root, "_build/default/src/dropped.ml", "let d = 0\n");
  write(root, "_build/release/src/a.ml", "let a = 1\n");

  let orch = orchestrator(root);
  let result = stale_outputs(&orch, "default", false).await.unwrap();
  assert_eq!(result.deleted_paths, vec![root.join("_build/default/src/dropped.ml")]);
  assert!(root.join("_build/default/src/a.ml").exists());
  assert!(root.join("_build/release/src/a.ml").exists());
}

#[tokio::test]
#[serial]
async fn rescan_after_adding_a_source_file() {
  let temp = workspace();
  let root = temp.path();
  let orch = orchestrator(root);
  let resolver = Resolver::new(&orch);

  let before = resolver.resolve_text(&["src/b.ml".to_string()]).await;
  assert!(before[0].is_err());

  write(root, "src/b.ml", "let b = 2\n");
  let changed = orch.rescan().unwrap();
  assert_eq!(changed.iter().map(|p| p.as_str()).collect::<Vec<_>>(), vec!["src"]);

  let after = resolver.resolve_text(&["src/b.ml".to_string()]).await;
  assert_eq!(after[0].as_ref().unwrap().len(), 2);
}
