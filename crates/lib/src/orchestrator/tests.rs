use std::collections::BTreeSet;
use std::sync::Arc;

use futures::future::join_all;
use tracing_test::traced_test;

use super::*;
use crate::condition::Condition;
use crate::consts::{ALIAS_ALL, ALIAS_DEFAULT};
use crate::path::RelPath;
use crate::rules::{Action, Dep, RegistryError};
use crate::source_tree::SourceTree;
use crate::stanza::{
  AliasStanza, DepDecl, DirSpec, Library, Mode, ParserGenerator, Project, RuleMode, RuleStanza, Section, Stanza,
};
use crate::template::Template;
use crate::util::testutil::{executables, lib_stanza, library, orchestrator, session};

fn b(rel: &str) -> BuildPath {
  BuildPath::in_context("default", rel)
}

fn alias(name: &str, files: &[&str]) -> Stanza {
  Stanza::Alias(AliasStanza {
    name: name.to_string(),
    deps: files
      .iter()
      .map(|f| DepDecl::File(Template::literal(f)))
      .collect(),
    action: None,
    package: None,
    enabled_if: None,
  })
}

fn lib_tree() -> SourceTree {
  SourceTree::builder()
    .stanzas("src", vec![lib_stanza("core")])
    .files(&["src/a.ml", "src/b.ml"])
    .build()
}

#[tokio::test]
async fn generating_twice_returns_the_same_outcome() {
  let orch = orchestrator(lib_tree());
  let first = orch.generate(&b("src")).await.unwrap();
  let registered = orch.registry().registrations();
  let second = orch.generate(&b("src")).await.unwrap();

  assert!(Arc::ptr_eq(&first, &second));
  assert_eq!(orch.registry().registrations(), registered);
  assert_eq!(orch.generations(), 1);
  assert_eq!(first.kind, DirKind::Standalone);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_share_one_generation() {
  let orch = orchestrator(lib_tree());
  let handles: Vec<_> = (0..16)
    .map(|_| {
      let orch = orch.clone();
      tokio::spawn(async move { orch.generate(&b("src")).await.unwrap() })
    })
    .collect();

  let outcomes: Vec<Arc<DirOutcome>> = join_all(handles).await.into_iter().map(|r| r.unwrap()).collect();
  assert!(outcomes.iter().all(|o| Arc::ptr_eq(o, &outcomes[0])));
  assert_eq!(orch.generations(), 1);
}

#[tokio::test]
#[traced_test]
async fn generation_is_logged_once() {
  let orch = orchestrator(lib_tree());
  orch.generate(&b("src")).await.unwrap();
  orch.generate(&b("src")).await.unwrap();

  logs_assert(|lines: &[&str]| {
    let count = lines
      .iter()
      .filter(|l| l.contains("generated directory rules") && l.contains("dir=default/src kind"))
      .count();
    if count == 1 {
      Ok(())
    } else {
      Err(format!("expected one generation line, saw {}", count))
    }
  });
}

#[tokio::test]
async fn recursive_alias_is_the_union_over_descendants() {
  let tree = SourceTree::builder()
    .stanzas("a", vec![alias("check", &["x"])])
    .stanzas("a/b", vec![alias("check", &["y"])])
    .dir("a/c")
    .build();
  let orch = orchestrator(tree);
  let key = AliasKey::new(b("a"), "check");

  let flat = orch.alias_contents(&key, false).await.unwrap().unwrap();
  assert_eq!(flat.deps, vec![Dep::File(b("a/x"))]);

  let rec = orch.alias_contents(&key, true).await.unwrap().unwrap();
  assert_eq!(rec.deps, vec![Dep::File(b("a/x")), Dep::File(b("a/b/y"))]);

  let missing = AliasKey::new(b("a/gone"), "check");
  assert_eq!(orch.alias_contents(&missing, true).await.unwrap(), None);
  let undefined = AliasKey::new(b("a/c"), "check");
  assert_eq!(orch.alias_contents(&undefined, true).await.unwrap(), None);
}

#[tokio::test]
async fn group_parts_redirect_to_their_root() {
  let tree = SourceTree::builder()
    .spec("src", DirSpec {
      include_subdirs: true,
      stanzas: vec![lib_stanza("core")],
    })
    .files(&["src/a.ml", "src/sub/b.ml", "src/sub/deep/c.ml"])
    .build();
  let orch = orchestrator(tree);

  let part = orch.generate(&b("src/sub/deep")).await.unwrap();
  let root = orch.generate(&b("src")).await.unwrap();
  assert!(Arc::ptr_eq(&part, &root));
  assert_eq!(root.kind, DirKind::GroupRoot {
    parts: vec![RelPath::new("src/sub"), RelPath::new("src/sub/deep")],
  });
  assert!(orch.registry().is_target(&b("src/sub/b.ml")));
  let cctx = &root.rules.compilation_contexts[0].1;
  assert_eq!(cctx.modules, vec!["a", "b", "c"]);
}

#[tokio::test]
async fn generated_directory_defers_to_parent() {
  let orch = orchestrator(lib_tree());
  let objs = orch.generate(&b("src/.core.objs/byte")).await.unwrap();
  assert_eq!(objs.kind, DirKind::DeferredToParent);
  assert!(orch.registry().is_target(&b("src/.core.objs/byte/a.cmo")));
  assert!(orch.is_target(&b("src/core.cma")).await.unwrap());
}

#[tokio::test]
async fn context_root_without_sources_is_empty() {
  let orch = orchestrator(SourceTree::builder().build());
  let outcome = orch.generate(&b("")).await.unwrap();
  assert_eq!(outcome.kind, DirKind::Empty);
  assert!(outcome.rules.rules.is_empty());

  let err = orch.generate(&BuildPath::in_context("nope", "src")).await.unwrap_err();
  assert_eq!(err, GenError::UnknownContext("nope".to_string()));
}

#[tokio::test]
async fn default_alias_excludes_script_artifacts() {
  let tree = SourceTree::builder()
    .stanzas("app", vec![Stanza::Executables(executables(&["main"], &[Mode::Js]))])
    .file("app/main.ml")
    .build();
  let orch = orchestrator(tree);

  let all = orch.alias_contents(&AliasKey::new(b("app"), ALIAS_ALL), false).await.unwrap().unwrap();
  let [Dep::Matching { dir, predicate }] = all.deps.as_slice() else {
    panic!("unexpected deps {:?}", all.deps);
  };
  let members = orch.matching(dir, predicate).await.unwrap();
  assert!(members.contains(&b("app/main.bc")));
  assert!(!members.contains(&b("app/main.bc.js")));
  assert!(!members.contains(&b("app/main.bc.runtime.js")));

  let default = orch.alias_contents(&AliasKey::new(b("app"), ALIAS_DEFAULT), false).await.unwrap().unwrap();
  assert_eq!(default.deps, vec![Dep::Alias(AliasKey::new(b("app"), ALIAS_ALL))]);
}

#[tokio::test]
async fn explicit_js_mode_keeps_script_artifacts() {
  let tree = SourceTree::builder()
    .project(Project {
      explicit_js_mode: true,
      ..Project::default()
    })
    .stanzas("app", vec![Stanza::Executables(executables(&["main"], &[Mode::Js]))])
    .file("app/main.ml")
    .build();
  let orch = orchestrator(tree);

  let all = orch.alias_contents(&AliasKey::new(b("app"), ALIAS_ALL), false).await.unwrap().unwrap();
  assert_eq!(all.deps, vec![Dep::Matching {
    dir: b("app"),
    predicate: crate::rules::FilePredicate::All,
  }]);
}

#[tokio::test]
async fn declared_default_alias_replaces_the_builtin() {
  let tree = SourceTree::builder()
    .stanzas("app", vec![alias(ALIAS_DEFAULT, &["only.txt"])])
    .build();
  let orch = orchestrator(tree);
  let default = orch.alias_contents(&AliasKey::new(b("app"), ALIAS_DEFAULT), false).await.unwrap().unwrap();
  assert_eq!(default.deps, vec![Dep::File(b("app/only.txt"))]);
}

fn grammar_tree() -> SourceTree {
  SourceTree::builder()
    .project(Project {
      packages: vec!["pkg".to_string(), "other".to_string()],
      ..Project::default()
    })
    .stanzas("src", vec![
      Stanza::Library(Library {
        package: Some("pkg".to_string()),
        modules: vec!["parser".to_string()],
        ..library("core")
      }),
      Stanza::ParserGenerator(ParserGenerator {
        modules: vec!["parser".to_string()],
        flags: vec![],
      }),
    ])
    .file("src/parser.mly")
    .build()
}

#[tokio::test]
async fn grammar_without_compilation_context_gets_failing_placeholder() {
  let orch = Orchestrator::new(session(grammar_tree()).with_only_packages(["other".to_string()]));
  orch.generate(&b("src")).await.unwrap();
  let (_, rule) = orch.registry().producer(&b("src/parser.ml")).unwrap();
  assert!(matches!(rule.action, Action::Fail { .. }));
  assert!(rule.targets.contains(&b("src/parser.mli")));

  let orch = orchestrator(grammar_tree());
  orch.generate(&b("src")).await.unwrap();
  let (_, rule) = orch.registry().producer(&b("src/parser.ml")).unwrap();
  assert!(matches!(rule.action, Action::Run { ref prog, .. } if prog == "parser-gen"));
}

#[tokio::test]
async fn conflicting_producers_fail_generation() {
  let tree = SourceTree::builder()
    .stanzas("src", vec![Stanza::Rule(RuleStanza {
      targets: vec!["a.ml".to_string()],
      deps: vec![],
      action: vec![Template::literal("gen")],
      mode: RuleMode::Standard,
      alias: None,
      enabled_if: None,
    })])
    .file("src/a.ml")
    .build();
  let orch = orchestrator(tree);

  let err = orch.generate(&b("src")).await.unwrap_err();
  assert!(matches!(err, GenError::Registry(RegistryError::DuplicateTarget { .. })));
  assert_eq!(orch.generate(&b("src")).await.unwrap_err(), err);
  assert_eq!(orch.generations(), 1);
}

#[tokio::test]
async fn fallback_rule_yields_to_present_sources() {
  let fallback = |targets: &[&str]| {
    Stanza::Rule(RuleStanza {
      targets: targets.iter().map(|t| t.to_string()).collect(),
      deps: vec![],
      action: vec![Template::literal("gen")],
      mode: RuleMode::Fallback,
      alias: None,
      enabled_if: None,
    })
  };
  let tree = SourceTree::builder()
    .stanzas("src", vec![fallback(&["a.ml"]), fallback(&["b.ml", "c.ml"])])
    .files(&["src/a.ml", "src/b.ml"])
    .build();
  let orch = orchestrator(tree);
  orch.generate(&b("src")).await.unwrap();

  let (_, copy) = orch.registry().producer(&b("src/a.ml")).unwrap();
  assert!(matches!(copy.action, Action::Copy { .. }));
  let (_, generated) = orch.registry().producer(&b("src/b.ml")).unwrap();
  assert!(generated.targets.contains(&b("src/c.ml")));
}

#[tokio::test]
async fn retention_policies() {
  let orch = orchestrator(lib_tree());

  let src = orch.generate(&b("src")).await.unwrap();
  assert!(src.retain.contains(".core.objs"));
  assert!(src.retain.contains(".bin"));
  assert!(!src.retain.contains("other"));

  let marker = orch.generate(&b(".strata")).await.unwrap();
  assert_eq!(marker.retain, Retain::these(["ccomp"]));
  assert!(orch.registry().is_target(&b(".strata/keep")));

  let js = orch.generate(&b(".js")).await.unwrap();
  assert_eq!(js.retain, Retain::All);
  let js_lib = orch.generate(&b(".js/core")).await.unwrap();
  assert_eq!(js_lib.retain, Retain::Nothing);
  assert!(orch.registry().is_target(&b(".js/core/core.cma.js")));
}

#[tokio::test]
async fn install_namespace_collects_every_directory() {
  let tree = SourceTree::builder()
    .project(Project {
      packages: vec!["pkg".to_string()],
      ..Project::default()
    })
    .stanzas("src", vec![Stanza::Library(Library {
      public_name: Some("pkg.core".to_string()),
      ..library("core")
    })])
    .stanzas("bin", vec![Stanza::Executables(crate::stanza::Executables {
      public_names: vec!["tool".to_string()],
      ..executables(&["main"], &[Mode::Native])
    })])
    .files(&["src/a.ml", "bin/main.ml"])
    .build();
  let orch = orchestrator(tree);

  let root = orch.generate(&BuildPath::in_install("default", "")).await.unwrap();
  assert_eq!(root.retain, Retain::All);

  let lib_dir = Section::Lib.install_dir("pkg");
  let mut targets = orch.targets_under(&BuildPath::in_install("default", "")).await.unwrap();
  targets.sort();
  assert_eq!(targets, vec![
    BuildPath::in_install("default", "bin/tool"),
    BuildPath::in_install("default", lib_dir.join("core.cma")),
  ]);
}

#[tokio::test]
async fn invalidation_regenerates_only_affected_directories() {
  let tree = SourceTree::builder()
    .stanzas("src", vec![lib_stanza("core")])
    .stanzas("other", vec![lib_stanza("util")])
    .files(&["src/a.ml", "other/u.ml"])
    .build();
  let orch = orchestrator(tree);
  let before = orch.generate(&b("src")).await.unwrap();
  orch.generate(&b("src/.core.objs")).await.unwrap();
  let other = orch.generate(&b("other")).await.unwrap();
  assert_eq!(orch.generations(), 3);

  assert_eq!(orch.invalidate(&[b("src")]), 2);
  assert!(!orch.registry().is_target(&b("src/a.ml")));

  let after = orch.generate(&b("src")).await.unwrap();
  assert!(!Arc::ptr_eq(&before, &after));
  assert_eq!(before.rules.rules, after.rules.rules);
  assert!(Arc::ptr_eq(&other, &orch.generate(&b("other")).await.unwrap()));
  assert_eq!(orch.generations(), 4);
}

#[tokio::test]
async fn refresh_picks_up_added_files() {
  let tree = SourceTree::builder()
    .stanzas("src", vec![lib_stanza("core")])
    .stanzas("other", vec![lib_stanza("util")])
    .files(&["src/a.ml", "other/u.ml"])
    .build();
  let orch = orchestrator(tree);
  orch.generate(&b("src")).await.unwrap();
  let other = orch.generate(&b("other")).await.unwrap();
  assert!(!orch.is_target(&b("src/c.ml")).await.unwrap());

  let changed = orch.refresh(
    SourceTree::builder()
      .stanzas("src", vec![lib_stanza("core")])
      .stanzas("other", vec![lib_stanza("util")])
      .files(&["src/a.ml", "src/c.ml", "other/u.ml"])
      .build(),
  );
  assert_eq!(changed, vec![RelPath::new("src")]);

  assert!(orch.is_target(&b("src/c.ml")).await.unwrap());
  assert!(orch.is_target(&b("src/.core.objs/byte/c.cmo")).await.unwrap());
  assert!(Arc::ptr_eq(&other, &orch.generate(&b("other")).await.unwrap()));
}

#[tokio::test]
async fn refresh_sees_new_directories_and_removed_ones() {
  let orch = orchestrator(lib_tree());
  assert!(orch.is_target(&b("src/core.cma")).await.unwrap());
  let before = orch.generate(&b("extra")).await.unwrap();
  assert_eq!(before.kind, DirKind::DeferredToParent);

  let changed = orch.refresh(
    SourceTree::builder()
      .stanzas("extra", vec![lib_stanza("more")])
      .file("extra/m.ml")
      .build(),
  );
  assert!(changed.contains(&RelPath::new("extra")));
  assert!(changed.contains(&RelPath::new("src")));

  let after = orch.generate(&b("extra")).await.unwrap();
  assert_eq!(after.kind, DirKind::Standalone);
  assert!(orch.is_target(&b("extra/more.cma")).await.unwrap());
  assert!(!orch.is_target(&b("src/core.cma")).await.unwrap());
}

#[tokio::test]
async fn project_change_drops_everything() {
  let orch = orchestrator(lib_tree());
  orch.generate(&b("src")).await.unwrap();
  let generated = orch.generations();

  let changed = orch.refresh(
    SourceTree::builder()
      .project(Project {
        packages: vec!["solo".to_string()],
        ..Project::default()
      })
      .stanzas("src", vec![lib_stanza("core")])
      .files(&["src/a.ml", "src/b.ml"])
      .build(),
  );
  assert!(changed.contains(&RelPath::new("src")));
  assert!(!orch.registry().is_target(&b("src/a.ml")));
  orch.generate(&b("src")).await.unwrap();
  assert_eq!(orch.generations(), generated + 1);
}

#[tokio::test]
async fn disabled_library_registers_nothing() {
  let tree = SourceTree::builder()
    .stanzas("src", vec![Stanza::Library(Library {
      enabled_if: Some(Condition::False),
      ..library("core")
    })])
    .file("src/a.ml")
    .build();
  let orch = orchestrator(tree);
  let outcome = orch.generate(&b("src")).await.unwrap();
  assert!(outcome.rules.compilation_contexts.is_empty());
  assert!(!orch.registry().is_target(&b("src/core.cma")));
  let targets: BTreeSet<_> = orch.targets_under(&b("src")).await.unwrap().into_iter().collect();
  assert!(targets.contains(&b("src/a.ml")));
}
