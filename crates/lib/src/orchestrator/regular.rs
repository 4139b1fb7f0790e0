//! Regular directories: source copies, stanza folding, default aliases and
//! editor metadata.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::debug;

use crate::consts::{
  ALIAS_ALL, ALIAS_DEFAULT, ALIAS_DOC, ALIAS_FMT, ALIAS_INSTALL, DOC_DIR, DOC_HTML_DIR, FORMATTED_DIR, IDE_DIR,
  TOPMOD_DIR, VIEW_DIRS,
};
use crate::context::Context;
use crate::path::{BuildPath, Path, RelPath};
use crate::rules::{Action, Dep, FilePredicate, Rule, RuleSink};
use crate::session::Session;
use crate::source_tree::SourceDir;
use crate::stanza::{Loc, RuleMode, Stanza};

use super::Orchestrator;
use super::cram;
use super::env::GenEnv;
use super::fold::{FoldAcc, after_fold, default_modules, fold_stanzas};
use super::types::{DirKind, DirOutcome, DirRules, GenError, Retain};
use super::views;

pub(super) async fn generate(
  orch: &Orchestrator,
  dir: &BuildPath,
  ctx: &Context,
  rel: &RelPath,
) -> Result<Arc<DirOutcome>, GenError> {
  let session = orch.session();
  let tree = session.tree();

  if !tree.dir_exists(rel) {
    return match rel.parent() {
      Some(parent) if rel.basename() == Some(TOPMOD_DIR) => Ok(Arc::new(views::topmod(session, dir, ctx, &parent)?)),
      None => Ok(Arc::new(DirOutcome::new(dir.clone(), DirKind::Empty))),
      Some(parent) => {
        // Whatever lives here was registered by the parent's generation.
        orch.load_dir(Some(dir), &ctx.build_path(&parent)).await?;
        Ok(Arc::new(DirOutcome::new(dir.clone(), DirKind::DeferredToParent)))
      }
    };
  }

  if let Some(root) = tree.group_root(rel) {
    debug!(dir = %dir, root = %root, "group part redirected to its root");
    return orch.load_dir(Some(dir), &ctx.build_path(&root)).await;
  }

  Ok(Arc::new(standalone(session, dir, ctx, rel)?))
}

/// Fold a standalone directory, or a group root together with every part it
/// owns.
fn standalone(session: &Session, dir: &BuildPath, ctx: &Context, rel: &RelPath) -> Result<DirOutcome, GenError> {
  let tree = session.tree();
  let parts = tree.group_parts(rel);
  let members: Vec<&SourceDir> = std::iter::once(rel)
    .chain(parts.iter())
    .filter_map(|p| tree.find_dir(p))
    .collect();

  let sink = RuleSink::new(&session.registry, dir.clone());
  let env = GenEnv {
    session,
    tree: &tree,
    ctx,
    sink: &sink,
  };

  for member in &members {
    copy_sources(&env, member)?;
  }

  let modules = default_modules(&members);
  let acc = members
    .iter()
    .try_fold(FoldAcc::default(), |acc, member| fold_stanzas(&env, member, &modules, acc))?;
  for member in &members {
    after_fold(&env, member, &acc)?;
    cram::gen_rules(&env, member)?;
  }

  ide_rules(&env, rel, &acc)?;
  for member in &members {
    default_aliases(&env, member, &acc);
  }
  if rel.is_root() {
    root_aliases(&env);
  }

  let obj_dirs = acc.cctxs.iter().filter_map(|(_, cctx)| {
    let comps = cctx.obj_dir.components();
    let own = rel.components();
    (comps.len() > own.len() && comps.starts_with(&own)).then(|| comps[own.len()].to_string())
  });
  let retain = Retain::these(VIEW_DIRS).union(Retain::These(obj_dirs.collect()));

  let kind = if parts.is_empty() {
    DirKind::Standalone
  } else {
    DirKind::GroupRoot { parts }
  };
  let mut outcome = DirOutcome::new(dir.clone(), kind).retaining(retain);
  outcome.rules = DirRules {
    rules: sink.into_registered(),
    ide_metadata: acc.ide,
    compilation_contexts: acc.cctxs,
    js_targets: acc.js_targets,
    extra_source_dirs: acc.extra_source_dirs,
  };
  Ok(outcome)
}

/// Files some rule stanza produces in place of the source copy: promoted
/// targets, and fallback targets whose sources are only partly present.
fn generated_in_place(src: &SourceDir) -> BTreeSet<&str> {
  src
    .stanzas
    .iter()
    .filter_map(|s| match s {
      Stanza::Rule(rule) => Some(rule),
      _ => None,
    })
    .filter(|rule| match rule.mode {
      RuleMode::Promote => true,
      RuleMode::Fallback => !rule.targets.iter().all(|t| src.has_file(t)),
      RuleMode::Standard => false,
    })
    .flat_map(|rule| rule.targets.iter().map(String::as_str))
    .collect()
}

fn copy_sources(env: &GenEnv<'_>, src: &SourceDir) -> Result<(), GenError> {
  let skip = generated_in_place(src);
  for file in src.files.iter().filter(|f| !skip.contains(f.as_str())) {
    let source = src.path.join(file);
    let dst = env.build(&source);
    env.add(
      Rule::new(Action::Copy {
        src: Path::Source(source.clone()),
        dst: dst.clone(),
      })
      .target(dst)
      .at(Loc::file(source)),
    )?;
  }
  Ok(())
}

/// One editor configuration file per compilation stanza.
fn ide_rules(env: &GenEnv<'_>, rel: &RelPath, acc: &FoldAcc) -> Result<(), GenError> {
  for entry in &acc.ide {
    let file = env.build(&rel.join(IDE_DIR).join(&format!("{}-{}", entry.kind.as_str(), entry.name)));
    let mut lines: Vec<String> = entry
      .source_dirs
      .iter()
      .chain(acc.extra_source_dirs.iter())
      .map(|d| format!("S {}", d))
      .collect();
    lines.push(format!("B {}", entry.obj_dir.join("byte")));
    if !entry.flags.is_empty() {
      lines.push(format!("FLG {}", entry.flags.join(" ")));
    }
    env.add(
      Rule::new(Action::WriteFile {
        dst: file.clone(),
        contents: lines.join("\n") + "\n",
      })
      .target(file),
    )?;
  }
  Ok(())
}

fn declares_alias(src: &SourceDir, name: &str) -> bool {
  src
    .stanzas
    .iter()
    .any(|s| matches!(s, Stanza::Alias(alias) if alias.name == name))
}

/// `all`, `default` and `fmt` for one member directory.
fn default_aliases(env: &GenEnv<'_>, src: &SourceDir, acc: &FoldAcc) {
  let here = env.build(&src.path);
  let predicate = if env.tree.project().explicit_js_mode {
    FilePredicate::All
  } else {
    FilePredicate::Except(acc.js_targets.clone())
  };
  let all = env.alias_key(&src.path, ALIAS_ALL);
  env.sink.alias_deps(&all, [Dep::Matching {
    dir: here.clone(),
    predicate,
  }]);

  if !declares_alias(src, ALIAS_DEFAULT) {
    env
      .sink
      .alias_deps(&env.alias_key(&src.path, ALIAS_DEFAULT), [Dep::Alias(all)]);
  }

  if !views::formattable(env.tree, src).is_empty() {
    let formatted = env.alias_key(&src.path.join(FORMATTED_DIR), ALIAS_FMT);
    env
      .sink
      .alias_deps(&env.alias_key(&src.path, ALIAS_FMT), [Dep::Alias(formatted)]);
  }
}

fn root_aliases(env: &GenEnv<'_>) {
  let root = RelPath::root();
  env.sink.alias_deps(&env.alias_key(&root, ALIAS_INSTALL), [Dep::SourceTree(BuildPath::in_install(
    &env.ctx.name,
    RelPath::root(),
  ))]);
  env.sink.alias_deps(&env.alias_key(&root, ALIAS_DOC), [Dep::Alias(
    env.alias_key(&RelPath::new(DOC_DIR).join(DOC_HTML_DIR), ALIAS_DOC),
  )]);
}
