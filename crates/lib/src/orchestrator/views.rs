//! Generated views of a regular directory: `.formatted`, `.bin`, `.utop`,
//! plus the `.topmod` shell scratch directory.

use tracing::debug;

use crate::compile::exe_outputs;
use crate::consts::ALIAS_FMT;
use crate::context::Context;
use crate::path::{BuildPath, RelPath};
use crate::rules::{Action, Dep, Rule, RuleSink};
use crate::session::Session;
use crate::source_tree::{SourceDir, SourceTree};
use crate::stanza::{Library, Loc, Stanza};

use super::classify::View;
use super::env::GenEnv;
use super::fold::default_modules;
use super::types::{DirKind, DirOutcome, GenError};

pub(super) fn generate(
  session: &Session,
  dir: &BuildPath,
  ctx: &Context,
  view: View,
  parent: &RelPath,
) -> Result<DirOutcome, GenError> {
  let kind = DirKind::View {
    name: view.name().to_string(),
  };
  let tree = session.tree();
  let Some(src) = tree.find_dir(parent) else {
    debug!(dir = %dir, "view of a directory without sources");
    return Ok(DirOutcome::new(dir.clone(), kind));
  };

  let sink = RuleSink::new(&session.registry, dir.clone());
  let env = GenEnv {
    session,
    tree: &tree,
    ctx,
    sink: &sink,
  };
  match view {
    View::Formatted => formatted(&env, dir, src)?,
    View::Bin => bin(&env, dir, src)?,
    View::Utop => utop(&env, dir, src)?,
  }
  Ok(DirOutcome::new(dir.clone(), kind).with_rules(sink.into_registered()))
}

/// Source files the formatter owns, in directory order.
pub(super) fn formattable<'a>(tree: &SourceTree, src: &'a SourceDir) -> Vec<&'a String> {
  let formatting = &tree.project().formatting;
  if !formatting.enabled {
    return Vec::new();
  }
  src
    .files
    .iter()
    .filter(|f| {
      f.rsplit_once('.')
        .is_some_and(|(_, ext)| formatting.extensions.iter().any(|e| e == ext))
    })
    .collect()
}

fn formatted(env: &GenEnv<'_>, dir: &BuildPath, src: &SourceDir) -> Result<(), GenError> {
  let fmt = env.alias_key(&dir.rel, ALIAS_FMT);
  for file in formattable(env.tree, src) {
    let input = env.build(&src.path.join(file));
    let output = dir.join(file);
    let loc = Loc::file(src.path.join(file));
    env.add(
      Rule::new(Action::run("format", [
        "-o".to_string(),
        output.to_string(),
        input.to_string(),
      ]))
      .target(output.clone())
      .dep(Dep::File(input.clone()))
      .at(loc.clone()),
    )?;
    env.sink.alias_action(
      &fmt,
      Rule::new(Action::Diff {
        expected: input,
        actual: output.clone(),
        optional: false,
      })
      .dep(Dep::File(output))
      .at(loc),
    )?;
  }
  Ok(())
}

fn bin(env: &GenEnv<'_>, dir: &BuildPath, src: &SourceDir) -> Result<(), GenError> {
  for (loc, stanza) in src.located_stanzas() {
    let Stanza::Executables(exes) = stanza else {
      continue;
    };
    if !env.enabled(&loc, exes.enabled_if.as_ref())? {
      continue;
    }
    for name in &exes.names {
      for output in exe_outputs(name, &exes.modes)
        .into_iter()
        .filter(|o| o.ends_with(".exe") || o.ends_with(".bc"))
      {
        let built = env.build(&src.path.join(&output));
        let link = dir.join(&output);
        env.add(
          Rule::new(Action::Symlink {
            src: built.clone(),
            dst: link.clone(),
          })
          .target(link)
          .dep(Dep::File(built))
          .at(loc.clone()),
        )?;
      }
    }
  }
  Ok(())
}

fn local_libraries<'a>(env: &GenEnv<'_>, src: &'a SourceDir) -> Result<Vec<(Loc, &'a Library)>, GenError> {
  let mut libs = Vec::new();
  for (loc, stanza) in src.located_stanzas() {
    if let Stanza::Library(lib) = stanza
      && env.session.package_visible(lib.package.as_deref())
      && env.enabled(&loc, lib.enabled_if.as_ref())?
    {
      libs.push((loc, lib));
    }
  }
  Ok(libs)
}

fn utop(env: &GenEnv<'_>, dir: &BuildPath, src: &SourceDir) -> Result<(), GenError> {
  let libs = local_libraries(env, src)?;
  let Some((loc, _)) = libs.first() else {
    return Ok(());
  };
  let archives: Vec<BuildPath> = libs
    .iter()
    .map(|(_, lib)| env.build(&src.path.join(&format!("{}.cma", lib.name))))
    .collect();
  let shell = dir.join("utop.exe");
  env.add(
    Rule::new(Action::run(
      "link-toplevel",
      ["-o".to_string(), shell.to_string()]
        .into_iter()
        .chain(archives.iter().map(ToString::to_string)),
    ))
    .target(shell)
    .deps(archives.into_iter().map(Dep::File))
    .at(loc.clone()),
  )?;
  Ok(())
}

/// `<parent>/.topmod`: one toplevel init script per module of every library
/// declared in `parent`.
pub(super) fn topmod(session: &Session, dir: &BuildPath, ctx: &Context, parent: &RelPath) -> Result<DirOutcome, GenError> {
  let outcome = DirOutcome::new(dir.clone(), DirKind::ShellScratch);
  let tree = session.tree();
  let Some(src) = tree.find_dir(parent) else {
    return Ok(outcome);
  };

  let sink = RuleSink::new(&session.registry, dir.clone());
  let env = GenEnv {
    session,
    tree: &tree,
    ctx,
    sink: &sink,
  };
  let defaults = default_modules(&[src]);
  for (loc, lib) in local_libraries(&env, src)? {
    let archive = env.build(&parent.join(&format!("{}.cma", lib.name)));
    let modules = if lib.modules.is_empty() { &defaults } else { &lib.modules };
    for module in modules {
      let script = dir.join(&format!("{}.top", module));
      env.add(
        Rule::new(Action::WriteFile {
          dst: script.clone(),
          contents: format!("#load \"{}\";;\nopen {};;\n", archive, capitalize(module)),
        })
        .target(script)
        .dep(Dep::File(archive.clone()))
        .at(loc.clone()),
      )?;
    }
  }
  Ok(outcome.with_rules(sink.into_registered()))
}

fn capitalize(module: &str) -> String {
  let mut chars = module.chars();
  match chars.next() {
    Some(first) => first.to_uppercase().chain(chars).collect(),
    None => String::new(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::stanza::Mode;
  use crate::util::testutil::{executables, lib_stanza, session};

  #[test]
  fn bin_view_links_native_and_bytecode_only() {
    let tree = SourceTree::builder()
      .stanzas("app", vec![Stanza::Executables(executables(&["main"], &[Mode::Native, Mode::Js]))])
      .build();
    let session = session(tree);
    let ctx = &session.workspace.contexts[0];
    let dir = ctx.build_path(&RelPath::new("app/.bin"));

    let outcome = generate(&session, &dir, ctx, View::Bin, &RelPath::new("app")).unwrap();
    assert_eq!(outcome.rules.rules.len(), 2);
    let mut targets = session.registry.targets_in(&dir);
    targets.sort();
    assert_eq!(targets, vec![dir.join("main.bc"), dir.join("main.exe")]);
  }

  #[test]
  fn formatted_view_registers_fmt_diffs() {
    let tree = SourceTree::builder()
      .files(&["lib/a.ml", "lib/a.mli", "lib/notes.txt"])
      .build();
    let session = session(tree);
    let ctx = &session.workspace.contexts[0];
    let dir = ctx.build_path(&RelPath::new("lib/.formatted"));

    generate(&session, &dir, ctx, View::Formatted, &RelPath::new("lib")).unwrap();
    assert!(session.registry.is_target(&dir.join("a.ml")));
    assert!(!session.registry.is_target(&dir.join("notes.txt")));
    let fmt = session
      .registry
      .alias(&crate::rules::AliasKey::new(dir.clone(), ALIAS_FMT))
      .unwrap();
    assert_eq!(fmt.actions.len(), 2);
  }

  #[test]
  fn topmod_uses_default_modules() {
    let tree = SourceTree::builder()
      .stanzas("lib", vec![lib_stanza("core")])
      .files(&["lib/parse.ml", "lib/lexer.mly"])
      .build();
    let session = session(tree);
    let ctx = &session.workspace.contexts[0];
    let dir = ctx.build_path(&RelPath::new("lib/.topmod"));

    let outcome = topmod(&session, &dir, ctx, &RelPath::new("lib")).unwrap();
    assert_eq!(outcome.kind, DirKind::ShellScratch);
    assert!(session.registry.is_target(&dir.join("parse.top")));
    assert!(session.registry.is_target(&dir.join("lexer.top")));
  }
}
