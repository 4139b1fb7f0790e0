//! Folding a directory's stanzas into rules and typed accumulators.
//!
//! Every stanza kind has one handler. A handler registers its rules through
//! the generation environment and may extend one of four channels: editor
//! metadata, compilation contexts, script-target artifacts and extra source
//! directories. Stanza kinds with no handler contribute nothing.

use std::collections::BTreeSet;

use globset::Glob;
use tracing::{debug, warn};

use crate::compile::{CctxKind, CompilationContext, ExeSpec, IdeEntry, exe_outputs};
use crate::consts::{ALIAS_DOC, ALIAS_RUNTEST, CRAM_CORRECTED_EXT, JS_RUNTIME_SUFFIX, JS_SUFFIX};
use crate::install::InstallEntry;
use crate::path::{Path, RelPath};
use crate::rules::{Action, Dep, Rule};
use crate::source_tree::SourceDir;
use crate::template::Template;
use crate::stanza::{
  AliasStanza, CopyFiles, Documentation, Executables, Extraction, ForeignLibrary, InstallStanza, Library, Loc, Mdx,
  Mode, ParserGenerator, Plugin, RuleMode, RuleStanza, Section, Stanza, Tests, Theory,
};

use super::env::GenEnv;
use super::types::GenError;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FoldAcc {
  pub ide: Vec<IdeEntry>,
  pub cctxs: Vec<(RelPath, CompilationContext)>,
  pub js_targets: BTreeSet<String>,
  pub extra_source_dirs: Vec<RelPath>,
}

/// Module names available to stanzas that list none: the `.ml` and `.mly`
/// stems of the given directories.
pub fn default_modules(dirs: &[&SourceDir]) -> Vec<String> {
  let set: BTreeSet<String> = dirs
    .iter()
    .flat_map(|d| d.files.iter())
    .filter_map(|f| f.strip_suffix(".ml").or_else(|| f.strip_suffix(".mly")))
    .map(str::to_string)
    .collect();
  set.into_iter().collect()
}

/// Fold every stanza of `src` into `acc`.
pub fn fold_stanzas(env: &GenEnv<'_>, src: &SourceDir, modules: &[String], acc: FoldAcc) -> Result<FoldAcc, GenError> {
  src
    .located_stanzas()
    .try_fold(acc, |acc, (loc, stanza)| fold_one(env, src, modules, &loc, stanza, acc))
}

fn fold_one(
  env: &GenEnv<'_>,
  src: &SourceDir,
  modules: &[String],
  loc: &Loc,
  stanza: &Stanza,
  mut acc: FoldAcc,
) -> Result<FoldAcc, GenError> {
  let dir = &src.path;
  match stanza {
    Stanza::Library(lib) => library(env, dir, modules, loc, lib, &mut acc)?,
    Stanza::ForeignLibrary(lib) => foreign_library(env, dir, loc, lib)?,
    Stanza::Executables(exes) => executables(env, dir, modules, loc, exes, &mut acc)?,
    Stanza::Tests(tests) => test_stanza(env, dir, modules, loc, tests, &mut acc)?,
    Stanza::Alias(alias) => alias_stanza(env, dir, loc, alias)?,
    Stanza::Rule(rule) => rule_stanza(env, src, loc, rule)?,
    Stanza::CopyFiles(copy) => copy_files(env, dir, loc, copy, &mut acc)?,
    Stanza::Install(install) => install_stanza(env, dir, loc, install)?,
    Stanza::Plugin(plugin) => plugin_stanza(env, dir, loc, plugin)?,
    Stanza::Documentation(doc) => documentation(env, src, loc, doc)?,
    Stanza::Mdx(mdx) => mdx_stanza(env, dir, loc, mdx)?,
    // Handled once folding is done, or by the cram generator.
    Stanza::ParserGenerator(_) | Stanza::Theory(_) | Stanza::Extraction(_) | Stanza::Cram(_) => {}
    Stanza::Unknown => debug!(loc = %loc, "ignoring unknown stanza"),
  }
  Ok(acc)
}

fn or_defaults(declared: &[String], defaults: &[String]) -> Vec<String> {
  if declared.is_empty() {
    defaults.to_vec()
  } else {
    declared.to_vec()
  }
}

fn library(
  env: &GenEnv<'_>,
  dir: &RelPath,
  modules: &[String],
  loc: &Loc,
  lib: &Library,
  acc: &mut FoldAcc,
) -> Result<(), GenError> {
  if !env.session.package_visible(lib.package.as_deref()) || !env.enabled(loc, lib.enabled_if.as_ref())? {
    debug!(loc = %loc, library = %lib.name, "library disabled");
    return Ok(());
  }

  let lib = Library {
    modules: or_defaults(&lib.modules, modules),
    ..lib.clone()
  };
  let out = env.session.compiler.library(&env.compile_env(dir, loc), &lib)?;

  if lib.public_name.is_some()
    && let Some(pkg) = env.session.package_or_default(lib.package.as_deref())
  {
    let archive = format!("{}.cma", lib.name);
    env.session.installs.add(
      env.sink.owner(),
      InstallEntry::new(&pkg, Section::Lib, env.build(&dir.join(&archive)), &archive),
    );
  }

  acc.ide.push(out.ide);
  acc.cctxs.push((dir.clone(), out.cctx));
  Ok(())
}

fn foreign_library(env: &GenEnv<'_>, dir: &RelPath, loc: &Loc, lib: &ForeignLibrary) -> Result<(), GenError> {
  let mut objects = Vec::with_capacity(lib.sources.len());
  for source in &lib.sources {
    let src = env.build(&dir.join(&format!("{}.c", source)));
    let obj = env.build(&dir.join(&format!("{}.o", source)));
    env.add(
      Rule::new(Action::run("cc", ["-c".to_string(), "-o".to_string(), obj.to_string(), src.to_string()]))
        .target(obj.clone())
        .dep(Dep::File(src))
        .at(loc.clone()),
    )?;
    objects.push(obj);
  }

  let archive = env.build(&dir.join(&format!("lib{}_stubs.a", lib.name)));
  env.add(
    Rule::new(Action::run(
      "ar",
      ["rcs".to_string(), archive.to_string()]
        .into_iter()
        .chain(objects.iter().map(ToString::to_string)),
    ))
    .target(archive)
    .deps(objects.into_iter().map(Dep::File))
    .at(loc.clone()),
  )?;
  Ok(())
}

fn js_artifacts(names: &[String], modes: &[Mode], acc: &mut FoldAcc) {
  if !modes.contains(&Mode::Js) {
    return;
  }
  for name in names {
    acc.js_targets.insert(format!("{}{}", name, JS_SUFFIX));
    acc.js_targets.insert(format!("{}{}", name, JS_RUNTIME_SUFFIX));
  }
}

/// The artifact installed for an executable: native when built, bytecode
/// otherwise.
fn installable(name: &str, modes: &[Mode]) -> Option<String> {
  exe_outputs(name, modes)
    .into_iter()
    .find(|o| o.ends_with(".exe") || o.ends_with(".bc"))
}

fn executables(
  env: &GenEnv<'_>,
  dir: &RelPath,
  modules: &[String],
  loc: &Loc,
  exes: &Executables,
  acc: &mut FoldAcc,
) -> Result<(), GenError> {
  if !env.enabled(loc, exes.enabled_if.as_ref())? {
    return Ok(());
  }

  let modules = or_defaults(&exes.modules, modules);
  let out = env.session.compiler.executables(&env.compile_env(dir, loc), &ExeSpec {
    kind: CctxKind::Executables,
    names: &exes.names,
    modules: &modules,
    libraries: &exes.libraries,
    modes: &exes.modes,
  })?;
  js_artifacts(&exes.names, &exes.modes, acc);

  if !exes.public_names.is_empty() && env.session.package_visible(exes.package.as_deref()) {
    match env.session.package_or_default(exes.package.as_deref()) {
      Some(pkg) => {
        for (name, public) in exes.names.iter().zip(&exes.public_names) {
          if let Some(artifact) = installable(name, &exes.modes) {
            env.session.installs.add(
              env.sink.owner(),
              InstallEntry::new(&pkg, Section::Bin, env.build(&dir.join(&artifact)), public),
            );
          }
        }
      }
      None => warn!(loc = %loc, "public executables without a package are not installed"),
    }
  }

  acc.ide.push(out.ide);
  acc.cctxs.push((dir.clone(), out.cctx));
  Ok(())
}

fn test_stanza(
  env: &GenEnv<'_>,
  dir: &RelPath,
  modules: &[String],
  loc: &Loc,
  tests: &Tests,
  acc: &mut FoldAcc,
) -> Result<(), GenError> {
  if !env.session.package_visible(tests.package.as_deref()) || !env.enabled(loc, tests.enabled_if.as_ref())? {
    return Ok(());
  }

  let modules = or_defaults(&tests.modules, modules);
  let out = env.session.compiler.executables(&env.compile_env(dir, loc), &ExeSpec {
    kind: CctxKind::Tests,
    names: &tests.names,
    modules: &modules,
    libraries: &tests.libraries,
    modes: &tests.modes,
  })?;
  js_artifacts(&tests.names, &tests.modes, acc);

  let extra = env.lower_deps(loc, dir, &tests.deps)?;
  let runtest = env.alias_key(dir, ALIAS_RUNTEST);
  for name in &tests.names {
    let Some(artifact) = installable(name, &tests.modes) else {
      continue;
    };
    let exe = env.build(&dir.join(&artifact));
    env.sink.alias_action(
      &runtest,
      Rule::new(Action::run(&format!("./{}", artifact), Vec::new()))
        .dep(Dep::File(exe.clone()))
        .deps(extra.iter().cloned())
        .at(loc.clone()),
    )?;
    if let Some(pkg) = tests.package.as_deref() {
      env
        .session
        .installs
        .add(env.sink.owner(), InstallEntry::new(pkg, Section::Test, exe, &artifact));
    }
  }

  acc.ide.push(out.ide);
  acc.cctxs.push((dir.clone(), out.cctx));
  Ok(())
}

fn command(env: &GenEnv<'_>, loc: &Loc, argv: &[Template]) -> Result<Action, GenError> {
  let mut words = argv.iter().map(|t| env.expand(loc, t));
  match words.next() {
    Some(prog) => Ok(Action::run(&prog?, words.collect::<Result<Vec<_>, _>>()?)),
    None => Ok(Action::empty()),
  }
}

fn alias_stanza(env: &GenEnv<'_>, dir: &RelPath, loc: &Loc, alias: &AliasStanza) -> Result<(), GenError> {
  if !env.session.package_visible(alias.package.as_deref()) || !env.enabled(loc, alias.enabled_if.as_ref())? {
    return Ok(());
  }

  let key = env.alias_key(dir, &alias.name);
  let deps = env.lower_deps(loc, dir, &alias.deps)?;
  match &alias.action {
    Some(argv) => {
      let action = command(env, loc, argv)?;
      env.sink.alias_action(&key, Rule::new(action).deps(deps).at(loc.clone()))?;
    }
    None => env.sink.alias_deps(&key, deps),
  }
  Ok(())
}

fn rule_stanza(env: &GenEnv<'_>, src: &SourceDir, loc: &Loc, rule: &RuleStanza) -> Result<(), GenError> {
  if !env.enabled(loc, rule.enabled_if.as_ref())? {
    return Ok(());
  }
  let dir = &src.path;
  if rule.mode == RuleMode::Fallback && rule.targets.iter().all(|t| src.has_file(t)) {
    debug!(loc = %loc, "fallback rule shadowed by source files");
    return Ok(());
  }

  let targets: Vec<_> = rule.targets.iter().map(|t| env.build(&dir.join(t))).collect();
  let deps = env.lower_deps(loc, dir, &rule.deps)?;
  let action = command(env, loc, &rule.action)?;
  env.add(
    Rule::new(action)
      .targets(targets.iter().cloned())
      .deps(deps)
      .at(loc.clone()),
  )?;

  if let Some(alias) = &rule.alias {
    env
      .sink
      .alias_deps(&env.alias_key(dir, alias), targets.into_iter().map(Dep::File));
  }
  Ok(())
}

fn copy_files(env: &GenEnv<'_>, dir: &RelPath, loc: &Loc, copy: &CopyFiles, acc: &mut FoldAcc) -> Result<(), GenError> {
  let from = dir.join(&copy.from);
  let matcher = Glob::new(&copy.glob)
    .map_err(|e| GenError::Glob {
      loc: loc.to_string(),
      glob: copy.glob.clone(),
      message: e.to_string(),
    })?
    .compile_matcher();
  let Some(source) = env.tree.find_dir(&from) else {
    return Err(GenError::Stanza {
      loc: loc.to_string(),
      message: format!("directory {} does not exist", from),
    });
  };

  let mut copied = Vec::new();
  for file in source.files.iter().filter(|f| matcher.is_match(f.as_str())) {
    let dst = env.build(&dir.join(file));
    env.add(
      Rule::new(Action::Copy {
        src: Path::Source(from.join(file)),
        dst: dst.clone(),
      })
      .target(dst.clone())
      .at(loc.clone()),
    )?;
    copied.push(Dep::File(dst));
  }
  if let Some(alias) = &copy.alias {
    env.sink.alias_deps(&env.alias_key(dir, alias), copied);
  }
  if !acc.extra_source_dirs.contains(&from) {
    acc.extra_source_dirs.push(from);
  }
  Ok(())
}

fn install_stanza(env: &GenEnv<'_>, dir: &RelPath, loc: &Loc, install: &InstallStanza) -> Result<(), GenError> {
  let Some(pkg) = env.session.package_or_default(install.package.as_deref()) else {
    return Err(GenError::Stanza {
      loc: loc.to_string(),
      message: "install stanza needs a package".to_string(),
    });
  };
  if !env.session.package_visible(Some(&pkg)) {
    return Ok(());
  }
  for file in &install.files {
    let src = env.build(&dir.join(&file.src));
    let name = file
      .dst
      .clone()
      .or_else(|| RelPath::new(&file.src).basename().map(str::to_string))
      .unwrap_or_else(|| file.src.clone());
    env
      .session
      .installs
      .add(env.sink.owner(), InstallEntry::new(&pkg, install.section, src, &name));
  }
  Ok(())
}

fn plugin_stanza(env: &GenEnv<'_>, dir: &RelPath, loc: &Loc, plugin: &Plugin) -> Result<(), GenError> {
  if !env.session.package_visible(Some(&plugin.package)) {
    return Ok(());
  }
  let meta = env.build(&dir.join(&format!("{}.plugin", plugin.name)));
  env.add(
    Rule::new(Action::WriteFile {
      dst: meta.clone(),
      contents: format!("requires = \"{}\"\n", plugin.libraries.join(" ")),
    })
    .target(meta.clone())
    .at(loc.clone()),
  )?;
  env.session.installs.add(
    env.sink.owner(),
    InstallEntry {
      package: plugin.package.clone(),
      section: Section::Share,
      src: meta,
      dst: Section::Share
        .install_dir(&plugin.package)
        .join(&plugin.site)
        .join(&plugin.name)
        .join("META"),
    },
  );
  Ok(())
}

fn documentation(env: &GenEnv<'_>, src: &SourceDir, loc: &Loc, doc: &Documentation) -> Result<(), GenError> {
  if !env.session.package_visible(doc.package.as_deref()) {
    return Ok(());
  }
  let dir = &src.path;
  let pages: Vec<String> = if doc.pages.is_empty() {
    src
      .files
      .iter()
      .filter_map(|f| f.strip_suffix(".mld"))
      .map(str::to_string)
      .collect()
  } else {
    doc.pages.clone()
  };

  let mut html = Vec::with_capacity(pages.len());
  for page in &pages {
    let input = env.build(&dir.join(&format!("{}.mld", page)));
    let output = env.build(&dir.join(&format!("{}.html", page)));
    env.add(
      Rule::new(Action::run("doc-page", ["-o".to_string(), output.to_string(), input.to_string()]))
        .target(output.clone())
        .dep(Dep::File(input))
        .at(loc.clone()),
    )?;
    html.push(Dep::File(output));
  }
  env.sink.alias_deps(&env.alias_key(dir, ALIAS_DOC), html);
  Ok(())
}

fn mdx_stanza(env: &GenEnv<'_>, dir: &RelPath, loc: &Loc, mdx: &Mdx) -> Result<(), GenError> {
  if !env.session.package_visible(mdx.package.as_deref()) || !env.enabled(loc, mdx.enabled_if.as_ref())? {
    return Ok(());
  }
  let runtest = env.alias_key(dir, ALIAS_RUNTEST);
  for file in &mdx.files {
    let input = env.build(&dir.join(file));
    let corrected = env.build(&dir.join(&format!("{}{}", file, CRAM_CORRECTED_EXT)));
    env.sink.alias_action(
      &runtest,
      Rule::new(Action::Progn {
        actions: vec![
          Action::run("mdx", ["test".to_string(), input.to_string()]),
          Action::Diff {
            expected: input.clone(),
            actual: corrected,
            optional: true,
          },
        ],
      })
      .dep(Dep::File(input))
      .at(loc.clone()),
    )?;
  }
  Ok(())
}

/// Handle stanzas that need the folded compilation contexts or have their own
/// generators: grammar modules, proof theories and extraction.
pub fn after_fold(env: &GenEnv<'_>, src: &SourceDir, acc: &FoldAcc) -> Result<(), GenError> {
  for (loc, stanza) in src.located_stanzas() {
    match stanza {
      Stanza::ParserGenerator(pg) => parser_generator(env, &src.path, &loc, pg, acc)?,
      Stanza::Theory(theory) => theory_stanza(env, &src.path, &loc, theory)?,
      Stanza::Extraction(extraction) => extraction_stanza(env, &src.path, &loc, extraction)?,
      _ => {}
    }
  }
  Ok(())
}

fn parser_generator(
  env: &GenEnv<'_>,
  dir: &RelPath,
  loc: &Loc,
  pg: &ParserGenerator,
  acc: &FoldAcc,
) -> Result<(), GenError> {
  for module in &pg.modules {
    let targets = [
      env.build(&dir.join(&format!("{}.ml", module))),
      env.build(&dir.join(&format!("{}.mli", module))),
    ];
    let owner = acc.cctxs.iter().find(|(_, cctx)| cctx.has_module(module));
    let rule = match owner {
      Some((_, cctx)) => {
        let grammar = env.build(&dir.join(&format!("{}.mly", module)));
        Rule::new(Action::run(
          "parser-gen",
          pg.flags
            .iter()
            .cloned()
            .chain(["--for".to_string(), cctx.name.clone(), grammar.to_string()]),
        ))
        .dep(Dep::File(grammar))
      }
      None => {
        debug!(loc = %loc, module = %module, "grammar module has no compilation context");
        Rule::new(Action::Fail {
          message: format!(
            "no library, executable or test in {} uses module {}; it may be excluded by package filtering",
            dir, module
          ),
        })
      }
    };
    env.add(rule.targets(targets).at(loc.clone()))?;
  }
  Ok(())
}

fn theory_stanza(env: &GenEnv<'_>, dir: &RelPath, loc: &Loc, theory: &Theory) -> Result<(), GenError> {
  if !env.session.package_visible(theory.package.as_deref()) {
    return Ok(());
  }
  for module in &theory.modules {
    let input = env.build(&dir.join(&format!("{}.v", module)));
    let output = env.build(&dir.join(&format!("{}.vo", module)));
    env.add(
      Rule::new(Action::run("proof-compile", [
        "-Q".to_string(),
        theory.name.clone(),
        input.to_string(),
      ]))
      .target(output)
      .dep(Dep::File(input))
      .at(loc.clone()),
    )?;
  }
  Ok(())
}

fn extraction_stanza(env: &GenEnv<'_>, dir: &RelPath, loc: &Loc, extraction: &Extraction) -> Result<(), GenError> {
  let prelude = env.build(&dir.join(&format!("{}.v", extraction.prelude)));
  let targets = extraction.extracted_modules.iter().flat_map(|m| {
    [
      env.build(&dir.join(&format!("{}.ml", m))),
      env.build(&dir.join(&format!("{}.mli", m))),
    ]
  });
  env.add(
    Rule::new(Action::run("proof-extract", [prelude.to_string()]))
      .targets(targets)
      .dep(Dep::File(prelude))
      .at(loc.clone()),
  )?;
  Ok(())
}
