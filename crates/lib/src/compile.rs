//! Compilation rules for libraries and executables.
//!
//! Stanza folding delegates the actual compiler rules to a
//! [`CompilerProvider`]; what comes back is the compilation context and the
//! editor metadata for the stanza. [`DefaultCompiler`] registers one rule per
//! module plus the archive or link rules.

use serde::Serialize;

use crate::consts::{JS_RUNTIME_SUFFIX, JS_SUFFIX, PPX_DIR};
use crate::context::Context;
use crate::path::{BuildPath, RelPath};
use crate::rules::{Action, Dep, RegistryError, Rule, RuleSink};
use crate::source_tree::SourceTree;
use crate::stanza::{Library, Loc, Mode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CctxKind {
  Library,
  Executables,
  Tests,
}

impl CctxKind {
  pub fn as_str(self) -> &'static str {
    match self {
      CctxKind::Library => "lib",
      CctxKind::Executables => "exe",
      CctxKind::Tests => "test",
    }
  }
}

/// What a compilation stanza produced: the module set it owns and where its
/// objects go.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompilationContext {
  pub name: String,
  pub kind: CctxKind,
  pub dir: RelPath,
  pub obj_dir: RelPath,
  pub modules: Vec<String>,
  pub requires: Vec<String>,
}

impl CompilationContext {
  pub fn has_module(&self, module: &str) -> bool {
    self.modules.iter().any(|m| m == module)
  }
}

/// Editor configuration for one compilation stanza.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdeEntry {
  pub kind: CctxKind,
  pub name: String,
  pub source_dirs: Vec<RelPath>,
  pub obj_dir: RelPath,
  pub flags: Vec<String>,
}

pub struct CompileOutput {
  pub cctx: CompilationContext,
  pub ide: IdeEntry,
}

/// Inputs shared by every provider call.
pub struct CompileEnv<'a> {
  pub ctx: &'a Context,
  pub tree: &'a SourceTree,
  pub sink: &'a RuleSink<'a>,
  pub dir: &'a RelPath,
  pub loc: &'a Loc,
}

impl CompileEnv<'_> {
  fn build(&self, rel: &RelPath) -> BuildPath {
    self.ctx.build_path(rel)
  }
}

pub struct ExeSpec<'a> {
  pub kind: CctxKind,
  pub names: &'a [String],
  pub modules: &'a [String],
  pub libraries: &'a [String],
  pub modes: &'a [Mode],
}

pub trait CompilerProvider: Send + Sync {
  fn library(&self, env: &CompileEnv<'_>, lib: &Library) -> Result<CompileOutput, RegistryError>;

  fn executables(&self, env: &CompileEnv<'_>, exes: &ExeSpec<'_>) -> Result<CompileOutput, RegistryError>;
}

/// Directory name under `.ppx` for a preprocessor set.
pub fn ppx_key(preprocess: &[String]) -> String {
  let mut names: Vec<&str> = preprocess.iter().map(String::as_str).collect();
  names.sort_unstable();
  names.dedup();
  names.join("+")
}

/// Executable artifacts produced for `name` in `modes`.
pub fn exe_outputs(name: &str, modes: &[Mode]) -> Vec<String> {
  let mut out = Vec::new();
  if modes.contains(&Mode::Native) {
    out.push(format!("{}.exe", name));
  }
  if modes.contains(&Mode::Byte) || modes.contains(&Mode::Js) {
    out.push(format!("{}.bc", name));
  }
  if modes.contains(&Mode::Js) {
    out.push(format!("{}{}", name, JS_SUFFIX));
    out.push(format!("{}{}", name, JS_RUNTIME_SUFFIX));
  }
  out
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultCompiler;

impl DefaultCompiler {
  fn archive_deps(env: &CompileEnv<'_>, libraries: &[String]) -> Vec<Dep> {
    libraries
      .iter()
      .filter_map(|name| env.tree.find_library(name))
      .map(|(dir, lib)| Dep::File(env.build(&dir.join(&format!("{}.cma", lib.name)))))
      .collect()
  }

  /// Register one rule per module and return the object files.
  fn compile_modules(
    env: &CompileEnv<'_>,
    obj_dir: &RelPath,
    modules: &[String],
    extra: &[Dep],
  ) -> Result<Vec<BuildPath>, RegistryError> {
    let byte = obj_dir.join("byte");
    let mut objects = Vec::with_capacity(modules.len());
    for module in modules {
      let src = env.build(&env.dir.join(&format!("{}.ml", module)));
      let obj = env.build(&byte.join(&format!("{}.cmo", module)));
      env.sink.add(
        Rule::new(Action::run("compile", [
          "-c".to_string(),
          "-o".to_string(),
          obj.to_string(),
          src.to_string(),
        ]))
        .target(obj.clone())
        .dep(Dep::File(src))
        .deps(extra.iter().cloned())
        .at(env.loc.clone()),
      )?;
      objects.push(obj);
    }
    Ok(objects)
  }
}

impl CompilerProvider for DefaultCompiler {
  fn library(&self, env: &CompileEnv<'_>, lib: &Library) -> Result<CompileOutput, RegistryError> {
    let obj_dir = env.dir.join(&format!(".{}.objs", lib.name));
    let mut extra = Self::archive_deps(env, &lib.libraries);
    let mut flags = Vec::new();
    if !lib.preprocess.is_empty() {
      let key = ppx_key(&lib.preprocess);
      let driver = env.build(&RelPath::new(PPX_DIR).join(&key).join("ppx.exe"));
      flags = vec!["-pp".to_string(), driver.to_string()];
      extra.push(Dep::File(driver));
    }

    let objects = Self::compile_modules(env, &obj_dir, &lib.modules, &extra)?;
    let archive = env.build(&env.dir.join(&format!("{}.cma", lib.name)));
    env.sink.add(
      Rule::new(Action::run(
        "archive",
        ["-a".to_string(), "-o".to_string(), archive.to_string()]
          .into_iter()
          .chain(objects.iter().map(ToString::to_string)),
      ))
      .target(archive)
      .deps(objects.into_iter().map(Dep::File))
      .at(env.loc.clone()),
    )?;

    Ok(CompileOutput {
      cctx: CompilationContext {
        name: lib.name.clone(),
        kind: CctxKind::Library,
        dir: env.dir.clone(),
        obj_dir: obj_dir.clone(),
        modules: lib.modules.clone(),
        requires: lib.libraries.clone(),
      },
      ide: IdeEntry {
        kind: CctxKind::Library,
        name: lib.name.clone(),
        source_dirs: vec![env.dir.clone()],
        obj_dir,
        flags,
      },
    })
  }

  fn executables(&self, env: &CompileEnv<'_>, exes: &ExeSpec<'_>) -> Result<CompileOutput, RegistryError> {
    let first = exes.names.first().cloned().unwrap_or_default();
    let obj_dir = env.dir.join(&format!(".{}.eobjs", first));
    let archives = Self::archive_deps(env, exes.libraries);
    let objects = Self::compile_modules(env, &obj_dir, exes.modules, &archives)?;

    for name in exes.names {
      for output in exe_outputs(name, exes.modes) {
        let target = env.build(&env.dir.join(&output));
        let rule = if output.ends_with(JS_RUNTIME_SUFFIX) {
          Rule::new(Action::run("js-runtime", ["-o".to_string(), target.to_string()]))
        } else if output.ends_with(JS_SUFFIX) {
          let bytecode = env.build(&env.dir.join(&format!("{}.bc", name)));
          Rule::new(Action::run("js-link", [
            "-o".to_string(),
            target.to_string(),
            bytecode.to_string(),
          ]))
          .dep(Dep::File(bytecode))
        } else {
          Rule::new(Action::run(
            "link",
            ["-o".to_string(), target.to_string()]
              .into_iter()
              .chain(objects.iter().map(ToString::to_string)),
          ))
          .deps(objects.iter().cloned().map(Dep::File))
          .deps(archives.iter().cloned())
        };
        env.sink.add(rule.target(target).at(env.loc.clone()))?;
      }
    }

    Ok(CompileOutput {
      cctx: CompilationContext {
        name: first.clone(),
        kind: exes.kind,
        dir: env.dir.clone(),
        obj_dir: obj_dir.clone(),
        modules: exes.modules.to_vec(),
        requires: exes.libraries.to_vec(),
      },
      ide: IdeEntry {
        kind: exes.kind,
        name: first,
        source_dirs: vec![env.dir.clone()],
        obj_dir,
        flags: Vec::new(),
      },
    })
  }
}
