//! Shell-transcript test rules.
//!
//! A test is either a `<name>.t` file or a `<name>.t/` directory holding a
//! `run.t` script. Each test's configuration is folded from the `cram`
//! stanzas of its directory and every ancestor: stanzas that apply to the
//! whole subtree contribute from any level, stanzas scoped to test names
//! only from the test's own directory.

use std::collections::BTreeSet;

use globset::Glob;
use tracing::debug;

use crate::condition::Condition;
use crate::consts::{ALIAS_RUNTEST, CRAM_CORRECTED_EXT, CRAM_EXT, CRAM_SCRIPT};
use crate::path::RelPath;
use crate::rules::{Action, Dep, Rule};
use crate::source_tree::{SourceDir, SourceTree};
use crate::stanza::{AppliesTo, CramStanza, DepDecl, Loc, Stanza};

use super::env::GenEnv;
use super::types::GenError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CramTest {
  File { name: String, script: RelPath },
  Dir { name: String, dir: RelPath, script: RelPath },
  /// A test directory without its driver script.
  Invalid { name: String, dir: RelPath },
}

impl CramTest {
  pub fn name(&self) -> &str {
    match self {
      CramTest::File { name, .. } | CramTest::Dir { name, .. } | CramTest::Invalid { name, .. } => name,
    }
  }
}

/// Tests declared directly in `src`, sorted by name. The inside of a test
/// directory declares no tests of its own.
pub fn discover(tree: &SourceTree, src: &SourceDir) -> Vec<CramTest> {
  if src.path.basename().is_some_and(|b| b.ends_with(CRAM_EXT)) {
    return Vec::new();
  }
  let mut tests: Vec<CramTest> = src
    .files
    .iter()
    .filter_map(|f| {
      f.strip_suffix(CRAM_EXT).filter(|n| !n.is_empty()).map(|name| CramTest::File {
        name: name.to_string(),
        script: src.path.join(f),
      })
    })
    .collect();

  for sub in &src.subdirs {
    let Some(name) = sub.strip_suffix(CRAM_EXT).filter(|n| !n.is_empty()) else {
      continue;
    };
    let dir = src.path.join(sub);
    let script = dir.join(CRAM_SCRIPT);
    tests.push(if tree.file_exists(&script) {
      CramTest::Dir {
        name: name.to_string(),
        dir,
        script,
      }
    } else {
      CramTest::Invalid {
        name: name.to_string(),
        dir,
      }
    });
  }

  tests.sort_by(|a, b| a.name().cmp(b.name()));
  tests
}

/// Configuration of one test after folding every applicable stanza.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectiveConfig {
  pub enabled_if: Vec<Condition>,
  /// Extra dependencies by declaring stanza, innermost first.
  pub deps: Vec<(Loc, RelPath, Vec<DepDecl>)>,
  pub aliases: BTreeSet<String>,
  pub packages: BTreeSet<String>,
}

impl EffectiveConfig {
  fn new(name: &str) -> Self {
    Self {
      enabled_if: Vec::new(),
      deps: Vec::new(),
      aliases: BTreeSet::from([ALIAS_RUNTEST.to_string(), name.to_string()]),
      packages: BTreeSet::new(),
    }
  }

  fn apply(&mut self, loc: Loc, dir: &RelPath, stanza: &CramStanza) {
    if let Some(c) = &stanza.enabled_if {
      self.enabled_if.push(c.clone());
    }
    if !stanza.deps.is_empty() && !self.deps.iter().any(|(l, _, _)| *l == loc) {
      self.deps.insert(0, (loc, dir.clone(), stanza.deps.clone()));
    }
    if let Some(alias) = &stanza.alias {
      self.aliases.insert(alias.clone());
    }
    if let Some(pkg) = &stanza.package {
      self.packages.insert(pkg.clone());
    }
  }
}

fn applies(loc: &Loc, stanza: &CramStanza, own_dir: bool, name: &str) -> Result<bool, GenError> {
  match &stanza.applies_to {
    AppliesTo::WholeSubtree => Ok(true),
    AppliesTo::Files(_) if !own_dir => Ok(false),
    AppliesTo::Files(globs) => {
      for glob in globs {
        let matcher = Glob::new(glob)
          .map_err(|e| GenError::Glob {
            loc: loc.to_string(),
            glob: glob.clone(),
            message: e.to_string(),
          })?
          .compile_matcher();
        if matcher.is_match(name) {
          return Ok(true);
        }
      }
      Ok(false)
    }
  }
}

/// Fold the `cram` stanzas of `dir` and its ancestors, root to leaf, for the
/// test called `name`.
pub fn effective_config(tree: &SourceTree, dir: &RelPath, name: &str) -> Result<EffectiveConfig, GenError> {
  let mut config = EffectiveConfig::new(name);
  for ancestor in dir.ancestors() {
    let Some(src) = tree.find_dir(&ancestor) else {
      continue;
    };
    let own_dir = &ancestor == dir;
    for (loc, stanza) in src.located_stanzas() {
      if let Stanza::Cram(cram) = stanza
        && applies(&loc, cram, own_dir, name)?
      {
        config.apply(loc, &ancestor, cram);
      }
    }
  }
  Ok(config)
}

/// Register the rules of every test declared in `src`.
pub fn gen_rules(env: &GenEnv<'_>, src: &SourceDir) -> Result<(), GenError> {
  let tree = env.tree;
  for test in discover(tree, src) {
    let config = effective_config(tree, &src.path, test.name())?;

    if let Some(only) = &env.session.only_packages
      && !config.packages.is_empty()
      && config.packages.is_disjoint(only)
    {
      debug!(test = %test.name(), "test filtered out by package restriction");
      continue;
    }

    let rule = match &test {
      CramTest::Invalid { dir, .. } => Rule::new(Action::Fail {
        message: format!("test directory {} has no {} script", dir, CRAM_SCRIPT),
      })
      .at(Loc::file(dir.clone())),
      CramTest::File { script, .. } | CramTest::Dir { script, .. } => {
        let enabled = Condition::eval_all(&config.enabled_if, env.ctx).map_err(|source| GenError::Condition {
          loc: script.to_string(),
          source,
        })?;
        if enabled {
          enabled_rule(env, &test, script, &config)?
        } else {
          Rule::new(Action::empty()).at(Loc::file(script.clone()))
        }
      }
    };

    for alias in &config.aliases {
      env.sink.alias_action(&env.alias_key(&src.path, alias), rule.clone())?;
    }
  }
  Ok(())
}

fn enabled_rule(env: &GenEnv<'_>, test: &CramTest, script: &RelPath, config: &EffectiveConfig) -> Result<Rule, GenError> {
  let script_path = env.build(script);
  let corrected = env.build(&RelPath::new(&format!("{}{}", script.as_str(), CRAM_CORRECTED_EXT)));

  let mut extra = Vec::new();
  for (loc, dir, decls) in &config.deps {
    extra.extend(env.lower_deps(loc, dir, decls)?);
  }

  let mut rule = Rule::new(Action::Progn {
    actions: vec![
      Action::Cram {
        script: script_path.clone(),
      },
      Action::Diff {
        expected: script_path.clone(),
        actual: corrected,
        optional: true,
      },
    ],
  })
  .dep(Dep::File(script_path))
  .deps(extra)
  .at(Loc::file(script.clone()))
  .exclusive();

  if let CramTest::Dir { dir, .. } = test {
    rule = rule.dep(Dep::SourceTree(env.build(dir)));
  }
  Ok(rule)
}
