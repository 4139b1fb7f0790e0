//! Rule, action and dependency types handed to the execution engine.

use std::collections::BTreeSet;
use std::fmt;

use globset::Glob;
use serde::{Deserialize, Serialize};

use crate::path::{BuildPath, Path};
use crate::stanza::Loc;
use crate::util::hash::Hashable;

/// A named alias anchored at a build directory.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AliasKey {
  pub dir: BuildPath,
  pub name: String,
}

impl AliasKey {
  pub fn new(dir: BuildPath, name: &str) -> Self {
    Self {
      dir,
      name: name.to_string(),
    }
  }
}

impl fmt::Display for AliasKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "@{}/{}", self.dir, self.name)
  }
}

/// Selects files of a directory by basename.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilePredicate {
  All,
  /// Everything except the listed basenames.
  Except(BTreeSet<String>),
  Glob(String),
}

impl FilePredicate {
  pub fn matches(&self, basename: &str) -> bool {
    match self {
      FilePredicate::All => true,
      FilePredicate::Except(names) => !names.contains(basename),
      FilePredicate::Glob(pattern) => Glob::new(pattern)
        .map(|g| g.compile_matcher().is_match(basename))
        .unwrap_or(false),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dep {
  File(BuildPath),
  Alias(AliasKey),
  AliasRec(AliasKey),
  /// Every target of `dir` whose basename satisfies the predicate, evaluated
  /// when the dependency is needed rather than when it is registered.
  Matching { dir: BuildPath, predicate: FilePredicate },
  /// The whole recursive content of a directory.
  SourceTree(BuildPath),
  Universe,
}

impl fmt::Display for Dep {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Dep::File(p) => write!(f, "{}", p),
      Dep::Alias(a) => write!(f, "{}", a),
      Dep::AliasRec(a) => write!(f, "{} (recursive)", a),
      Dep::Matching { dir, .. } => write!(f, "{}/<matching>", dir),
      Dep::SourceTree(p) => write!(f, "{}/**", p),
      Dep::Universe => write!(f, "<universe>"),
    }
  }
}

/// Execution isolation requested by a rule.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Isolation {
  #[default]
  Shared,
  /// Run alone, never alongside actions sharing mutable state.
  Exclusive,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
  Copy { src: Path, dst: BuildPath },
  Symlink { src: BuildPath, dst: BuildPath },
  WriteFile { dst: BuildPath, contents: String },
  Run { prog: String, args: Vec<String> },
  /// Run a shell-transcript test script, writing `<script>.corrected`.
  Cram { script: BuildPath },
  Diff { expected: BuildPath, actual: BuildPath, optional: bool },
  Progn { actions: Vec<Action> },
  Fail { message: String },
}

impl Action {
  /// The empty action; always succeeds and does nothing.
  pub fn empty() -> Self {
    Action::Progn { actions: Vec::new() }
  }

  pub fn run(prog: &str, args: impl IntoIterator<Item = String>) -> Self {
    Action::Run {
      prog: prog.to_string(),
      args: args.into_iter().collect(),
    }
  }

  pub fn is_empty(&self) -> bool {
    matches!(self, Action::Progn { actions } if actions.iter().all(Action::is_empty))
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rule {
  pub targets: BTreeSet<BuildPath>,
  pub deps: Vec<Dep>,
  pub action: Action,
  pub loc: Option<Loc>,
  pub isolation: Isolation,
  /// Set for rules attached to an alias; such rules declare no targets.
  pub alias: Option<AliasKey>,
}

impl Hashable for Rule {}

impl Rule {
  pub fn new(action: Action) -> Self {
    Self {
      targets: BTreeSet::new(),
      deps: Vec::new(),
      action,
      loc: None,
      isolation: Isolation::Shared,
      alias: None,
    }
  }

  pub fn target(mut self, target: BuildPath) -> Self {
    self.targets.insert(target);
    self
  }

  pub fn targets(mut self, targets: impl IntoIterator<Item = BuildPath>) -> Self {
    self.targets.extend(targets);
    self
  }

  pub fn dep(mut self, dep: Dep) -> Self {
    self.deps.push(dep);
    self
  }

  pub fn deps(mut self, deps: impl IntoIterator<Item = Dep>) -> Self {
    self.deps.extend(deps);
    self
  }

  pub fn at(mut self, loc: Loc) -> Self {
    self.loc = Some(loc);
    self
  }

  pub fn exclusive(mut self) -> Self {
    self.isolation = Isolation::Exclusive;
    self
  }

  pub fn for_alias(mut self, alias: AliasKey) -> Self {
    self.alias = Some(alias);
    self
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn predicates() {
    let except = FilePredicate::Except(BTreeSet::from(["main.bc.js".to_string()]));
    assert!(except.matches("main.exe"));
    assert!(!except.matches("main.bc.js"));
    assert!(FilePredicate::Glob("*.ml".to_string()).matches("a.ml"));
    assert!(!FilePredicate::Glob("*.ml".to_string()).matches("a.mli"));
    assert!(!FilePredicate::Glob("[".to_string()).matches("["));
  }

  #[test]
  fn empty_action_detection() {
    assert!(Action::empty().is_empty());
    assert!(
      Action::Progn {
        actions: vec![Action::empty()]
      }
      .is_empty()
    );
    assert!(!Action::Fail { message: "x".into() }.is_empty());
  }

  #[test]
  fn rule_ids_depend_on_content() {
    let a = Rule::new(Action::empty()).for_alias(AliasKey::new(BuildPath::in_context("default", ""), "x"));
    let b = Rule::new(Action::empty()).for_alias(AliasKey::new(BuildPath::in_context("default", ""), "y"));
    assert_ne!(a.compute_hash().unwrap(), b.compute_hash().unwrap());
    assert_eq!(a.compute_hash().unwrap(), a.clone().compute_hash().unwrap());
  }

  #[test]
  fn alias_display() {
    let key = AliasKey::new(BuildPath::in_context("default", "src"), "runtest");
    assert_eq!(key.to_string(), "@default/src/runtest");
  }
}
