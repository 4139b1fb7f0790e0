//! Output and error types of directory rule generation.

use std::collections::BTreeSet;

use serde::Serialize;
use thiserror::Error;

use crate::compile::{CompilationContext, IdeEntry};
use crate::condition::ConditionError;
use crate::memo::CycleError;
use crate::path::{BuildPath, RelPath};
use crate::rules::RegistryError;
use crate::template::TemplateError;
use crate::util::hash::RuleId;

/// Errors raised while generating rules for a directory.
///
/// `Clone` so a failed generation is memoized and shared like a success.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenError {
  #[error(transparent)]
  Registry(#[from] RegistryError),

  #[error(transparent)]
  Cycle(#[from] CycleError),

  #[error("unknown context {0}")]
  UnknownContext(String),

  #[error("{loc}: {source}")]
  Condition {
    loc: String,
    #[source]
    source: ConditionError,
  },

  #[error("{loc}: {source}")]
  Template {
    loc: String,
    #[source]
    source: TemplateError,
  },

  #[error("{loc}: invalid glob {glob:?}: {message}")]
  Glob { loc: String, glob: String, message: String },

  #[error("{loc}: {message}")]
  Stanza { loc: String, message: String },
}

/// Subdirectories a generation pass declares must survive cleanup even
/// though no rule produces them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "names", rename_all = "snake_case")]
pub enum Retain {
  #[default]
  Nothing,
  All,
  These(BTreeSet<String>),
}

impl Retain {
  pub fn these<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
    Retain::These(names.into_iter().map(str::to_string).collect())
  }

  pub fn contains(&self, name: &str) -> bool {
    match self {
      Retain::Nothing => false,
      Retain::All => true,
      Retain::These(names) => names.contains(name),
    }
  }

  pub fn union(self, other: Retain) -> Retain {
    match (self, other) {
      (Retain::All, _) | (_, Retain::All) => Retain::All,
      (Retain::Nothing, x) | (x, Retain::Nothing) => x,
      (Retain::These(mut a), Retain::These(b)) => {
        a.extend(b);
        Retain::These(a)
      }
    }
  }
}

/// How a directory was handled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DirKind {
  /// No source directory and no routing components: nothing to do.
  Empty,
  RootMarker,
  Install,
  Subsystem { name: String },
  View { name: String },
  ShellScratch,
  /// Rules were registered while generating the parent.
  DeferredToParent,
  Standalone,
  GroupRoot { parts: Vec<RelPath> },
}

/// Typed per-directory outputs of stanza folding plus the rules registered.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DirRules {
  pub rules: Vec<RuleId>,
  pub ide_metadata: Vec<IdeEntry>,
  pub compilation_contexts: Vec<(RelPath, CompilationContext)>,
  pub js_targets: BTreeSet<String>,
  pub extra_source_dirs: Vec<RelPath>,
}

/// Immutable result of generating one build directory.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DirOutcome {
  pub dir: BuildPath,
  pub kind: DirKind,
  pub rules: DirRules,
  pub retain: Retain,
}

impl DirOutcome {
  pub fn new(dir: BuildPath, kind: DirKind) -> Self {
    Self {
      dir,
      kind,
      rules: DirRules::default(),
      retain: Retain::Nothing,
    }
  }

  pub fn with_rules(mut self, rules: Vec<RuleId>) -> Self {
    self.rules.rules = rules;
    self
  }

  pub fn retaining(mut self, retain: Retain) -> Self {
    self.retain = retain;
    self
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn retain_union() {
    let a = Retain::these([".bin"]);
    let b = Retain::these([".utop"]);
    let u = a.clone().union(b);
    assert!(u.contains(".bin") && u.contains(".utop"));
    assert_eq!(a.clone().union(Retain::Nothing), a);
    assert_eq!(a.union(Retain::All), Retain::All);
    assert!(!Retain::Nothing.contains("x"));
  }
}
