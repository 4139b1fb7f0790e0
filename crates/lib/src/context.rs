//! Build contexts.
//!
//! A context is an independent build configuration with its own output tree
//! under the build directory. Contexts are created once at session start and
//! never change afterwards.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::path::{BuildPath, Layout, RelPath};
use crate::template::Vars;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Context {
  pub name: String,
  pub profile: String,
  /// Extra variables available to templates and enable conditions.
  #[serde(default)]
  pub vars: BTreeMap<String, String>,
  /// Rendered build directory of this context (e.g. `_build/default`).
  pub build_dir: String,
}

impl Context {
  pub fn new(name: &str, profile: &str, layout: &Layout) -> Self {
    Self {
      name: name.to_string(),
      profile: profile.to_string(),
      vars: BTreeMap::new(),
      build_dir: layout.render(&BuildPath::in_context(name, RelPath::root())),
    }
  }

  pub fn with_var(mut self, name: &str, value: &str) -> Self {
    self.vars.insert(name.to_string(), value.to_string());
    self
  }

  /// The build directory of this context mirroring `rel`.
  pub fn build_path(&self, rel: &RelPath) -> BuildPath {
    BuildPath::in_context(&self.name, rel.clone())
  }
}

impl Vars for Context {
  fn lookup(&self, name: &str) -> Option<String> {
    match name {
      "context_name" => Some(self.name.clone()),
      "profile" => Some(self.profile.clone()),
      "build_dir" => Some(self.build_dir.clone()),
      other => self.vars.get(other).cloned(),
    }
  }
}
