//! Session-wide state shared by every generation pass.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, RwLock};

use thiserror::Error;

use crate::compile::{CompilerProvider, DefaultCompiler};
use crate::config::{ConfigError, Workspace};
use crate::context::Context;
use crate::install::InstallAccumulator;
use crate::rules::RuleRegistry;
use crate::source_tree::{SourceTree, SourceTreeError};

#[derive(Debug, Error)]
pub enum SessionError {
  #[error(transparent)]
  Config(#[from] ConfigError),

  #[error(transparent)]
  SourceTree(#[from] SourceTreeError),
}

pub struct Session {
  pub workspace: Workspace,
  tree: RwLock<Arc<SourceTree>>,
  pub registry: RuleRegistry,
  pub installs: InstallAccumulator,
  pub compiler: Arc<dyn CompilerProvider>,
  /// When set, only stanzas belonging to these packages produce rules.
  pub only_packages: Option<BTreeSet<String>>,
}

impl Session {
  pub fn new(workspace: Workspace, tree: SourceTree) -> Self {
    Self {
      workspace,
      tree: RwLock::new(Arc::new(tree)),
      registry: RuleRegistry::new(),
      installs: InstallAccumulator::new(),
      compiler: Arc::new(DefaultCompiler),
      only_packages: None,
    }
  }

  /// Load workspace configuration and scan the source tree under `root`.
  pub fn load(root: &Path) -> Result<Self, SessionError> {
    let workspace = Workspace::load(root)?;
    let tree = SourceTree::scan(&workspace.root, &workspace.layout)?;
    Ok(Self::new(workspace, tree))
  }

  pub fn with_compiler(mut self, compiler: Arc<dyn CompilerProvider>) -> Self {
    self.compiler = compiler;
    self
  }

  pub fn with_only_packages(mut self, packages: impl IntoIterator<Item = String>) -> Self {
    self.only_packages = Some(packages.into_iter().collect());
    self
  }

  /// The current source tree. A generation pass holds on to one snapshot
  /// for its whole run.
  pub fn tree(&self) -> Arc<SourceTree> {
    self.tree.read().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
  }

  /// Install `tree` as the current source tree and return the previous one.
  /// Rules generated from the old tree stay memoized until invalidated.
  pub fn replace_tree(&self, tree: SourceTree) -> Arc<SourceTree> {
    let mut current = self.tree.write().unwrap_or_else(|poisoned| poisoned.into_inner());
    std::mem::replace(&mut *current, Arc::new(tree))
  }

  /// Scan the workspace on disk again, returning the fresh tree.
  pub fn scan_tree(&self) -> Result<SourceTree, SessionError> {
    Ok(SourceTree::scan(&self.workspace.root, &self.workspace.layout)?)
  }

  pub fn contexts(&self) -> &[Context] {
    &self.workspace.contexts
  }

  /// Whether a stanza belonging to `package` is visible under the package
  /// filter. Stanzas without a package are always visible.
  pub fn package_visible(&self, package: Option<&str>) -> bool {
    match (package, &self.only_packages) {
      (Some(pkg), Some(only)) => only.contains(pkg),
      _ => true,
    }
  }

  /// `explicit`, or the project's only package when it declares exactly one.
  pub fn package_or_default(&self, explicit: Option<&str>) -> Option<String> {
    match explicit {
      Some(pkg) => Some(pkg.to_string()),
      None => match self.tree().project().packages.as_slice() {
        [only] => Some(only.clone()),
        _ => None,
      },
    }
  }
}
