//! Fixtures shared by the unit tests.

use std::path::Path;

use crate::config::{ContextConfig, Workspace};
use crate::orchestrator::Orchestrator;
use crate::session::Session;
use crate::source_tree::SourceTree;
use crate::stanza::{CramStanza, Executables, Library, Mode, Stanza};

/// A workspace with the given context names (profile `dev`).
pub fn workspace(contexts: &[&str]) -> Workspace {
  let contexts = contexts
    .iter()
    .map(|name| ContextConfig {
      name: name.to_string(),
      ..Default::default()
    })
    .collect();
  Workspace::from_contexts(Path::new("/ws"), "_build", contexts).unwrap()
}

/// A session over `tree` with a single `default` context.
pub fn session(tree: SourceTree) -> Session {
  Session::new(workspace(&["default"]), tree)
}

pub fn orchestrator(tree: SourceTree) -> Orchestrator {
  Orchestrator::new(session(tree))
}

pub fn orchestrator_with_contexts(tree: SourceTree, contexts: &[&str]) -> Orchestrator {
  Orchestrator::new(Session::new(workspace(contexts), tree))
}

pub fn library(name: &str) -> Library {
  Library {
    name: name.to_string(),
    public_name: None,
    package: None,
    modules: vec![],
    libraries: vec![],
    preprocess: vec![],
    enabled_if: None,
  }
}

pub fn executables(names: &[&str], modes: &[Mode]) -> Executables {
  Executables {
    names: names.iter().map(|n| n.to_string()).collect(),
    public_names: vec![],
    package: None,
    modules: vec![],
    libraries: vec![],
    modes: modes.to_vec(),
    enabled_if: None,
  }
}

pub fn lib_stanza(name: &str) -> Stanza {
  Stanza::Library(library(name))
}

pub fn cram() -> CramStanza {
  CramStanza::default()
}
