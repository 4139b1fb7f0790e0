//! Workspace configuration: the build directory and the set of contexts.
//!
//! Read once from `strata-workspace.json` at the workspace root. A missing
//! file yields a single `default` context. `STRATA_BUILD_DIR` and
//! `STRATA_PROFILE` override the file.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::consts::{DEFAULT_BUILD_DIR, DEFAULT_CONTEXT, DEFAULT_PROFILE, ENV_BUILD_DIR, ENV_PROFILE, INSTALL_DIR, WORKSPACE_FILE};
use crate::context::Context;
use crate::path::Layout;

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("failed to read {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to parse {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  #[error("workspace declares no contexts")]
  NoContexts,

  #[error("context {0} is declared twice")]
  DuplicateContext(String),

  #[error("invalid context name {0:?}")]
  InvalidContextName(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextConfig {
  pub name: String,
  #[serde(default)]
  pub profile: Option<String>,
  #[serde(default)]
  pub vars: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct WorkspaceFile {
  #[serde(default)]
  build_dir: Option<String>,
  #[serde(default)]
  contexts: Vec<ContextConfig>,
}

/// Resolved workspace settings.
#[derive(Debug, Clone)]
pub struct Workspace {
  pub root: PathBuf,
  pub layout: Layout,
  pub contexts: Vec<Context>,
}

impl Workspace {
  /// Load the workspace rooted at `root`, applying environment overrides.
  pub fn load(root: &Path) -> Result<Self, ConfigError> {
    let path = root.join(WORKSPACE_FILE);
    let file = if path.exists() {
      let text = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
        path: path.clone(),
        source,
      })?;
      serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.clone(),
        source,
      })?
    } else {
      debug!(path = %path.display(), "no workspace file, using default context");
      WorkspaceFile::default()
    };

    let build_dir = std::env::var(ENV_BUILD_DIR)
      .ok()
      .filter(|v| !v.is_empty())
      .or(file.build_dir)
      .unwrap_or_else(|| DEFAULT_BUILD_DIR.to_string());
    let profile_override = std::env::var(ENV_PROFILE).ok().filter(|v| !v.is_empty());

    let mut contexts = file.contexts;
    if contexts.is_empty() {
      contexts.push(ContextConfig {
        name: DEFAULT_CONTEXT.to_string(),
        ..Default::default()
      });
    }
    if let Some(profile) = profile_override {
      for ctx in &mut contexts {
        ctx.profile = Some(profile.clone());
      }
    }

    Self::from_contexts(root, &build_dir, contexts)
  }

  pub fn from_contexts(root: &Path, build_dir: &str, contexts: Vec<ContextConfig>) -> Result<Self, ConfigError> {
    if contexts.is_empty() {
      return Err(ConfigError::NoContexts);
    }

    let layout = Layout::new(build_dir);
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(contexts.len());
    for cfg in contexts {
      if cfg.name.is_empty() || cfg.name.contains('/') || cfg.name == INSTALL_DIR {
        return Err(ConfigError::InvalidContextName(cfg.name));
      }
      if !seen.insert(cfg.name.clone()) {
        return Err(ConfigError::DuplicateContext(cfg.name));
      }
      let profile = cfg.profile.as_deref().unwrap_or(DEFAULT_PROFILE);
      let mut ctx = Context::new(&cfg.name, profile, &layout);
      ctx.vars = cfg.vars;
      out.push(ctx);
    }

    Ok(Self {
      root: root.to_path_buf(),
      layout,
      contexts: out,
    })
  }

  pub fn context(&self, name: &str) -> Option<&Context> {
    self.contexts.iter().find(|c| c.name == name)
  }

  pub fn context_names(&self) -> Vec<String> {
    self.contexts.iter().map(|c| c.name.clone()).collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serial_test::serial;
  use tempfile::TempDir;

  #[test]
  #[serial]
  fn missing_file_yields_default_context() {
    let temp = TempDir::new().unwrap();
    temp_env::with_vars([(ENV_BUILD_DIR, None::<&str>), (ENV_PROFILE, None)], || {
      let ws = Workspace::load(temp.path()).unwrap();
      assert_eq!(ws.context_names(), vec!["default"]);
      assert_eq!(ws.layout.build_dir, "_build");
      assert_eq!(ws.contexts[0].profile, "dev");
    });
  }

  #[test]
  #[serial]
  fn reads_contexts_and_applies_overrides() {
    let temp = TempDir::new().unwrap();
    fs::write(
      temp.path().join(WORKSPACE_FILE),
      r#"{ "contexts": [ { "name": "default" }, { "name": "cross", "vars": { "arch": "arm64" } } ] }"#,
    )
    .unwrap();

    temp_env::with_vars([(ENV_BUILD_DIR, Some("out")), (ENV_PROFILE, Some("release"))], || {
      let ws = Workspace::load(temp.path()).unwrap();
      assert_eq!(ws.context_names(), vec!["default", "cross"]);
      assert_eq!(ws.layout.build_dir, "out");
      assert!(ws.contexts.iter().all(|c| c.profile == "release"));
      assert_eq!(ws.context("cross").unwrap().build_dir, "out/cross");
      assert_eq!(ws.context("cross").unwrap().vars.get("arch").map(String::as_str), Some("arm64"));
    });
  }

  #[test]
  fn rejects_duplicate_and_reserved_names() {
    let root = Path::new("/ws");
    let dup = vec![
      ContextConfig {
        name: "a".to_string(),
        ..Default::default()
      },
      ContextConfig {
        name: "a".to_string(),
        ..Default::default()
      },
    ];
    assert!(matches!(
      Workspace::from_contexts(root, "_build", dup),
      Err(ConfigError::DuplicateContext(n)) if n == "a"
    ));

    let reserved = vec![ContextConfig {
      name: "install".to_string(),
      ..Default::default()
    }];
    assert!(matches!(
      Workspace::from_contexts(root, "_build", reserved),
      Err(ConfigError::InvalidContextName(_))
    ));
  }

  #[test]
  #[serial]
  fn malformed_file_is_parse_error() {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join(WORKSPACE_FILE), "{ not json").unwrap();
    temp_env::with_vars([(ENV_BUILD_DIR, None::<&str>), (ENV_PROFILE, None)], || {
      assert!(matches!(Workspace::load(temp.path()), Err(ConfigError::Parse { .. })));
    });
  }
}
