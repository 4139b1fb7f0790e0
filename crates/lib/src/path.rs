//! Logical paths for the source tree and the build tree.
//!
//! Every path handled by rule generation is one of three kinds:
//! - a [`RelPath`] inside the source tree,
//! - a [`BuildPath`] inside one context's build directory (or its install
//!   namespace),
//! - an external absolute path that no generator owns.
//!
//! Build directories are the unit of rule generation, so [`BuildPath`] is also
//! the memoization key of the orchestrator.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::consts::INSTALL_DIR;

/// A normalized, `/`-separated path relative to a tree root.
///
/// The empty path denotes the root itself. `.` segments are dropped and `..`
/// segments pop the previous component; popping past the root is clamped.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct RelPath(String);

impl RelPath {
  pub fn root() -> Self {
    RelPath(String::new())
  }

  pub fn new(text: &str) -> Self {
    let mut parts: Vec<&str> = Vec::new();
    for seg in text.split('/') {
      match seg {
        "" | "." => {}
        ".." => {
          parts.pop();
        }
        other => parts.push(other),
      }
    }
    RelPath(parts.join("/"))
  }

  pub fn is_root(&self) -> bool {
    self.0.is_empty()
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }

  pub fn components(&self) -> Vec<&str> {
    if self.0.is_empty() {
      Vec::new()
    } else {
      self.0.split('/').collect()
    }
  }

  pub fn parent(&self) -> Option<RelPath> {
    if self.is_root() {
      return None;
    }
    match self.0.rfind('/') {
      Some(idx) => Some(RelPath(self.0[..idx].to_string())),
      None => Some(RelPath::root()),
    }
  }

  pub fn basename(&self) -> Option<&str> {
    if self.is_root() {
      return None;
    }
    Some(match self.0.rfind('/') {
      Some(idx) => &self.0[idx + 1..],
      None => &self.0,
    })
  }

  pub fn join(&self, segment: &str) -> RelPath {
    if self.is_root() {
      RelPath::new(segment)
    } else {
      RelPath::new(&format!("{}/{}", self.0, segment))
    }
  }

  /// True if `self` equals `ancestor` or lives below it.
  pub fn is_descendant_of(&self, ancestor: &RelPath) -> bool {
    ancestor.is_root() || self.0 == ancestor.0 || self.0.starts_with(&format!("{}/", ancestor.0))
  }

  /// All ancestors including `self`, ordered from the root to `self`.
  pub fn ancestors(&self) -> Vec<RelPath> {
    let mut out = vec![RelPath::root()];
    let mut acc = RelPath::root();
    for comp in self.components() {
      acc = acc.join(comp);
      out.push(acc.clone());
    }
    out
  }

  pub fn to_fs_path(&self, root: &std::path::Path) -> PathBuf {
    self.components().into_iter().fold(root.to_path_buf(), |p, c| p.join(c))
  }
}

impl From<String> for RelPath {
  fn from(value: String) -> Self {
    RelPath::new(&value)
  }
}

impl From<RelPath> for String {
  fn from(value: RelPath) -> Self {
    value.0
  }
}

impl fmt::Display for RelPath {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if self.is_root() { write!(f, ".") } else { write!(f, "{}", self.0) }
  }
}

/// The tree a build path lives in.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "context", rename_all = "snake_case")]
pub enum Root {
  /// A context's build directory, mirroring the source tree.
  Context(String),
  /// A context's install namespace (flat, not mirroring the source tree).
  Install(String),
}

impl Root {
  pub fn context_name(&self) -> &str {
    match self {
      Root::Context(name) | Root::Install(name) => name,
    }
  }
}

/// A file or directory inside a build tree.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BuildPath {
  pub root: Root,
  pub rel: RelPath,
}

impl BuildPath {
  pub fn new(root: Root, rel: RelPath) -> Self {
    Self { root, rel }
  }

  pub fn in_context(context: &str, rel: impl Into<RelPath>) -> Self {
    Self::new(Root::Context(context.to_string()), rel.into())
  }

  pub fn in_install(context: &str, rel: impl Into<RelPath>) -> Self {
    Self::new(Root::Install(context.to_string()), rel.into())
  }

  pub fn context_name(&self) -> &str {
    self.root.context_name()
  }

  pub fn parent(&self) -> Option<BuildPath> {
    self.rel.parent().map(|rel| BuildPath::new(self.root.clone(), rel))
  }

  pub fn basename(&self) -> Option<&str> {
    self.rel.basename()
  }

  pub fn join(&self, segment: &str) -> BuildPath {
    BuildPath::new(self.root.clone(), self.rel.join(segment))
  }

  pub fn is_in_install(&self) -> bool {
    matches!(self.root, Root::Install(_))
  }
}

impl From<&str> for RelPath {
  fn from(value: &str) -> Self {
    RelPath::new(value)
  }
}

impl fmt::Display for BuildPath {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match &self.root {
      Root::Context(ctx) => write!(f, "{}", ctx)?,
      Root::Install(ctx) => write!(f, "{}/{}", INSTALL_DIR, ctx)?,
    }
    if !self.rel.is_root() {
      write!(f, "/{}", self.rel.as_str())?;
    }
    Ok(())
  }
}

/// A classified user-facing path.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "path", rename_all = "snake_case")]
pub enum Path {
  Source(RelPath),
  Build(BuildPath),
  External(PathBuf),
}

/// Knows where the build directory lives so textual paths can be classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
  pub build_dir: String,
}

impl Layout {
  pub fn new(build_dir: impl Into<String>) -> Self {
    Self {
      build_dir: build_dir.into(),
    }
  }

  /// Classify user text as a source, build, install or external path.
  pub fn classify(&self, text: &str) -> Path {
    if std::path::Path::new(text).is_absolute() {
      return Path::External(PathBuf::from(text));
    }

    let rel = RelPath::new(text);
    let comps = rel.components();
    match comps.as_slice() {
      [first, INSTALL_DIR, ctx, rest @ ..] if *first == self.build_dir => {
        Path::Build(BuildPath::in_install(ctx, RelPath::new(&rest.join("/"))))
      }
      [first, ctx, rest @ ..] if *first == self.build_dir && *ctx != INSTALL_DIR => {
        Path::Build(BuildPath::in_context(ctx, RelPath::new(&rest.join("/"))))
      }
      _ => Path::Source(rel),
    }
  }

  pub fn render(&self, path: &BuildPath) -> String {
    format!("{}/{}", self.build_dir, path)
  }

  pub fn render_path(&self, path: &Path) -> String {
    match path {
      Path::Source(rel) => rel.to_string(),
      Path::Build(build) => self.render(build),
      Path::External(p) => p.display().to_string(),
    }
  }
}
