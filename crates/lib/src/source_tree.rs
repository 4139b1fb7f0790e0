//! The source-tree index.
//!
//! Answers which source directories exist, what files and stanzas they
//! contain, and which group a directory belongs to. Built either by scanning
//! the workspace on disk or from an in-memory [`SourceTreeBuilder`]; a
//! session swaps in a fresh tree after the file system changes, and
//! [`SourceTree::diff`] says which directories need new rules.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::consts::{PROJECT_FILE, STANZA_FILE, WORKSPACE_FILE};
use crate::path::{Layout, RelPath};
use crate::stanza::{DirSpec, Library, Loc, Project, Stanza};

#[derive(Debug, Error)]
pub enum SourceTreeError {
  #[error("failed to walk {path}: {message}")]
  Walk { path: PathBuf, message: String },

  #[error("failed to read {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("invalid stanza file {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDir {
  pub path: RelPath,
  pub files: BTreeSet<String>,
  pub subdirs: BTreeSet<String>,
  pub include_subdirs: bool,
  pub stanzas: Vec<Stanza>,
}

impl SourceDir {
  fn empty(path: RelPath) -> Self {
    Self {
      path,
      files: BTreeSet::new(),
      subdirs: BTreeSet::new(),
      include_subdirs: false,
      stanzas: Vec::new(),
    }
  }

  /// Stanzas paired with their declaration location.
  pub fn located_stanzas(&self) -> impl Iterator<Item = (Loc, &Stanza)> {
    let file = self.path.join(STANZA_FILE);
    self
      .stanzas
      .iter()
      .enumerate()
      .map(move |(i, s)| (Loc::stanza(file.clone(), i), s))
  }

  pub fn has_file(&self, name: &str) -> bool {
    self.files.contains(name)
  }
}

#[derive(Debug, Clone, Default)]
pub struct SourceTree {
  project: Project,
  dirs: BTreeMap<RelPath, SourceDir>,
}

impl SourceTree {
  pub fn builder() -> SourceTreeBuilder {
    SourceTreeBuilder::default()
  }

  /// Scan the workspace rooted at `root`, skipping the build directory and
  /// hidden or underscore-prefixed directories.
  pub fn scan(root: &Path, layout: &Layout) -> Result<Self, SourceTreeError> {
    let mut builder = SourceTreeBuilder::default();

    let project_path = root.join(PROJECT_FILE);
    if project_path.exists() {
      let text = fs::read_to_string(&project_path).map_err(|source| SourceTreeError::Read {
        path: project_path.clone(),
        source,
      })?;
      let project: Project = serde_json::from_str(&text).map_err(|source| SourceTreeError::Parse {
        path: project_path.clone(),
        source,
      })?;
      builder = builder.project(project);
    }

    let walker = WalkDir::new(root).sort_by_file_name().into_iter().filter_entry(|e| {
      if e.depth() == 0 || !e.file_type().is_dir() {
        return true;
      }
      let name = e.file_name().to_string_lossy();
      !(name.starts_with('.') || name.starts_with('_') || (e.depth() == 1 && name == layout.build_dir.as_str()))
    });

    for entry in walker {
      let entry = entry.map_err(|e| SourceTreeError::Walk {
        path: root.to_path_buf(),
        message: e.to_string(),
      })?;
      let rel_text = entry
        .path()
        .strip_prefix(root)
        .unwrap_or(entry.path())
        .to_string_lossy()
        .replace('\\', "/");
      let rel = RelPath::new(&rel_text);

      if entry.file_type().is_dir() {
        builder = builder.dir(rel.as_str());
        continue;
      }

      let name = entry.file_name().to_string_lossy().to_string();
      if rel.parent().is_some_and(|p| p.is_root()) && (name == PROJECT_FILE || name == WORKSPACE_FILE) {
        continue;
      }
      if name == STANZA_FILE {
        let text = fs::read_to_string(entry.path()).map_err(|source| SourceTreeError::Read {
          path: entry.path().to_path_buf(),
          source,
        })?;
        let spec: DirSpec = serde_json::from_str(&text).map_err(|source| SourceTreeError::Parse {
          path: entry.path().to_path_buf(),
          source,
        })?;
        let dir = rel.parent().unwrap_or_default();
        builder = builder.spec(dir.as_str(), spec);
        continue;
      }
      builder = builder.file(rel.as_str());
    }

    let tree = builder.build();
    info!(dirs = tree.dirs.len(), root = %root.display(), "scanned source tree");
    Ok(tree)
  }

  pub fn project(&self) -> &Project {
    &self.project
  }

  pub fn find_dir(&self, path: &RelPath) -> Option<&SourceDir> {
    self.dirs.get(path)
  }

  pub fn dir_exists(&self, path: &RelPath) -> bool {
    self.dirs.contains_key(path)
  }

  pub fn file_exists(&self, path: &RelPath) -> bool {
    match (path.parent(), path.basename()) {
      (Some(parent), Some(name)) => self.dirs.get(&parent).is_some_and(|d| d.has_file(name)),
      _ => false,
    }
  }

  pub fn dirs(&self) -> impl Iterator<Item = &SourceDir> {
    self.dirs.values()
  }

  /// `path` and every source directory below it, in path order.
  pub fn descendants(&self, path: &RelPath) -> Vec<&SourceDir> {
    self.dirs.values().filter(|d| d.path.is_descendant_of(path)).collect()
  }

  /// The outermost strict ancestor of `path` that declares `include_subdirs`.
  pub fn group_root(&self, path: &RelPath) -> Option<RelPath> {
    path
      .ancestors()
      .into_iter()
      .filter(|a| a != path)
      .find(|a| self.dirs.get(a).is_some_and(|d| d.include_subdirs))
  }

  /// Directories owned by the group rooted at `root`, excluding `root`.
  pub fn group_parts(&self, root: &RelPath) -> Vec<RelPath> {
    self
      .descendants(root)
      .into_iter()
      .map(|d| d.path.clone())
      .filter(|p| p != root && self.group_root(p).as_ref() == Some(root))
      .collect()
  }

  /// Source directories whose rules may differ between `self` and `newer`:
  /// every directory added, removed or edited, the group roots owning them,
  /// and everything below a directory whose stanzas changed.
  pub fn diff(&self, newer: &SourceTree) -> BTreeSet<RelPath> {
    let edited: BTreeSet<RelPath> = self
      .dirs
      .keys()
      .chain(newer.dirs.keys())
      .filter(|p| self.dirs.get(*p) != newer.dirs.get(*p))
      .cloned()
      .collect();

    let mut affected = edited.clone();
    for path in &edited {
      for tree in [self, newer] {
        affected.extend(tree.group_root(path));
      }
      let stanzas = |tree: &SourceTree| tree.dirs.get(path).map(|d| (d.include_subdirs, d.stanzas.clone()));
      if stanzas(self) != stanzas(newer) {
        for tree in [self, newer] {
          affected.extend(tree.descendants(path).into_iter().map(|d| d.path.clone()));
        }
      }
    }
    affected
  }

  /// Find the directory declaring library `name` (by name or public name).
  pub fn find_library(&self, name: &str) -> Option<(RelPath, Library)> {
    self.dirs.values().find_map(|d| {
      d.stanzas.iter().find_map(|s| match s {
        Stanza::Library(lib) if lib.name == name || lib.public_name.as_deref() == Some(name) => {
          Some((d.path.clone(), lib.clone()))
        }
        _ => None,
      })
    })
  }
}

/// Incrementally assemble a [`SourceTree`]. Parent directories are created
/// implicitly.
#[derive(Debug, Default)]
pub struct SourceTreeBuilder {
  project: Project,
  dirs: BTreeMap<RelPath, SourceDir>,
}

impl SourceTreeBuilder {
  pub fn project(mut self, project: Project) -> Self {
    self.project = project;
    self
  }

  pub fn dir(mut self, path: &str) -> Self {
    self.ensure_dir(&RelPath::new(path));
    self
  }

  pub fn file(mut self, path: &str) -> Self {
    let rel = RelPath::new(path);
    if let (Some(parent), Some(name)) = (rel.parent(), rel.basename()) {
      let name = name.to_string();
      self.ensure_dir(&parent).files.insert(name);
    }
    self
  }

  pub fn files(self, paths: &[&str]) -> Self {
    paths.iter().fold(self, |b, p| b.file(p))
  }

  pub fn spec(mut self, dir: &str, spec: DirSpec) -> Self {
    let entry = self.ensure_dir(&RelPath::new(dir));
    entry.include_subdirs = spec.include_subdirs;
    entry.stanzas = spec.stanzas;
    self
  }

  pub fn stanzas(self, dir: &str, stanzas: Vec<Stanza>) -> Self {
    self.spec(
      dir,
      DirSpec {
        include_subdirs: false,
        stanzas,
      },
    )
  }

  pub fn build(self) -> SourceTree {
    debug!(dirs = self.dirs.len(), "built source tree index");
    SourceTree {
      project: self.project,
      dirs: self.dirs,
    }
  }

  fn ensure_dir(&mut self, path: &RelPath) -> &mut SourceDir {
    let mut prev: Option<RelPath> = None;
    for ancestor in path.ancestors().into_iter().rev() {
      let entry = self
        .dirs
        .entry(ancestor.clone())
        .or_insert_with(|| SourceDir::empty(ancestor.clone()));
      if let Some(child) = prev.as_ref().and_then(|p| p.basename()) {
        entry.subdirs.insert(child.to_string());
      }
      prev = Some(ancestor);
    }
    self.dirs.entry(path.clone()).or_insert_with(|| SourceDir::empty(path.clone()))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::stanza::Library;
  use tempfile::TempDir;

  fn lib(name: &str) -> Stanza {
    Stanza::Library(Library {
      name: name.to_string(),
      public_name: Some(format!("pub_{}", name)),
      package: None,
      modules: vec![],
      libraries: vec![],
      preprocess: vec![],
      enabled_if: None,
    })
  }

  #[test]
  fn builder_creates_parents() {
    let tree = SourceTree::builder().file("a/b/c.ml").build();
    assert!(tree.dir_exists(&RelPath::root()));
    assert!(tree.dir_exists(&RelPath::new("a")));
    assert!(tree.dir_exists(&RelPath::new("a/b")));
    assert!(tree.file_exists(&RelPath::new("a/b/c.ml")));
    assert!(tree.find_dir(&RelPath::new("a")).unwrap().subdirs.contains("b"));
  }

  #[test]
  fn descendants_and_groups() {
    let tree = SourceTree::builder()
      .spec(
        "g",
        DirSpec {
          include_subdirs: true,
          stanzas: vec![],
        },
      )
      .file("g/x/a.ml")
      .file("g/x/y/b.ml")
      .file("other/c.ml")
      .build();

    let desc: Vec<&str> = tree.descendants(&RelPath::new("g")).iter().map(|d| d.path.as_str()).collect();
    assert_eq!(desc, vec!["g", "g/x", "g/x/y"]);
    assert_eq!(tree.group_root(&RelPath::new("g/x/y")), Some(RelPath::new("g")));
    assert_eq!(tree.group_root(&RelPath::new("g")), None);
    assert_eq!(tree.group_root(&RelPath::new("other")), None);
    assert_eq!(
      tree.group_parts(&RelPath::new("g")),
      vec![RelPath::new("g/x"), RelPath::new("g/x/y")]
    );
  }

  #[test]
  fn diff_covers_edits_groups_and_stanza_scopes() {
    let old = SourceTree::builder()
      .spec(
        "g",
        DirSpec {
          include_subdirs: true,
          stanzas: vec![],
        },
      )
      .files(&["g/x/a.ml", "t/sub/a.t", "other/c.ml"])
      .build();
    assert!(old.diff(&old.clone()).is_empty());

    let added = SourceTree::builder()
      .spec(
        "g",
        DirSpec {
          include_subdirs: true,
          stanzas: vec![],
        },
      )
      .files(&["g/x/a.ml", "g/x/b.ml", "t/sub/a.t", "other/c.ml"])
      .build();
    let diff = old.diff(&added);
    let changed: Vec<&str> = diff.iter().map(|p| p.as_str()).collect();
    assert_eq!(changed, vec!["g", "g/x"]);

    let with_stanza = SourceTree::builder()
      .spec(
        "g",
        DirSpec {
          include_subdirs: true,
          stanzas: vec![],
        },
      )
      .stanzas("t", vec![lib("core")])
      .files(&["g/x/a.ml", "t/sub/a.t", "other/c.ml"])
      .build();
    let diff = old.diff(&with_stanza);
    let changed: Vec<&str> = diff.iter().map(|p| p.as_str()).collect();
    assert_eq!(changed, vec!["t", "t/sub"]);
  }

  #[test]
  fn finds_library_by_public_name() {
    let tree = SourceTree::builder().stanzas("src", vec![lib("core")]).build();
    let (dir, found) = tree.find_library("pub_core").unwrap();
    assert_eq!(dir.as_str(), "src");
    assert_eq!(found.name, "core");
    assert!(tree.find_library("nope").is_none());
  }

  #[test]
  fn scan_reads_stanzas_and_skips_build_dir() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    fs::create_dir_all(root.join("src")).unwrap();
    fs::create_dir_all(root.join("_build/default")).unwrap();
    fs::create_dir_all(root.join(".git")).unwrap();
    fs::write(root.join("src/a.ml"), "").unwrap();
    fs::write(root.join("_build/default/junk"), "").unwrap();
    fs::write(
      root.join("src").join(STANZA_FILE),
      r#"{ "stanzas": [ { "kind": "library", "name": "a" } ] }"#,
    )
    .unwrap();
    fs::write(root.join(PROJECT_FILE), r#"{ "name": "demo", "packages": ["demo"] }"#).unwrap();

    let tree = SourceTree::scan(root, &Layout::new("_build")).unwrap();
    assert_eq!(tree.project().name, "demo");
    assert!(tree.dir_exists(&RelPath::new("src")));
    assert!(!tree.dir_exists(&RelPath::new("_build")));
    assert!(!tree.dir_exists(&RelPath::new(".git")));
    let src = tree.find_dir(&RelPath::new("src")).unwrap();
    assert!(src.has_file("a.ml"));
    assert!(!src.has_file(STANZA_FILE));
    assert_eq!(src.stanzas.len(), 1);
  }

  #[test]
  fn scan_reports_bad_stanza_file() {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join(STANZA_FILE), "[").unwrap();
    let err = SourceTree::scan(temp.path(), &Layout::new("_build")).unwrap_err();
    assert!(matches!(err, SourceTreeError::Parse { .. }));
  }
}
