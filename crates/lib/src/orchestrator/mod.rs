//! The directory rule orchestrator.
//!
//! Rules are generated lazily, one build directory at a time, the first time
//! anything asks about that directory. Every directory goes through a
//! single-flight memo: the first request runs the generator and every other
//! request (concurrent or later) shares the result, so rules are registered
//! exactly once per directory.
//!
//! # Routing
//!
//! A directory is classified by its components (see [`classify`]):
//! - the root marker gets bootstrap rules,
//! - a reserved first component (`.js`, `_doc`, `.ppx`) selects a subsystem,
//! - a reserved last component (`.formatted`, `.bin`, `.utop`) selects a view
//!   of the parent directory,
//! - anything else is a regular directory backed (or not) by a source
//!   directory.

mod classify;
pub mod cram;
mod env;
pub mod fold;
mod regular;
mod subsystems;
mod types;
mod views;

use std::collections::BTreeSet;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, try_join_all};
use tracing::{debug, info};

use crate::memo::Memo;
use crate::path::{BuildPath, RelPath, Root};
use crate::rules::{AliasContents, AliasKey, FilePredicate, RuleRegistry};
use crate::session::{Session, SessionError};
use crate::source_tree::SourceTree;

pub use classify::{DirClass, Subsystem, View, classify};
pub use env::GenEnv;
pub use types::*;

type Generated = Result<Arc<DirOutcome>, GenError>;

struct Inner {
  session: Session,
  memo: Memo<BuildPath, Generated>,
}

/// Cheap to clone; clones share the session and the memo.
#[derive(Clone)]
pub struct Orchestrator {
  inner: Arc<Inner>,
}

impl Orchestrator {
  pub fn new(session: Session) -> Self {
    Self {
      inner: Arc::new(Inner {
        session,
        memo: Memo::new(),
      }),
    }
  }

  pub fn session(&self) -> &Session {
    &self.inner.session
  }

  pub fn registry(&self) -> &RuleRegistry {
    &self.inner.session.registry
  }

  /// Number of generator runs so far.
  pub fn generations(&self) -> usize {
    self.inner.memo.computed()
  }

  /// Rules, metadata and retention policy of `dir`.
  pub async fn generate(&self, dir: &BuildPath) -> Result<Arc<DirOutcome>, GenError> {
    self.load_dir(None, dir).await
  }

  /// Load `dir` on behalf of `requester`, which is recorded for cycle
  /// detection.
  pub(crate) fn load_dir<'a>(&'a self, requester: Option<&'a BuildPath>, dir: &'a BuildPath) -> BoxFuture<'a, Generated> {
    async move {
      if self.inner.memo.peek(dir).is_some() {
        debug!(dir = %dir, "directory rules already generated");
      }
      self
        .inner
        .memo
        .get_or_compute(requester, dir, || self.compute(dir))
        .await?
    }
    .boxed()
  }

  /// Load every directory of `dirs` as one parallel batch.
  pub(crate) async fn load_batch(&self, requester: Option<&BuildPath>, dirs: &[BuildPath]) -> Result<Vec<Arc<DirOutcome>>, GenError> {
    try_join_all(dirs.iter().map(|d| self.load_dir(requester, d))).await
  }

  async fn compute(&self, dir: &BuildPath) -> Generated {
    let session = self.session();
    let ctx = session
      .workspace
      .context(dir.context_name())
      .ok_or_else(|| GenError::UnknownContext(dir.context_name().to_string()))?;

    let outcome = match classify(dir) {
      DirClass::Install(rel) => Arc::new(subsystems::install(self, dir, ctx, &rel).await?),
      DirClass::RootMarker(rest) => Arc::new(subsystems::root_marker(session, dir, ctx, &rest)?),
      DirClass::Subsystem { kind, rest } => Arc::new(subsystems::generate(session, dir, ctx, kind, &rest)?),
      DirClass::View { view, parent } => Arc::new(views::generate(session, dir, ctx, view, &parent)?),
      DirClass::Default(rel) => regular::generate(self, dir, ctx, &rel).await?,
    };

    info!(
      dir = %dir,
      kind = ?outcome.kind,
      rules = outcome.rules.rules.len(),
      "generated directory rules"
    );
    Ok(outcome)
  }

  /// Whether a rule produces `path`. Generates the parent directory first.
  pub async fn is_target(&self, path: &BuildPath) -> Result<bool, GenError> {
    let Some(parent) = path.parent() else {
      return Ok(false);
    };
    self.generate(&parent).await?;
    Ok(self.registry().is_target(path))
  }

  /// Contents of the alias `key`. A recursive alias is the union of the
  /// alias at `key.dir` and at every existing source directory below it;
  /// directories lacking the alias contribute nothing. `None` when no
  /// directory defines it.
  pub async fn alias_contents(&self, key: &AliasKey, recursive: bool) -> Result<Option<AliasContents>, GenError> {
    let dirs: Vec<BuildPath> = match (&key.dir.root, recursive) {
      (Root::Context(_), true) => self
        .session()
        .tree()
        .descendants(&key.dir.rel)
        .into_iter()
        .map(|d| BuildPath::new(key.dir.root.clone(), d.path.clone()))
        .collect(),
      _ => vec![key.dir.clone()],
    };
    if dirs.is_empty() {
      return Ok(None);
    }
    self.load_batch(None, &dirs).await?;

    let mut merged: Option<AliasContents> = None;
    for dir in &dirs {
      let Some(contents) = self.registry().alias(&AliasKey::new(dir.clone(), &key.name)) else {
        continue;
      };
      let acc = merged.get_or_insert_with(AliasContents::default);
      for dep in contents.deps {
        if !acc.deps.contains(&dep) {
          acc.deps.push(dep);
        }
      }
      for action in contents.actions {
        if !acc.actions.contains(&action) {
          acc.actions.push(action);
        }
      }
    }
    Ok(merged)
  }

  /// Targets of `dir` whose basename satisfies `predicate`.
  pub async fn matching(&self, dir: &BuildPath, predicate: &FilePredicate) -> Result<Vec<BuildPath>, GenError> {
    self.generate(dir).await?;
    Ok(
      self
        .registry()
        .targets_in(dir)
        .into_iter()
        .filter(|t| t.basename().is_some_and(|b| predicate.matches(b)))
        .collect(),
    )
  }

  /// Every target at or below `dir`, after generating whatever could
  /// register one.
  pub async fn targets_under(&self, dir: &BuildPath) -> Result<Vec<BuildPath>, GenError> {
    let session = self.session();
    match &dir.root {
      Root::Context(_) => {
        let mut dirs: Vec<BuildPath> = session
          .tree()
          .descendants(&dir.rel)
          .into_iter()
          .map(|d| BuildPath::new(dir.root.clone(), d.path.clone()))
          .collect();
        if !dirs.contains(dir) {
          dirs.push(dir.clone());
        }
        self.load_batch(None, &dirs).await?;
      }
      Root::Install(ctx) => {
        self.generate(&BuildPath::in_install(ctx, RelPath::root())).await?;
        let parents: BTreeSet<BuildPath> = session
          .installs
          .entries(ctx)
          .into_iter()
          .filter(|e| e.dst.is_descendant_of(&dir.rel))
          .filter_map(|e| e.dst.parent())
          .map(|p| BuildPath::in_install(ctx, p))
          .collect();
        let parents: Vec<BuildPath> = parents.into_iter().collect();
        self.load_batch(None, &parents).await?;
      }
    }

    Ok(
      self
        .registry()
        .all_targets()
        .into_iter()
        .filter(|t| t.root == dir.root && t.rel.is_descendant_of(&dir.rel))
        .collect(),
    )
  }

  /// Forget the generated rules of `dirs` so the next request regenerates
  /// them. Directories whose rules came from one of `dirs` (deferred
  /// children, group parts, views) are forgotten with it, and so is the
  /// install namespace of the affected contexts. Returns how many memoized
  /// directories were dropped.
  pub fn invalidate(&self, dirs: &[BuildPath]) -> usize {
    let tree = self.session().tree();
    self.forget(dirs, &[&*tree])
  }

  /// Swap in `tree` after a file-system change and invalidate every source
  /// directory it changed, in every context. A changed project file drops
  /// all generated rules. Returns the changed source directories.
  pub fn refresh(&self, tree: SourceTree) -> Vec<RelPath> {
    let session = self.session();
    let old = session.replace_tree(tree);
    let new = session.tree();

    if old.project() != new.project() {
      let forgotten = self.inner.memo.forget_where(|_| true);
      for key in &forgotten {
        session.registry.forget_owner(key);
        session.installs.forget_owner(key);
      }
      info!(dropped = forgotten.len(), "project changed, dropped all directory rules");
      return new.dirs().map(|d| d.path.clone()).collect();
    }

    let changed: Vec<RelPath> = old.diff(&new).into_iter().collect();
    let dirs: Vec<BuildPath> = session
      .contexts()
      .iter()
      .flat_map(|ctx| changed.iter().map(|rel| ctx.build_path(rel)))
      .collect();
    let dropped = self.forget(&dirs, &[&*old, &*new]);
    info!(changed = changed.len(), dropped, "refreshed source tree");
    changed
  }

  /// Scan the workspace on disk again and [`refresh`](Self::refresh).
  pub fn rescan(&self) -> Result<Vec<RelPath>, SessionError> {
    let tree = self.session().scan_tree()?;
    Ok(self.refresh(tree))
  }

  fn forget(&self, dirs: &[BuildPath], trees: &[&SourceTree]) -> usize {
    let session = self.session();
    let mut dropped = 0;

    for dir in dirs {
      let install = Root::Install(dir.context_name().to_string());
      let forgotten = self.inner.memo.forget_where(|k| {
        if k == dir || k.root == install {
          return true;
        }
        k.root == dir.root
          && k.rel.is_descendant_of(&dir.rel)
          && trees
            .iter()
            .any(|t| !t.dir_exists(&k.rel) || t.group_root(&k.rel).as_ref() == Some(&dir.rel))
      });
      for key in &forgotten {
        session.registry.forget_owner(key);
        session.installs.forget_owner(key);
      }
      session.registry.forget_owner(dir);
      session.installs.forget_owner(dir);
      debug!(dir = %dir, dropped = forgotten.len(), "invalidated directory rules");
      dropped += forgotten.len();
    }
    dropped
  }
}

#[cfg(test)]
mod tests;
