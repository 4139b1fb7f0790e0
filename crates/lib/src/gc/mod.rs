//! Cleanup of stale build outputs.
//!
//! Walks the on-disk build directory of one context, generating each
//! directory it descends into. A file survives when some rule produces it; a
//! subdirectory survives when its parent retains it, when it mirrors a
//! source directory, when its own generation retains something, or when
//! targets live below it. Everything else is stale.

use std::path::PathBuf;
use std::{fs, io};

use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::orchestrator::{GenError, Orchestrator, Retain};
use crate::path::RelPath;

#[derive(Debug, Error)]
pub enum GcError {
  #[error("unknown context {0}")]
  UnknownContext(String),

  #[error(transparent)]
  Generation(#[from] GenError),

  #[error("failed to read build directory: {0}")]
  Walk(#[from] walkdir::Error),
}

#[derive(Debug, Default, serde::Serialize)]
pub struct GcStats {
  pub dirs_scanned: usize,
  pub files_deleted: usize,
  pub dirs_deleted: usize,
  pub bytes_freed: u64,
}

impl GcStats {
  pub fn total_deleted(&self) -> usize {
    self.files_deleted + self.dirs_deleted
  }
}

#[derive(Debug, serde::Serialize)]
pub struct GcResult {
  pub stats: GcStats,
  pub deleted_paths: Vec<PathBuf>,
}

fn dir_size(path: &std::path::Path) -> u64 {
  WalkDir::new(path)
    .into_iter()
    .filter_map(|e| e.ok())
    .filter(|e| e.file_type().is_file())
    .filter_map(|e| e.metadata().ok())
    .map(|m| m.len())
    .sum()
}

fn remove(path: &std::path::Path, is_dir: bool) -> io::Result<()> {
  if is_dir {
    fs::remove_dir_all(path)
  } else {
    fs::remove_file(path)
  }
}

/// Delete (or with `dry_run`, only report) the stale outputs of context
/// `ctx`.
pub async fn stale_outputs(orch: &Orchestrator, ctx: &str, dry_run: bool) -> Result<GcResult, GcError> {
  let session = orch.session();
  let context = session
    .workspace
    .context(ctx)
    .ok_or_else(|| GcError::UnknownContext(ctx.to_string()))?;

  let mut stats = GcStats::default();
  let mut deleted_paths = Vec::new();

  let base = session
    .workspace
    .root
    .join(session.workspace.layout.render(&context.build_path(&RelPath::root())));
  if !base.is_dir() {
    debug!(path = %base.display(), "build directory does not exist");
    return Ok(GcResult { stats, deleted_paths });
  }

  let mut pending: Vec<(RelPath, PathBuf)> = vec![(RelPath::root(), base)];
  while let Some((rel, on_disk)) = pending.pop() {
    let dir = context.build_path(&rel);
    let outcome = orch.generate(&dir).await?;
    stats.dirs_scanned += 1;

    for entry in WalkDir::new(&on_disk).min_depth(1).max_depth(1).sort_by_file_name() {
      let entry = entry?;
      let Some(name) = entry.file_name().to_str() else {
        continue;
      };
      let child = dir.join(name);
      let is_dir = entry.file_type().is_dir();

      let keep = if is_dir {
        let child_rel = rel.join(name);
        let child_outcome = orch.generate(&child).await?;
        let live = outcome.retain.contains(name)
          || session.tree().dir_exists(&child_rel)
          || child_outcome.retain != Retain::Nothing
          || orch.registry().has_targets_under(&child);
        if live && child_outcome.retain != Retain::All {
          pending.push((child_rel, entry.path().to_path_buf()));
        }
        live
      } else {
        orch.registry().is_target(&child)
      };
      if keep {
        continue;
      }

      let path = entry.path().to_path_buf();
      let size = if is_dir {
        dir_size(&path)
      } else {
        entry.metadata().map(|m| m.len()).unwrap_or(0)
      };
      debug!(path = %path.display(), size, dry_run, "stale output");

      if !dry_run && let Err(e) = remove(&path, is_dir) {
        warn!(path = %path.display(), error = %e, "failed to delete stale output");
        continue;
      }
      if is_dir {
        stats.dirs_deleted += 1;
      } else {
        stats.files_deleted += 1;
      }
      stats.bytes_freed += size;
      deleted_paths.push(path);
    }
  }

  info!(
    context = %ctx,
    files_deleted = stats.files_deleted,
    dirs_deleted = stats.dirs_deleted,
    bytes_freed = stats.bytes_freed,
    dry_run,
    "cleanup complete"
  );

  Ok(GcResult { stats, deleted_paths })
}
