mod build;
mod clean;
mod info;
mod rules;
mod targets;

use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::debug;

use strata_lib::orchestrator::Orchestrator;
use strata_lib::path::{BuildPath, Path};
use strata_lib::session::Session;

use crate::output::OutputFormat;

pub use build::cmd_build;
pub use clean::cmd_clean;
pub use info::cmd_info;
pub use rules::cmd_rules;
pub use targets::cmd_targets;

/// Flags shared by every command.
pub struct Options {
  pub root: PathBuf,
  pub only_packages: Option<Vec<String>>,
  pub output: OutputFormat,
}

impl Options {
  pub fn session(&self) -> Result<Session> {
    let root = dunce::canonicalize(&self.root)
      .with_context(|| format!("Failed to resolve workspace root: {}", self.root.display()))?;
    let session = Session::load(&root).with_context(|| format!("Failed to load workspace: {}", root.display()))?;
    debug!(root = %root.display(), contexts = session.contexts().len(), "loaded workspace");
    Ok(match &self.only_packages {
      Some(packages) => session.with_only_packages(packages.iter().cloned()),
      None => session,
    })
  }

  pub fn orchestrator(&self) -> Result<Orchestrator> {
    Ok(Orchestrator::new(self.session()?))
  }
}

pub fn runtime() -> Result<tokio::runtime::Runtime> {
  tokio::runtime::Runtime::new().context("Failed to create async runtime")
}

/// Build directories named by `text`: a build path names itself, a source
/// path names its mirror in every context.
pub fn build_dirs(orch: &Orchestrator, text: &str) -> Result<Vec<BuildPath>> {
  let session = orch.session();
  match session.workspace.layout.classify(text) {
    Path::Build(dir) => Ok(vec![dir]),
    Path::Source(rel) => Ok(session.contexts().iter().map(|c| c.build_path(&rel)).collect()),
    Path::External(p) => anyhow::bail!("{} is outside the workspace", p.display()),
  }
}
