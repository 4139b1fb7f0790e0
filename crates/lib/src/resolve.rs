//! Resolution of user target strings into files and aliases.
//!
//! Every input of a batch is resolved independently: one bad entry never
//! prevents the others from resolving, and failures are collected into a
//! single [`ResolveReport`] that lists every failing spec with its hints.
//!
//! A path naming a source directory means "build everything below it" and
//! resolves to the recursive `default` alias there. Other paths are probed
//! in every configured context; a path may legitimately resolve in more than
//! one context.

use std::collections::BTreeSet;
use std::fmt;

use futures::future::join_all;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::consts::ALIAS_DEFAULT;
use crate::context::Context;
use crate::orchestrator::{GenError, Orchestrator};
use crate::path::{BuildPath, Path, RelPath, Root};
use crate::rules::AliasKey;
use crate::template::{Template, TemplateError};

/// A target as typed by the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetSpec {
  Path(String),
  Dep(DepSpec),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DepSpec {
  File(Template),
  Alias(Template),
  AliasRec(Template),
}

impl TargetSpec {
  /// `@@name` is an alias, `@name` a recursive alias, text with `%{` a file
  /// template, anything else a plain path.
  pub fn parse(text: &str) -> Result<Self, TemplateError> {
    if let Some(alias) = text.strip_prefix("@@") {
      Ok(TargetSpec::Dep(DepSpec::Alias(Template::parse(alias)?)))
    } else if let Some(alias) = text.strip_prefix('@') {
      Ok(TargetSpec::Dep(DepSpec::AliasRec(Template::parse(alias)?)))
    } else if text.contains("%{") {
      Ok(TargetSpec::Dep(DepSpec::File(Template::parse(text)?)))
    } else {
      Ok(TargetSpec::Path(text.to_string()))
    }
  }
}

impl fmt::Display for TargetSpec {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      TargetSpec::Path(p) => write!(f, "{}", p),
      TargetSpec::Dep(DepSpec::File(t)) => write!(f, "{}", t.raw()),
      TargetSpec::Dep(DepSpec::Alias(t)) => write!(f, "@@{}", t.raw()),
      TargetSpec::Dep(DepSpec::AliasRec(t)) => write!(f, "@{}", t.raw()),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AliasTarget {
  pub name: String,
  /// Directory relative to each context root.
  pub dir: RelPath,
  pub recursive: bool,
  pub contexts: Vec<String>,
}

impl AliasTarget {
  /// One alias key per context.
  pub fn keys(&self) -> Vec<AliasKey> {
    self
      .contexts
      .iter()
      .map(|ctx| AliasKey::new(BuildPath::in_context(ctx, self.dir.clone()), &self.name))
      .collect()
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Target {
  File { path: Path },
  Alias(AliasTarget),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveErrorKind {
  #[error("don't know how to build {0}")]
  DontKnowHowToBuild(String),

  #[error("alias {0:?} cannot contain variables")]
  AliasHasVariables(String),

  #[error("invalid target {spec:?}: {source}")]
  Template {
    spec: String,
    #[source]
    source: TemplateError,
  },

  #[error(transparent)]
  Generation(#[from] GenError),
}

/// A failed input of a resolution batch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}")]
pub struct ResolveError {
  pub spec: String,
  #[source]
  pub kind: ResolveErrorKind,
  /// Sibling names that exist, sorted and deduplicated.
  pub hints: Vec<String>,
}

impl ResolveError {
  fn new(spec: &str, kind: ResolveErrorKind) -> Self {
    Self {
      spec: spec.to_string(),
      kind,
      hints: Vec::new(),
    }
  }
}

/// Every failure of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct ResolveReport {
  pub errors: Vec<ResolveError>,
}

impl fmt::Display for ResolveReport {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for (i, err) in self.errors.iter().enumerate() {
      if i > 0 {
        writeln!(f)?;
      }
      write!(f, "{}", err)?;
      if !err.hints.is_empty() {
        write!(f, "\nhint: did you mean {}?", err.hints.join(", "))?;
      }
    }
    Ok(())
  }
}

/// Split a batch into the resolved targets (in input order) or a report of
/// every failure.
pub fn into_report(results: Vec<Result<Vec<Target>, ResolveError>>) -> Result<Vec<Target>, ResolveReport> {
  let mut targets = Vec::new();
  let mut errors = Vec::new();
  for result in results {
    match result {
      Ok(ts) => targets.extend(ts),
      Err(e) => errors.push(e),
    }
  }
  if errors.is_empty() {
    Ok(targets)
  } else {
    Err(ResolveReport { errors })
  }
}

pub struct Resolver<'a> {
  orch: &'a Orchestrator,
}

impl<'a> Resolver<'a> {
  pub fn new(orch: &'a Orchestrator) -> Self {
    Self { orch }
  }

  fn contexts(&self) -> &[Context] {
    self.orch.session().contexts()
  }

  /// Resolve every spec; the result has one entry per input, in order.
  pub async fn resolve_all(&self, specs: &[TargetSpec]) -> Vec<Result<Vec<Target>, ResolveError>> {
    join_all(specs.iter().map(|s| self.resolve(s))).await
  }

  /// Parse and resolve raw command-line text.
  pub async fn resolve_text(&self, texts: &[String]) -> Vec<Result<Vec<Target>, ResolveError>> {
    join_all(texts.iter().map(|text| async move {
      match TargetSpec::parse(text) {
        Ok(spec) => self.resolve(&spec).await,
        Err(source) => Err(ResolveError::new(text, ResolveErrorKind::Template {
          spec: text.clone(),
          source,
        })),
      }
    }))
    .await
  }

  pub async fn resolve(&self, spec: &TargetSpec) -> Result<Vec<Target>, ResolveError> {
    let text = spec.to_string();
    match spec {
      TargetSpec::Path(p) => {
        let path = self.orch.session().workspace.layout.classify(p);
        self.resolve_path(&text, &path).await
      }
      TargetSpec::Dep(DepSpec::Alias(t)) => self.resolve_alias(&text, t, false),
      TargetSpec::Dep(DepSpec::AliasRec(t)) => self.resolve_alias(&text, t, true),
      TargetSpec::Dep(DepSpec::File(t)) => self.resolve_file_template(&text, t).await,
    }
  }

  fn default_alias(dir: RelPath, contexts: Vec<String>) -> Target {
    Target::Alias(AliasTarget {
      name: ALIAS_DEFAULT.to_string(),
      dir,
      recursive: true,
      contexts,
    })
  }

  pub async fn resolve_path(&self, spec: &str, path: &Path) -> Result<Vec<Target>, ResolveError> {
    self.resolve_path_in(spec, path, self.contexts()).await
  }

  /// Resolve `path`, probing source paths in `contexts` only.
  async fn resolve_path_in(&self, spec: &str, path: &Path, contexts: &[Context]) -> Result<Vec<Target>, ResolveError> {
    let tree = self.orch.session().tree();
    match path {
      Path::External(_) => Ok(vec![Target::File { path: path.clone() }]),
      Path::Source(rel) => {
        if tree.dir_exists(rel) {
          let names = contexts.iter().map(|c| c.name.clone()).collect();
          return Ok(vec![Self::default_alias(rel.clone(), names)]);
        }
        let probes: Vec<BuildPath> = contexts.iter().map(|c| c.build_path(rel)).collect();
        let found = self.probe(spec, &probes).await?;
        if found.is_empty() {
          return Err(self.not_found(spec, &Probe::Source(rel.clone())));
        }
        Ok(found)
      }
      Path::Build(build) => match &build.root {
        Root::Context(ctx) => {
          if self.orch.session().workspace.context(ctx).is_none() {
            return Err(ResolveError::new(spec, ResolveErrorKind::DontKnowHowToBuild(spec.to_string())));
          }
          if tree.dir_exists(&build.rel) {
            return Ok(vec![Self::default_alias(build.rel.clone(), vec![ctx.clone()])]);
          }
          self.probe_one(spec, build).await
        }
        Root::Install(_) => self.probe_one(spec, build).await,
      },
    }
  }

  async fn probe_one(&self, spec: &str, build: &BuildPath) -> Result<Vec<Target>, ResolveError> {
    let found = self.probe(spec, std::slice::from_ref(build)).await?;
    if found.is_empty() {
      return Err(self.not_found(spec, &Probe::Build(build.clone())));
    }
    Ok(found)
  }

  /// The probes that are targets, in probe order.
  async fn probe(&self, spec: &str, probes: &[BuildPath]) -> Result<Vec<Target>, ResolveError> {
    let checks = join_all(probes.iter().map(|p| self.orch.is_target(p))).await;
    let mut found = Vec::new();
    for (probe, check) in probes.iter().zip(checks) {
      let is_target = check.map_err(|e| ResolveError::new(spec, e.into()))?;
      if is_target {
        found.push(Target::File {
          path: Path::Build(probe.clone()),
        });
      }
    }
    Ok(found)
  }

  fn not_found(&self, spec: &str, probe: &Probe) -> ResolveError {
    let hints = self.hints(probe);
    debug!(spec, hints = hints.len(), "target not found");
    ResolveError {
      spec: spec.to_string(),
      kind: ResolveErrorKind::DontKnowHowToBuild(spec.to_string()),
      hints,
    }
  }

  /// Basenames of known targets next to the probe. Build paths are compared
  /// by their context-relative form when the probe was a source path.
  fn hints(&self, probe: &Probe) -> Vec<String> {
    let targets = self.orch.registry().all_targets();
    let set: BTreeSet<String> = match probe {
      Probe::Source(rel) => {
        let parent = rel.parent();
        targets
          .iter()
          .filter(|t| !t.is_in_install() && t.rel.parent() == parent)
          .filter_map(|t| t.basename().map(str::to_string))
          .collect()
      }
      Probe::Build(build) => {
        let parent = build.parent();
        targets
          .iter()
          .filter(|t| t.parent() == parent)
          .filter_map(|t| t.basename().map(str::to_string))
          .collect()
      }
    };
    set.into_iter().collect()
  }

  fn resolve_alias(&self, spec: &str, template: &Template, recursive: bool) -> Result<Vec<Target>, ResolveError> {
    let Some(text) = template.as_literal() else {
      return Err(ResolveError::new(spec, ResolveErrorKind::AliasHasVariables(template.raw().to_string())));
    };
    let rel = RelPath::new(&text);
    let Some(name) = rel.basename().map(str::to_string) else {
      return Err(ResolveError::new(spec, ResolveErrorKind::DontKnowHowToBuild(spec.to_string())));
    };
    let parent = rel.parent().unwrap_or_else(RelPath::root);

    let (dir, contexts) = match self.orch.session().workspace.layout.classify(parent.as_str()) {
      Path::Build(BuildPath {
        root: Root::Context(ctx),
        rel,
      }) => (rel, vec![ctx]),
      Path::Source(rel) => (rel, self.contexts().iter().map(|c| c.name.clone()).collect()),
      Path::Build(_) | Path::External(_) => {
        return Err(ResolveError::new(spec, ResolveErrorKind::DontKnowHowToBuild(spec.to_string())));
      }
    };
    Ok(vec![Target::Alias(AliasTarget {
      name,
      dir,
      recursive,
      contexts,
    })])
  }

  /// Expand a file template once per context and resolve each expansion as
  /// a path scoped to that context. Results are concatenated in context
  /// order; the spec fails only when no context resolves it.
  async fn resolve_file_template(&self, spec: &str, template: &Template) -> Result<Vec<Target>, ResolveError> {
    let layout = &self.orch.session().workspace.layout;
    let mut targets: Vec<Target> = Vec::new();
    let mut hints: BTreeSet<String> = BTreeSet::new();

    for ctx in self.contexts() {
      let expanded = template.expand(ctx).map_err(|source| {
        ResolveError::new(spec, ResolveErrorKind::Template {
          spec: spec.to_string(),
          source,
        })
      })?;
      let path = layout.classify(&expanded);
      match self.resolve_path_in(spec, &path, std::slice::from_ref(ctx)).await {
        Ok(found) => {
          for target in found {
            merge_target(&mut targets, target);
          }
        }
        Err(ResolveError {
          kind: ResolveErrorKind::DontKnowHowToBuild(_),
          hints: missed,
          ..
        }) => hints.extend(missed),
        Err(err) => return Err(err),
      }
    }

    if targets.is_empty() {
      return Err(ResolveError {
        spec: spec.to_string(),
        kind: ResolveErrorKind::DontKnowHowToBuild(spec.to_string()),
        hints: hints.into_iter().collect(),
      });
    }
    Ok(targets)
  }
}

/// Add `target` unless already present. Directory aliases differing only in
/// their contexts are folded into one.
fn merge_target(targets: &mut Vec<Target>, target: Target) {
  if let Target::Alias(alias) = &target {
    let same = targets.iter_mut().find_map(|t| match t {
      Target::Alias(a) if a.name == alias.name && a.dir == alias.dir && a.recursive == alias.recursive => Some(a),
      _ => None,
    });
    if let Some(existing) = same {
      for ctx in &alias.contexts {
        if !existing.contexts.contains(ctx) {
          existing.contexts.push(ctx.clone());
        }
      }
      return;
    }
  }
  if !targets.contains(&target) {
    targets.push(target);
  }
}

enum Probe {
  Source(RelPath),
  Build(BuildPath),
}
