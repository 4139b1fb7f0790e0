//! Install obligations.
//!
//! Folding a directory's stanzas records files that must be placed in the
//! context's install namespace. The install directory generator later turns
//! them into symlink rules.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use serde::Serialize;

use crate::path::{BuildPath, RelPath};
use crate::stanza::Section;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct InstallEntry {
  pub package: String,
  pub section: Section,
  pub src: BuildPath,
  /// Destination relative to the install root.
  pub dst: RelPath,
}

impl InstallEntry {
  pub fn new(package: &str, section: Section, src: BuildPath, name: &str) -> Self {
    Self {
      package: package.to_string(),
      section,
      src,
      dst: section.install_dir(package).join(name),
    }
  }
}

/// Install entries per context, partitioned by the directory that declared
/// them.
#[derive(Debug, Default)]
pub struct InstallAccumulator {
  inner: Mutex<BTreeMap<String, BTreeMap<BuildPath, Vec<InstallEntry>>>>,
}

impl InstallAccumulator {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> MutexGuard<'_, BTreeMap<String, BTreeMap<BuildPath, Vec<InstallEntry>>>> {
    self.inner.lock().unwrap_or_else(|p| p.into_inner())
  }

  pub fn add(&self, owner: &BuildPath, entry: InstallEntry) {
    let mut inner = self.lock();
    let entries = inner
      .entry(owner.context_name().to_string())
      .or_default()
      .entry(owner.clone())
      .or_default();
    if !entries.contains(&entry) {
      entries.push(entry);
    }
  }

  /// All entries of `context`, sorted by destination.
  pub fn entries(&self, context: &str) -> Vec<InstallEntry> {
    let inner = self.lock();
    let mut out: Vec<InstallEntry> = inner
      .get(context)
      .map(|owners| owners.values().flatten().cloned().collect())
      .unwrap_or_default();
    out.sort_by(|a, b| a.dst.cmp(&b.dst).then_with(|| a.src.cmp(&b.src)));
    out
  }

  pub fn forget_owner(&self, owner: &BuildPath) {
    if let Some(owners) = self.lock().get_mut(owner.context_name()) {
      owners.remove(owner);
    }
  }
}
