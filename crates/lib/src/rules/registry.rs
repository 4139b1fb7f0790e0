//! Process-wide rule and alias registry.
//!
//! Generation appends rules and alias contributions partitioned by the
//! directory whose generation produced them (the *owner*). Each target has
//! exactly one producing rule; a second producer is a routing conflict.
//! Partitions can be dropped wholesale when a directory is invalidated.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};

use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::path::BuildPath;
use crate::util::hash::{HashError, Hashable, RuleId};

use super::types::{AliasKey, Dep, Rule};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
  #[error("multiple rules generated for {target}: {first} and {second}")]
  DuplicateTarget {
    target: String,
    first: RuleId,
    second: RuleId,
  },

  #[error("failed to hash rule: {0}")]
  Hash(String),
}

impl From<HashError> for RegistryError {
  fn from(e: HashError) -> Self {
    RegistryError::Hash(e.to_string())
  }
}

/// Merged view of everything registered for one alias.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AliasContents {
  pub deps: Vec<Dep>,
  pub actions: Vec<RuleId>,
}

impl AliasContents {
  pub fn is_empty(&self) -> bool {
    self.deps.is_empty() && self.actions.is_empty()
  }
}

#[derive(Debug, Default)]
struct Partition {
  rules: Vec<RuleId>,
  aliases: BTreeMap<AliasKey, AliasContents>,
}

#[derive(Debug, Default)]
struct Inner {
  rules: HashMap<RuleId, Rule>,
  producers: HashMap<BuildPath, RuleId>,
  /// Owners that contributed to each alias, in registration order.
  alias_owners: HashMap<AliasKey, Vec<BuildPath>>,
  partitions: HashMap<BuildPath, Partition>,
  registrations: usize,
}

#[derive(Debug, Default)]
pub struct RuleRegistry {
  inner: Mutex<Inner>,
}

impl RuleRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> MutexGuard<'_, Inner> {
    self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  /// Register `rule` on behalf of `owner`.
  ///
  /// Registering an identical alias rule twice is a no-op; any target
  /// already produced by a different rule is rejected.
  pub fn add_rule(&self, owner: &BuildPath, rule: Rule) -> Result<RuleId, RegistryError> {
    let id = rule.compute_hash()?;
    let mut inner = self.lock();

    if inner.rules.contains_key(&id) {
      debug!(rule = %id, owner = %owner, "rule already registered");
      return Ok(id);
    }

    for target in &rule.targets {
      if let Some(existing) = inner.producers.get(target) {
        return Err(RegistryError::DuplicateTarget {
          target: target.to_string(),
          first: existing.clone(),
          second: id,
        });
      }
    }

    for target in &rule.targets {
      inner.producers.insert(target.clone(), id.clone());
    }

    let partition = inner.partitions.entry(owner.clone()).or_default();
    partition.rules.push(id.clone());
    if let Some(alias) = &rule.alias {
      partition.aliases.entry(alias.clone()).or_default().actions.push(id.clone());
    }
    if let Some(alias) = &rule.alias {
      let owners = inner.alias_owners.entry(alias.clone()).or_default();
      if !owners.contains(owner) {
        owners.push(owner.clone());
      }
    }

    inner.rules.insert(id.clone(), rule);
    inner.registrations += 1;
    Ok(id)
  }

  /// Add dependencies to `alias` on behalf of `owner`.
  pub fn add_alias_deps(&self, owner: &BuildPath, alias: &AliasKey, deps: impl IntoIterator<Item = Dep>) {
    let mut inner = self.lock();
    let contents = inner
      .partitions
      .entry(owner.clone())
      .or_default()
      .aliases
      .entry(alias.clone())
      .or_default();
    for dep in deps {
      if !contents.deps.contains(&dep) {
        contents.deps.push(dep);
      }
    }
    let owners = inner.alias_owners.entry(alias.clone()).or_default();
    if !owners.contains(owner) {
      owners.push(owner.clone());
    }
  }

  /// Drop everything `owner` registered. Returns the number of rules removed.
  pub fn forget_owner(&self, owner: &BuildPath) -> usize {
    let mut inner = self.lock();
    let Some(partition) = inner.partitions.remove(owner) else {
      return 0;
    };

    for id in &partition.rules {
      if let Some(rule) = inner.rules.remove(id) {
        for target in &rule.targets {
          inner.producers.remove(target);
        }
      }
    }
    for alias in partition.aliases.keys() {
      if let Some(owners) = inner.alias_owners.get_mut(alias) {
        owners.retain(|o| o != owner);
        if owners.is_empty() {
          inner.alias_owners.remove(alias);
        }
      }
    }
    partition.rules.len()
  }

  pub fn is_target(&self, path: &BuildPath) -> bool {
    self.lock().producers.contains_key(path)
  }

  pub fn producer(&self, path: &BuildPath) -> Option<(RuleId, Rule)> {
    let inner = self.lock();
    let id = inner.producers.get(path)?;
    inner.rules.get(id).map(|r| (id.clone(), r.clone()))
  }

  pub fn rule(&self, id: &RuleId) -> Option<Rule> {
    self.lock().rules.get(id).cloned()
  }

  /// Every known target, sorted.
  pub fn all_targets(&self) -> Vec<BuildPath> {
    let inner = self.lock();
    let set: BTreeSet<BuildPath> = inner.producers.keys().cloned().collect();
    set.into_iter().collect()
  }

  /// Targets whose parent directory is `dir`, sorted.
  pub fn targets_in(&self, dir: &BuildPath) -> Vec<BuildPath> {
    let inner = self.lock();
    let set: BTreeSet<BuildPath> = inner
      .producers
      .keys()
      .filter(|p| p.parent().as_ref() == Some(dir))
      .cloned()
      .collect();
    set.into_iter().collect()
  }

  /// True if any target lives in `dir` or below it.
  pub fn has_targets_under(&self, dir: &BuildPath) -> bool {
    self
      .lock()
      .producers
      .keys()
      .any(|p| p.root == dir.root && p.rel.is_descendant_of(&dir.rel) && p != dir)
  }

  /// Merged contents of `alias` across all owners, or `None` if nothing was
  /// registered for it.
  pub fn alias(&self, alias: &AliasKey) -> Option<AliasContents> {
    let inner = self.lock();
    let owners = inner.alias_owners.get(alias)?;
    let mut merged = AliasContents::default();
    for owner in owners {
      if let Some(contents) = inner.partitions.get(owner).and_then(|p| p.aliases.get(alias)) {
        for dep in &contents.deps {
          if !merged.deps.contains(dep) {
            merged.deps.push(dep.clone());
          }
        }
        merged.actions.extend(contents.actions.iter().cloned());
      }
    }
    Some(merged)
  }

  /// Rules registered by `owner`, in registration order.
  pub fn rules_of(&self, owner: &BuildPath) -> Vec<(RuleId, Rule)> {
    let inner = self.lock();
    inner
      .partitions
      .get(owner)
      .map(|p| {
        p.rules
          .iter()
          .filter_map(|id| inner.rules.get(id).map(|r| (id.clone(), r.clone())))
          .collect()
      })
      .unwrap_or_default()
  }

  /// Aliases `owner` contributed to.
  pub fn aliases_of(&self, owner: &BuildPath) -> Vec<AliasKey> {
    let inner = self.lock();
    inner
      .partitions
      .get(owner)
      .map(|p| p.aliases.keys().cloned().collect())
      .unwrap_or_default()
  }

  pub fn len(&self) -> usize {
    self.lock().rules.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Total successful registrations since the registry was created.
  pub fn registrations(&self) -> usize {
    self.lock().registrations
  }
}
