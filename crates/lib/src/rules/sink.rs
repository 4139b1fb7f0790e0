use std::sync::Mutex;

use crate::path::BuildPath;
use crate::util::hash::RuleId;

use super::registry::{RegistryError, RuleRegistry};
use super::types::{AliasKey, Dep, Rule};

/// Registration handle for one directory generation pass.
///
/// Everything added through a sink is owned by the directory being generated,
/// and the sink remembers which rules this pass produced.
pub struct RuleSink<'a> {
  registry: &'a RuleRegistry,
  owner: BuildPath,
  registered: Mutex<Vec<RuleId>>,
}

impl<'a> RuleSink<'a> {
  pub fn new(registry: &'a RuleRegistry, owner: BuildPath) -> Self {
    Self {
      registry,
      owner,
      registered: Mutex::new(Vec::new()),
    }
  }

  pub fn owner(&self) -> &BuildPath {
    &self.owner
  }

  pub fn add(&self, rule: Rule) -> Result<RuleId, RegistryError> {
    let id = self.registry.add_rule(&self.owner, rule)?;
    let mut registered = self.registered.lock().unwrap_or_else(|p| p.into_inner());
    if !registered.contains(&id) {
      registered.push(id.clone());
    }
    Ok(id)
  }

  pub fn alias_deps(&self, alias: &AliasKey, deps: impl IntoIterator<Item = Dep>) {
    self.registry.add_alias_deps(&self.owner, alias, deps);
  }

  /// Attach `rule` as an action of `alias`.
  pub fn alias_action(&self, alias: &AliasKey, rule: Rule) -> Result<RuleId, RegistryError> {
    self.add(rule.for_alias(alias.clone()))
  }

  pub fn into_registered(self) -> Vec<RuleId> {
    self.registered.into_inner().unwrap_or_else(|p| p.into_inner())
  }
}
