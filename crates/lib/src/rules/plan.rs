//! Build plan for the external execution engine.
//!
//! Starting from resolved targets, the plan collects every rule reachable
//! through file producers, alias contents and rule dependencies, generating
//! directories on demand. Aliases are graph nodes of their own so an alias
//! shared by many requesters is expanded once.
//!
//! The plan provides:
//! - a cycle check over the whole reachable graph
//! - parallel execution waves (rules whose dependencies are all in earlier
//!   waves)

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use petgraph::Direction;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use thiserror::Error;
use tracing::{debug, info};

use crate::orchestrator::{GenError, Orchestrator};
use crate::path::{BuildPath, Path};
use crate::resolve::Target;
use crate::util::hash::RuleId;

use super::types::{AliasKey, Dep, Rule};

#[derive(Debug, Error)]
pub enum PlanError {
  #[error("no rule found for {0}")]
  NoRule(String),

  #[error("no rule found for alias {0}")]
  NoRuleForAlias(String),

  #[error("dependency cycle detected in build plan")]
  CycleDetected,

  #[error(transparent)]
  Generation(#[from] GenError),
}

/// A node of the plan graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PlanNode {
  Rule(RuleId),
  Alias { key: AliasKey, recursive: bool },
}

enum Need {
  File(BuildPath),
  Alias(AliasKey, bool),
  Dep(Dep),
}

pub struct RulePlan {
  /// Edges run from prerequisite to dependent.
  graph: DiGraph<PlanNode, ()>,
  nodes: HashMap<PlanNode, NodeIndex>,
  rules: BTreeMap<RuleId, Rule>,
}

impl RulePlan {
  /// Collect the rules needed to build `targets`.
  pub async fn for_targets(orch: &Orchestrator, targets: &[Target]) -> Result<Self, PlanError> {
    let mut queue: VecDeque<(Option<PlanNode>, Need)> = VecDeque::new();
    for target in targets {
      match target {
        Target::File {
          path: Path::Build(p),
        } => queue.push_back((None, Need::File(p.clone()))),
        Target::File { .. } => {}
        Target::Alias(alias) => {
          for key in alias.keys() {
            queue.push_back((None, Need::Alias(key, alias.recursive)));
          }
        }
      }
    }

    let mut visited: HashSet<PlanNode> = HashSet::new();
    let mut edges: Vec<(PlanNode, PlanNode)> = Vec::new();
    let mut rules: BTreeMap<RuleId, Rule> = BTreeMap::new();

    while let Some((requester, need)) = queue.pop_front() {
      match need {
        Need::File(path) => {
          if !orch.is_target(&path).await? {
            return Err(PlanError::NoRule(path.to_string()));
          }
          let Some((id, rule)) = orch.registry().producer(&path) else {
            return Err(PlanError::NoRule(path.to_string()));
          };
          let node = PlanNode::Rule(id.clone());
          if let Some(dependent) = requester {
            edges.push((node.clone(), dependent));
          }
          if visited.insert(node.clone()) {
            for dep in &rule.deps {
              queue.push_back((Some(node.clone()), Need::Dep(dep.clone())));
            }
            rules.insert(id, rule);
          }
        }
        Need::Alias(key, recursive) => {
          let node = PlanNode::Alias {
            key: key.clone(),
            recursive,
          };
          if let Some(dependent) = requester {
            edges.push((node.clone(), dependent));
          }
          if !visited.insert(node.clone()) {
            continue;
          }
          let Some(contents) = orch.alias_contents(&key, recursive).await? else {
            return Err(PlanError::NoRuleForAlias(key.to_string()));
          };
          for dep in contents.deps {
            queue.push_back((Some(node.clone()), Need::Dep(dep)));
          }
          for id in contents.actions {
            let Some(rule) = orch.registry().rule(&id) else {
              continue;
            };
            let action = PlanNode::Rule(id.clone());
            edges.push((action.clone(), node.clone()));
            if visited.insert(action.clone()) {
              for dep in &rule.deps {
                queue.push_back((Some(action.clone()), Need::Dep(dep.clone())));
              }
              rules.insert(id, rule);
            }
          }
        }
        Need::Dep(dep) => match dep {
          Dep::File(path) => queue.push_back((requester, Need::File(path))),
          Dep::Alias(key) => queue.push_back((requester, Need::Alias(key, false))),
          Dep::AliasRec(key) => queue.push_back((requester, Need::Alias(key, true))),
          Dep::Matching { dir, predicate } => {
            for path in orch.matching(&dir, &predicate).await? {
              queue.push_back((requester.clone(), Need::File(path)));
            }
          }
          Dep::SourceTree(dir) => {
            for path in orch.targets_under(&dir).await? {
              queue.push_back((requester.clone(), Need::File(path)));
            }
          }
          // Not produced by any rule.
          Dep::Universe => {}
        },
      }
    }

    let plan = Self::from_edges(visited, edges, rules);
    plan.verify_acyclic()?;
    info!(rules = plan.rules.len(), "collected build plan");
    Ok(plan)
  }

  fn from_edges(nodes: HashSet<PlanNode>, edges: Vec<(PlanNode, PlanNode)>, rules: BTreeMap<RuleId, Rule>) -> Self {
    let mut graph = DiGraph::new();
    let mut index = HashMap::new();
    let mut sorted: Vec<PlanNode> = nodes.into_iter().collect();
    sorted.sort();
    for node in sorted {
      let idx = graph.add_node(node.clone());
      index.insert(node, idx);
    }
    let mut seen = HashSet::new();
    for (from, to) in edges {
      if let (Some(&a), Some(&b)) = (index.get(&from), index.get(&to))
        && seen.insert((a, b))
      {
        graph.add_edge(a, b, ());
      }
    }
    debug!(nodes = graph.node_count(), edges = graph.edge_count(), "built plan graph");
    Self {
      graph,
      nodes: index,
      rules,
    }
  }

  fn verify_acyclic(&self) -> Result<(), PlanError> {
    toposort(&self.graph, None).map_err(|_| PlanError::CycleDetected)?;
    Ok(())
  }

  pub fn len(&self) -> usize {
    self.rules.len()
  }

  pub fn is_empty(&self) -> bool {
    self.rules.is_empty()
  }

  pub fn rule(&self, id: &RuleId) -> Option<&Rule> {
    self.rules.get(id)
  }

  pub fn rules(&self) -> impl Iterator<Item = (&RuleId, &Rule)> {
    self.rules.iter()
  }

  /// Rules grouped into waves; every rule's prerequisites sit in earlier
  /// waves. Alias nodes take a level but never appear in a wave.
  pub fn waves(&self) -> Result<Vec<Vec<RuleId>>, PlanError> {
    let mut in_degree: HashMap<NodeIndex, usize> = self
      .graph
      .node_indices()
      .map(|idx| (idx, self.graph.neighbors_directed(idx, Direction::Incoming).count()))
      .collect();
    let mut remaining: HashSet<NodeIndex> = self.graph.node_indices().collect();
    let mut waves: Vec<Vec<RuleId>> = Vec::new();

    while !remaining.is_empty() {
      let ready: Vec<NodeIndex> = remaining.iter().filter(|&&idx| in_degree[&idx] == 0).copied().collect();
      if ready.is_empty() {
        return Err(PlanError::CycleDetected);
      }

      let mut wave = Vec::new();
      for &idx in &ready {
        remaining.remove(&idx);
        for neighbor in self.graph.neighbors_directed(idx, Direction::Outgoing) {
          if let Some(deg) = in_degree.get_mut(&neighbor) {
            *deg = deg.saturating_sub(1);
          }
        }
        if let PlanNode::Rule(id) = &self.graph[idx] {
          wave.push(id.clone());
        }
      }
      wave.sort();
      waves.push(wave);
    }

    waves.retain(|w| !w.is_empty());
    Ok(waves)
  }

  /// Direct rule prerequisites of `id`, looking through aliases.
  pub fn dependencies(&self, id: &RuleId) -> Vec<RuleId> {
    let Some(&start) = self.nodes.get(&PlanNode::Rule(id.clone())) else {
      return Vec::new();
    };
    let mut out = Vec::new();
    let mut stack = vec![start];
    let mut seen = HashSet::new();
    while let Some(idx) = stack.pop() {
      for dep in self.graph.neighbors_directed(idx, Direction::Incoming) {
        if !seen.insert(dep) {
          continue;
        }
        match &self.graph[dep] {
          PlanNode::Rule(r) => out.push(r.clone()),
          PlanNode::Alias { .. } => stack.push(dep),
        }
      }
    }
    out.sort();
    out
  }
}
