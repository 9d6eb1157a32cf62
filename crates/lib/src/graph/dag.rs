//! Dependency DAG over a set of tasks.
//!
//! Edges run from the task providing a key to every task requiring it. The
//! DAG is built once per run to reject invalid task sets before anything
//! executes, and to compute the execution waves reported at startup.

use std::collections::{HashMap, HashSet};

use petgraph::Direction;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};

use super::task::TaskSpec;
use super::types::GraphError;

/// A validated dependency graph. Node weights are indices into the task list.
pub struct TaskDag {
  graph: DiGraph<usize, String>,
  nodes: Vec<NodeIndex>,
}

impl TaskDag {
  /// Build and validate the DAG for a task list.
  ///
  /// # Errors
  ///
  /// - `DuplicateTitle` if two tasks share a title
  /// - `DuplicateProvider` if a key is provided by more than one task
  /// - `MissingProvider` if a required key has no provider
  /// - `CycleDetected` if the requires/provides edges form a cycle
  pub fn build(specs: &[TaskSpec]) -> Result<Self, GraphError> {
    let mut titles = HashSet::new();
    for spec in specs {
      if !titles.insert(spec.title.as_str()) {
        return Err(GraphError::DuplicateTitle(spec.title.clone()));
      }
    }

    let mut providers: HashMap<&str, usize> = HashMap::new();
    for (idx, spec) in specs.iter().enumerate() {
      for key in &spec.provides {
        if let Some(&first) = providers.get(key.as_str()) {
          return Err(GraphError::DuplicateProvider {
            key: key.clone(),
            first: specs[first].title.clone(),
            second: spec.title.clone(),
          });
        }
        providers.insert(key, idx);
      }
    }

    let mut graph = DiGraph::new();
    let nodes: Vec<NodeIndex> = (0..specs.len()).map(|idx| graph.add_node(idx)).collect();

    for (idx, spec) in specs.iter().enumerate() {
      for key in &spec.requires {
        let Some(&provider) = providers.get(key.as_str()) else {
          return Err(GraphError::MissingProvider {
            key: key.clone(),
            task: spec.title.clone(),
          });
        };
        graph.add_edge(nodes[provider], nodes[idx], key.clone());
      }
    }

    let dag = Self { graph, nodes };
    dag.verify_acyclic(specs)?;
    Ok(dag)
  }

  fn verify_acyclic(&self, specs: &[TaskSpec]) -> Result<(), GraphError> {
    toposort(&self.graph, None).map_err(|cycle| GraphError::CycleDetected(specs[self.graph[cycle.node_id()]].title.clone()))?;
    Ok(())
  }

  /// Group tasks into waves: every task's dependencies lie in earlier waves.
  ///
  /// Locks are ignored, so tasks in one wave may still be serialized at run
  /// time.
  pub fn waves(&self) -> Vec<Vec<usize>> {
    let mut in_degree: HashMap<NodeIndex, usize> = self
      .graph
      .node_indices()
      .map(|idx| (idx, self.graph.neighbors_directed(idx, Direction::Incoming).count()))
      .collect();

    let mut remaining: Vec<NodeIndex> = self.graph.node_indices().collect();
    let mut waves = Vec::new();

    while !remaining.is_empty() {
      let (ready, rest): (Vec<_>, Vec<_>) = remaining.into_iter().partition(|idx| in_degree[idx] == 0);
      if ready.is_empty() {
        // Unreachable after `build`; keep the partial result rather than spin.
        break;
      }

      for &idx in &ready {
        for neighbor in self.graph.neighbors_directed(idx, Direction::Outgoing) {
          if let Some(deg) = in_degree.get_mut(&neighbor) {
            *deg = deg.saturating_sub(1);
          }
        }
      }

      let mut wave: Vec<usize> = ready.into_iter().map(|idx| self.graph[idx]).collect();
      wave.sort_unstable();
      waves.push(wave);
      remaining = rest;
    }

    waves
  }

  pub fn task_count(&self) -> usize {
    self.nodes.len()
  }
}
