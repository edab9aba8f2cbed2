use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use crate::error::WorkflowError;

/// Static step structure of a workflow.
///
/// Edges come from two places: consecutive steps of the primary trigger path,
/// and the subscriber graph (`step -> steps that run after it`). The graph is
/// validated to be acyclic on construction and never changes afterwards, so a
/// single instance is shared by every run of the workflow.
#[derive(Debug, Clone)]
pub struct StepGraph {
  /// Primary trigger path, in order.
  path: Vec<String>,
  /// step_id -> dependent step_ids.
  subscribers: BTreeMap<String, BTreeSet<String>>,
  /// Adjacency list: step_id -> downstream step_ids.
  adjacency: HashMap<String, Vec<String>>,
  /// Reverse adjacency: step_id -> upstream step_ids.
  reverse_adjacency: HashMap<String, Vec<String>>,
  /// Steps with no predecessors.
  roots: Vec<String>,
  /// Every step in a deterministic topological order.
  order: Vec<String>,
}

impl StepGraph {
  /// Build and validate a step graph.
  ///
  /// An empty graph is valid: it has no roots and a run over it completes
  /// without executing anything.
  ///
  /// # Errors
  /// - [`WorkflowError::CycleDetected`] if any step transitively depends on itself.
  pub fn new(
    path: Vec<String>,
    subscribers: BTreeMap<String, BTreeSet<String>>,
  ) -> Result<Self, WorkflowError> {
    // Steps in first-appearance order keep traversal deterministic.
    let mut steps: Vec<String> = Vec::new();
    for id in &path {
      push_unique(&mut steps, id);
    }
    for (from, to) in &subscribers {
      push_unique(&mut steps, from);
      for id in to {
        push_unique(&mut steps, id);
      }
    }

    let mut edges: Vec<(String, String)> = path
      .windows(2)
      .map(|pair| (pair[0].clone(), pair[1].clone()))
      .collect();
    for (from, to) in &subscribers {
      for id in to {
        edges.push((from.clone(), id.clone()));
      }
    }

    let mut adjacency: HashMap<String, Vec<String>> = HashMap::new();
    let mut reverse_adjacency: HashMap<String, Vec<String>> = HashMap::new();
    for id in &steps {
      adjacency.entry(id.clone()).or_default();
      reverse_adjacency.entry(id.clone()).or_default();
    }
    for (from, to) in &edges {
      let downstream = adjacency.entry(from.clone()).or_default();
      if !downstream.contains(to) {
        downstream.push(to.clone());
      }
      let upstream = reverse_adjacency.entry(to.clone()).or_default();
      if !upstream.contains(from) {
        upstream.push(from.clone());
      }
    }

    detect_cycle(&steps, &adjacency)?;

    let roots: Vec<String> = steps
      .iter()
      .filter(|id| reverse_adjacency.get(*id).is_none_or(|v| v.is_empty()))
      .cloned()
      .collect();

    let order = topological_order(&steps, &roots, &adjacency, &reverse_adjacency);

    Ok(Self {
      path,
      subscribers,
      adjacency,
      reverse_adjacency,
      roots,
      order,
    })
  }

  /// Steps that are eligible to run next.
  ///
  /// A step is ready when it has not completed and either it is already active,
  /// or it has predecessors and all of them have completed. Roots are only ever
  /// ready through `active_paths`, which `start` seeds with [`Self::roots`].
  pub fn resolve_ready(
    &self,
    active_paths: &BTreeSet<String>,
    completed: &BTreeSet<String>,
  ) -> Vec<String> {
    self
      .order
      .iter()
      .filter(|id| !completed.contains(*id))
      .filter(|id| {
        if active_paths.contains(*id) {
          return true;
        }
        let upstream = self.upstream(id);
        !upstream.is_empty() && upstream.iter().all(|up| completed.contains(up))
      })
      .cloned()
      .collect()
  }

  /// Steps with no predecessors.
  pub fn roots(&self) -> &[String] {
    &self.roots
  }

  /// Every step, in topological order.
  pub fn order(&self) -> &[String] {
    &self.order
  }

  pub fn path(&self) -> &[String] {
    &self.path
  }

  pub fn subscribers(&self) -> &BTreeMap<String, BTreeSet<String>> {
    &self.subscribers
  }

  pub fn contains(&self, step_id: &str) -> bool {
    self.adjacency.contains_key(step_id)
  }

  /// Get upstream steps for a given step.
  pub fn upstream(&self, step_id: &str) -> &[String] {
    self
      .reverse_adjacency
      .get(step_id)
      .map(|v| v.as_slice())
      .unwrap_or(&[])
  }

  /// Check if a step waits on more than one predecessor.
  pub fn is_join_point(&self, step_id: &str) -> bool {
    self.upstream(step_id).len() > 1
  }
}

fn push_unique(steps: &mut Vec<String>, id: &str) {
  if !steps.iter().any(|s| s == id) {
    steps.push(id.to_string());
  }
}

/// DFS with coloring: 0 = unvisited, 1 = on the stack, 2 = done.
fn detect_cycle(
  steps: &[String],
  adjacency: &HashMap<String, Vec<String>>,
) -> Result<(), WorkflowError> {
  fn dfs<'a>(
    step: &'a str,
    adjacency: &'a HashMap<String, Vec<String>>,
    color: &mut HashMap<&'a str, u8>,
  ) -> Option<&'a str> {
    color.insert(step, 1);

    if let Some(neighbors) = adjacency.get(step) {
      for neighbor in neighbors {
        match color.get(neighbor.as_str()) {
          Some(1) => return Some(neighbor.as_str()),
          Some(0) => {
            if let Some(found) = dfs(neighbor.as_str(), adjacency, color) {
              return Some(found);
            }
          }
          _ => {}
        }
      }
    }

    color.insert(step, 2);
    None
  }

  let mut color: HashMap<&str, u8> = steps.iter().map(|id| (id.as_str(), 0u8)).collect();

  for step in steps {
    if color.get(step.as_str()) == Some(&0) {
      if let Some(found) = dfs(step.as_str(), adjacency, &mut color) {
        return Err(WorkflowError::CycleDetected {
          step_id: found.to_string(),
        });
      }
    }
  }

  Ok(())
}

/// Kahn's algorithm, seeded with roots in first-appearance order.
fn topological_order(
  steps: &[String],
  roots: &[String],
  adjacency: &HashMap<String, Vec<String>>,
  reverse_adjacency: &HashMap<String, Vec<String>>,
) -> Vec<String> {
  let mut in_degree: HashMap<&str, usize> = steps
    .iter()
    .map(|id| (id.as_str(), reverse_adjacency.get(id).map_or(0, |v| v.len())))
    .collect();

  let mut queue: VecDeque<&str> = roots.iter().map(|id| id.as_str()).collect();
  let mut sorted = Vec::with_capacity(steps.len());

  while let Some(step) = queue.pop_front() {
    sorted.push(step.to_string());
    for next in adjacency.get(step).map(|v| v.as_slice()).unwrap_or(&[]) {
      if let Some(degree) = in_degree.get_mut(next.as_str()) {
        *degree -= 1;
        if *degree == 0 {
          queue.push_back(next.as_str());
        }
      }
    }
  }

  sorted
}
