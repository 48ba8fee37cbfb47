use std::collections::{HashMap, HashSet};

use janitor_catalog::{OperationDescriptor, OperationId, SelectionOption};
use tracing::debug;

use crate::error::ResolveError;
use crate::plan::ExecutionPlan;

/// Build the execution plan for the selected members of `options`.
///
/// This process:
/// 1. Rejects duplicate identifiers
/// 2. Rejects any pair of selected operations that conflict, in either
///    direction
/// 3. Orders the rest so that every operation follows the members of its
///    after-set present in the selection
///
/// Options that are not selected take no part, not even as ordering hints.
pub fn resolve(options: &[SelectionOption]) -> Result<ExecutionPlan, ResolveError> {
  let selected: Vec<&OperationDescriptor> = options
    .iter()
    .filter(|o| o.is_selected())
    .map(SelectionOption::descriptor)
    .collect();

  check_duplicates(&selected)?;
  check_conflicts(&selected)?;
  let plan = topological_order(&selected)?;

  debug!(operations = plan.len(), plan = %plan, "plan_resolved");
  Ok(plan)
}

/// Order `descriptors` without conflict checks.
///
/// Edges to identifiers outside `descriptors` are ignored. Independent
/// operations are placed before those with more prerequisites; ties keep
/// input order.
pub fn order<'a>(
  descriptors: impl IntoIterator<Item = &'a OperationDescriptor>,
) -> Result<ExecutionPlan, ResolveError> {
  let descriptors: Vec<&OperationDescriptor> = descriptors.into_iter().collect();
  check_duplicates(&descriptors)?;
  topological_order(&descriptors)
}

fn check_duplicates(descriptors: &[&OperationDescriptor]) -> Result<(), ResolveError> {
  let mut seen: HashSet<&str> = HashSet::with_capacity(descriptors.len());
  for descriptor in descriptors {
    if !seen.insert(descriptor.id().as_str()) {
      return Err(ResolveError::DuplicateOperation {
        id: descriptor.id().clone(),
      });
    }
  }
  Ok(())
}

/// Report the first conflicting pair in input order.
fn check_conflicts(descriptors: &[&OperationDescriptor]) -> Result<(), ResolveError> {
  for (i, first) in descriptors.iter().enumerate() {
    for second in &descriptors[i + 1..] {
      if first.conflicts(second) {
        return Err(ResolveError::Conflict {
          first: first.id().clone(),
          second: second.id().clone(),
        });
      }
    }
  }
  Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
  Unvisited,
  Visiting,
  Visited,
}

/// Depth-first topological sort over after-set edges.
///
/// Roots are visited in seed order (ascending after-set size, stable), and
/// each node's prerequisites in declaration order, which makes the result a
/// pure function of the input.
fn topological_order(descriptors: &[&OperationDescriptor]) -> Result<ExecutionPlan, ResolveError> {
  let index: HashMap<&str, usize> = descriptors
    .iter()
    .enumerate()
    .map(|(i, d)| (d.id().as_str(), i))
    .collect();

  // Edges to operations outside the input are dropped here.
  let prerequisites: Vec<Vec<usize>> = descriptors
    .iter()
    .map(|d| {
      d.after()
        .iter()
        .filter_map(|id| index.get(id.as_str()).copied())
        .collect()
    })
    .collect();

  let mut seed: Vec<usize> = (0..descriptors.len()).collect();
  seed.sort_by_key(|&i| descriptors[i].after().len());

  let mut marks = vec![Mark::Unvisited; descriptors.len()];
  let mut ordered = Vec::with_capacity(descriptors.len());

  for &root in &seed {
    if marks[root] != Mark::Unvisited {
      continue;
    }
    if let Err(cycle) = visit(root, &prerequisites, &mut marks, &mut ordered) {
      let cycle: Vec<OperationId> = cycle.into_iter().map(|i| descriptors[i].id().clone()).collect();
      debug!(?cycle, "cyclic_dependency_detected");
      return Err(ResolveError::CyclicDependency { cycle });
    }
  }

  Ok(ExecutionPlan::new(
    ordered.into_iter().map(|i| descriptors[i].id().clone()).collect(),
  ))
}

/// Post-order walk from `root` with an explicit stack, so chain depth is
/// bounded by the heap rather than the thread stack.
///
/// Each frame is a node and the index of the next prerequisite to look at.
/// The frames double as the current path for cycle reports.
fn visit(
  root: usize,
  prerequisites: &[Vec<usize>],
  marks: &mut [Mark],
  ordered: &mut Vec<usize>,
) -> Result<(), Vec<usize>> {
  let mut stack: Vec<(usize, usize)> = vec![(root, 0)];
  marks[root] = Mark::Visiting;

  while let Some(frame) = stack.last_mut() {
    let (node, next) = *frame;

    let Some(&prerequisite) = prerequisites[node].get(next) else {
      stack.pop();
      marks[node] = Mark::Visited;
      ordered.push(node);
      continue;
    };
    frame.1 += 1;

    match marks[prerequisite] {
      Mark::Visited => {}
      Mark::Unvisited => {
        marks[prerequisite] = Mark::Visiting;
        stack.push((prerequisite, 0));
      }
      Mark::Visiting => {
        // Back edge: the cycle is the path from the prerequisite onwards.
        let start = stack.iter().position(|&(n, _)| n == prerequisite).unwrap_or(0);
        return Err(stack[start..].iter().map(|&(n, _)| n).collect());
      }
    }
  }

  Ok(())
}
