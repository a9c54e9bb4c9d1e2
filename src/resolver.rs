//! Dependency resolution: descriptors in, concurrency waves out.
//!
//! [`resolve`] runs Kahn's algorithm over a descriptor set and produces a
//! [`WavePlan`]: an ordered list of waves, each a set of module ids whose
//! dependencies are all satisfied by strictly earlier waves. A wave is safe to
//! execute concurrently. When no true dependencies exist the plan honestly
//! collapses to a single wave containing every module; the planner never
//! fakes multi-stage ordering.
//!
//! Resolution is a pure function of the descriptor set, so plans for an
//! identical module set are memoized in a [`PlanCache`].

use miette::Diagnostic;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::descriptor::{ModuleDescriptor, ModuleId};

/// Errors from wave planning.
#[derive(Debug, Error, Diagnostic)]
pub enum ResolverError {
    /// One or more modules can never reach zero in-degree. The list names
    /// exactly the modules participating in dependency cycles, sorted by id;
    /// nothing is silently dropped.
    #[error("dependency cycle among modules: {}", unresolved.iter().map(|id| id.as_str()).collect::<Vec<_>>().join(", "))]
    #[diagnostic(
        code(promptloom::resolver::cyclic_dependency),
        help("Break the cycle by removing one of the listed dependency edges.")
    )]
    CyclicDependency { unresolved: Vec<ModuleId> },

    /// A descriptor names a dependency absent from the resolved set.
    #[error("module \"{module}\" depends on \"{dependency}\", which is not in the resolved set")]
    #[diagnostic(code(promptloom::resolver::missing_dependency))]
    MissingDependency {
        module: ModuleId,
        dependency: ModuleId,
    },
}

/// Ordered execution plan: waves of concurrently-runnable module ids.
///
/// Within each wave, ids are ordered by descending priority then ascending id
/// for reproducible dispatch; across waves, every dependency of a module sits
/// in a strictly earlier wave.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WavePlan {
    waves: Vec<Vec<ModuleId>>,
}

impl WavePlan {
    #[must_use]
    pub fn waves(&self) -> &[Vec<ModuleId>] {
        &self.waves
    }

    #[must_use]
    pub fn wave_count(&self) -> usize {
        self.waves.len()
    }

    /// Total number of modules across all waves.
    #[must_use]
    pub fn len(&self) -> usize {
        self.waves.iter().map(Vec::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.waves.is_empty()
    }

    /// Index of the wave containing `id`, if any.
    #[must_use]
    pub fn wave_of(&self, id: &ModuleId) -> Option<usize> {
        self.waves
            .iter()
            .position(|wave| wave.iter().any(|m| m == id))
    }
}

/// Topologically sort `descriptors` into concurrency waves.
pub fn resolve(descriptors: &[ModuleDescriptor]) -> Result<WavePlan, ResolverError> {
    let n = descriptors.len();
    let index_of: FxHashMap<&ModuleId, usize> = descriptors
        .iter()
        .enumerate()
        .map(|(i, d)| (&d.id, i))
        .collect();

    let mut in_degree = vec![0usize; n];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (i, descriptor) in descriptors.iter().enumerate() {
        for dependency in &descriptor.dependencies {
            let Some(&dep) = index_of.get(dependency) else {
                return Err(ResolverError::MissingDependency {
                    module: descriptor.id.clone(),
                    dependency: dependency.clone(),
                });
            };
            in_degree[i] += 1;
            dependents[dep].push(i);
        }
    }

    let mut ready: Vec<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
    let mut waves: Vec<Vec<ModuleId>> = Vec::new();
    let mut resolved = 0usize;
    while !ready.is_empty() {
        // Reproducible intra-wave order: descending priority, then ascending id.
        ready.sort_by(|&a, &b| {
            descriptors[b]
                .priority
                .cmp(&descriptors[a].priority)
                .then_with(|| descriptors[a].id.cmp(&descriptors[b].id))
        });

        let mut next: Vec<usize> = Vec::new();
        for &i in &ready {
            for &child in &dependents[i] {
                in_degree[child] -= 1;
                if in_degree[child] == 0 {
                    next.push(child);
                }
            }
        }
        resolved += ready.len();
        waves.push(ready.iter().map(|&i| descriptors[i].id.clone()).collect());
        ready = next;
    }

    if resolved != n {
        let refs: Vec<&ModuleDescriptor> = descriptors.iter().collect();
        let unresolved = cycle_participants(&refs).unwrap_or_else(|| {
            let mut leftover: Vec<ModuleId> = (0..n)
                .filter(|&i| in_degree[i] > 0)
                .map(|i| descriptors[i].id.clone())
                .collect();
            leftover.sort();
            leftover
        });
        return Err(ResolverError::CyclicDependency { unresolved });
    }

    tracing::debug!(
        modules = descriptors.len(),
        waves = waves.len(),
        "wave plan resolved"
    );
    Ok(WavePlan { waves })
}

/// Identify the modules sitting on dependency cycles, ignoring dependency
/// edges that point outside `descriptors`.
///
/// Kosaraju's algorithm: a module is on a cycle exactly when its strongly
/// connected component has more than one member, or it depends on itself.
/// Modules on a path between two cycles belong to singleton components and
/// are not reported. Returns `None` when the set is acyclic.
pub(crate) fn cycle_participants(descriptors: &[&ModuleDescriptor]) -> Option<Vec<ModuleId>> {
    let n = descriptors.len();
    let ids: FxHashMap<&ModuleId, usize> = descriptors
        .iter()
        .enumerate()
        .map(|(i, d)| (&d.id, i))
        .collect();

    let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut transposed: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut self_loop = vec![false; n];
    for (i, descriptor) in descriptors.iter().enumerate() {
        for dependency in &descriptor.dependencies {
            if let Some(&j) = ids.get(dependency) {
                if i == j {
                    self_loop[i] = true;
                }
                adjacency[i].push(j);
                transposed[j].push(i);
            }
        }
    }

    // First pass: depth-first finish order over the dependency edges.
    let mut visited = vec![false; n];
    let mut finish_order = Vec::with_capacity(n);
    for start in 0..n {
        if visited[start] {
            continue;
        }
        visited[start] = true;
        let mut stack: Vec<(usize, usize)> = vec![(start, 0)];
        while let Some(frame) = stack.last_mut() {
            let (node, cursor) = *frame;
            if cursor < adjacency[node].len() {
                frame.1 += 1;
                let next = adjacency[node][cursor];
                if !visited[next] {
                    visited[next] = true;
                    stack.push((next, 0));
                }
            } else {
                finish_order.push(node);
                stack.pop();
            }
        }
    }

    // Second pass: flood the transposed graph in reverse finish order; each
    // flood is one strongly connected component.
    let mut component = vec![usize::MAX; n];
    let mut component_count = 0;
    for &root in finish_order.iter().rev() {
        if component[root] != usize::MAX {
            continue;
        }
        component[root] = component_count;
        let mut stack = vec![root];
        while let Some(node) = stack.pop() {
            for &next in &transposed[node] {
                if component[next] == usize::MAX {
                    component[next] = component_count;
                    stack.push(next);
                }
            }
        }
        component_count += 1;
    }

    let mut component_size = vec![0usize; component_count];
    for &c in &component {
        component_size[c] += 1;
    }

    let mut members: Vec<ModuleId> = (0..n)
        .filter(|&i| component_size[component[i]] > 1 || self_loop[i])
        .map(|i| descriptors[i].id.clone())
        .collect();
    if members.is_empty() {
        return None;
    }
    members.sort();
    Some(members)
}

/// Memoized wave plans, keyed by the sorted module-id fingerprint of the set.
///
/// Descriptors are immutable after registration, so the id set fully
/// determines the plan within one registry.
#[derive(Default)]
pub struct PlanCache {
    plans: Mutex<FxHashMap<Vec<ModuleId>, Arc<WavePlan>>>,
}

impl PlanCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the memoized plan for this module set, resolving it on first
    /// request. `fingerprint` must be sorted.
    pub fn get_or_resolve(
        &self,
        fingerprint: Vec<ModuleId>,
        descriptors: &[ModuleDescriptor],
    ) -> Result<Arc<WavePlan>, ResolverError> {
        debug_assert!(fingerprint.windows(2).all(|w| w[0] <= w[1]));
        let mut plans = self.plans.lock();
        if let Some(plan) = plans.get(&fingerprint) {
            tracing::trace!(modules = fingerprint.len(), "reusing memoized wave plan");
            return Ok(plan.clone());
        }
        let plan = Arc::new(resolve(descriptors)?);
        plans.insert(fingerprint, plan.clone());
        Ok(plan)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.plans.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.plans.lock().is_empty()
    }
}
