// Dependency wave scheduling
// Groups hooks into waves: every hook in a wave has all of its dependencies in
// earlier waves, and each wave is as wide as the dependency graph allows.

use crate::error::{ConfigError, Result};
use crate::hook::HookDefinition;
use petgraph::graph::DiGraph;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// A set of hooks that may run concurrently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionWave {
    pub index: usize,
    /// Hook names, sorted for deterministic scheduling.
    pub hooks: Vec<String>,
}

impl ExecutionWave {
    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    pub fn contains(&self, hook: &str) -> bool {
        self.hooks.iter().any(|h| h == hook)
    }

    /// Split the wave into batches of at most `ceiling` hooks.
    ///
    /// A ceiling of zero is treated as one.
    pub fn sub_batches(&self, ceiling: usize) -> std::slice::Chunks<'_, String> {
        self.hooks.chunks(ceiling.max(1))
    }
}

/// Name -> dependency names, the input the scheduler works on.
pub type DependencyMap = BTreeMap<String, BTreeSet<String>>;

/// Build a dependency map from hook definitions.
pub fn dependency_map<'a, I>(hooks: I) -> DependencyMap
where
    I: IntoIterator<Item = &'a HookDefinition>,
{
    hooks
        .into_iter()
        .map(|h| (h.name.clone(), h.depends_on.clone()))
        .collect()
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DependencyWaveScheduler;

impl DependencyWaveScheduler {
    pub fn new() -> Self {
        Self
    }

    /// Compute execution waves for `hooks`.
    pub fn schedule<'a, I>(&self, hooks: I) -> Result<Vec<ExecutionWave>>
    where
        I: IntoIterator<Item = &'a HookDefinition>,
    {
        self.schedule_map(&dependency_map(hooks))
    }

    /// Compute execution waves from a dependency map.
    ///
    /// Repeatedly extracts every unscheduled hook whose dependencies are all
    /// scheduled. If hooks remain and none can be extracted, the remainder
    /// contains a cycle and the whole schedule is rejected.
    pub fn schedule_map(&self, graph: &DependencyMap) -> Result<Vec<ExecutionWave>> {
        for (hook, deps) in graph {
            if let Some(missing) = deps.iter().find(|d| !graph.contains_key(*d)) {
                return Err(ConfigError::MissingDependency {
                    hook: hook.clone(),
                    dependency: missing.clone(),
                }
                .into());
            }
        }

        let mut waves = Vec::new();
        let mut scheduled: BTreeSet<&str> = BTreeSet::new();

        while scheduled.len() < graph.len() {
            let ready: Vec<String> = graph
                .iter()
                .filter(|(hook, _)| !scheduled.contains(hook.as_str()))
                .filter(|(_, deps)| deps.iter().all(|d| scheduled.contains(d.as_str())))
                .map(|(hook, _)| hook.clone())
                .collect();

            if ready.is_empty() {
                let remaining: DependencyMap = graph
                    .iter()
                    .filter(|(hook, _)| !scheduled.contains(hook.as_str()))
                    .map(|(hook, deps)| (hook.clone(), deps.clone()))
                    .collect();
                let cycles = self.detect_cycles(&remaining);
                let mut hooks: Vec<String> = cycles.iter().flatten().cloned().collect();
                hooks.sort();
                hooks.dedup();
                tracing::error!(
                    unscheduled = remaining.len(),
                    cycle_members = ?hooks,
                    "Dependency cycle prevents scheduling"
                );
                return Err(ConfigError::CyclicDependency { hooks, cycles }.into());
            }

            for hook in &ready {
                if let Some((key, _)) = graph.get_key_value(hook) {
                    scheduled.insert(key.as_str());
                }
            }
            tracing::debug!(wave = waves.len(), hooks = ?ready, "Scheduled wave");
            waves.push(ExecutionWave {
                index: waves.len(),
                hooks: ready,
            });
        }

        Ok(waves)
    }

    /// Strongly connected components of size > 1, plus self-dependencies.
    pub fn detect_cycles(&self, graph: &DependencyMap) -> Vec<Vec<String>> {
        let mut pg = DiGraph::<&str, ()>::new();
        let mut node_indices = HashMap::new();

        for hook in graph.keys() {
            node_indices.insert(hook.as_str(), pg.add_node(hook.as_str()));
        }
        for (hook, deps) in graph {
            for dep in deps {
                if let (Some(&from), Some(&to)) =
                    (node_indices.get(dep.as_str()), node_indices.get(hook.as_str()))
                {
                    pg.add_edge(from, to, ());
                }
            }
        }

        let mut cycles: Vec<Vec<String>> = petgraph::algo::tarjan_scc(&pg)
            .into_iter()
            .filter(|scc| {
                scc.len() > 1 || graph.get(pg[scc[0]]).is_some_and(|d| d.contains(pg[scc[0]]))
            })
            .map(|scc| {
                let mut members: Vec<String> = scc.iter().map(|&i| pg[i].to_string()).collect();
                members.sort();
                members
            })
            .collect();
        cycles.sort();
        cycles
    }
}

/// Longest dependency chain in the graph, as hook names from root to leaf.
///
/// Its length equals the number of waves the scheduler produces.
pub fn critical_path(graph: &DependencyMap) -> Result<Vec<String>> {
    let waves = DependencyWaveScheduler::new().schedule_map(graph)?;

    let mut depth: HashMap<&str, (usize, Option<&str>)> = HashMap::new();
    for wave in &waves {
        for hook in &wave.hooks {
            let (key, deps) = match graph.get_key_value(hook) {
                Some(entry) => entry,
                None => continue,
            };
            let best = deps
                .iter()
                .filter_map(|d| depth.get(d.as_str()).map(|(n, _)| (*n, d.as_str())))
                .max_by(|a, b| a.0.cmp(&b.0).then_with(|| b.1.cmp(a.1)));
            let entry = match best {
                Some((n, parent)) => (n + 1, Some(parent)),
                None => (1, None),
            };
            depth.insert(key.as_str(), entry);
        }
    }

    let Some((&tail, _)) = depth
        .iter()
        .max_by(|a, b| a.1 .0.cmp(&b.1 .0).then_with(|| b.0.cmp(a.0)))
    else {
        return Ok(Vec::new());
    };

    let mut path = vec![tail.to_string()];
    let mut cursor = depth.get(tail).and_then(|(_, parent)| *parent);
    while let Some(hook) = cursor {
        path.push(hook.to_string());
        cursor = depth.get(hook).and_then(|(_, parent)| *parent);
    }
    path.reverse();
    Ok(path)
}

/// Number of hooks on the longest dependency chain.
pub fn critical_path_len(graph: &DependencyMap) -> Result<usize> {
    Ok(critical_path(graph)?.len())
}
