// src/core/registry.rs

//! Static table of probes and the dependency-ordered wave plan derived from it.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::core::models::ProbeName;
use crate::core::probe::{ProbeAdapter, ProbeSettings};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("probe '{0}' registered twice")]
    Duplicate(ProbeName),
    #[error("probe '{probe}' depends on unregistered probe '{dependency}'")]
    UnknownDependency { probe: ProbeName, dependency: ProbeName },
    #[error("dependency cycle among probes: {0:?}")]
    Cycle(Vec<ProbeName>),
}

/// One registered probe.
#[derive(Clone)]
pub struct ProbeEntry {
    pub adapter: Arc<dyn ProbeAdapter>,
    pub dependencies: Vec<ProbeName>,
    pub settings: ProbeSettings,
}

/// Ordered batches of probes; every probe's dependencies sit in an earlier wave.
pub type WavePlan = Vec<Vec<ProbeName>>;

#[derive(Clone, Default)]
pub struct ProbeRegistry {
    entries: BTreeMap<ProbeName, ProbeEntry>,
}

impl ProbeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an adapter with explicit scheduling settings.
    pub fn register(
        &mut self,
        adapter: Arc<dyn ProbeAdapter>,
        settings: ProbeSettings,
    ) -> Result<(), RegistryError> {
        let name = adapter.name();
        if self.entries.contains_key(&name) {
            return Err(RegistryError::Duplicate(name));
        }
        let dependencies = adapter.dependencies().to_vec();
        self.entries.insert(name, ProbeEntry { adapter, dependencies, settings });
        Ok(())
    }

    /// Builder form of [`register`](Self::register).
    pub fn with(
        mut self,
        adapter: Arc<dyn ProbeAdapter>,
        settings: ProbeSettings,
    ) -> Result<Self, RegistryError> {
        self.register(adapter, settings)?;
        Ok(self)
    }

    pub fn get(&self, name: ProbeName) -> Option<&ProbeEntry> {
        self.entries.get(&name)
    }

    pub fn names(&self) -> impl Iterator<Item = ProbeName> + '_ {
        self.entries.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of every probe's worst-case budget; the basis of the job deadline.
    pub fn total_budget(&self) -> Duration {
        self.entries.values().map(|e| e.settings.budget()).sum()
    }

    /// Computes the wave plan. See [`compute_waves`].
    pub fn waves(&self) -> Result<WavePlan, RegistryError> {
        let graph: BTreeMap<ProbeName, Vec<ProbeName>> = self
            .entries
            .iter()
            .map(|(name, entry)| (*name, entry.dependencies.clone()))
            .collect();
        compute_waves(&graph)
    }
}

/// Layers a dependency graph into waves.
///
/// Wave 0 holds every probe without dependencies; wave *k* holds the probes
/// whose dependencies all appear in waves `< k`. Within a wave names are
/// sorted, so the plan is deterministic. Cycles and dangling dependencies are
/// configuration errors.
pub fn compute_waves(
    graph: &BTreeMap<ProbeName, Vec<ProbeName>>,
) -> Result<WavePlan, RegistryError> {
    for (probe, deps) in graph {
        if let Some(dependency) = deps.iter().find(|d| !graph.contains_key(d)) {
            return Err(RegistryError::UnknownDependency { probe: *probe, dependency: *dependency });
        }
    }

    let mut placed: BTreeSet<ProbeName> = BTreeSet::new();
    let mut remaining: BTreeSet<ProbeName> = graph.keys().copied().collect();
    let mut waves = Vec::new();

    while !remaining.is_empty() {
        let wave: Vec<ProbeName> = remaining
            .iter()
            .copied()
            .filter(|p| graph[p].iter().all(|d| placed.contains(d)))
            .collect();

        if wave.is_empty() {
            return Err(RegistryError::Cycle(remaining.into_iter().collect()));
        }
        debug!(wave = waves.len(), probes = ?wave, "Wave planned.");
        for p in &wave {
            remaining.remove(p);
        }
        placed.extend(wave.iter().copied());
        waves.push(wave);
    }

    Ok(waves)
}
