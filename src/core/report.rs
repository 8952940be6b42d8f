// src/core/report.rs

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::models::{ProbeName, ProbeOutcome};

/// The caller-facing document: one section per probe.
///
/// A probe that ended `Empty` or `Failed` keeps its key with a `null` value,
/// so "checked, nothing usable" is always distinguishable from "never checked".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Report {
    sections: BTreeMap<ProbeName, Option<Value>>,
}

impl Report {
    pub fn section(&self, name: ProbeName) -> Option<&Value> {
        self.sections.get(&name).and_then(Option::as_ref)
    }

    /// `true` when the probe has a key in the report, even a `null` one.
    pub fn has_section(&self, name: ProbeName) -> bool {
        self.sections.contains_key(&name)
    }

    pub fn sections(&self) -> impl Iterator<Item = (ProbeName, Option<&Value>)> {
        self.sections.iter().map(|(k, v)| (*k, v.as_ref()))
    }

    pub fn to_json_pretty(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Per-outcome counts, handy for summaries and log lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeTally {
    pub succeeded: usize,
    pub empty: usize,
    pub failed: usize,
}

impl OutcomeTally {
    pub fn of(outcomes: &BTreeMap<ProbeName, ProbeOutcome>) -> Self {
        outcomes.values().fold(Self::default(), |mut tally, outcome| {
            match outcome {
                ProbeOutcome::Success { .. } => tally.succeeded += 1,
                ProbeOutcome::Empty { .. } => tally.empty += 1,
                ProbeOutcome::Failed { .. } => tally.failed += 1,
            }
            tally
        })
    }
}

/// Folds outcomes into a report. Pure and deterministic: keys come out in
/// probe order and payloads are cloned as-is.
pub fn merge(outcomes: &BTreeMap<ProbeName, ProbeOutcome>) -> Report {
    let sections = outcomes
        .iter()
        .map(|(name, outcome)| (*name, outcome.payload().cloned()))
        .collect();
    Report { sections }
}
