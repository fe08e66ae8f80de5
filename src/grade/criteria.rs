#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};

use crate::assignment::TaskSpec;

/// Allowed deviation of a weight sum from 1.0.
pub const WEIGHT_TOLERANCE: f64 = 1e-6;

/// One of the five scoring dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Criterion {
    /// Are all requirements addressed?
    Completeness,
    /// Does the work behave as required?
    Correctness,
    /// Structure, naming, idiom.
    CodeQuality,
    /// Comments, reports, explanations.
    Documentation,
    /// Evidence of testing.
    Testing,
}

impl Criterion {
    /// Every criterion, in breakdown order.
    pub const ALL: [Criterion; 5] = [
        Criterion::Completeness,
        Criterion::Correctness,
        Criterion::CodeQuality,
        Criterion::Documentation,
        Criterion::Testing,
    ];

    /// Key used in payloads.
    pub fn key(self) -> &'static str {
        match self {
            Criterion::Completeness => "completeness",
            Criterion::Correctness => "correctness",
            Criterion::CodeQuality => "code_quality",
            Criterion::Documentation => "documentation",
            Criterion::Testing => "testing",
        }
    }

    /// Parses a key, accepting spaces or dashes instead of underscores.
    pub fn from_key(key: &str) -> Option<Self> {
        let key = key.trim().to_ascii_lowercase().replace([' ', '-'], "_");
        Criterion::ALL.into_iter().find(|c| c.key() == key)
    }

    /// Weight used when a task does not override it.
    pub fn default_weight(self) -> f64 {
        match self {
            Criterion::Completeness => 0.30,
            Criterion::Correctness => 0.40,
            Criterion::CodeQuality => 0.15,
            Criterion::Documentation => 0.10,
            Criterion::Testing => 0.05,
        }
    }

    /// Position in [`Criterion::ALL`].
    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Criterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// A weight per criterion, summing to 1.0 within [`WEIGHT_TOLERANCE`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CriterionWeights([f64; 5]);

impl Default for CriterionWeights {
    fn default() -> Self {
        Self(Criterion::ALL.map(Criterion::default_weight))
    }
}

impl CriterionWeights {
    /// Validates a per-task override. Criteria it does not name get weight
    /// zero.
    pub fn from_overrides(overrides: &BTreeMap<String, f64>) -> Result<Self, String> {
        let mut weights = [0.0; 5];
        for (name, &weight) in overrides {
            let criterion =
                Criterion::from_key(name).ok_or_else(|| format!("unknown criterion `{name}`"))?;
            if !weight.is_finite() || weight < 0.0 {
                return Err(format!("weight for `{name}` is not a non-negative number"));
            }
            weights[criterion.index()] = weight;
        }

        let candidate = Self(weights);
        let sum = candidate.sum();
        if (sum - 1.0).abs() > WEIGHT_TOLERANCE {
            return Err(format!("weights sum to {sum}, not 1.0"));
        }
        Ok(candidate)
    }

    /// Weights for `task`, plus a warning when its override was rejected and
    /// the defaults were used instead.
    pub fn for_task(task: &TaskSpec) -> (Self, Option<String>) {
        if task.evaluation.weights.is_empty() {
            return (Self::default(), None);
        }
        match Self::from_overrides(&task.evaluation.weights) {
            Ok(weights) => (weights, None),
            Err(reason) => (
                Self::default(),
                Some(format!("weight override ignored, default weights applied: {reason}")),
            ),
        }
    }

    /// Weight of one criterion.
    pub fn weight(&self, criterion: Criterion) -> f64 {
        self.0[criterion.index()]
    }

    /// Sum of all weights.
    pub fn sum(&self) -> f64 {
        self.0.iter().sum()
    }

    /// `(criterion, weight)` pairs in breakdown order.
    pub fn iter(&self) -> impl Iterator<Item = (Criterion, f64)> + '_ {
        Criterion::ALL.into_iter().map(|c| (c, self.weight(c)))
    }
}
