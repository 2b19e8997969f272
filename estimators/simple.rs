//! Single-period frequency estimator over `(ID, From, To)` pairs.

use crate::estimators::{
    ConfidenceBounds, ConfidenceIntervalConfig, EstimatorError, confidence_bounds,
    counts_listing, frequencies_listing, normalize_rows, summary_table,
};
use crate::matrix::TransitionMatrix;
use crate::preprocessing::TransitionPair;
use crate::state_space::StateSpace;
use ndarray::{Array2, Axis};

#[derive(Debug, Clone)]
pub struct SimpleEstimator {
    states: StateSpace,
    confidence: Option<ConfidenceIntervalConfig>,
}

#[derive(Debug, Clone)]
pub struct SimpleEstimate {
    matrix: TransitionMatrix,
    count_set: Array2<f64>,
    population: Vec<f64>,
    confidence: Option<ConfidenceBounds>,
    counts: usize,
    nans: usize,
}

impl SimpleEstimator {
    pub fn new(
        states: StateSpace,
        confidence: Option<ConfidenceIntervalConfig>,
    ) -> Result<Self, EstimatorError> {
        if states.cardinality() == 0 {
            return Err(EstimatorError::EmptyStateSpace);
        }
        if let Some(config) = &confidence {
            config.validate()?;
        }
        Ok(Self { states, confidence })
    }

    /// Every pair is one transition of one aggregate period.
    pub fn fit(&self, pairs: &[TransitionPair]) -> Result<SimpleEstimate, EstimatorError> {
        let state_count = self.states.cardinality();
        let mut count_set = Array2::<f64>::zeros((state_count, state_count));
        let mut nans = 0usize;
        for pair in pairs {
            match (pair.from, pair.to) {
                (Some(from), Some(to)) if from < state_count && to < state_count => {
                    count_set[[from, to]] += 1.0;
                }
                _ => nans += 1,
            }
        }
        if nans > 0 {
            log::warn!("Skipped {nans} pairs with a missing or unknown state");
        }
        let population = count_set.sum_axis(Axis(1)).to_vec();
        let counts = population.iter().sum::<f64>() as usize;
        let matrix = TransitionMatrix::new(normalize_rows(count_set.view(), &population));

        let confidence = self
            .confidence
            .as_ref()
            .map(|config| confidence_bounds(count_set.view().insert_axis(Axis(2)), config))
            .transpose()?;

        log::info!("Simple estimator: {counts} transitions ({nans} skipped)");
        Ok(SimpleEstimate {
            matrix,
            count_set,
            population,
            confidence,
            counts,
            nans,
        })
    }
}

impl SimpleEstimate {
    pub fn matrix(&self) -> &TransitionMatrix {
        &self.matrix
    }

    pub fn count_set(&self) -> &Array2<f64> {
        &self.count_set
    }

    /// Transitions leaving each state.
    pub fn population(&self) -> &[f64] {
        &self.population
    }

    /// Bounds with a single period, `[from, to, 0]`.
    pub fn confidence(&self) -> Option<&ConfidenceBounds> {
        self.confidence.as_ref()
    }

    pub fn ci_fallbacks(&self) -> usize {
        self.confidence.as_ref().map_or(0, |c| c.fallbacks)
    }

    pub fn counts(&self) -> usize {
        self.counts
    }

    pub fn nans(&self) -> usize {
        self.nans
    }

    pub fn summary(&self) -> String {
        summary_table(self.matrix.values(), self.confidence.as_ref().map(|c| (c, 0)))
    }

    pub fn format_counts(&self) -> String {
        counts_listing(0, &self.population, self.count_set.view())
    }

    pub fn format_frequencies(&self) -> String {
        frequencies_listing(0, self.matrix.values())
    }
}
