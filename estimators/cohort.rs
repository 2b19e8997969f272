//! Discrete-time cohort estimator.
//!
//! Entities are observed at cohort points `0..=cohorts`. For each interval `k` the estimator
//! counts the entities present in each state at point `k` and where they are found at point
//! `k + 1`; the ratio is the one-period transition frequency.

use crate::estimators::{
    ConfidenceBounds, ConfidenceIntervalConfig, EstimatorError, confidence_bounds,
    counts_listing, frequencies_listing, normalize_rows, summary_table,
};
use crate::matrix::TransitionMatrix;
use crate::matrix_set::{TemporalType, TransitionMatrixSet};
use crate::preprocessing::{CohortedData, CompactEvent};
use crate::state_space::StateSpace;
use ndarray::{Array2, Array3, Axis, s};

#[derive(Debug, Clone)]
pub struct CohortEstimator {
    states: StateSpace,
    confidence: Option<ConfidenceIntervalConfig>,
}

/// Result of [`CohortEstimator::fit`].
#[derive(Debug, Clone)]
pub struct CohortEstimate {
    matrix_set: TransitionMatrixSet,
    average_matrix: TransitionMatrix,
    /// `[from, to, cohort]`.
    count_set: Array3<f64>,
    /// `[state, cohort point]`, `cohorts + 1` columns.
    count_normalization: Array2<f64>,
    confidence: Option<ConfidenceBounds>,
    counts: usize,
    nans: usize,
}

impl CohortEstimator {
    /// An invalid confidence configuration is rejected here rather than during `fit`.
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

    pub fn states(&self) -> &StateSpace {
        &self.states
    }

    /// Estimate from a cohorted grid. Period markers of the result are the interval end bounds.
    pub fn fit(&self, data: &CohortedData) -> Result<CohortEstimate, EstimatorError> {
        let estimate = self.fit_compact(&data.to_compact(), data.cohorts())?;
        let periods = data.bounds()[1..].to_vec();
        Ok(CohortEstimate {
            matrix_set: estimate.matrix_set.with_periods(periods)?,
            ..estimate
        })
    }

    /// Estimate from Compact events whose time is already the integral cohort point.
    ///
    /// Rows with an unknown state, a state outside the state space, or a time that is not a
    /// point in `0..=cohorts` are counted in `nans` and skipped.
    pub fn fit_compact(
        &self,
        events: &[CompactEvent],
        cohorts: usize,
    ) -> Result<CohortEstimate, EstimatorError> {
        if cohorts == 0 {
            return Err(EstimatorError::NoCohorts);
        }
        let state_count = self.states.cardinality();

        let mut nans = 0usize;
        let mut rows: Vec<(i64, usize, usize)> = Vec::with_capacity(events.len());
        for event in events {
            let point = event.time;
            let usable_time = point.is_finite()
                && point >= 0.0
                && point.fract() == 0.0
                && point <= cohorts as f64;
            match event.state {
                Some(state) if usable_time && state < state_count => {
                    rows.push((event.id, point as usize, state))
                }
                _ => nans += 1,
            }
        }
        if nans > 0 {
            log::warn!("Skipped {nans} rows without a usable state or cohort point");
        }
        rows.sort_by_key(|&(id, cohort, _)| (id, cohort));

        let mut count_normalization = Array2::<f64>::zeros((state_count, cohorts + 1));
        let mut count_set = Array3::<f64>::zeros((state_count, state_count, cohorts));
        for (position, &(id, cohort, state)) in rows.iter().enumerate() {
            count_normalization[[state, cohort]] += 1.0;
            match rows.get(position + 1) {
                Some(&(next_id, _, next_state)) if next_id == id && cohort < cohorts => {
                    count_set[[state, next_state, cohort]] += 1.0;
                }
                // last observation of the entity
                _ => {}
            }
        }
        let counts = count_normalization.sum() as usize;

        let mut entries = Vec::with_capacity(cohorts);
        for k in 0..cohorts {
            let population = count_normalization.column(k).to_vec();
            let empty = population.iter().filter(|&&p| p == 0.0).count();
            if empty > 0 {
                log::debug!("Cohort {k}: {empty} states without population");
            }
            let values = normalize_rows(count_set.slice(s![.., .., k]), &population);
            entries.push(TransitionMatrix::new(values));
        }
        let matrix_set = TransitionMatrixSet::from_entries(entries, TemporalType::Incremental)?;

        let pooled_counts = count_set.sum_axis(Axis(2));
        let pooled_population: Vec<f64> = count_normalization
            .slice(s![.., ..cohorts])
            .sum_axis(Axis(1))
            .to_vec();
        for (state, &total) in pooled_population.iter().enumerate() {
            if total == 0.0 {
                log::warn!(
                    "State {} is never observed at the start of an interval; its average row is zero",
                    self.states.label(state).unwrap_or("?")
                );
            }
        }
        let average_matrix = TransitionMatrix::new(normalize_rows(pooled_counts.view(), &pooled_population));

        let confidence = self
            .confidence
            .as_ref()
            .map(|config| confidence_bounds(count_set.view(), config))
            .transpose()?;

        log::info!(
            "Cohort estimator: {counts} observations of {} states over {cohorts} cohorts ({nans} skipped)",
            state_count
        );

        Ok(CohortEstimate {
            matrix_set,
            average_matrix,
            count_set,
            count_normalization,
            confidence,
            counts,
            nans,
        })
    }
}

impl CohortEstimate {
    /// One incremental matrix per cohort interval.
    pub fn matrix_set(&self) -> &TransitionMatrixSet {
        &self.matrix_set
    }

    /// Time-homogeneous estimate pooled over all intervals.
    pub fn average_matrix(&self) -> &TransitionMatrix {
        &self.average_matrix
    }

    pub fn count_set(&self) -> &Array3<f64> {
        &self.count_set
    }

    pub fn count_normalization(&self) -> &Array2<f64> {
        &self.count_normalization
    }

    pub fn confidence(&self) -> Option<&ConfidenceBounds> {
        self.confidence.as_ref()
    }

    pub fn ci_fallbacks(&self) -> usize {
        self.confidence.as_ref().map_or(0, |c| c.fallbacks)
    }

    /// Observations counted (including each entity's final observation).
    pub fn counts(&self) -> usize {
        self.counts
    }

    pub fn nans(&self) -> usize {
        self.nans
    }

    pub fn cohorts(&self) -> usize {
        self.count_set.len_of(Axis(2))
    }

    fn check_period(&self, period: usize) -> Result<(), EstimatorError> {
        if period >= self.cohorts() {
            return Err(EstimatorError::PeriodOutOfRange {
                period,
                periods: self.cohorts(),
            });
        }
        Ok(())
    }

    pub fn summary(&self, period: usize) -> Result<String, EstimatorError> {
        self.check_period(period)?;
        let matrix = &self.matrix_set.entries()[period];
        Ok(summary_table(
            matrix.values(),
            self.confidence.as_ref().map(|c| (c, period)),
        ))
    }

    /// Starting population and migration counts, for one period or all of them.
    pub fn format_counts(&self, period: Option<usize>) -> Result<String, EstimatorError> {
        let periods = match period {
            Some(k) => {
                self.check_period(k)?;
                k..k + 1
            }
            None => 0..self.cohorts(),
        };
        Ok(periods
            .map(|k| {
                let population = self.count_normalization.column(k).to_vec();
                counts_listing(k, &population, self.count_set.slice(s![.., .., k]))
            })
            .collect())
    }

    /// Estimated frequencies, for one period or all of them.
    pub fn format_frequencies(&self, period: Option<usize>) -> Result<String, EstimatorError> {
        let periods = match period {
            Some(k) => {
                self.check_period(k)?;
                k..k + 1
            }
            None => 0..self.cohorts(),
        };
        Ok(periods
            .map(|k| frequencies_listing(k, self.matrix_set.entries()[k].values()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::estimators::ConfidenceMethod;
    use crate::preprocessing::{CohortSpec, bin_timestamps};
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn point(id: i64, cohort: usize, state: usize) -> CompactEvent {
        CompactEvent {
            id,
            time: cohort as f64,
            state: Some(state),
        }
    }

    #[test]
    fn counts_transitions_between_consecutive_points() {
        let events = vec![
            point(0, 0, 0),
            point(0, 1, 0),
            point(0, 2, 1),
            point(1, 0, 0),
            point(1, 1, 1),
            point(1, 2, 1),
        ];
        let estimator = CohortEstimator::new(StateSpace::generic(2), None).unwrap();
        let estimate = estimator.fit_compact(&events, 2).unwrap();

        assert_eq!(estimate.count_set()[[0, 0, 0]], 1.0);
        assert_eq!(estimate.count_set()[[0, 1, 0]], 1.0);
        assert_eq!(estimate.count_set()[[0, 1, 1]], 1.0);
        assert_eq!(estimate.count_set()[[1, 1, 1]], 1.0);
        assert_eq!(estimate.count_normalization()[[0, 0]], 2.0);
        assert_eq!(estimate.count_normalization()[[1, 2]], 2.0);
        assert_eq!(estimate.counts(), 6);

        let first = &estimate.matrix_set().entries()[0];
        assert_eq!(first.values(), array![[0.5, 0.5], [0.0, 0.0]]);
        assert_abs_diff_eq!(estimate.average_matrix()[(0, 0)], 1.0 / 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(estimate.average_matrix()[(1, 1)], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn unsorted_input_is_sorted_by_entity_and_point() {
        let events = vec![point(3, 1, 1), point(2, 1, 0), point(3, 0, 0), point(2, 0, 0)];
        let estimator = CohortEstimator::new(StateSpace::generic(2), None).unwrap();
        let estimate = estimator.fit_compact(&events, 1).unwrap();
        assert_eq!(estimate.count_set()[[0, 0, 0]], 1.0);
        assert_eq!(estimate.count_set()[[0, 1, 0]], 1.0);
    }

    #[test]
    fn invalid_rows_are_counted_not_used() {
        let events = vec![
            point(0, 0, 0),
            CompactEvent {
                id: 0,
                time: 0.5,
                state: Some(1),
            },
            CompactEvent {
                id: 0,
                time: 1.0,
                state: None,
            },
            point(0, 1, 5),
            point(0, 1, 1),
        ];
        let estimator = CohortEstimator::new(StateSpace::generic(2), None).unwrap();
        let estimate = estimator.fit_compact(&events, 1).unwrap();
        assert_eq!(estimate.nans(), 3);
        assert_eq!(estimate.count_set()[[0, 1, 0]], 1.0);
    }

    #[test]
    fn single_observation_entities_add_population_only() {
        let events = vec![point(0, 1, 1), point(1, 0, 0), point(1, 1, 0)];
        let estimator = CohortEstimator::new(StateSpace::generic(2), None).unwrap();
        let estimate = estimator.fit_compact(&events, 1).unwrap();
        assert_eq!(estimate.count_set().sum(), 1.0);
        assert_eq!(estimate.count_normalization()[[1, 1]], 1.0);
        assert_eq!(estimate.counts(), 3);
    }

    #[test]
    fn late_entities_are_not_counted_at_the_start() {
        let events = vec![
            CompactEvent { id: 0, time: 0.0, state: Some(0) },
            CompactEvent { id: 0, time: 3.0, state: Some(1) },
            CompactEvent { id: 1, time: 2.5, state: Some(0) },
            CompactEvent { id: 1, time: 3.0, state: Some(0) },
        ];
        let data = bin_timestamps(&events, &CohortSpec::Bounds(vec![0.0, 1.0, 2.0, 3.0]), false)
            .unwrap();
        let estimator = CohortEstimator::new(StateSpace::generic(2), None).unwrap();
        let estimate = estimator.fit(&data).unwrap();
        // entity 1 is unknown at points 0, 1 and 2
        assert_eq!(estimate.nans(), 3);
        assert_eq!(estimate.count_normalization()[[0, 0]], 1.0);
        assert_eq!(estimate.matrix_set().periods(), &[1.0, 2.0, 3.0]);
        let last = &estimate.matrix_set().entries()[2];
        assert_eq!(last.values(), array![[0.0, 1.0], [0.0, 0.0]]);
        assert_eq!(estimate.count_normalization()[[0, 3]], 1.0);
    }

    #[test]
    fn intervals_bracket_the_estimates() {
        let mut events = Vec::new();
        for id in 0..40 {
            events.push(point(id, 0, 0));
            events.push(point(id, 1, if id % 4 == 0 { 1 } else { 0 }));
        }
        let config = ConfidenceIntervalConfig::new(ConfidenceMethod::Goodman, 0.05).unwrap();
        let estimator = CohortEstimator::new(StateSpace::generic(2), Some(config)).unwrap();
        let estimate = estimator.fit_compact(&events, 1).unwrap();
        let bounds = estimate.confidence().unwrap();
        let matrix = &estimate.matrix_set().entries()[0];
        for to in 0..2 {
            assert!(bounds.lower[[0, to, 0]] <= matrix[(0, to)]);
            assert!(bounds.upper[[0, to, 0]] >= matrix[(0, to)]);
        }
        // state 1 has no population at point 0
        assert_eq!(bounds.lower[[1, 0, 0]], 0.0);
        assert_eq!(bounds.upper[[1, 0, 0]], 1.0);
        assert_eq!(estimate.ci_fallbacks(), 0);

        let summary = estimate.summary(0).unwrap();
        assert!(summary.contains("Lower Bound"));
        assert!(matches!(
            estimate.summary(1),
            Err(EstimatorError::PeriodOutOfRange { period: 1, periods: 1 })
        ));
    }

    #[test]
    fn listings_cover_all_periods() {
        let events = vec![point(0, 0, 0), point(0, 1, 1), point(0, 2, 1)];
        let estimator = CohortEstimator::new(StateSpace::generic(2), None).unwrap();
        let estimate = estimator.fit_compact(&events, 2).unwrap();
        let counts = estimate.format_counts(None).unwrap();
        assert_eq!(counts.matches("Period:").count(), 2);
        let frequencies = estimate.format_frequencies(Some(1)).unwrap();
        assert!(frequencies.starts_with("Period: 1"));
    }

    #[test]
    fn configuration_errors_surface_at_construction() {
        let bad = ConfidenceIntervalConfig {
            method: ConfidenceMethod::Binomial,
            alpha: 2.0,
        };
        assert!(matches!(
            CohortEstimator::new(StateSpace::generic(2), Some(bad)),
            Err(EstimatorError::ConfidenceInterval(_))
        ));
        let estimator = CohortEstimator::new(StateSpace::generic(2), None).unwrap();
        assert!(matches!(
            estimator.fit_compact(&[], 0),
            Err(EstimatorError::NoCohorts)
        ));
    }
}
