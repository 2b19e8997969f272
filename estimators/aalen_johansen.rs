//! Aalen–Johansen estimator for continuous-time multi-state data.
//!
//! The distinct event times form the estimation grid. At every grid point the observed jumps
//! give Nelson–Aalen hazard increments `dA_k`, and the transition probability matrix follows the
//! product integral `P_k = P_{k-1} (I + dA_k)` with `P_0 = I`.

use crate::estimators::{EstimatorError, summary_table};
use crate::matrix::TransitionMatrix;
use crate::matrix_set::{TemporalType, TransitionMatrixSet};
use crate::preprocessing::CanonicalEvent;
use crate::state_space::StateSpace;
use ahash::AHashSet;
use ndarray::{Array2, Array3, Axis, s};

#[derive(Debug, Clone)]
pub struct AalenJohansenEstimator {
    states: StateSpace,
}

/// Result of [`AalenJohansenEstimator::fit`]; all tensors are indexed by grid point last.
#[derive(Debug, Clone)]
pub struct AalenJohansenEstimate {
    etm: Array3<f64>,
    times: Vec<f64>,
    occupation: Array2<f64>,
    migrations: Array3<f64>,
    hazard_increments: Array3<f64>,
    counts: usize,
    nans: usize,
}

struct Jump {
    point: usize,
    from: usize,
    to: usize,
}

impl AalenJohansenEstimator {
    pub fn new(states: StateSpace) -> Result<Self, EstimatorError> {
        if states.cardinality() == 0 {
            return Err(EstimatorError::EmptyStateSpace);
        }
        Ok(Self { states })
    }

    pub fn states(&self) -> &StateSpace {
        &self.states
    }

    /// Estimate from Canonical `(ID, Time, From, To)` rows.
    ///
    /// Rows are ordered by time (stable for ties) before processing. The first row of each
    /// entity places it in its `From` state at the start; rows with `From == To` only mark
    /// presence. Rows with a missing or out-of-range state or a non-finite time are counted
    /// in `nans` and skipped.
    ///
    /// Hazard increments at grid point `k` divide the jump counts by the occupation at `k - 1`,
    /// the number at risk just before the jumps, so `dA[.., .., k] = dN[.., .., k] /
    /// occupation[.., k - 1]`. [`AalenJohansenEstimate::occupation`] holds the counts after the
    /// jumps of each point.
    pub fn fit(&self, events: &[CanonicalEvent]) -> Result<AalenJohansenEstimate, EstimatorError> {
        let state_count = self.states.cardinality();
        let usable = |e: &&CanonicalEvent| {
            e.time.is_finite()
                && matches!(e.from, Some(f) if f < state_count)
                && matches!(e.to, Some(t) if t < state_count)
        };
        let mut rows: Vec<&CanonicalEvent> = events.iter().filter(usable).collect();
        let nans = events.len() - rows.len();
        if nans > 0 {
            log::warn!("Skipped {nans} rows without a usable time or state");
        }
        rows.sort_by(|a, b| a.time.total_cmp(&b.time));

        let mut times: Vec<f64> = Vec::new();
        let mut initial = vec![0.0; state_count];
        let mut seen: AHashSet<i64> = AHashSet::new();
        let mut jumps: Vec<Jump> = Vec::new();
        for row in &rows {
            if times.last().is_none_or(|&last| row.time > last) {
                times.push(row.time);
            }
            let point = times.len() - 1;
            let (from, to) = match (row.from, row.to) {
                (Some(from), Some(to)) => (from, to),
                _ => continue,
            };
            if seen.insert(row.id) {
                initial[from] += 1.0;
            }
            if from != to && point > 0 {
                jumps.push(Jump { point, from, to });
            }
        }
        let points = times.len();

        let mut migrations = Array3::<f64>::zeros((state_count, state_count, points));
        for jump in &jumps {
            migrations[[jump.from, jump.to, jump.point]] += 1.0;
        }

        let mut occupation = Array2::<f64>::zeros((state_count, points));
        let mut hazard_increments = Array3::<f64>::zeros((state_count, state_count, points));
        let mut etm = Array3::<f64>::zeros((state_count, state_count, points));
        let identity = Array2::<f64>::eye(state_count);
        let mut unsupported = 0usize;
        if points > 0 {
            occupation.column_mut(0).assign(&ndarray::Array1::from(initial));
            etm.index_axis_mut(Axis(2), 0).assign(&identity);
        }
        for k in 1..points {
            for m in 0..state_count {
                let mut inflow = 0.0;
                let mut outflow = 0.0;
                for n in 0..state_count {
                    if n != m {
                        inflow += migrations[[n, m, k]];
                        outflow += migrations[[m, n, k]];
                    }
                }
                let at_risk = occupation[[m, k - 1]];
                occupation[[m, k]] = at_risk + inflow - outflow;
                migrations[[m, m, k]] = outflow;
                if at_risk > 0.0 {
                    for n in 0..state_count {
                        hazard_increments[[m, n, k]] = if n == m {
                            -outflow / at_risk
                        } else {
                            migrations[[m, n, k]] / at_risk
                        };
                    }
                } else if outflow > 0.0 {
                    unsupported += 1;
                }
            }
            let step = &identity + &hazard_increments.index_axis(Axis(2), k);
            let next = etm.index_axis(Axis(2), k - 1).dot(&step);
            etm.index_axis_mut(Axis(2), k).assign(&next);
        }
        if unsupported > 0 {
            log::warn!(
                "{unsupported} jump groups leave a state with nobody at risk; their hazard is set to zero"
            );
        }

        log::info!(
            "Aalen-Johansen estimator: {} events, {} jumps over {points} distinct times ({nans} skipped)",
            rows.len(),
            jumps.len()
        );

        Ok(AalenJohansenEstimate {
            etm,
            times,
            occupation,
            migrations,
            hazard_increments,
            counts: rows.len(),
            nans,
        })
    }
}

impl AalenJohansenEstimate {
    /// Cumulative transition probabilities `[from, to, grid point]`.
    pub fn etm(&self) -> &Array3<f64> {
        &self.etm
    }

    /// Distinct observed event times, ascending.
    pub fn times(&self) -> &[f64] {
        &self.times
    }

    /// State occupation after the jumps at each grid point, `[state, grid point]`.
    pub fn occupation(&self) -> &Array2<f64> {
        &self.occupation
    }

    /// Jump counts `[from, to, grid point]`; the diagonal holds the total outflow.
    pub fn migrations(&self) -> &Array3<f64> {
        &self.migrations
    }

    pub fn hazard_increments(&self) -> &Array3<f64> {
        &self.hazard_increments
    }

    pub fn counts(&self) -> usize {
        self.counts
    }

    pub fn nans(&self) -> usize {
        self.nans
    }

    pub fn timepoints(&self) -> usize {
        self.times.len()
    }

    /// Matrix at the last grid point; identity when nothing was observed.
    pub fn final_matrix(&self) -> TransitionMatrix {
        match self.times.last() {
            Some(&t) => self.matrix_at(t),
            None => TransitionMatrix::identity(self.etm.len_of(Axis(0))),
        }
    }

    /// Cumulative matrix at the largest grid time not exceeding `t`; identity before the first.
    pub fn matrix_at(&self, t: f64) -> TransitionMatrix {
        let position = self.times.partition_point(|&time| time <= t);
        match position.checked_sub(1) {
            Some(k) => TransitionMatrix::new(self.etm.slice(s![.., .., k]).to_owned()),
            None => TransitionMatrix::identity(self.etm.len_of(Axis(0))),
        }
    }

    /// Cumulative set evaluated at the given times, which become the period markers.
    pub fn matrix_set_at(&self, times: &[f64]) -> Result<TransitionMatrixSet, EstimatorError> {
        let entries = times.iter().map(|&t| self.matrix_at(t)).collect();
        Ok(TransitionMatrixSet::from_entries(entries, TemporalType::Cumulative)?
            .with_periods(times.to_vec())?)
    }

    pub fn summary(&self, point: usize) -> Result<String, EstimatorError> {
        if point >= self.timepoints() {
            return Err(EstimatorError::PeriodOutOfRange {
                period: point,
                periods: self.timepoints(),
            });
        }
        Ok(summary_table(self.etm.index_axis(Axis(2), point), None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn row(id: i64, time: f64, from: usize, to: usize) -> CanonicalEvent {
        CanonicalEvent {
            id,
            time,
            from: Some(from),
            to: Some(to),
        }
    }

    fn estimator(states: usize) -> AalenJohansenEstimator {
        AalenJohansenEstimator::new(StateSpace::generic(states)).unwrap()
    }

    #[test]
    fn single_jump_out_of_four() {
        let events = vec![
            row(0, 0.0, 0, 0),
            row(1, 0.0, 0, 0),
            row(2, 0.0, 0, 0),
            row(3, 0.0, 0, 0),
            row(0, 1.0, 0, 1),
        ];
        let estimate = estimator(2).fit(&events).unwrap();
        assert_eq!(estimate.times(), &[0.0, 1.0]);
        assert_eq!(estimate.occupation()[[0, 0]], 4.0);
        assert_eq!(estimate.occupation()[[0, 1]], 3.0);
        assert_eq!(estimate.migrations()[[0, 0, 1]], 1.0);
        assert_abs_diff_eq!(estimate.hazard_increments()[[0, 1, 1]], 0.25);
        let last = estimate.final_matrix();
        assert_abs_diff_eq!(last[(0, 0)], 0.75, epsilon = 1e-12);
        assert_abs_diff_eq!(last[(0, 1)], 0.25, epsilon = 1e-12);
        assert_eq!(last[(1, 1)], 1.0);
    }

    #[test]
    fn hazard_uses_population_before_jumps() {
        let events = vec![
            row(0, 0.0, 0, 0),
            row(1, 0.0, 0, 0),
            row(2, 0.0, 0, 0),
            row(3, 0.0, 0, 0),
            row(0, 1.0, 0, 1),
            row(1, 1.0, 0, 1),
        ];
        let estimate = estimator(2).fit(&events).unwrap();
        let occupation = estimate.occupation();
        assert_eq!(occupation[[0, 1]], 2.0);
        let jumps = estimate.migrations()[[0, 1, 1]];
        assert_abs_diff_eq!(
            estimate.hazard_increments()[[0, 1, 1]],
            jumps / occupation[[0, 0]],
            epsilon = 1e-12
        );
        assert_abs_diff_eq!(estimate.hazard_increments()[[0, 0, 1]], -0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(estimate.final_matrix()[(0, 0)], 0.5, epsilon = 1e-12);
    }

    #[test]
    fn successive_jumps_multiply() {
        // two of three leave state 0 at distinct times: (1 - 1/3)(1 - 1/2) = 1/3
        let events = vec![
            row(0, 0.0, 0, 0),
            row(1, 0.0, 0, 0),
            row(2, 0.0, 0, 0),
            row(1, 2.0, 0, 1),
            row(0, 1.0, 0, 1),
        ];
        let estimate = estimator(2).fit(&events).unwrap();
        assert_eq!(estimate.timepoints(), 3);
        let last = estimate.final_matrix();
        assert_abs_diff_eq!(last[(0, 0)], 1.0 / 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(last[(0, 1)], 2.0 / 3.0, epsilon = 1e-12);
    }

    #[test]
    fn rows_stay_stochastic() {
        let events = vec![
            row(0, 0.0, 0, 0),
            row(1, 0.0, 1, 1),
            row(2, 0.0, 2, 2),
            row(3, 0.0, 0, 0),
            row(0, 0.4, 0, 1),
            row(1, 0.4, 1, 2),
            row(3, 0.9, 0, 2),
            row(0, 1.3, 1, 0),
            row(2, 1.7, 2, 1),
        ];
        let estimate = estimator(3).fit(&events).unwrap();
        for k in 0..estimate.timepoints() {
            let matrix = estimate.etm().index_axis(Axis(2), k);
            for r in matrix.outer_iter() {
                assert_abs_diff_eq!(r.sum(), 1.0, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn lookup_uses_last_time_not_after() {
        let events = vec![row(0, 0.0, 0, 0), row(1, 0.0, 0, 0), row(0, 1.0, 0, 1)];
        let estimate = estimator(2).fit(&events).unwrap();
        assert_eq!(estimate.matrix_at(-1.0), TransitionMatrix::identity(2));
        assert_eq!(estimate.matrix_at(0.5)[(0, 0)], 1.0);
        assert_abs_diff_eq!(estimate.matrix_at(7.0)[(0, 0)], 0.5);

        let set = estimate.matrix_set_at(&[0.5, 2.0]).unwrap();
        assert_eq!(set.temporal_type(), TemporalType::Cumulative);
        assert_eq!(set.periods(), &[0.5, 2.0]);
        assert_abs_diff_eq!(set.entries()[1][(0, 1)], 0.5);
    }

    #[test]
    fn invalid_rows_are_skipped() {
        let events = vec![
            row(0, 0.0, 0, 0),
            CanonicalEvent {
                id: 1,
                time: f64::NAN,
                from: Some(0),
                to: Some(1),
            },
            CanonicalEvent {
                id: 1,
                time: 0.5,
                from: None,
                to: Some(1),
            },
            row(0, 1.0, 0, 4),
        ];
        let estimate = estimator(2).fit(&events).unwrap();
        assert_eq!(estimate.nans(), 3);
        assert_eq!(estimate.counts(), 1);
        assert_eq!(estimate.final_matrix(), TransitionMatrix::identity(2));
    }

    #[test]
    fn empty_input_gives_identity() {
        let estimate = estimator(3).fit(&[]).unwrap();
        assert_eq!(estimate.timepoints(), 0);
        assert_eq!(estimate.final_matrix(), TransitionMatrix::identity(3));
        assert!(estimate.summary(0).is_err());
    }
}
