//! Synthetic transition datasets for testing estimators and cohorting.

use crate::matrix::TransitionMatrix;
use crate::preprocessing::events::{CanonicalEvent, CompactEvent, DataFormat};
use crate::state_space::StateSpace;
use rand::Rng;
use rand::distributions::{Distribution, WeightedError, WeightedIndex};
use rand_distr::{Exp, ExpError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error("Row {row} of the transition matrix is not a usable probability vector: {source}")]
    InvalidRow { row: usize, source: WeightedError },
    #[error("Matrix shape {shape:?} does not match a state space of cardinality {cardinality}.")]
    ShapeMismatch {
        shape: (usize, usize),
        cardinality: usize,
    },
    #[error("Invalid exponential waiting time: {0}")]
    Rate(#[from] ExpError),
    #[error("The state space is empty.")]
    EmptyStateSpace,
}

/// Events produced by [`long_format`].
#[derive(Debug, Clone, PartialEq)]
pub enum GeneratedEvents {
    Compact(Vec<CompactEvent>),
    Canonical(Vec<CanonicalEvent>),
}

fn row_samplers(
    states: &StateSpace,
    matrix: &TransitionMatrix,
) -> Result<Vec<WeightedIndex<f64>>, GeneratorError> {
    let cardinality = states.cardinality();
    if cardinality == 0 {
        return Err(GeneratorError::EmptyStateSpace);
    }
    if matrix.shape() != (cardinality, cardinality) {
        return Err(GeneratorError::ShapeMismatch {
            shape: matrix.shape(),
            cardinality,
        });
    }
    matrix
        .values()
        .outer_iter()
        .enumerate()
        .map(|(row, weights)| {
            WeightedIndex::new(weights.iter().copied())
                .map_err(|source| GeneratorError::InvalidRow { row, source })
        })
        .collect()
}

/// Continuous-time events with exponential inter-arrival times of mean `mean_wait` and states
/// drawn uniformly. Successive events may repeat a state.
pub fn exponential_transitions<R: Rng>(
    states: &StateSpace,
    n: usize,
    sample: usize,
    mean_wait: f64,
    rng: &mut R,
) -> Result<Vec<CompactEvent>, GeneratorError> {
    let cardinality = states.cardinality();
    if cardinality == 0 {
        return Err(GeneratorError::EmptyStateSpace);
    }
    let waiting = Exp::new(1.0 / mean_wait)?;
    let mut events = Vec::with_capacity(n * sample);
    for id in 0..n {
        let mut time = 0.0;
        for _ in 0..sample {
            time += waiting.sample(rng);
            events.push(CompactEvent {
                id: id as i64,
                time,
                state: Some(rng.gen_range(0..cardinality)),
            });
        }
    }
    Ok(events)
}

/// Discrete-time Markov chain paths in Compact layout; the time of step `k` is `k`.
///
/// Initial states are uniform over the state space.
pub fn markov_chain<R: Rng>(
    states: &StateSpace,
    matrix: &TransitionMatrix,
    n: usize,
    timesteps: usize,
    rng: &mut R,
) -> Result<Vec<CompactEvent>, GeneratorError> {
    let samplers = row_samplers(states, matrix)?;
    let mut events = Vec::with_capacity(n * timesteps);
    for id in 0..n {
        if timesteps == 0 {
            break;
        }
        let mut state = rng.gen_range(0..states.cardinality());
        events.push(CompactEvent {
            id: id as i64,
            time: 0.0,
            state: Some(state),
        });
        for k in 1..timesteps {
            state = samplers[state].sample(rng);
            events.push(CompactEvent {
                id: id as i64,
                time: k as f64,
                state: Some(state),
            });
        }
    }
    Ok(events)
}

/// Markov chain paths observed at jittered times: step `k` happens at `k - U(0, 1)`.
///
/// Every entity starts with an observation at time zero (in Canonical layout a row with
/// `From == To`).
pub fn long_format<R: Rng>(
    states: &StateSpace,
    matrix: &TransitionMatrix,
    n: usize,
    timesteps: usize,
    format: DataFormat,
    rng: &mut R,
) -> Result<GeneratedEvents, GeneratorError> {
    let samplers = row_samplers(states, matrix)?;
    let mut compact = Vec::new();
    let mut canonical = Vec::new();
    for id in 0..n as i64 {
        let mut from = rng.gen_range(0..states.cardinality());
        match format {
            DataFormat::Compact => compact.push(CompactEvent {
                id,
                time: 0.0,
                state: Some(from),
            }),
            DataFormat::Canonical => canonical.push(CanonicalEvent {
                id,
                time: 0.0,
                from: Some(from),
                to: Some(from),
            }),
        }
        for k in 1..timesteps {
            let to = samplers[from].sample(rng);
            let time = k as f64 - rng.gen_range(0.0..1.0);
            match format {
                DataFormat::Compact => compact.push(CompactEvent {
                    id,
                    time,
                    state: Some(to),
                }),
                DataFormat::Canonical => canonical.push(CanonicalEvent {
                    id,
                    time,
                    from: Some(from),
                    to: Some(to),
                }),
            }
            from = to;
        }
    }
    Ok(match format {
        DataFormat::Compact => GeneratedEvents::Compact(compact),
        DataFormat::Canonical => GeneratedEvents::Canonical(canonical),
    })
}

/// Replicates scripted `(time, state)` paths; each replication of each path is a new entity.
pub fn deterministic(sequences: &[Vec<(f64, usize)>], replication_count: usize) -> Vec<CompactEvent> {
    let mut events = Vec::new();
    let mut id = 0i64;
    for _ in 0..replication_count {
        for sequence in sequences {
            events.extend(sequence.iter().map(|&(time, state)| CompactEvent {
                id,
                time,
                state: Some(state),
            }));
            id += 1;
        }
    }
    events
}

/// A snapshot of `n` state labels drawn uniformly.
pub fn portfolio_labels<R: Rng>(states: &StateSpace, n: usize, rng: &mut R) -> Vec<String> {
    let labels = states.state_labels();
    if labels.is_empty() {
        return Vec::new();
    }
    (0..n)
        .map(|_| labels[rng.gen_range(0..labels.len())].to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn absorbing() -> TransitionMatrix {
        TransitionMatrix::new(array![[0.5, 0.5], [0.0, 1.0]])
    }

    #[test]
    fn exponential_events_are_increasing_per_entity() {
        let mut rng = StdRng::seed_from_u64(7);
        let events = exponential_transitions(&StateSpace::generic(3), 4, 10, 2.0, &mut rng).unwrap();
        assert_eq!(events.len(), 40);
        for pair in events.windows(2) {
            if pair[0].id == pair[1].id {
                assert!(pair[1].time > pair[0].time);
            }
        }
        assert!(events.iter().all(|e| e.state.unwrap() < 3));
    }

    #[test]
    fn waiting_times_average_to_mean_wait() {
        let mut rng = StdRng::seed_from_u64(19);
        let events = exponential_transitions(&StateSpace::generic(2), 20_000, 1, 4.0, &mut rng).unwrap();
        let mean = events.iter().map(|e| e.time).sum::<f64>() / events.len() as f64;
        assert!((mean - 4.0).abs() < 0.15, "mean waiting time {mean}");
    }

    #[test]
    fn absorbing_state_is_never_left() {
        let mut rng = StdRng::seed_from_u64(11);
        let events = markov_chain(&StateSpace::generic(2), &absorbing(), 200, 6, &mut rng).unwrap();
        assert_eq!(events.len(), 1200);
        for pair in events.windows(2) {
            if pair[0].id == pair[1].id && pair[0].state == Some(1) {
                assert_eq!(pair[1].state, Some(1));
            }
        }
    }

    #[test]
    fn long_format_canonical_starts_with_initial_rows() {
        let mut rng = StdRng::seed_from_u64(3);
        let generated = long_format(
            &StateSpace::generic(2),
            &absorbing(),
            5,
            4,
            DataFormat::Canonical,
            &mut rng,
        )
        .unwrap();
        let GeneratedEvents::Canonical(events) = generated else {
            panic!("expected canonical events");
        };
        assert_eq!(events.len(), 20);
        for chunk in events.chunks(4) {
            assert_eq!(chunk[0].time, 0.0);
            assert_eq!(chunk[0].from, chunk[0].to);
            for (k, event) in chunk.iter().enumerate().skip(1) {
                assert!(event.time > k as f64 - 1.0 && event.time <= k as f64);
                assert_eq!(event.from, chunk[k - 1].to);
            }
        }
    }

    #[test]
    fn invalid_rows_are_rejected() {
        let broken = TransitionMatrix::new(array![[0.0, 0.0], [0.0, 1.0]]);
        let mut rng = StdRng::seed_from_u64(0);
        let err = markov_chain(&StateSpace::generic(2), &broken, 1, 2, &mut rng).unwrap_err();
        assert!(matches!(err, GeneratorError::InvalidRow { row: 0, .. }));
        let err = markov_chain(&StateSpace::generic(3), &absorbing(), 1, 2, &mut rng).unwrap_err();
        assert!(matches!(err, GeneratorError::ShapeMismatch { .. }));
    }

    #[test]
    fn deterministic_paths_are_replicated() {
        let paths = vec![vec![(0.0, 0), (1.0, 1)], vec![(0.0, 1), (0.5, 1), (1.0, 0)]];
        let events = deterministic(&paths, 3);
        assert_eq!(events.len(), 15);
        assert_eq!(events.last().unwrap().id, 5);
        assert_eq!(events[2], CompactEvent { id: 1, time: 0.0, state: Some(1) });
    }

    #[test]
    fn portfolio_labels_come_from_the_state_space() {
        let states = StateSpace::from_labels(["AAA", "BB", "D"]);
        let mut rng = StdRng::seed_from_u64(5);
        let labels = portfolio_labels(&states, 50, &mut rng);
        assert_eq!(labels.len(), 50);
        assert!(labels.iter().all(|l| ["AAA", "BB", "D"].contains(&l.as_str())));
    }
}
