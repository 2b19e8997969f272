use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use transition_matrix::estimators::{AalenJohansenEstimator, CohortEstimator};
use transition_matrix::preprocessing::generators::{GeneratedEvents, long_format, markov_chain};
use transition_matrix::preprocessing::{CohortSpec, DataFormat, bin_timestamps};
use transition_matrix::{StateSpace, TransitionMatrix};

/// A random row-stochastic matrix with an absorbing last state.
fn random_matrix(states: usize, rng: &mut StdRng) -> TransitionMatrix {
    let mut values = Array2::from_shape_fn((states, states), |_| rng.gen_range(0.01..1.0));
    for i in 0..states {
        if i + 1 == states {
            values.row_mut(i).fill(0.0);
            values[[i, i]] = 1.0;
        } else {
            let mut row = values.row_mut(i);
            let sum = row.sum();
            row.mapv_inplace(|v| v / sum);
        }
    }
    TransitionMatrix::new(values)
}

fn benchmark_aalen_johansen(c: &mut Criterion) {
    let mut group = c.benchmark_group("aalen_johansen");
    for &states in &[3_usize, 8, 16] {
        let mut rng = StdRng::seed_from_u64(0x5EED + states as u64);
        let space = StateSpace::generic(states);
        let matrix = random_matrix(states, &mut rng);
        let GeneratedEvents::Canonical(events) =
            long_format(&space, &matrix, 2_000, 6, DataFormat::Canonical, &mut rng)
                .expect("generate events")
        else {
            unreachable!("canonical layout requested");
        };
        let estimator = AalenJohansenEstimator::new(space).expect("estimator");
        group.throughput(Throughput::Elements(events.len() as u64));
        group.bench_with_input(BenchmarkId::new("fit", states), &events, |b, input| {
            b.iter(|| {
                let estimate = estimator.fit(black_box(input)).expect("fit");
                black_box(estimate);
            });
        });
    }
    group.finish();
}

fn benchmark_cohort(c: &mut Criterion) {
    let mut group = c.benchmark_group("cohort");
    for &entities in &[1_000_usize, 10_000] {
        let mut rng = StdRng::seed_from_u64(0xC0 + entities as u64);
        let space = StateSpace::generic(8);
        let matrix = random_matrix(8, &mut rng);
        let events = markov_chain(&space, &matrix, entities, 9, &mut rng).expect("generate events");
        let estimator = CohortEstimator::new(space, None).expect("estimator");
        group.throughput(Throughput::Elements(events.len() as u64));
        group.bench_with_input(BenchmarkId::new("bin_and_fit", entities), &events, |b, input| {
            b.iter(|| {
                let data = bin_timestamps(black_box(input), &CohortSpec::Count(8), false)
                    .expect("bin");
                let estimate = estimator.fit(&data).expect("fit");
                black_box(estimate);
            });
        });
    }
    group.finish();
}

criterion_group!(estimators, benchmark_aalen_johansen, benchmark_cohort);
criterion_main!(estimators);
