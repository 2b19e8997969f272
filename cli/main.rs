#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]

use clap::{Parser, Subcommand, ValueEnum};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use std::process;

use transition_matrix::config::AnalysisConfig;
use transition_matrix::estimators::{AalenJohansenEstimator, CohortEstimator, SimpleEstimator};
use transition_matrix::matrix::FormatType;
use transition_matrix::preprocessing::events::{
    canonical_events, canonical_frame, compact_events, compact_frame, read_table, separator_for,
    text_column, transition_pairs, write_table,
};
use transition_matrix::preprocessing::generators::{GeneratedEvents, long_format};
use transition_matrix::preprocessing::{DataFormat, bin_timestamps};
use transition_matrix::{SetMethod, StateSpace, TransitionMatrix, TransitionMatrixSet};

type CliResult = Result<(), Box<dyn Error>>;

#[derive(Parser)]
#[command(
    name = "transition-matrix",
    about = "Estimate and analyse state transition matrices",
    long_about = "Estimates transition probability matrices from longitudinal event tables \
                 (cohort, Aalen-Johansen and simple estimators) and derives default curves \
                 from estimated matrices."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LayoutCli {
    Compact,
    Canonical,
}

#[derive(Subcommand)]
enum Commands {
    /// Cohort estimator over Compact (ID, Time, State) data
    #[command(about = "Run the cohort estimator (outputs: matrix set JSON)")]
    Cohort {
        /// Event table (.csv, or tab separated .tsv/.txt)
        #[arg(value_name = "EVENTS")]
        events: PathBuf,

        /// Analysis configuration (.toml); defaults apply when omitted
        #[arg(long)]
        config: Option<PathBuf>,

        /// Where to write the estimated matrix set as JSON
        #[arg(long)]
        output: Option<PathBuf>,

        /// Where to write the cohorted grid as CSV
        #[arg(long)]
        cohorted: Option<PathBuf>,
    },

    /// Aalen-Johansen estimator over Canonical (ID, Time, From, To) data
    #[command(about = "Run the Aalen-Johansen estimator (outputs: final matrix JSON)")]
    AalenJohansen {
        #[arg(value_name = "EVENTS")]
        events: PathBuf,

        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Single-period estimator over (ID, From, To) data
    #[command(about = "Run the simple estimator (outputs: matrix JSON)")]
    Simple {
        #[arg(value_name = "EVENTS")]
        events: PathBuf,

        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Validate and characterize a matrix stored as JSON
    Validate {
        #[arg(value_name = "MATRIX")]
        matrix: PathBuf,

        /// Tolerance for row sums
        #[arg(long, default_value = "1e-3")]
        accuracy: f64,
    },

    /// Default curves of a one-period matrix whose last state is absorbing
    #[command(about = "Derive default curves (outputs: curve CSV)")]
    Curves {
        #[arg(value_name = "MATRIX")]
        matrix: PathBuf,

        /// Number of periods to project
        #[arg(long, value_name = "N")]
        periods: usize,

        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Simulate event data from a one-period matrix
    #[command(about = "Simulate a Markov chain dataset (outputs: event table)")]
    Generate {
        #[arg(value_name = "MATRIX")]
        matrix: PathBuf,

        #[arg(long, value_name = "N")]
        entities: usize,

        #[arg(long, value_name = "T")]
        timesteps: usize,

        #[arg(long, value_enum, default_value_t = LayoutCli::Compact)]
        layout: LayoutCli,

        #[arg(long, default_value = "42")]
        seed: u64,

        #[arg(long)]
        output: PathBuf,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Cohort {
            events,
            config,
            output,
            cohorted,
        } => run_cohort(&events, config.as_deref(), output.as_deref(), cohorted.as_deref()),
        Commands::AalenJohansen {
            events,
            config,
            output,
        } => run_aalen_johansen(&events, config.as_deref(), output.as_deref()),
        Commands::Simple {
            events,
            config,
            output,
        } => run_simple(&events, config.as_deref(), output.as_deref()),
        Commands::Validate { matrix, accuracy } => run_validate(&matrix, accuracy),
        Commands::Curves {
            matrix,
            periods,
            output,
        } => run_curves(&matrix, periods, output.as_deref()),
        Commands::Generate {
            matrix,
            entities,
            timesteps,
            layout,
            seed,
            output,
        } => run_generate(&matrix, entities, timesteps, layout, seed, &output),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn load_config(path: Option<&Path>) -> Result<AnalysisConfig, Box<dyn Error>> {
    match path {
        Some(path) => Ok(AnalysisConfig::load(path)?),
        None => Ok(AnalysisConfig::default()),
    }
}

/// The configured state space, or one inferred from the union of the given columns.
fn resolve_states(
    config: &AnalysisConfig,
    df: &polars::prelude::DataFrame,
    columns: &[&str],
) -> Result<StateSpace, Box<dyn Error>> {
    if let Some(states) = config.states.build()? {
        return Ok(states);
    }
    let mut values = Vec::new();
    for column in columns {
        values.extend(text_column(df, column)?.into_iter().flatten());
    }
    let inferred = config.states.complete(StateSpace::infer(&values))?;
    println!("{}", inferred.describe());
    Ok(inferred)
}

fn report_dataset(states: &StateSpace, df: &polars::prelude::DataFrame, columns: &[&str]) -> CliResult {
    let mut values = Vec::new();
    for column in columns {
        values.extend(text_column(df, column)?.into_iter().flatten());
    }
    let check = states.validate_dataset(&values);
    println!("{}", check.message);
    Ok(())
}

fn write_output(path: Option<&Path>, payload: &str) -> CliResult {
    if let Some(path) = path {
        fs::write(path, payload)?;
        println!("Results written to {}", path.display());
    }
    Ok(())
}

fn run_cohort(
    events_path: &Path,
    config_path: Option<&Path>,
    output: Option<&Path>,
    cohorted_output: Option<&Path>,
) -> CliResult {
    let config = load_config(config_path)?;
    let df = read_table(events_path, separator_for(events_path))?;
    let columns = [config.columns.state.as_str()];
    let states = resolve_states(&config, &df, &columns)?;
    report_dataset(&states, &df, &columns)?;
    let events = compact_events(&df, &config.columns, &states)?;
    let estimator = CohortEstimator::new(states, config.confidence)?;

    let estimate = match config.cohort_spec()? {
        Some(spec) => {
            let data = bin_timestamps(&events, &spec, config.remove_stale)?;
            if let Some(path) = cohorted_output {
                data.write_csv(fs::File::create(path)?)?;
            }
            estimator.fit(&data)?
        }
        None => {
            // time column already holds cohort points
            let cohorts = events
                .iter()
                .filter(|e| e.is_valid())
                .map(|e| e.time.floor() as usize)
                .max()
                .unwrap_or(0);
            estimator.fit_compact(&events, cohorts)?
        }
    };

    for k in 0..estimate.cohorts() {
        print!("{}", estimate.summary(k)?);
    }
    println!("Average matrix:\n{}", estimate.average_matrix());
    let mut matrices = estimate.matrix_set().clone();
    let validation = matrices.validate(config.accuracy);
    if !validation.is_valid() {
        log::warn!("Some estimated periods are not stochastic (empty states or sparse data)");
    }
    write_output(output, &matrices.to_json(Some(6))?)
}

fn run_aalen_johansen(
    events_path: &Path,
    config_path: Option<&Path>,
    output: Option<&Path>,
) -> CliResult {
    let config = load_config(config_path)?;
    let df = read_table(events_path, separator_for(events_path))?;
    let columns = [config.columns.from.as_str(), config.columns.to.as_str()];
    let states = resolve_states(&config, &df, &columns)?;
    report_dataset(&states, &df, &columns)?;
    let events = canonical_events(&df, &config.columns, &states)?;
    let estimate = AalenJohansenEstimator::new(states)?.fit(&events)?;
    if estimate.timepoints() == 0 {
        return Err("No usable events in the input table.".into());
    }
    print!("{}", estimate.summary(estimate.timepoints() - 1)?);
    write_output(output, &estimate.final_matrix().to_json(Some(6))?)
}

fn run_simple(events_path: &Path, config_path: Option<&Path>, output: Option<&Path>) -> CliResult {
    let config = load_config(config_path)?;
    let df = read_table(events_path, separator_for(events_path))?;
    let columns = [config.columns.from.as_str(), config.columns.to.as_str()];
    let states = resolve_states(&config, &df, &columns)?;
    let pairs = transition_pairs(&df, &config.columns, &states)?;
    let estimate = SimpleEstimator::new(states, config.confidence)?.fit(&pairs)?;
    print!("{}", estimate.summary());
    print!("{}", estimate.format_counts());
    write_output(output, &estimate.matrix().to_json(Some(6))?)
}

fn run_validate(path: &Path, accuracy: f64) -> CliResult {
    let mut matrix = TransitionMatrix::read_json(path)?;
    let validation = matrix.validate(accuracy);
    if validation.is_valid() {
        println!("Matrix is a valid transition matrix ({})", matrix.characterize());
        return Ok(());
    }
    for message in validation.messages() {
        println!("{message}");
    }
    Err(format!("{} validation problems found", validation.messages().len()).into())
}

fn run_curves(path: &Path, periods: usize, output: Option<&Path>) -> CliResult {
    let matrix = TransitionMatrix::read_json(path)?;
    let set = TransitionMatrixSet::from_matrix(&matrix, periods, SetMethod::Power)?;
    let curves = set.default_curve_set()?;
    print!("{}", curves.format(FormatType::Percent, 2));
    if let Some(path) = output {
        curves.write_csv(fs::File::create(path)?)?;
        println!("Results written to {}", path.display());
    }
    Ok(())
}

fn run_generate(
    path: &Path,
    entities: usize,
    timesteps: usize,
    layout: LayoutCli,
    seed: u64,
    output: &Path,
) -> CliResult {
    let matrix = TransitionMatrix::read_json(path)?;
    let states = StateSpace::generic(matrix.dimension());
    let format = match layout {
        LayoutCli::Compact => DataFormat::Compact,
        LayoutCli::Canonical => DataFormat::Canonical,
    };
    let mut rng = StdRng::seed_from_u64(seed);
    let mut df = match long_format(&states, &matrix, entities, timesteps, format, &mut rng)? {
        GeneratedEvents::Compact(events) => compact_frame(&events)?,
        GeneratedEvents::Canonical(events) => canonical_frame(&events)?,
    };
    write_table(&mut df, output, separator_for(output))?;
    println!("{} events written to {}", df.height(), output.display());
    Ok(())
}
