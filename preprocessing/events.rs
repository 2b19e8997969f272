//! Event records and their extraction from delimited tables.

use crate::state_space::{DatasetValidation, StateSpace};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DataError {
    #[error("Error from the underlying Polars library: {0}")]
    Polars(#[from] PolarsError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("The required column '{0}' was not found in the input table.")]
    ColumnNotFound(String),
    #[error(
        "Column '{column_name}' could not be converted to the expected type '{expected_type}'. (Found type: {found_type})"
    )]
    ColumnWrongType {
        column_name: String,
        expected_type: &'static str,
        found_type: String,
    },
}

/// Maps the canonical column names onto the names used by a dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnLabels {
    pub id: String,
    pub time: String,
    pub state: String,
    pub from: String,
    pub to: String,
}

impl Default for ColumnLabels {
    fn default() -> Self {
        Self {
            id: "ID".to_string(),
            time: "Time".to_string(),
            state: "State".to_string(),
            from: "From".to_string(),
            to: "To".to_string(),
        }
    }
}

/// Layout of an event table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataFormat {
    /// One row per observation: `(ID, Time, State)`.
    Compact,
    /// One row per transition: `(ID, Time, From, To)`.
    Canonical,
}

/// One observation of an entity. A `None` state marks a value that could not be resolved
/// against the state space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompactEvent {
    pub id: i64,
    pub time: f64,
    pub state: Option<usize>,
}

impl CompactEvent {
    pub fn is_valid(&self) -> bool {
        self.state.is_some() && self.time.is_finite()
    }
}

/// One observed transition of an entity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CanonicalEvent {
    pub id: i64,
    pub time: f64,
    pub from: Option<usize>,
    pub to: Option<usize>,
}

impl CanonicalEvent {
    pub fn is_valid(&self) -> bool {
        self.from.is_some() && self.to.is_some() && self.time.is_finite()
    }
}

/// A single-period transition `(ID, From, To)` without timing information.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionPair {
    pub id: i64,
    pub from: Option<usize>,
    pub to: Option<usize>,
}

impl From<&CanonicalEvent> for TransitionPair {
    fn from(event: &CanonicalEvent) -> Self {
        Self {
            id: event.id,
            from: event.from,
            to: event.to,
        }
    }
}

/// Load a delimited text table with a header row.
pub fn read_table(path: &Path, separator: u8) -> Result<DataFrame, DataError> {
    let file = File::open(path)?;
    let df = CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(None)
        .map_parse_options(|options| options.with_separator(separator))
        .into_reader_with_file_handle(file)
        .finish()?;
    log::info!(
        "Loaded {} rows and {} columns from '{}'",
        df.height(),
        df.width(),
        path.display()
    );
    Ok(df)
}

/// Separator guessed from the file extension: tab for `.tsv`/`.txt`, comma otherwise.
pub fn separator_for(path: &Path) -> u8 {
    match path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .as_deref()
    {
        Some("tsv") | Some("txt") => b'\t',
        _ => b',',
    }
}

fn column<'a>(df: &'a DataFrame, name: &str) -> Result<&'a Column, DataError> {
    df.column(name)
        .map_err(|_| DataError::ColumnNotFound(name.to_string()))
}

fn id_column(df: &DataFrame, name: &str) -> Result<Vec<Option<i64>>, DataError> {
    let series = column(df, name)?;
    let casted = series
        .cast(&DataType::Int64)
        .map_err(|_| DataError::ColumnWrongType {
            column_name: name.to_string(),
            expected_type: "integer",
            found_type: series.dtype().to_string(),
        })?;
    Ok(casted.i64()?.into_iter().collect())
}

fn time_column(df: &DataFrame, name: &str) -> Result<Vec<f64>, DataError> {
    let series = column(df, name)?;
    let casted = series
        .cast(&DataType::Float64)
        .map_err(|_| DataError::ColumnWrongType {
            column_name: name.to_string(),
            expected_type: "f64 (numeric)",
            found_type: series.dtype().to_string(),
        })?;
    Ok(casted
        .f64()?
        .into_iter()
        .map(|v| v.unwrap_or(f64::NAN))
        .collect())
}

/// Raw values of a column as text; nulls are `None`.
pub fn text_column(df: &DataFrame, name: &str) -> Result<Vec<Option<String>>, DataError> {
    let series = column(df, name)?;
    let casted = series
        .cast(&DataType::String)
        .map_err(|_| DataError::ColumnWrongType {
            column_name: name.to_string(),
            expected_type: "string",
            found_type: series.dtype().to_string(),
        })?;
    Ok(casted
        .str()?
        .into_iter()
        .map(|v| v.map(str::to_string))
        .collect())
}

fn state_column(
    df: &DataFrame,
    name: &str,
    states: &StateSpace,
) -> Result<Vec<Option<usize>>, DataError> {
    Ok(text_column(df, name)?
        .into_iter()
        .map(|v| v.and_then(|raw| states.index_of(&raw)))
        .collect())
}

fn warn_dropped_ids(dropped: usize, column: &str) {
    if dropped > 0 {
        log::warn!("Dropped {dropped} rows with a missing or non-integer '{column}' value");
    }
}

/// Extract Compact events. Rows without a usable ID are dropped; unresolvable states and times
/// are kept as invalid events so estimators can count them.
pub fn compact_events(
    df: &DataFrame,
    labels: &ColumnLabels,
    states: &StateSpace,
) -> Result<Vec<CompactEvent>, DataError> {
    let ids = id_column(df, &labels.id)?;
    let times = time_column(df, &labels.time)?;
    let state_values = state_column(df, &labels.state, states)?;

    let mut dropped = 0usize;
    let events: Vec<CompactEvent> = ids
        .into_iter()
        .zip(times)
        .zip(state_values)
        .filter_map(|((id, time), state)| match id {
            Some(id) => Some(CompactEvent { id, time, state }),
            None => {
                dropped += 1;
                None
            }
        })
        .collect();
    warn_dropped_ids(dropped, &labels.id);
    Ok(events)
}

/// Extract Canonical events, with the same row policy as [`compact_events`].
pub fn canonical_events(
    df: &DataFrame,
    labels: &ColumnLabels,
    states: &StateSpace,
) -> Result<Vec<CanonicalEvent>, DataError> {
    let ids = id_column(df, &labels.id)?;
    let times = time_column(df, &labels.time)?;
    let from = state_column(df, &labels.from, states)?;
    let to = state_column(df, &labels.to, states)?;

    let mut dropped = 0usize;
    let events: Vec<CanonicalEvent> = ids
        .into_iter()
        .zip(times)
        .zip(from.into_iter().zip(to))
        .filter_map(|((id, time), (from, to))| match id {
            Some(id) => Some(CanonicalEvent { id, time, from, to }),
            None => {
                dropped += 1;
                None
            }
        })
        .collect();
    warn_dropped_ids(dropped, &labels.id);
    Ok(events)
}

/// Extract `(ID, From, To)` pairs; the time column is not required.
pub fn transition_pairs(
    df: &DataFrame,
    labels: &ColumnLabels,
    states: &StateSpace,
) -> Result<Vec<TransitionPair>, DataError> {
    let ids = id_column(df, &labels.id)?;
    let from = state_column(df, &labels.from, states)?;
    let to = state_column(df, &labels.to, states)?;

    let mut dropped = 0usize;
    let pairs: Vec<TransitionPair> = ids
        .into_iter()
        .zip(from.into_iter().zip(to))
        .filter_map(|(id, (from, to))| match id {
            Some(id) => Some(TransitionPair { id, from, to }),
            None => {
                dropped += 1;
                None
            }
        })
        .collect();
    warn_dropped_ids(dropped, &labels.id);
    Ok(pairs)
}

/// Compare the values of one state column with a state space.
pub fn validate_states(
    df: &DataFrame,
    column_name: &str,
    states: &StateSpace,
) -> Result<DatasetValidation, DataError> {
    let values = text_column(df, column_name)?;
    Ok(states.validate_dataset(values.iter().flatten()))
}

/// State space inferred from the distinct values of one column.
pub fn infer_state_space(df: &DataFrame, column_name: &str) -> Result<StateSpace, DataError> {
    let values = text_column(df, column_name)?;
    Ok(StateSpace::infer(values.iter().flatten()))
}

fn state_series(name: &str, values: impl Iterator<Item = Option<usize>>) -> Column {
    let values: Vec<Option<i64>> = values.map(|s| s.map(|s| s as i64)).collect();
    Series::new(name.into(), values).into()
}

/// Compact events as a frame with columns `ID`, `Time`, `State` (state indices).
pub fn compact_frame(events: &[CompactEvent]) -> Result<DataFrame, DataError> {
    Ok(DataFrame::new(vec![
        Series::new("ID".into(), events.iter().map(|e| e.id).collect::<Vec<_>>()).into(),
        Series::new("Time".into(), events.iter().map(|e| e.time).collect::<Vec<_>>()).into(),
        state_series("State", events.iter().map(|e| e.state)),
    ])?)
}

/// Canonical events as a frame with columns `ID`, `Time`, `From`, `To` (state indices).
pub fn canonical_frame(events: &[CanonicalEvent]) -> Result<DataFrame, DataError> {
    Ok(DataFrame::new(vec![
        Series::new("ID".into(), events.iter().map(|e| e.id).collect::<Vec<_>>()).into(),
        Series::new("Time".into(), events.iter().map(|e| e.time).collect::<Vec<_>>()).into(),
        state_series("From", events.iter().map(|e| e.from)),
        state_series("To", events.iter().map(|e| e.to)),
    ])?)
}

/// Write a frame as delimited text with a header row.
pub fn write_table(df: &mut DataFrame, path: &Path, separator: u8) -> Result<(), DataError> {
    let mut file = File::create(path)?;
    CsvWriter::new(&mut file)
        .include_header(true)
        .with_separator(separator)
        .finish(df)?;
    Ok(())
}
