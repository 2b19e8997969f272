//! Multi-period families of transition matrices.

use crate::credit_curve::{CreditCurve, hazard_rate};
use crate::matrix::{
    FormatType, MatrixError, RemovalMethod, TransitionMatrix, Validation, ValidationMessage,
};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MatrixSetError {
    #[error("Matrix operation failed: {0}")]
    Matrix(#[from] MatrixError),
    #[error("A transition matrix set needs at least one entry.")]
    Empty,
    #[error("Entry {period} has shape {found:?}, expected {expected:?}.")]
    ShapeMismatch {
        period: usize,
        expected: (usize, usize),
        found: (usize, usize),
    },
    #[error("{periods} period markers were given for {entries} entries.")]
    PeriodCountMismatch { entries: usize, periods: usize },
    #[error("Operation requires a {expected} set, but this set is {found}.")]
    WrongTemporalType {
        expected: TemporalType,
        found: TemporalType,
    },
    #[error("Rating {rating} is outside a state space of dimension {dimension}.")]
    RatingOutOfRange { rating: usize, dimension: usize },
}

/// Meaning of the entries of a set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TemporalType {
    /// Entry `k` holds the one-period transitions applicable at step `k`.
    Incremental,
    /// Entry `k` holds the transitions from the start up to the end of period `k`.
    Cumulative,
}

impl fmt::Display for TemporalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TemporalType::Incremental => f.write_str("Incremental"),
            TemporalType::Cumulative => f.write_str("Cumulative"),
        }
    }
}

/// Strategy for building a set from a single one-period matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetMethod {
    /// The same matrix in every period; the set is incremental.
    Copy,
    /// Successive powers `M, M^2, ..., M^N`; the set is cumulative.
    Power,
}

/// Per-entry validation outcome of a set.
#[derive(Debug, Clone, PartialEq)]
pub enum SetValidation {
    Valid,
    Invalid(Vec<(usize, Vec<ValidationMessage>)>),
}

impl SetValidation {
    pub fn is_valid(&self) -> bool {
        matches!(self, SetValidation::Valid)
    }
}

/// Default curves of one starting rating, one value per period.
#[derive(Debug, Clone, PartialEq)]
pub struct DefaultCurves {
    pub incremental: Vec<f64>,
    pub cumulative: Vec<f64>,
    pub hazard: Vec<f64>,
    pub survival: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransitionMatrixSet {
    entries: Vec<TransitionMatrix>,
    temporal_type: TemporalType,
    periods: Vec<f64>,
    validated: bool,
}

fn default_periods(count: usize) -> Vec<f64> {
    (1..=count).map(|k| k as f64).collect()
}

impl TransitionMatrixSet {
    /// Wrap the given entries as-is. All entries must share one shape.
    pub fn from_entries(
        entries: Vec<TransitionMatrix>,
        temporal_type: TemporalType,
    ) -> Result<Self, MatrixSetError> {
        let expected = entries.first().ok_or(MatrixSetError::Empty)?.shape();
        for (period, entry) in entries.iter().enumerate() {
            if entry.shape() != expected {
                return Err(MatrixSetError::ShapeMismatch {
                    period,
                    expected,
                    found: entry.shape(),
                });
            }
        }
        let periods = default_periods(entries.len());
        Ok(Self {
            entries,
            temporal_type,
            periods,
            validated: false,
        })
    }

    /// Build `periods` entries from one matrix using the given strategy.
    pub fn from_matrix(
        matrix: &TransitionMatrix,
        periods: usize,
        method: SetMethod,
    ) -> Result<Self, MatrixSetError> {
        if periods == 0 {
            return Err(MatrixSetError::Empty);
        }
        match method {
            SetMethod::Copy => Self::from_entries(
                vec![TransitionMatrix::new(matrix.values().to_owned()); periods],
                TemporalType::Incremental,
            ),
            SetMethod::Power => {
                let mut entries = Vec::with_capacity(periods);
                let mut current = TransitionMatrix::new(matrix.values().to_owned());
                entries.push(current.clone());
                for _ in 1..periods {
                    current = current.dot(matrix)?;
                    entries.push(current.clone());
                }
                Self::from_entries(entries, TemporalType::Cumulative)
            }
        }
    }

    /// `periods` identity matrices of the given dimension, tagged incremental.
    pub fn identity(dimension: usize, periods: usize) -> Result<Self, MatrixSetError> {
        Self::from_matrix(&TransitionMatrix::identity(dimension), periods, SetMethod::Copy)
    }

    /// Replace the period markers (`1..=N` by default).
    pub fn with_periods(mut self, periods: Vec<f64>) -> Result<Self, MatrixSetError> {
        if periods.len() != self.entries.len() {
            return Err(MatrixSetError::PeriodCountMismatch {
                entries: self.entries.len(),
                periods: periods.len(),
            });
        }
        self.periods = periods;
        Ok(self)
    }

    pub fn entries(&self) -> &[TransitionMatrix] {
        &self.entries
    }

    pub fn entry(&self, period: usize) -> Option<&TransitionMatrix> {
        self.entries.get(period)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn temporal_type(&self) -> TemporalType {
        self.temporal_type
    }

    pub fn periods(&self) -> &[f64] {
        &self.periods
    }

    /// Shape shared by every entry.
    pub fn shape(&self) -> (usize, usize) {
        self.entries.first().map_or((0, 0), TransitionMatrix::shape)
    }

    pub fn is_validated(&self) -> bool {
        self.validated
    }

    /// Validates every entry; valid only if all entries are.
    pub fn validate(&mut self, accuracy: f64) -> SetValidation {
        let mut failures = Vec::new();
        for (period, entry) in self.entries.iter_mut().enumerate() {
            if let Validation::Invalid(messages) = entry.validate(accuracy) {
                failures.push((period, messages));
            }
        }
        self.validated = failures.is_empty();
        if self.validated {
            SetValidation::Valid
        } else {
            SetValidation::Invalid(failures)
        }
    }

    pub fn scale(&self, factor: f64) -> Self {
        Self {
            entries: self.entries.iter().map(|e| e.scale(factor)).collect(),
            temporal_type: self.temporal_type,
            periods: self.periods.clone(),
            validated: false,
        }
    }

    /// Incremental to cumulative conversion.
    ///
    /// Entry `k` of the result is the first incremental entry raised to the power `k + 1`, so the
    /// conversion is exact only for time-homogeneous sets (as built by [`SetMethod::Copy`]).
    /// Sets whose incremental entries differ are still converted this way, with a warning.
    pub fn cumulate(&self) -> Result<Self, MatrixSetError> {
        if self.temporal_type == TemporalType::Cumulative {
            log::info!("Transition matrix set is already cumulative");
            return Ok(self.clone());
        }
        let first = &self.entries[0];
        let homogeneous = self.entries.iter().all(|entry| {
            entry
                .values()
                .iter()
                .zip(first.values().iter())
                .all(|(a, b)| (a - b).abs() <= 1e-12)
        });
        if !homogeneous {
            log::warn!(
                "Cumulating a set with differing incremental entries; only the first entry is used"
            );
        }
        let cumulated = Self::from_matrix(first, self.entries.len(), SetMethod::Power)?;
        Ok(Self {
            periods: self.periods.clone(),
            ..cumulated
        })
    }

    /// Cumulative to incremental conversion, `entry[k] = inverse(cumulative[k-1]) * cumulative[k]`.
    ///
    /// Fails with a numeric error when a cumulative entry is singular or ill-conditioned rather
    /// than returning an unreliable inverse.
    pub fn incremental(&self) -> Result<Self, MatrixSetError> {
        if self.temporal_type == TemporalType::Incremental {
            log::info!("Transition matrix set is already incremental");
            return Ok(self.clone());
        }
        let mut entries = Vec::with_capacity(self.entries.len());
        entries.push(self.entries[0].clone());
        for window in self.entries.windows(2) {
            let previous_inverse = window[0].inverse()?;
            entries.push(previous_inverse.dot(&window[1])?);
        }
        Ok(Self {
            entries,
            temporal_type: TemporalType::Incremental,
            periods: self.periods.clone(),
            validated: false,
        })
    }

    /// Removes `state` from every entry.
    pub fn remove(&self, state: usize, method: RemovalMethod) -> Result<Self, MatrixSetError> {
        let entries = self
            .entries
            .iter()
            .map(|e| e.remove(state, method))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            entries,
            temporal_type: self.temporal_type,
            periods: self.periods.clone(),
            validated: false,
        })
    }

    fn ensure_cumulative(&self) -> Result<(), MatrixSetError> {
        if self.temporal_type != TemporalType::Cumulative {
            return Err(MatrixSetError::WrongTemporalType {
                expected: TemporalType::Cumulative,
                found: self.temporal_type,
            });
        }
        Ok(())
    }

    /// Default curves for a starting `rating`. The last state is taken as the absorbing
    /// default state.
    pub fn default_curves(&self, rating: usize) -> Result<DefaultCurves, MatrixSetError> {
        self.ensure_cumulative()?;
        let (dimension, cols) = self.shape();
        if rating >= dimension || cols == 0 {
            return Err(MatrixSetError::RatingOutOfRange { rating, dimension });
        }
        let default_state = cols - 1;
        let cumulative: Vec<f64> = self
            .entries
            .iter()
            .map(|e| e[(rating, default_state)])
            .collect();

        let mut incremental = Vec::with_capacity(cumulative.len());
        let mut hazard = Vec::with_capacity(cumulative.len());
        let mut previous = 0.0;
        for &current in &cumulative {
            incremental.push(current - previous);
            hazard.push(hazard_rate(previous, current));
            previous = current;
        }
        let survival = cumulative.iter().map(|c| 1.0 - c).collect();
        Ok(DefaultCurves {
            incremental,
            cumulative,
            hazard,
            survival,
        })
    }

    /// Cumulative default curves of every rating, one row per rating.
    pub fn default_curve_set(&self) -> Result<CreditCurve, MatrixSetError> {
        self.ensure_cumulative()?;
        let (dimension, _) = self.shape();
        let mut values = Array2::<f64>::zeros((dimension, self.entries.len()));
        for rating in 0..dimension {
            let curves = self.default_curves(rating)?;
            for (period, value) in curves.cumulative.into_iter().enumerate() {
                values[[rating, period]] = value;
            }
        }
        Ok(CreditCurve::new(values))
    }

    pub fn format(&self, format: FormatType, decimals: usize) -> String {
        let mut out = String::new();
        for (entry, period) in self.entries.iter().zip(&self.periods) {
            out.push_str(&format!("Period: {period}\n"));
            out.push_str(&entry.format(format, decimals));
            out.push('\n');
        }
        out
    }
}
