//! Single-period transition matrix.

use crate::linalg::{self, NumericError};
use ndarray::{Array2, ArrayView2, Axis};
use std::fmt;
use std::ops::{Index, IndexMut};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MatrixError {
    #[error("Numerical failure: {0}")]
    Numeric(#[from] NumericError),
    #[error("Matrix must be square for this operation, found {rows}x{cols}.")]
    NotSquare { rows: usize, cols: usize },
    #[error("Shapes {left:?} and {right:?} are not aligned for multiplication.")]
    ShapeMismatch {
        left: (usize, usize),
        right: (usize, usize),
    },
    #[error("Row {row} has {found} entries, expected {expected}.")]
    RaggedRows {
        row: usize,
        expected: usize,
        found: usize,
    },
    #[error("State {state} is outside a matrix of dimension {dimension}.")]
    StateOutOfRange { state: usize, dimension: usize },
}

/// A single validation finding. Kinds are reported in the order they are checked.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationMessage {
    DimensionsDiffer { rows: usize, cols: usize },
    NegativeProbability { row: usize, col: usize, value: f64 },
    ProbabilityLargerThanOne { row: usize, col: usize, value: f64 },
    RowsumNotOne { row: usize, sum: f64 },
}

impl ValidationMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            ValidationMessage::DimensionsDiffer { .. } => "Matrix Dimensions Differ",
            ValidationMessage::NegativeProbability { .. } => "Negative Probabilities",
            ValidationMessage::ProbabilityLargerThanOne { .. } => "Probabilities Larger than 1",
            ValidationMessage::RowsumNotOne { .. } => "Rowsum not equal to one",
        }
    }
}

impl fmt::Display for ValidationMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationMessage::DimensionsDiffer { rows, cols } => {
                write!(f, "{}: ({rows}, {cols})", self.kind())
            }
            ValidationMessage::NegativeProbability { row, col, value }
            | ValidationMessage::ProbabilityLargerThanOne { row, col, value } => {
                write!(f, "{}: ({row}, {col}, {value})", self.kind())
            }
            ValidationMessage::RowsumNotOne { row, sum } => {
                write!(f, "{}: ({row}, {sum})", self.kind())
            }
        }
    }
}

/// Outcome of validating a matrix: either valid, or every violation found.
#[derive(Debug, Clone, PartialEq)]
pub enum Validation {
    Valid,
    Invalid(Vec<ValidationMessage>),
}

impl Validation {
    pub fn is_valid(&self) -> bool {
        matches!(self, Validation::Valid)
    }

    pub fn messages(&self) -> &[ValidationMessage] {
        match self {
            Validation::Valid => &[],
            Validation::Invalid(messages) => messages,
        }
    }

    fn from_messages(messages: Vec<ValidationMessage>) -> Self {
        if messages.is_empty() {
            Validation::Valid
        } else {
            Validation::Invalid(messages)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Characterization {
    DiagonallyDominant,
    NotDiagonallyDominant,
    NotValidated,
}

impl fmt::Display for Characterization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Characterization::DiagonallyDominant => "Diagonally Dominant",
            Characterization::NotDiagonallyDominant => "Not Diagonally Dominant",
            Characterization::NotValidated => "Not a validated matrix. Use matrix.validate()",
        };
        f.write_str(text)
    }
}

/// How probability mass directed at a removed state is redistributed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RemovalMethod {
    /// Proportional redistribution over the remaining columns.
    #[default]
    NonInformative,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FormatType {
    #[default]
    Standard,
    Percent,
}

/// Formats one value with `decimals` digits; `Percent` multiplies by 100 and appends `%`.
pub(crate) fn format_value(value: f64, format: FormatType, decimals: usize) -> String {
    match format {
        FormatType::Standard => format!("{value:.decimals$}"),
        FormatType::Percent => format!("{:.decimals$}%", 100.0 * value),
    }
}

/// A (normally square) matrix of transition probabilities.
///
/// The `validated` flag is only set by [`TransitionMatrix::validate`] and is cleared by every
/// mutating operation.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionMatrix {
    values: Array2<f64>,
    validated: bool,
}

impl Default for TransitionMatrix {
    fn default() -> Self {
        Self::identity(2)
    }
}

impl TransitionMatrix {
    pub fn new(values: Array2<f64>) -> Self {
        Self {
            values,
            validated: false,
        }
    }

    pub fn identity(dimension: usize) -> Self {
        Self::new(Array2::eye(dimension))
    }

    /// Build from row vectors. All rows must have the same length.
    pub fn from_rows(rows: &[Vec<f64>]) -> Result<Self, MatrixError> {
        let n_rows = rows.len();
        let n_cols = rows.first().map_or(0, Vec::len);
        let mut values = Array2::<f64>::zeros((n_rows, n_cols));
        for (i, row) in rows.iter().enumerate() {
            if row.len() != n_cols {
                return Err(MatrixError::RaggedRows {
                    row: i,
                    expected: n_cols,
                    found: row.len(),
                });
            }
            for (j, &value) in row.iter().enumerate() {
                values[[i, j]] = value;
            }
        }
        Ok(Self::new(values))
    }

    pub fn values(&self) -> ArrayView2<'_, f64> {
        self.values.view()
    }

    pub fn into_inner(self) -> Array2<f64> {
        self.values
    }

    pub fn to_rows(&self) -> Vec<Vec<f64>> {
        self.values.outer_iter().map(|row| row.to_vec()).collect()
    }

    /// Number of rows.
    pub fn dimension(&self) -> usize {
        self.values.nrows()
    }

    pub fn shape(&self) -> (usize, usize) {
        self.values.dim()
    }

    pub fn is_square(&self) -> bool {
        self.values.nrows() == self.values.ncols()
    }

    pub fn is_validated(&self) -> bool {
        self.validated
    }

    fn ensure_square(&self) -> Result<usize, MatrixError> {
        let (rows, cols) = self.values.dim();
        if rows != cols {
            return Err(MatrixError::NotSquare { rows, cols });
        }
        Ok(rows)
    }

    /// Checks squareness, entries in `[0, 1]`, and row sums within `accuracy` of one.
    ///
    /// Non-squareness short-circuits the remaining checks. Every violation of the other kinds
    /// is collected.
    pub fn check(&self, accuracy: f64) -> Validation {
        let (rows, cols) = self.values.dim();
        if rows != cols {
            return Validation::Invalid(vec![ValidationMessage::DimensionsDiffer { rows, cols }]);
        }
        let mut messages = Vec::new();
        for ((row, col), &value) in self.values.indexed_iter() {
            if value < 0.0 {
                messages.push(ValidationMessage::NegativeProbability { row, col, value });
            }
            if value > 1.0 {
                messages.push(ValidationMessage::ProbabilityLargerThanOne { row, col, value });
            }
        }
        for (row, sum) in self.values.sum_axis(Axis(1)).iter().enumerate() {
            if (sum - 1.0).abs() > accuracy || !sum.is_finite() {
                messages.push(ValidationMessage::RowsumNotOne { row, sum: *sum });
            }
        }
        Validation::from_messages(messages)
    }

    /// Same checks as [`TransitionMatrix::check`]; records the outcome in the validated flag.
    pub fn validate(&mut self, accuracy: f64) -> Validation {
        let outcome = self.check(accuracy);
        self.validated = outcome.is_valid();
        outcome
    }

    /// Generator `logm(M) / t`.
    ///
    /// With `fix_negative`, each negative off-diagonal rate is flipped to its absolute value and
    /// the diagonal of that row is lowered by twice the flipped amount so the row still sums to
    /// zero. This is a best-effort repair of sampling noise, not a unique embedding.
    pub fn generator(&self, t: f64, fix_negative: bool) -> Result<Array2<f64>, MatrixError> {
        self.ensure_square()?;
        let mut generator = linalg::logm(&self.values)? / t;
        if fix_negative {
            let n = generator.nrows();
            for i in 0..n {
                for j in 0..n {
                    if i != j && generator[[i, j]] < 0.0 {
                        let flipped = -generator[[i, j]];
                        generator[[i, j]] = flipped;
                        generator[[i, i]] -= 2.0 * flipped;
                    }
                }
            }
        }
        Ok(generator)
    }

    /// Transition matrix `expm(t * G)` for a generator `G`.
    pub fn exponential(generator: &Array2<f64>, t: f64) -> Result<Self, MatrixError> {
        let scaled = generator * t;
        Ok(Self::new(linalg::expm(&scaled)?))
    }

    /// `M^n` by repeated multiplication; `n == 0` gives the identity.
    pub fn power(&self, n: u32) -> Result<Self, MatrixError> {
        self.ensure_square()?;
        Ok(Self::new(linalg::matrix_power(&self.values, n)?))
    }

    pub fn scale(&self, factor: f64) -> Self {
        Self::new(&self.values * factor)
    }

    pub fn dot(&self, other: &TransitionMatrix) -> Result<Self, MatrixError> {
        let left = self.values.dim();
        let right = other.values.dim();
        if left.1 != right.0 {
            return Err(MatrixError::ShapeMismatch { left, right });
        }
        Ok(Self::new(self.values.dot(&other.values)))
    }

    /// Inverse, refusing singular or ill-conditioned input.
    pub fn inverse(&self) -> Result<Self, MatrixError> {
        self.ensure_square()?;
        Ok(Self::new(linalg::checked_inverse(&self.values)?))
    }

    /// Sets each diagonal entry so that its row sums exactly to one.
    pub fn fix_rowsums(&mut self) -> Result<(), MatrixError> {
        let n = self.ensure_square()?;
        for i in 0..n {
            let off_diagonal: f64 = (0..n)
                .filter(|&j| j != i)
                .map(|j| self.values[[i, j]])
                .sum();
            self.values[[i, i]] = 1.0 - off_diagonal;
        }
        self.validated = false;
        Ok(())
    }

    /// Zeroes negative entries and adds their sum onto the row's largest remaining entry,
    /// leaving row sums unchanged.
    pub fn fix_negative_rates(&mut self) {
        for mut row in self.values.rows_mut() {
            let negative_sum: f64 = row.iter().filter(|v| **v < 0.0).sum();
            if negative_sum == 0.0 {
                continue;
            }
            row.mapv_inplace(|v| v.max(0.0));
            let argmax = row
                .iter()
                .enumerate()
                .fold((0usize, f64::NEG_INFINITY), |(best, max), (j, &v)| {
                    if v > max { (j, v) } else { (best, max) }
                })
                .0;
            row[argmax] += negative_sum;
        }
        self.validated = false;
    }

    /// Removes `state`, redistributing each remaining row's mass towards it over the other
    /// columns: `new[i, j] = old[i, j] / (1 - xp)` with `xp = old[i, state]`.
    ///
    /// A row whose entire mass points at the removed state (`xp == 1`) carries no information
    /// about the remaining states and becomes the identity row of the reduced matrix.
    pub fn remove(&self, state: usize, method: RemovalMethod) -> Result<Self, MatrixError> {
        let n = self.ensure_square()?;
        if state >= n {
            return Err(MatrixError::StateOutOfRange {
                state,
                dimension: n,
            });
        }
        let kept: Vec<usize> = (0..n).filter(|&i| i != state).collect();
        let mut reduced = Array2::<f64>::zeros((n - 1, n - 1));
        match method {
            RemovalMethod::NonInformative => {
                for (new_i, &i) in kept.iter().enumerate() {
                    let xp = self.values[[i, state]];
                    if (1.0 - xp).abs() <= f64::EPSILON {
                        log::warn!(
                            "Row {i} moves with certainty into removed state {state}; replaced by an identity row"
                        );
                        reduced[[new_i, new_i]] = 1.0;
                        continue;
                    }
                    let factor = 1.0 + xp / (1.0 - xp);
                    for (new_j, &j) in kept.iter().enumerate() {
                        reduced[[new_i, new_j]] = self.values[[i, j]] * factor;
                    }
                }
            }
        }
        Ok(Self::new(reduced))
    }

    /// Diagonal dominance (every diagonal entry at least 0.5). Requires a prior successful
    /// [`TransitionMatrix::validate`].
    pub fn characterize(&self) -> Characterization {
        if !self.validated {
            return Characterization::NotValidated;
        }
        if self.values.diag().iter().all(|&d| d >= 0.5) {
            Characterization::DiagonallyDominant
        } else {
            Characterization::NotDiagonallyDominant
        }
    }

    pub fn format(&self, format: FormatType, decimals: usize) -> String {
        let mut out = String::new();
        for row in self.values.outer_iter() {
            let line: Vec<String> = row
                .iter()
                .map(|&v| format_value(v, format, decimals))
                .collect();
            out.push_str(&line.join(" "));
            out.push('\n');
        }
        out
    }
}

impl From<Array2<f64>> for TransitionMatrix {
    fn from(values: Array2<f64>) -> Self {
        Self::new(values)
    }
}

impl Index<(usize, usize)> for TransitionMatrix {
    type Output = f64;

    fn index(&self, (i, j): (usize, usize)) -> &f64 {
        &self.values[[i, j]]
    }
}

impl IndexMut<(usize, usize)> for TransitionMatrix {
    fn index_mut(&mut self, (i, j): (usize, usize)) -> &mut f64 {
        self.validated = false;
        &mut self.values[[i, j]]
    }
}

impl fmt::Display for TransitionMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format(FormatType::Standard, 4))
    }
}
