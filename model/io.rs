//! JSON and CSV persistence of matrices, matrix sets and credit curves.
//!
//! JSON payloads are nested lists (`[[row, ...], ...]` for a matrix, one such list per period
//! for a set). A single matrix in CSV is a plain numeric grid. A matrix set in CSV starts with
//! a header line `from_states,to_states,periods,tenor_1,...`, a line of the corresponding
//! values, and then `periods` stacked blocks of `from_states` rows each.

use crate::credit_curve::CreditCurve;
use crate::matrix::{MatrixError, TransitionMatrix};
use crate::matrix_set::{MatrixSetError, TemporalType, TransitionMatrixSet};
use ndarray::Array2;
use std::fs;
use std::io::Write;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("Failed to read or write file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid CSV payload: {0}")]
    Csv(#[from] csv::Error),
    #[error("Matrix payload is malformed: {0}")]
    Matrix(#[from] MatrixError),
    #[error("Matrix set payload is malformed: {0}")]
    MatrixSet(#[from] MatrixSetError),
    #[error("Matrix set CSV header is malformed: {0}")]
    Header(String),
    #[error("Could not parse '{value}' on line {line} as a number.")]
    Number { line: usize, value: String },
    #[error("Expected {expected} data rows after the header, found {found}.")]
    RowCount { expected: usize, found: usize },
}

/// Rounds to `decimals` places when requested.
pub fn round_to(value: f64, decimals: Option<u32>) -> f64 {
    match decimals {
        Some(d) => {
            let factor = 10f64.powi(d as i32);
            (value * factor).round() / factor
        }
        None => value,
    }
}

fn rounded_rows(values: &Array2<f64>, decimals: Option<u32>) -> Vec<Vec<f64>> {
    values
        .outer_iter()
        .map(|row| row.iter().map(|&v| round_to(v, decimals)).collect())
        .collect()
}

fn parse_number(field: &str, line: usize) -> Result<f64, PersistenceError> {
    field
        .trim()
        .parse::<f64>()
        .map_err(|_| PersistenceError::Number {
            line,
            value: field.to_string(),
        })
}

fn parse_count(field: &str, line: usize) -> Result<usize, PersistenceError> {
    let value = parse_number(field, line)?;
    if value < 0.0 || value.fract() != 0.0 {
        return Err(PersistenceError::Number {
            line,
            value: field.to_string(),
        });
    }
    Ok(value as usize)
}

fn read_numeric_records(
    mut reader: csv::Reader<impl std::io::Read>,
) -> Result<Vec<Vec<f64>>, PersistenceError> {
    let mut rows = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record?;
        let row = record
            .iter()
            .map(|field| parse_number(field, line + 1))
            .collect::<Result<Vec<_>, _>>()?;
        rows.push(row);
    }
    Ok(rows)
}

fn grid_reader<R: std::io::Read>(source: R) -> csv::Reader<R> {
    csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(source)
}

impl TransitionMatrix {
    pub fn to_json(&self, decimals: Option<u32>) -> Result<String, PersistenceError> {
        Ok(serde_json::to_string_pretty(&rounded_rows(
            &self.values().to_owned(),
            decimals,
        ))?)
    }

    pub fn from_json(payload: &str) -> Result<Self, PersistenceError> {
        let rows: Vec<Vec<f64>> = serde_json::from_str(payload)?;
        Ok(Self::from_rows(&rows)?)
    }

    pub fn write_json(&self, path: &Path, decimals: Option<u32>) -> Result<(), PersistenceError> {
        fs::write(path, self.to_json(decimals)?)?;
        Ok(())
    }

    pub fn read_json(path: &Path) -> Result<Self, PersistenceError> {
        Self::from_json(&fs::read_to_string(path)?)
    }

    pub fn write_csv<W: Write>(&self, sink: W) -> Result<(), PersistenceError> {
        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(sink);
        for row in self.values().outer_iter() {
            writer.write_record(row.iter().map(|v| v.to_string()))?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn read_csv<R: std::io::Read>(source: R) -> Result<Self, PersistenceError> {
        let rows = read_numeric_records(grid_reader(source))?;
        Ok(Self::from_rows(&rows)?)
    }
}

impl TransitionMatrixSet {
    pub fn to_json(&self, decimals: Option<u32>) -> Result<String, PersistenceError> {
        let payload: Vec<Vec<Vec<f64>>> = self
            .entries()
            .iter()
            .map(|entry| rounded_rows(&entry.values().to_owned(), decimals))
            .collect();
        Ok(serde_json::to_string_pretty(&payload)?)
    }

    pub fn from_json(payload: &str, temporal_type: TemporalType) -> Result<Self, PersistenceError> {
        let periods: Vec<Vec<Vec<f64>>> = serde_json::from_str(payload)?;
        let entries = periods
            .iter()
            .map(|rows| TransitionMatrix::from_rows(rows))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::from_entries(entries, temporal_type)?)
    }

    pub fn write_json(&self, path: &Path, decimals: Option<u32>) -> Result<(), PersistenceError> {
        fs::write(path, self.to_json(decimals)?)?;
        Ok(())
    }

    pub fn read_json(path: &Path, temporal_type: TemporalType) -> Result<Self, PersistenceError> {
        Self::from_json(&fs::read_to_string(path)?, temporal_type)
    }

    pub fn write_csv<W: Write>(&self, sink: W) -> Result<(), PersistenceError> {
        let (from_states, to_states) = self.shape();
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_writer(sink);

        let mut header = vec![
            "from_states".to_string(),
            "to_states".to_string(),
            "periods".to_string(),
        ];
        header.extend((1..=self.len()).map(|k| format!("tenor_{k}")));
        writer.write_record(&header)?;

        let mut values = vec![
            from_states.to_string(),
            to_states.to_string(),
            self.len().to_string(),
        ];
        values.extend(self.periods().iter().map(|p| p.to_string()));
        writer.write_record(&values)?;

        for entry in self.entries() {
            for row in entry.values().outer_iter() {
                writer.write_record(row.iter().map(|v| v.to_string()))?;
            }
        }
        writer.flush()?;
        Ok(())
    }

    /// Entries may be non-square; [`TransitionMatrixSet::validate`] reports it.
    pub fn read_csv<R: std::io::Read>(
        source: R,
        temporal_type: TemporalType,
    ) -> Result<Self, PersistenceError> {
        let mut reader = grid_reader(source);
        let mut records = reader.records();

        let header = records
            .next()
            .ok_or_else(|| PersistenceError::Header("file is empty".to_string()))??;
        let names: Vec<&str> = header.iter().collect();
        if names.len() < 3 || names[..3] != ["from_states", "to_states", "periods"] {
            return Err(PersistenceError::Header(format!(
                "expected 'from_states,to_states,periods,...', found '{}'",
                names.join(",")
            )));
        }

        let values = records
            .next()
            .ok_or_else(|| PersistenceError::Header("missing dimension line".to_string()))??;
        let fields: Vec<&str> = values.iter().collect();
        if fields.len() < 3 {
            return Err(PersistenceError::Header(
                "dimension line needs from_states, to_states and periods".to_string(),
            ));
        }
        let from_states = parse_count(fields[0], 2)?;
        let to_states = parse_count(fields[1], 2)?;
        let period_count = parse_count(fields[2], 2)?;
        let tenors = fields[3..]
            .iter()
            .map(|f| parse_number(f, 2))
            .collect::<Result<Vec<_>, _>>()?;

        let mut rows = Vec::with_capacity(from_states * period_count);
        for (offset, record) in records.enumerate() {
            let record = record?;
            let row = record
                .iter()
                .map(|field| parse_number(field, offset + 3))
                .collect::<Result<Vec<_>, _>>()?;
            rows.push(row);
        }
        if rows.len() != from_states * period_count {
            return Err(PersistenceError::RowCount {
                expected: from_states * period_count,
                found: rows.len(),
            });
        }

        let mut entries = Vec::with_capacity(period_count);
        for block in rows.chunks(from_states.max(1)) {
            let matrix = TransitionMatrix::from_rows(block)?;
            if matrix.shape().1 != to_states {
                return Err(PersistenceError::Header(format!(
                    "declared {to_states} destination states but rows carry {}",
                    matrix.shape().1
                )));
            }
            entries.push(matrix);
        }
        let set = TransitionMatrixSet::from_entries(entries, temporal_type)?;
        if tenors.len() == period_count {
            Ok(set.with_periods(tenors)?)
        } else {
            log::warn!(
                "Matrix set CSV declares {} tenors for {} periods; using default period markers",
                tenors.len(),
                period_count
            );
            Ok(set)
        }
    }
}

impl CreditCurve {
    pub fn to_json(&self, decimals: Option<u32>) -> Result<String, PersistenceError> {
        Ok(serde_json::to_string_pretty(&rounded_rows(
            &self.values().to_owned(),
            decimals,
        ))?)
    }

    pub fn write_csv<W: Write>(&self, sink: W) -> Result<(), PersistenceError> {
        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(sink);
        for row in self.values().outer_iter() {
            writer.write_record(row.iter().map(|v| v.to_string()))?;
        }
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix_set::SetMethod;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn matrix() -> TransitionMatrix {
        TransitionMatrix::new(array![[0.9, 0.1], [0.2, 0.8]])
    }

    #[test]
    fn rounding_applies_before_serialisation() {
        let m = TransitionMatrix::new(array![[0.123456, 0.876544], [0.0, 1.0]]);
        let json = m.to_json(Some(2)).unwrap();
        let back = TransitionMatrix::from_json(&json).unwrap();
        assert_eq!(back[(0, 0)], 0.12);
        assert_eq!(back[(0, 1)], 0.88);
    }

    #[test]
    fn matrix_csv_is_a_plain_grid() {
        let mut buffer = Vec::new();
        matrix().write_csv(&mut buffer).unwrap();
        let text = String::from_utf8(buffer.clone()).unwrap();
        assert_eq!(text, "0.9,0.1\n0.2,0.8\n");
        let back = TransitionMatrix::read_csv(buffer.as_slice()).unwrap();
        assert_eq!(back, matrix());
    }

    #[test]
    fn set_csv_layout() {
        let set = TransitionMatrixSet::from_matrix(&matrix(), 2, SetMethod::Power).unwrap();
        let mut buffer = Vec::new();
        set.write_csv(&mut buffer).unwrap();
        let text = String::from_utf8(buffer.clone()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "from_states,to_states,periods,tenor_1,tenor_2");
        assert_eq!(lines[1], "2,2,2,1,2");
        assert_eq!(lines.len(), 6);

        let back = TransitionMatrixSet::read_csv(buffer.as_slice(), TemporalType::Cumulative).unwrap();
        assert_eq!(back.len(), 2);
        assert_eq!(back.periods(), &[1.0, 2.0]);
        for (a, b) in back.entries()[1]
            .values()
            .iter()
            .zip(set.entries()[1].values().iter())
        {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-15);
        }
    }

    #[test]
    fn set_csv_may_hold_rectangular_entries() {
        let text = "from_states,to_states,periods,tenor_1\n2,3,1,1\n0.5,0.25,0.25\n0.0,0.5,0.5\n";
        let mut set = TransitionMatrixSet::read_csv(text.as_bytes(), TemporalType::Incremental).unwrap();
        assert_eq!(set.shape(), (2, 3));
        assert!(!set.validate(1e-3).is_valid());
    }

    #[test]
    fn set_csv_with_missing_rows_fails() {
        let text = "from_states,to_states,periods,tenor_1,tenor_2\n2,2,2,1,2\n1,0\n0,1\n";
        let err = TransitionMatrixSet::read_csv(text.as_bytes(), TemporalType::Incremental)
            .unwrap_err();
        assert!(matches!(
            err,
            PersistenceError::RowCount {
                expected: 4,
                found: 2
            }
        ));
    }

    #[test]
    fn set_json_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("set.json");
        let set = TransitionMatrixSet::from_matrix(&matrix(), 3, SetMethod::Copy).unwrap();
        set.write_json(&path, None).unwrap();
        let back = TransitionMatrixSet::read_json(&path, TemporalType::Incremental).unwrap();
        assert_eq!(back.entries(), set.entries());
    }
}
