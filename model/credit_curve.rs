//! Collections of credit (default probability) curves.

use crate::matrix::{FormatType, format_value};
use ndarray::{Array2, ArrayView2};
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum CurveMessage {
    NegativeProbability { row: usize, period: usize, value: f64 },
    ProbabilityLargerThanOne { row: usize, period: usize, value: f64 },
    NotMonotonic { row: usize, period: usize },
}

impl CurveMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            CurveMessage::NegativeProbability { .. } => "Negative Probabilities",
            CurveMessage::ProbabilityLargerThanOne { .. } => "Probabilities Larger than 1",
            CurveMessage::NotMonotonic { .. } => "Curve not monotonic",
        }
    }
}

impl fmt::Display for CurveMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CurveMessage::NegativeProbability { row, period, value }
            | CurveMessage::ProbabilityLargerThanOne { row, period, value } => {
                write!(f, "{}: ({row}, {period}, {value})", self.kind())
            }
            CurveMessage::NotMonotonic { row, period } => {
                write!(f, "{}: ({row}, {period})", self.kind())
            }
        }
    }
}

/// Hazard rate implied by consecutive cumulative default probabilities.
///
/// Zero once the previous cumulative probability has reached one.
pub fn hazard_rate(previous_cumulative: f64, cumulative: f64) -> f64 {
    let surviving = 1.0 - previous_cumulative;
    if surviving <= 0.0 {
        0.0
    } else {
        (cumulative - previous_cumulative) / surviving
    }
}

/// Cumulative default curves: one row per starting rating, one column per period.
#[derive(Debug, Clone, PartialEq)]
pub struct CreditCurve {
    values: Array2<f64>,
    validated: bool,
}

impl CreditCurve {
    pub fn new(values: Array2<f64>) -> Self {
        Self {
            values,
            validated: false,
        }
    }

    pub fn values(&self) -> ArrayView2<'_, f64> {
        self.values.view()
    }

    pub fn curve_count(&self) -> usize {
        self.values.nrows()
    }

    pub fn periods(&self) -> usize {
        self.values.ncols()
    }

    pub fn is_validated(&self) -> bool {
        self.validated
    }

    /// Every value must be a probability and every curve non-decreasing.
    pub fn validate(&mut self) -> Result<(), Vec<CurveMessage>> {
        let mut messages = Vec::new();
        for ((row, period), &value) in self.values.indexed_iter() {
            if value < 0.0 {
                messages.push(CurveMessage::NegativeProbability { row, period, value });
            }
            if value > 1.0 {
                messages.push(CurveMessage::ProbabilityLargerThanOne { row, period, value });
            }
        }
        for (row, curve) in self.values.outer_iter().enumerate() {
            for period in 1..curve.len() {
                if curve[period] < curve[period - 1] {
                    messages.push(CurveMessage::NotMonotonic { row, period });
                }
            }
        }
        self.validated = messages.is_empty();
        if self.validated {
            Ok(())
        } else {
            Err(messages)
        }
    }

    /// Per-period hazard rates derived from the cumulative curves.
    pub fn hazard_curves(&self) -> Array2<f64> {
        let mut hazards = Array2::<f64>::zeros(self.values.dim());
        for (row, curve) in self.values.outer_iter().enumerate() {
            let mut previous = 0.0;
            for (period, &cumulative) in curve.iter().enumerate() {
                hazards[[row, period]] = hazard_rate(previous, cumulative);
                previous = cumulative;
            }
        }
        hazards
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
