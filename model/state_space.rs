use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum StateSpaceError {
    #[error(
        "State indices must be dense and ordered: position {position} carries index {found}, expected {position}."
    )]
    NonDenseIndex { position: usize, found: usize },
    #[error("Absorbing state index {index} is outside a state space of cardinality {cardinality}.")]
    AbsorbingOutOfRange { index: usize, cardinality: usize },
}

/// A single entry of a state space definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    pub index: usize,
    pub label: String,
}

/// Ordered enumeration of the discrete states of a system.
///
/// Indices are dense (`0..cardinality`); labels are free text and need not be unique.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSpace {
    definition: Vec<State>,
    /// Data may contain repeated observations of an unchanged state.
    sticky: bool,
    absorbing: Vec<usize>,
    originator: Option<String>,
    full_name: Option<String>,
}

/// Result category of [`StateSpace::validate_dataset`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetValidationKind {
    Expected,
    MoreStates,
    FewerStates,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetValidation {
    pub kind: DatasetValidationKind,
    pub message: String,
    /// Unexpected labels (`MoreStates`) or missing labels (`FewerStates`).
    pub outcome: BTreeSet<String>,
}

impl DatasetValidation {
    pub fn is_expected(&self) -> bool {
        self.kind == DatasetValidationKind::Expected
    }
}

impl StateSpace {
    /// Build a state space from `(index, label)` pairs.
    pub fn new<L: Into<String>>(definition: Vec<(usize, L)>) -> Result<Self, StateSpaceError> {
        let definition = definition
            .into_iter()
            .enumerate()
            .map(|(position, (index, label))| {
                if index != position {
                    Err(StateSpaceError::NonDenseIndex {
                        position,
                        found: index,
                    })
                } else {
                    Ok(State {
                        index,
                        label: label.into(),
                    })
                }
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::from_states(definition))
    }

    fn from_states(definition: Vec<State>) -> Self {
        Self {
            definition,
            sticky: false,
            absorbing: Vec::new(),
            originator: None,
            full_name: None,
        }
    }

    /// Labels are assigned indices in the order given.
    pub fn from_labels<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_states(
            labels
                .into_iter()
                .enumerate()
                .map(|(index, label)| State {
                    index,
                    label: label.into(),
                })
                .collect(),
        )
    }

    /// A state space of size `n` whose labels are the indices themselves.
    pub fn generic(n: usize) -> Self {
        Self::from_labels((0..n).map(|s| s.to_string()))
    }

    /// Infer a state space from raw dataset values.
    ///
    /// Unique values are sorted in natural order (numeric runs compare numerically) and
    /// assigned indices in that order. Callers that need a particular display order must pass
    /// an explicit definition instead.
    pub fn infer<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let unique: BTreeSet<String> = values
            .into_iter()
            .map(|v| v.as_ref().trim().to_string())
            .filter(|v| !v.is_empty())
            .collect();
        let sorted = unique
            .into_iter()
            .sorted_by(|a, b| natord::compare(a, b));
        let space = Self::from_labels(sorted);
        log::debug!("Inferred state space with {} states", space.cardinality());
        space
    }

    pub fn with_sticky(mut self, sticky: bool) -> Self {
        self.sticky = sticky;
        self
    }

    pub fn with_absorbing(mut self, absorbing: Vec<usize>) -> Result<Self, StateSpaceError> {
        let cardinality = self.cardinality();
        if let Some(&index) = absorbing.iter().find(|&&i| i >= cardinality) {
            return Err(StateSpaceError::AbsorbingOutOfRange { index, cardinality });
        }
        self.absorbing = absorbing;
        Ok(self)
    }

    pub fn with_originator(mut self, originator: impl Into<String>) -> Self {
        self.originator = Some(originator.into());
        self
    }

    pub fn with_full_name(mut self, full_name: impl Into<String>) -> Self {
        self.full_name = Some(full_name.into());
        self
    }

    pub fn cardinality(&self) -> usize {
        self.definition.len()
    }

    pub fn definition(&self) -> &[State] {
        &self.definition
    }

    pub fn states(&self) -> Vec<usize> {
        self.definition.iter().map(|s| s.index).collect()
    }

    pub fn state_labels(&self) -> Vec<&str> {
        self.definition.iter().map(|s| s.label.as_str()).collect()
    }

    pub fn label(&self, index: usize) -> Option<&str> {
        self.definition.get(index).map(|s| s.label.as_str())
    }

    pub fn is_sticky(&self) -> bool {
        self.sticky
    }

    pub fn absorbing(&self) -> &[usize] {
        &self.absorbing
    }

    pub fn is_absorbing(&self, index: usize) -> bool {
        self.absorbing.contains(&index)
    }

    pub fn originator(&self) -> Option<&str> {
        self.originator.as_deref()
    }

    pub fn full_name(&self) -> Option<&str> {
        self.full_name.as_deref()
    }

    /// Resolve a raw dataset value to a state index.
    ///
    /// An exact label match wins. Otherwise an integral number (`"3"`, `"3.0"`) matches a label
    /// with the same numeric value when the labels are numeric, and is read as an index when
    /// they are not. Inferred spaces over numeric codes (`"1"`, `"2"`, ...) therefore resolve
    /// by label, never by position.
    pub fn index_of(&self, value: &str) -> Option<usize> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return None;
        }
        if let Some(state) = self.definition.iter().find(|s| s.label == trimmed) {
            return Some(state.index);
        }
        let number = trimmed
            .parse::<f64>()
            .ok()
            .filter(|n| n.is_finite() && n.fract() == 0.0 && *n >= 0.0)?;
        let mut numeric_labels = self
            .definition
            .iter()
            .filter_map(|s| s.label.trim().parse::<f64>().ok().map(|label| (label, s.index)))
            .peekable();
        if numeric_labels.peek().is_some() {
            return numeric_labels
                .find(|(label, _)| *label == number)
                .map(|(_, index)| index);
        }
        let index = number as usize;
        (index < self.cardinality()).then_some(index)
    }

    /// Set-equality check between the values found in a dataset column and the labels of this
    /// state space. Values that resolve through [`StateSpace::index_of`] are compared by label.
    pub fn validate_dataset<I, S>(&self, values: I) -> DatasetValidation
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let found: BTreeSet<String> = values
            .into_iter()
            .filter_map(|v| {
                let raw = v.as_ref().trim();
                if raw.is_empty() {
                    return None;
                }
                Some(match self.index_of(raw).and_then(|i| self.label(i)) {
                    Some(label) => label.to_string(),
                    None => raw.to_string(),
                })
            })
            .collect();
        let expected: BTreeSet<String> =
            self.definition.iter().map(|s| s.label.clone()).collect();

        let unexpected: BTreeSet<String> = found.difference(&expected).cloned().collect();
        if !unexpected.is_empty() {
            log::warn!("Found states {:?}, expected {:?}", found, expected);
            return DatasetValidation {
                kind: DatasetValidationKind::MoreStates,
                message: format!(
                    "Dataset contains more states than expected. Check the following: {}",
                    unexpected.iter().join(", ")
                ),
                outcome: unexpected,
            };
        }
        let missing: BTreeSet<String> = expected.difference(&found).cloned().collect();
        if !missing.is_empty() {
            return DatasetValidation {
                kind: DatasetValidationKind::FewerStates,
                message: format!(
                    "Dataset contains fewer states than expected. Check the following: {}",
                    missing.iter().join(", ")
                ),
                outcome: missing,
            };
        }
        DatasetValidation {
            kind: DatasetValidationKind::Expected,
            message: "Dataset contains the expected states.".to_string(),
            outcome: BTreeSet::new(),
        }
    }

    /// Multi-line listing of the index/label pairs.
    pub fn describe(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for StateSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", "=".repeat(80))?;
        match &self.full_name {
            Some(name) => writeln!(f, "State Space: {name}")?,
            None => writeln!(f, "State Space")?,
        }
        if let Some(originator) = &self.originator {
            writeln!(f, "Originator: {originator}")?;
        }
        writeln!(f, "{}", "-".repeat(80))?;
        for state in &self.definition {
            let marker = if self.is_absorbing(state.index) {
                " (absorbing)"
            } else {
                ""
            };
            writeln!(
                f,
                "State Index and Label: {}, {}{}",
                state.index, state.label, marker
            )?;
        }
        write!(f, "{}", "-".repeat(80))
    }
}
