//! TOML description of one estimation run.
//!
//! ```toml
//! accuracy = 0.001
//! remove_stale = true
//!
//! [states]
//! labels = ["A", "B", "C", "D"]
//! absorbing = [3]
//!
//! [columns]
//! id = "Entity"
//!
//! [confidence]
//! method = "sison-glaz"
//! alpha = 0.05
//!
//! [cohorts]
//! bounds = [0.0, 1.0, 2.0, 3.0]
//! ```

use crate::estimators::{ConfidenceIntervalConfig, ConfidenceIntervalError};
use crate::preprocessing::cohorting::check_bounds;
use crate::preprocessing::{CohortSpec, CohortingError, ColumnLabels};
use crate::state_space::{StateSpace, StateSpaceError};
use crate::DEFAULT_ACCURACY;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read or write configuration file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse TOML configuration: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Failed to serialize configuration to TOML: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
    #[error("Invalid confidence interval settings: {0}")]
    ConfidenceInterval(#[from] ConfidenceIntervalError),
    #[error("Invalid cohort settings: {0}")]
    Cohorting(#[from] CohortingError),
    #[error("Invalid state space: {0}")]
    StateSpace(#[from] StateSpaceError),
    #[error("[states] sets both 'labels' and 'generic'; choose one.")]
    ConflictingStates,
    #[error("[cohorts] needs exactly one of 'count' or 'bounds'.")]
    AmbiguousCohorts,
    #[error("Validation accuracy must be positive and finite, found {0}.")]
    InvalidAccuracy(f64),
}

/// State space settings. Without `labels` or `generic` the states are inferred from the data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StatesConfig {
    pub labels: Option<Vec<String>>,
    pub generic: Option<usize>,
    pub absorbing: Vec<usize>,
    pub sticky: bool,
    pub full_name: Option<String>,
    pub originator: Option<String>,
}

impl StatesConfig {
    fn decorate(&self, states: StateSpace) -> Result<StateSpace, ConfigError> {
        let mut states = states
            .with_sticky(self.sticky)
            .with_absorbing(self.absorbing.clone())?;
        if let Some(name) = &self.full_name {
            states = states.with_full_name(name.clone());
        }
        if let Some(originator) = &self.originator {
            states = states.with_originator(originator.clone());
        }
        Ok(states)
    }

    /// The configured state space, or `None` when it has to be inferred.
    pub fn build(&self) -> Result<Option<StateSpace>, ConfigError> {
        let base = match (&self.labels, self.generic) {
            (Some(_), Some(_)) => return Err(ConfigError::ConflictingStates),
            (Some(labels), None) => StateSpace::from_labels(labels.iter().cloned()),
            (None, Some(n)) => StateSpace::generic(n),
            (None, None) => return Ok(None),
        };
        self.decorate(base).map(Some)
    }

    /// Apply the metadata of this block to a state space inferred from data.
    pub fn complete(&self, inferred: StateSpace) -> Result<StateSpace, ConfigError> {
        self.decorate(inferred)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CohortConfig {
    pub count: Option<usize>,
    pub bounds: Option<Vec<f64>>,
}

impl CohortConfig {
    pub fn spec(&self) -> Result<CohortSpec, ConfigError> {
        match (self.count, &self.bounds) {
            (Some(0), None) => Err(CohortingError::NoCohorts.into()),
            (Some(count), None) => Ok(CohortSpec::Count(count)),
            (None, Some(bounds)) => {
                check_bounds(bounds)?;
                Ok(CohortSpec::Bounds(bounds.clone()))
            }
            _ => Err(ConfigError::AmbiguousCohorts),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AnalysisConfig {
    pub accuracy: f64,
    pub remove_stale: bool,
    pub states: StatesConfig,
    pub columns: ColumnLabels,
    pub confidence: Option<ConfidenceIntervalConfig>,
    /// Without a cohort block, Compact input is taken as already discretised.
    pub cohorts: Option<CohortConfig>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            accuracy: DEFAULT_ACCURACY,
            remove_stale: false,
            states: StatesConfig::default(),
            columns: ColumnLabels::default(),
            confidence: None,
            cohorts: None,
        }
    }
}

impl AnalysisConfig {
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        let config = Self::from_toml(&text)?;
        log::debug!("Loaded analysis configuration from {}", path.display());
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let text = toml::to_string_pretty(self)?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(text.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    /// Check every section without touching any data.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.accuracy.is_finite() && self.accuracy > 0.0) {
            return Err(ConfigError::InvalidAccuracy(self.accuracy));
        }
        if let Some(confidence) = &self.confidence {
            confidence.validate()?;
        }
        if let Some(cohorts) = &self.cohorts {
            cohorts.spec()?;
        }
        self.states.build()?;
        Ok(())
    }

    pub fn cohort_spec(&self) -> Result<Option<CohortSpec>, ConfigError> {
        self.cohorts.as_ref().map(CohortConfig::spec).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::estimators::ConfidenceMethod;

    #[test]
    fn empty_document_gives_defaults() {
        let config = AnalysisConfig::from_toml("").unwrap();
        assert_eq!(config, AnalysisConfig::default());
        assert_eq!(config.columns.id, "ID");
        assert_eq!(config.accuracy, 1e-3);
        assert!(config.states.build().unwrap().is_none());
    }

    #[test]
    fn full_document() {
        let text = r#"
            accuracy = 0.01
            remove_stale = true

            [states]
            labels = ["A", "B", "D"]
            absorbing = [2]
            full_name = "Toy scale"

            [columns]
            id = "Entity"
            state = "Rating"

            [confidence]
            method = "sison-glaz"
            alpha = 0.1

            [cohorts]
            bounds = [0.0, 1.0, 2.0]
        "#;
        let config = AnalysisConfig::from_toml(text).unwrap();
        let states = config.states.build().unwrap().unwrap();
        assert_eq!(states.cardinality(), 3);
        assert!(states.is_absorbing(2));
        assert_eq!(states.full_name(), Some("Toy scale"));
        assert_eq!(config.columns.id, "Entity");
        assert_eq!(config.columns.time, "Time");
        assert_eq!(
            config.confidence.unwrap().method,
            ConfidenceMethod::SisonGlaz
        );
        assert_eq!(
            config.cohort_spec().unwrap(),
            Some(CohortSpec::Bounds(vec![0.0, 1.0, 2.0]))
        );
    }

    #[test]
    fn invalid_sections_are_rejected() {
        assert!(matches!(
            AnalysisConfig::from_toml("[confidence]\nmethod = \"wald\"\nalpha = 0.05"),
            Err(ConfigError::TomlParse(_))
        ));
        assert!(matches!(
            AnalysisConfig::from_toml("[confidence]\nalpha = 0.0"),
            Err(ConfigError::ConfidenceInterval(_))
        ));
        assert!(matches!(
            AnalysisConfig::from_toml("[cohorts]\ncount = 3\nbounds = [0.0, 1.0]"),
            Err(ConfigError::AmbiguousCohorts)
        ));
        assert!(matches!(
            AnalysisConfig::from_toml("[cohorts]\nbounds = [1.0, 0.0]"),
            Err(ConfigError::Cohorting(CohortingError::UnorderedBounds { .. }))
        ));
        assert!(matches!(
            AnalysisConfig::from_toml("[states]\ngeneric = 3\nlabels = [\"a\"]"),
            Err(ConfigError::ConflictingStates)
        ));
        assert!(matches!(
            AnalysisConfig::from_toml("[states]\ngeneric = 2\nabsorbing = [4]"),
            Err(ConfigError::StateSpace(_))
        ));
        assert!(matches!(
            AnalysisConfig::from_toml("accuracy = -1.0"),
            Err(ConfigError::InvalidAccuracy(_))
        ));
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("analysis.toml");
        let config = AnalysisConfig {
            states: StatesConfig {
                generic: Some(4),
                ..StatesConfig::default()
            },
            confidence: Some(ConfidenceIntervalConfig::default()),
            cohorts: Some(CohortConfig {
                count: Some(5),
                bounds: None,
            }),
            ..AnalysisConfig::default()
        };
        config.save(&path).unwrap();
        assert_eq!(AnalysisConfig::load(&path).unwrap(), config);
    }
}
