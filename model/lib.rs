//! Estimation and manipulation of discrete-state transition matrices.
//!
//! The crate is organised in three areas:
//! - [`model`](self): state spaces, single- and multi-period transition matrices, credit
//!   curves, dense matrix functions, persistence and analysis configuration.
//! - [`preprocessing`]: event records, table loading, cohorting, format converters and
//!   synthetic dataset generators.
//! - [`estimators`]: cohort, Aalen–Johansen and simple estimators together with multinomial
//!   confidence intervals.

pub mod config;
pub mod credit_curve;
pub mod io;
pub mod linalg;
pub mod matrix;
pub mod matrix_set;
pub mod state_space;

#[path = "../preprocessing/mod.rs"]
pub mod preprocessing;

#[path = "../estimators/mod.rs"]
pub mod estimators;

pub use credit_curve::CreditCurve;
pub use matrix::{TransitionMatrix, Validation, ValidationMessage};
pub use matrix_set::{SetMethod, TemporalType, TransitionMatrixSet};
pub use state_space::StateSpace;

/// Default tolerance used when checking that rows sum to one.
pub const DEFAULT_ACCURACY: f64 = 1e-3;
