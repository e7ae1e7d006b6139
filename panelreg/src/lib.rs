//! Panel-data regressions in Rust.
//!
//! This library fits ordinary-least-squares regressions on panel data, that is
//! observations indexed by an entity (a firm, a worker, a country) and a time
//! period. Two estimators are supported:
//!
//! * **pooled OLS**, which ignores the panel structure, and
//! * **fixed effects** ("within"), which sweeps out entity means and restores
//!   the grand mean so that the intercept stays interpretable, matching the
//!   output of conventional panel-regression software.
//!
//! Standard errors can be classical, heteroskedasticity-consistent (HC0-HC3)
//! or cluster-robust. Under fixed effects a robust request is automatically
//! upgraded to clustering on the entity variable.
//!
//! # Example
//!
//! ```ignore
//! use panelreg::{PanelTable, RegressionResultTable};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut table = PanelTable::from_csv("grunfeld.csv", b',', true)?;
//!     table.set_panel_key("FIRM", "YEAR", false)?;
//!
//!     let pooled = table.regress("I ~ F + C").vce("robust").fit()?;
//!     let fe = table.xtreg("I ~ F + C").vce("robust").fit()?;
//!
//!     println!("{}", RegressionResultTable::new(vec![pooled, fe]));
//!     Ok(())
//! }
//! ```

use polars::prelude::PolarsError;
use thiserror::Error;

pub mod covariance;
pub mod formula;
mod math;
pub mod panel;
pub mod regression;
pub mod table;
pub mod transform;

pub use crate::covariance::{ClusterSpec, CovarianceDirective, HcType, Vce};
pub use crate::formula::{DesignMatrices, Formula};
pub use crate::panel::{EntityGrouping, PanelKey, PanelTable};
pub use crate::regression::{
    Estimates, FittedRegression, RegressionBuilder, RegressionSpec, RegressionType,
};
pub use crate::table::RegressionResultTable;

/// Error type for the `panelreg` library.
#[derive(Error, Debug)]
pub enum PanelError {
    /// A panel-dependent operation was requested on a table without an entity/time key.
    #[error("Panel not configured: {operation} requires an entity and a time column")]
    PanelNotConfigured { operation: String },
    /// A named column does not exist in the table.
    #[error("Column not found: {0}")]
    ColumnNotFound(String),
    /// A column collides with one of the names reserved for panel metadata.
    #[error("Reserved column name: '{0}' is reserved for panel metadata (i, t, n, N, T)")]
    ReservedColumnName(String),
    /// The cluster argument is not a valid column reference.
    #[error("Invalid cluster specification: {0}")]
    InvalidClusterSpec(String),
    /// The regression type is not one of the supported estimators.
    #[error("Unsupported regression type: '{0}' (expected 'pooled' or 'fe')")]
    UnsupportedRegressionType(String),
    /// The variance-covariance estimator name is not recognised.
    #[error("Invalid variance estimator: '{0}'")]
    InvalidVce(String),
    /// The formula is malformed or cannot be evaluated against the table.
    #[error("Formula error in '{formula}': {reason}")]
    Formula { formula: String, reason: String },
    /// Mutually exclusive arguments were supplied together.
    #[error("Conflicting arguments: {0}")]
    ConflictingArguments(String),
    /// The OLS solve failed, typically because of perfect multicollinearity.
    #[error("Linear algebra error: {0}")]
    LinearAlgebra(String),
    /// Wraps a `PolarsError`.
    #[error("Polars error: {0}")]
    Polars(#[from] PolarsError),
    /// Wraps a `serde_json::Error`.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PanelError {
    pub(crate) fn panel_not_configured(operation: &str) -> Self {
        PanelError::PanelNotConfigured {
            operation: operation.to_string(),
        }
    }

    pub(crate) fn formula(formula: &str, reason: impl Into<String>) -> Self {
        PanelError::Formula {
            formula: formula.to_string(),
            reason: reason.into(),
        }
    }
}
