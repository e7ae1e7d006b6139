//! Selection of the variance-covariance estimator for a fit.
//!
//! A request is a [`Vce`] name plus an optional [`ClusterSpec`]. It is
//! resolved against the table and the regression type into a concrete
//! [`CovarianceDirective`] that the solver consumes.

use crate::panel::{EntityGrouping, PanelTable};
use crate::regression::RegressionType;
use crate::PanelError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Heteroskedasticity-consistent estimator variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum HcType {
    /// White's estimator, `ω_i = e_i²`.
    HC0,
    /// `HC0` scaled by `N / df_resid`. This is what `robust` means.
    #[default]
    HC1,
    /// `ω_i = e_i² / (1 - h_ii)`.
    HC2,
    /// `ω_i = e_i² / (1 - h_ii)²`.
    HC3,
}

/// The requested variance-covariance estimator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Vce {
    /// Classical OLS standard errors.
    #[default]
    NonRobust,
    /// Heteroskedasticity-consistent standard errors.
    Hc(HcType),
    /// Cluster-robust standard errors.
    Cluster,
}

impl FromStr for Vce {
    type Err = PanelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "nonrobust" | "ols" => Ok(Vce::NonRobust),
            "robust" | "hc1" => Ok(Vce::Hc(HcType::HC1)),
            "hc0" => Ok(Vce::Hc(HcType::HC0)),
            "hc2" => Ok(Vce::Hc(HcType::HC2)),
            "hc3" => Ok(Vce::Hc(HcType::HC3)),
            "cluster" => Ok(Vce::Cluster),
            _ => Err(PanelError::InvalidVce(s.to_string())),
        }
    }
}

impl TryFrom<String> for Vce {
    type Error = PanelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Vce> for String {
    fn from(vce: Vce) -> Self {
        vce.to_string()
    }
}

impl fmt::Display for Vce {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Vce::NonRobust => write!(f, "nonrobust"),
            Vce::Hc(hc) => write!(f, "{:?}", hc),
            Vce::Cluster => write!(f, "cluster"),
        }
    }
}

/// The cluster argument of a regression request.
///
/// A column name selects the grouping variable. A flag is accepted so that a
/// boolean passed where a column name is expected can be reported as invalid
/// instead of being silently ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClusterSpec {
    Column(String),
    Flag(bool),
}

impl ClusterSpec {
    /// The explicit cluster column, if any.
    ///
    /// `Flag(true)` is invalid; `Flag(false)` means no explicit cluster.
    pub fn column(&self) -> Result<Option<&str>, PanelError> {
        match self {
            ClusterSpec::Column(name) => Ok(Some(name)),
            ClusterSpec::Flag(false) => Ok(None),
            ClusterSpec::Flag(true) => Err(PanelError::InvalidClusterSpec(
                "expected a column name, got the boolean 'true'".to_string(),
            )),
        }
    }
}

impl From<&str> for ClusterSpec {
    fn from(name: &str) -> Self {
        ClusterSpec::Column(name.to_string())
    }
}

impl From<String> for ClusterSpec {
    fn from(name: String) -> Self {
        ClusterSpec::Column(name)
    }
}

impl From<bool> for ClusterSpec {
    fn from(flag: bool) -> Self {
        ClusterSpec::Flag(flag)
    }
}

/// A concrete estimator, ready for the solver.
#[derive(Debug, Clone, PartialEq)]
pub enum CovarianceDirective {
    NonRobust,
    Hc(HcType),
    Cluster {
        /// Name of the grouping variable.
        column: String,
        /// Row to cluster mapping, aligned with the estimation sample.
        groups: EntityGrouping,
    },
}

impl CovarianceDirective {
    /// The estimator kind, without the grouping data.
    pub fn kind(&self) -> Vce {
        match self {
            CovarianceDirective::NonRobust => Vce::NonRobust,
            CovarianceDirective::Hc(hc) => Vce::Hc(*hc),
            CovarianceDirective::Cluster { .. } => Vce::Cluster,
        }
    }

    /// The cluster column, for cluster-robust directives.
    pub fn cluster_column(&self) -> Option<&str> {
        match self {
            CovarianceDirective::Cluster { column, .. } => Some(column),
            _ => None,
        }
    }
}

/// Resolves a covariance request into a directive.
///
/// `rows` are the table rows kept in the estimation sample; cluster groupings
/// are restricted to them. The rules apply in order:
///
/// 1. an explicit cluster column always wins;
/// 2. under fixed effects a heteroskedasticity-robust request becomes
///    cluster-robust on the entity variable;
/// 3. `cluster` without a column clusters on the entity variable, which needs
///    a panel key;
/// 4. anything else is used as requested.
pub fn resolve(
    table: &PanelTable,
    vce: Vce,
    cluster: Option<&ClusterSpec>,
    regression_type: RegressionType,
    rows: &[usize],
) -> Result<CovarianceDirective, PanelError> {
    let explicit = match cluster {
        Some(spec) => spec.column()?,
        None => None,
    };

    if let Some(column) = explicit {
        let groups = EntityGrouping::from_column(table.resolve_column(column)?)?.subset(rows);
        return Ok(CovarianceDirective::Cluster {
            column: column.to_string(),
            groups,
        });
    }

    match (vce, regression_type) {
        (Vce::Hc(hc), RegressionType::FixedEffects) => {
            let directive = entity_cluster(table, rows, "fixed-effects robust standard errors")?;
            tracing::info!(
                requested = ?hc,
                cluster = directive.cluster_column().unwrap_or_default(),
                "robust standard errors under fixed effects are clustered on the entity variable"
            );
            Ok(directive)
        }
        (Vce::Cluster, _) => entity_cluster(table, rows, "cluster-robust standard errors"),
        (Vce::Hc(hc), _) => Ok(CovarianceDirective::Hc(hc)),
        (Vce::NonRobust, _) => Ok(CovarianceDirective::NonRobust),
    }
}

fn entity_cluster(
    table: &PanelTable,
    rows: &[usize],
    operation: &str,
) -> Result<CovarianceDirective, PanelError> {
    let key = table.require_key(operation)?;
    Ok(CovarianceDirective::Cluster {
        column: key.entity_column().clone(),
        groups: key.entities().subset(rows),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::prelude::*;

    fn frame() -> DataFrame {
        df!(
            "firm" => &["a", "a", "b", "b"],
            "year" => &[1, 2, 1, 2],
            "state" => &["x", "y", "y", "y"],
            "y" => &[1.0, 2.0, 3.0, 4.0]
        )
        .unwrap()
    }

    fn rows() -> Vec<usize> {
        vec![0, 1, 2, 3]
    }

    #[test]
    fn test_vce_parsing() {
        assert_eq!("robust".parse::<Vce>().unwrap(), Vce::Hc(HcType::HC1));
        assert_eq!("HC3".parse::<Vce>().unwrap(), Vce::Hc(HcType::HC3));
        assert_eq!("nonrobust".parse::<Vce>().unwrap(), Vce::NonRobust);
        assert_eq!("cluster".parse::<Vce>().unwrap(), Vce::Cluster);
        assert!(matches!("sandwich".parse::<Vce>(), Err(PanelError::InvalidVce(_))));
    }

    #[test]
    fn test_cluster_flag_is_invalid() {
        let table = PanelTable::new(frame());
        let result = resolve(
            &table,
            Vce::NonRobust,
            Some(&ClusterSpec::from(true)),
            RegressionType::Pooled,
            &rows(),
        );
        assert!(matches!(result, Err(PanelError::InvalidClusterSpec(_))));
    }

    #[test]
    fn test_explicit_column_without_panel_key() {
        let table = PanelTable::new(frame());
        let directive = resolve(
            &table,
            Vce::NonRobust,
            Some(&ClusterSpec::from("state")),
            RegressionType::Pooled,
            &rows(),
        )
        .unwrap();
        assert_eq!(directive.kind(), Vce::Cluster);
        match directive {
            CovarianceDirective::Cluster { column, groups } => {
                assert_eq!(column, "state");
                assert_eq!(groups.n_groups(), 2);
            }
            other => panic!("expected a cluster directive, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_cluster_column() {
        let table = PanelTable::new(frame());
        let result = resolve(
            &table,
            Vce::Cluster,
            Some(&ClusterSpec::from("county")),
            RegressionType::Pooled,
            &rows(),
        );
        assert!(matches!(result, Err(PanelError::ColumnNotFound(ref c)) if c == "county"));
    }

    #[test]
    fn test_fixed_effects_upgrades_robust_to_entity_cluster() {
        let table = PanelTable::with_panel_key(frame(), "firm", "year", false).unwrap();
        let directive = resolve(
            &table,
            Vce::Hc(HcType::HC1),
            None,
            RegressionType::FixedEffects,
            &rows(),
        )
        .unwrap();
        assert_eq!(directive.kind(), Vce::Cluster);
        assert_eq!(directive.cluster_column(), Some("firm"));
    }

    #[test]
    fn test_explicit_cluster_beats_upgrade() {
        let table = PanelTable::with_panel_key(frame(), "firm", "year", false).unwrap();
        let directive = resolve(
            &table,
            Vce::Hc(HcType::HC1),
            Some(&ClusterSpec::from("state")),
            RegressionType::FixedEffects,
            &rows(),
        )
        .unwrap();
        assert_eq!(directive.cluster_column(), Some("state"));
    }

    #[test]
    fn test_pooled_robust_stays_robust() {
        let table = PanelTable::with_panel_key(frame(), "firm", "year", false).unwrap();
        let directive = resolve(
            &table,
            Vce::Hc(HcType::HC1),
            Some(&ClusterSpec::from(false)),
            RegressionType::Pooled,
            &rows(),
        )
        .unwrap();
        assert_eq!(directive, CovarianceDirective::Hc(HcType::HC1));
    }

    #[test]
    fn test_cluster_defaults_to_entity_or_fails() {
        let keyed = PanelTable::with_panel_key(frame(), "firm", "year", true).unwrap();
        let directive = resolve(&keyed, Vce::Cluster, None, RegressionType::Pooled, &rows()).unwrap();
        assert_eq!(directive.cluster_column(), Some("firm"));

        let plain = PanelTable::new(frame());
        let result = resolve(&plain, Vce::Cluster, None, RegressionType::Pooled, &rows());
        assert!(matches!(result, Err(PanelError::PanelNotConfigured { .. })));
    }

    #[test]
    fn test_cluster_groups_follow_sample_rows() {
        let table = PanelTable::with_panel_key(frame(), "firm", "year", false).unwrap();
        let directive = resolve(&table, Vce::Cluster, None, RegressionType::Pooled, &[2, 3]).unwrap();
        match directive {
            CovarianceDirective::Cluster { groups, .. } => {
                assert_eq!(groups.len(), 2);
                assert_eq!(groups.n_groups(), 1);
            }
            other => panic!("expected a cluster directive, got {:?}", other),
        }
    }
}
