//! Pooled and fixed-effects OLS fits on a [`PanelTable`].
//!
//! A fit moves through a fixed sequence of steps: the request is validated,
//! the formula is evaluated into matrices, the fixed-effects transform is
//! applied when requested, the covariance estimator is resolved, the normal
//! equations are solved and the named estimates are extracted.

use crate::covariance::{self, ClusterSpec, CovarianceDirective, Vce};
use crate::formula::{DesignMatrices, Formula};
use crate::math::inference::{coefficient_inference, Reference};
use crate::math::ols::ols;
use crate::math::robust;
use crate::panel::PanelTable;
use crate::transform;
use crate::PanelError;
use comfy_table::{Cell, Table};
use getset::Getters;
use nalgebra::DVector;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// The estimator applied to the panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RegressionType {
    /// Plain OLS on the stacked observations.
    Pooled,
    /// OLS after sweeping out entity means (the "within" estimator).
    FixedEffects,
}

impl FromStr for RegressionType {
    type Err = PanelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pooled" => Ok(RegressionType::Pooled),
            "fe" | "fixed_effects" | "within" => Ok(RegressionType::FixedEffects),
            _ => Err(PanelError::UnsupportedRegressionType(s.to_string())),
        }
    }
}

impl fmt::Display for RegressionType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RegressionType::Pooled => write!(f, "pooled"),
            RegressionType::FixedEffects => write!(f, "fixed_effects"),
        }
    }
}

fn default_regression_type() -> String {
    "pooled".to_string()
}

fn default_vce() -> String {
    "nonrobust".to_string()
}

/// A complete description of one requested fit.
///
/// The model is given either as a `formula` or as a `dependent` column plus
/// `independent` columns, never both. `regression_type` and `vce` are kept as
/// written and validated when the fit starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegressionSpec {
    #[serde(default)]
    pub formula: Option<String>,
    #[serde(default)]
    pub dependent: Option<String>,
    #[serde(default)]
    pub independent: Vec<String>,
    #[serde(default = "default_regression_type")]
    pub regression_type: String,
    #[serde(default = "default_vce")]
    pub vce: String,
    #[serde(default)]
    pub cluster: Option<ClusterSpec>,
    #[serde(default)]
    pub verbose: bool,
}

impl Default for RegressionSpec {
    fn default() -> Self {
        Self {
            formula: None,
            dependent: None,
            independent: Vec::new(),
            regression_type: default_regression_type(),
            vce: default_vce(),
            cluster: None,
            verbose: false,
        }
    }
}

impl RegressionSpec {
    /// A pooled, nonrobust request for the given formula.
    pub fn new(formula: &str) -> Self {
        Self {
            formula: Some(formula.to_string()),
            ..Self::default()
        }
    }

    /// Parses a JSON request. Unknown keys are rejected.
    pub fn from_json(json: &str) -> Result<Self, PanelError> {
        Ok(serde_json::from_str(json)?)
    }

    /// The model formula, built from the column lists when no formula text was given.
    pub fn parse_formula(&self) -> Result<Formula, PanelError> {
        let has_columns = self.dependent.is_some() || !self.independent.is_empty();
        match (&self.formula, &self.dependent) {
            (Some(_), _) if has_columns => Err(PanelError::ConflictingArguments(
                "give either a formula or a dependent/independent column list, not both"
                    .to_string(),
            )),
            (Some(text), _) => Formula::parse(text),
            (None, Some(dependent)) => Formula::from_columns(dependent, &self.independent),
            (None, None) if has_columns => Err(PanelError::formula(
                "",
                "independent columns were given without a dependent column",
            )),
            (None, None) => Err(PanelError::formula("", "no formula or dependent column given")),
        }
    }
}

/// Named estimates in design-matrix column order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Estimates {
    names: Vec<String>,
    values: Vec<f64>,
}

impl Estimates {
    fn new(names: &[String], values: &DVector<f64>) -> Self {
        debug_assert_eq!(names.len(), values.len());
        Self {
            names: names.to_vec(),
            values: values.iter().copied().collect(),
        }
    }

    /// The estimate for a design column, if present.
    pub fn get(&self, name: &str) -> Option<f64> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|i| self.values[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> + '_ {
        self.names
            .iter()
            .map(String::as_str)
            .zip(self.values.iter().copied())
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl Serialize for Estimates {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.len()))?;
        for (name, value) in self.iter() {
            map.serialize_entry(name, &value)?;
        }
        map.end()
    }
}

/// The result of one fit. Immutable once built.
#[derive(Debug, Clone, Getters, Serialize)]
#[getset(get = "pub")]
pub struct FittedRegression {
    /// The formula as fitted.
    formula: String,
    /// Name of the response column.
    response: String,
    regression_type: RegressionType,
    /// The estimator actually used, after the resolution rules.
    vce: Vce,
    /// The cluster variable, for cluster-robust fits.
    cluster_column: Option<String>,
    /// Number of clusters in the estimation sample.
    n_clusters: Option<usize>,
    /// Observations used, after dropping rows with missing values.
    nobs: usize,
    /// Entities absorbed by a fixed-effects fit.
    entity_count: Option<usize>,
    /// `N - k`, minus `entity_count - 1` for fixed effects.
    residual_degrees_of_freedom: usize,
    coefficients: Estimates,
    standard_errors: Estimates,
    t_values: Estimates,
    p_values: Estimates,
    r_squared: f64,
}

impl FittedRegression {
    /// Whether p-values come from the normal rather than the Student-t distribution.
    pub fn uses_normal_reference(&self) -> bool {
        self.vce != Vce::NonRobust
    }

    /// Prints a formatted summary of the fit to the console.
    pub fn summary(&self) {
        println!("{}", self);
    }

    /// Exports the fit to a JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    fn coefficient_table(&self) -> Table {
        let (stat, prob) = if self.uses_normal_reference() {
            ("z", "P>|z|")
        } else {
            ("t", "P>|t|")
        };
        let mut table = Table::new();
        table.set_header(vec!["Variable", "Coef.", "Std. Err.", stat, prob]);
        for (i, name) in self.coefficients.names().iter().enumerate() {
            table.add_row(vec![
                Cell::new(name),
                Cell::new(format!("{:.4}", self.coefficients.values()[i])),
                Cell::new(format!("{:.4}", self.standard_errors.values()[i])),
                Cell::new(format!("{:.3}", self.t_values.values()[i])),
                Cell::new(format!("{:.4}", self.p_values.values()[i])),
            ]);
        }
        table
    }
}

impl fmt::Display for FittedRegression {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let title = match self.regression_type {
            RegressionType::Pooled => "Pooled OLS Regression",
            RegressionType::FixedEffects => "Fixed-Effects (Within) Regression",
        };
        writeln!(f, "{}", title)?;
        writeln!(f, "========================================")?;
        writeln!(f, "Formula: {}", self.formula)?;
        writeln!(f, "Observations: {}", self.nobs)?;
        if let Some(n) = self.entity_count {
            writeln!(f, "Entities: {}", n)?;
        }
        writeln!(f, "Residual DoF: {}", self.residual_degrees_of_freedom)?;
        writeln!(f, "R-squared: {:.4}", self.r_squared)?;
        match (&self.cluster_column, self.n_clusters) {
            (Some(column), Some(g)) => {
                writeln!(f, "Std. errors: clustered on {} ({} clusters)", column, g)?
            }
            _ => writeln!(f, "Std. errors: {}", self.vce)?,
        }
        writeln!(f)?;
        write!(f, "{}", self.coefficient_table())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Entry {
    Regress,
    Xtreg,
    Spec,
}

/// Configures and runs a single fit against a borrowed table.
///
/// Created by [`PanelTable::regress`] or [`PanelTable::xtreg`].
#[derive(Debug, Clone)]
pub struct RegressionBuilder<'a> {
    table: &'a PanelTable,
    spec: RegressionSpec,
    entry: Entry,
}

impl<'a> RegressionBuilder<'a> {
    fn new(table: &'a PanelTable, formula: &str, regression_type: RegressionType, entry: Entry) -> Self {
        let formula = formula.trim();
        Self {
            table,
            spec: RegressionSpec {
                formula: (!formula.is_empty()).then(|| formula.to_string()),
                regression_type: regression_type.to_string(),
                ..RegressionSpec::default()
            },
            entry,
        }
    }

    /// Sets the variance estimator: `nonrobust`, `robust`, `HC0`..`HC3` or `cluster`.
    pub fn vce(&mut self, vce: &str) -> &mut Self {
        self.spec.vce = vce.to_string();
        self
    }

    /// Clusters standard errors on the given column.
    pub fn cluster(&mut self, cluster: impl Into<ClusterSpec>) -> &mut Self {
        self.spec.cluster = Some(cluster.into());
        self
    }

    /// Sets the estimator: `pooled` or `fe` (also `fixed_effects`, `within`).
    pub fn regression_type(&mut self, regression_type: &str) -> &mut Self {
        self.spec.regression_type = regression_type.to_string();
        self
    }

    /// Prints the summary of the fit when it completes.
    pub fn verbose(&mut self, verbose: bool) -> &mut Self {
        self.spec.verbose = verbose;
        self
    }

    /// Sets the dependent column, as an alternative to a formula.
    pub fn dependent(&mut self, column: &str) -> &mut Self {
        self.spec.dependent = Some(column.to_string());
        self
    }

    /// Sets the independent columns, as an alternative to a formula.
    pub fn independent(&mut self, columns: &[&str]) -> &mut Self {
        self.spec.independent = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    /// The request as configured so far.
    pub fn spec(&self) -> &RegressionSpec {
        &self.spec
    }

    /// Runs the fit.
    pub fn fit(&self) -> Result<FittedRegression, PanelError> {
        estimate(self.table, &self.spec, self.entry)
    }
}

impl PanelTable {
    /// Starts a pooled OLS fit. No panel key is needed.
    ///
    /// An empty formula means the model is given through
    /// [`RegressionBuilder::dependent`] and [`RegressionBuilder::independent`].
    pub fn regress(&self, formula: &str) -> RegressionBuilder<'_> {
        RegressionBuilder::new(self, formula, RegressionType::Pooled, Entry::Regress)
    }

    /// Starts a panel fit, fixed effects by default. Requires a panel key.
    pub fn xtreg(&self, formula: &str) -> RegressionBuilder<'_> {
        RegressionBuilder::new(self, formula, RegressionType::FixedEffects, Entry::Xtreg)
    }

    /// Runs a fit described by a [`RegressionSpec`].
    ///
    /// Pooled requests work without a panel key; fixed effects need one.
    pub fn fit(&self, spec: &RegressionSpec) -> Result<FittedRegression, PanelError> {
        estimate(self, spec, Entry::Spec)
    }
}

fn estimate(
    table: &PanelTable,
    spec: &RegressionSpec,
    entry: Entry,
) -> Result<FittedRegression, PanelError> {
    let regression_type: RegressionType = spec.regression_type.parse()?;
    if entry == Entry::Regress && regression_type != RegressionType::Pooled {
        return Err(PanelError::ConflictingArguments(format!(
            "regress fits pooled models only, got '{}'; use xtreg",
            spec.regression_type
        )));
    }
    let vce: Vce = spec.vce.parse()?;
    if entry == Entry::Xtreg {
        table.require_key("xtreg")?;
    }
    let formula = spec.parse_formula()?;
    tracing::debug!(formula = %formula.text, %regression_type, %vce, "regression spec received");

    let DesignMatrices {
        y, x, columns, rows, ..
    } = formula.evaluate(table.data())?;
    tracing::debug!(rows = rows.len(), columns = columns.len(), "design matrices built");

    let (y, x, entity_count) = match regression_type {
        RegressionType::Pooled => (y, x, None),
        RegressionType::FixedEffects => {
            let grouping = table
                .require_key("fixed-effects estimation")?
                .entities()
                .subset(&rows);
            let y = transform::fixed_effects_vector(&y, &grouping);
            let x = transform::fixed_effects(&x, &grouping);
            tracing::debug!(entities = grouping.n_groups(), "fixed-effects transform applied");
            (y, x, Some(grouping.n_groups()))
        }
    };

    let directive = covariance::resolve(table, vce, spec.cluster.as_ref(), regression_type, &rows)?;
    tracing::debug!(
        vce = %directive.kind(),
        cluster = directive.cluster_column().unwrap_or("-"),
        "covariance resolved"
    );

    let fit = ols(&y, &x)?;
    let nobs = fit.nobs;
    let k = fit.n_params();
    let absorbed = entity_count.map_or(0, |n: usize| n.saturating_sub(1));
    if nobs <= k + absorbed {
        return Err(PanelError::LinearAlgebra(format!(
            "not enough observations: {} rows for {} coefficients and {} absorbed entity effects",
            nobs, k, absorbed
        )));
    }
    let df_resid = nobs - k - absorbed;

    let (vcov, reference) = match &directive {
        CovarianceDirective::NonRobust => (
            robust::classical_vcov(&fit, df_resid as f64),
            Reference::StudentT(df_resid as f64),
        ),
        CovarianceDirective::Hc(hc) => (
            robust::hc_vcov(&x, &fit, *hc, df_resid as f64)?,
            Reference::Normal,
        ),
        CovarianceDirective::Cluster { groups, .. } => {
            (robust::cluster_vcov(&x, &fit, groups)?, Reference::Normal)
        }
    };
    let inference = coefficient_inference(&fit.coefficients, &vcov, reference)?;
    tracing::debug!(nobs, df_resid, "regression solved");

    let n_clusters = match &directive {
        CovarianceDirective::Cluster { groups, .. } => Some(groups.n_groups()),
        _ => None,
    };
    let result = FittedRegression {
        formula: formula.text.clone(),
        response: formula.response.clone(),
        regression_type,
        vce: directive.kind(),
        cluster_column: directive.cluster_column().map(str::to_string),
        n_clusters,
        nobs,
        entity_count,
        residual_degrees_of_freedom: df_resid,
        coefficients: Estimates::new(&columns, &fit.coefficients),
        standard_errors: Estimates::new(&columns, &inference.std_errors),
        t_values: Estimates::new(&columns, &inference.t_values),
        p_values: Estimates::new(&columns, &inference.p_values),
        r_squared: r_squared(&y, fit.sse, formula.intercept),
    };
    tracing::debug!(coefficients = result.coefficients.len(), "result extracted");

    if spec.verbose {
        result.summary();
    }
    Ok(result)
}

/// Centered R² for models with an intercept, uncentered otherwise.
fn r_squared(y: &DVector<f64>, sse: f64, centered: bool) -> f64 {
    let tss = if centered {
        let mean = y.mean();
        y.iter().map(|v| (v - mean).powi(2)).sum::<f64>()
    } else {
        y.norm_squared()
    };
    if tss > 0.0 {
        1.0 - sse / tss
    } else {
        f64::NAN
    }
}
