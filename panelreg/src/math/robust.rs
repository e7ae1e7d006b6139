//! Sandwich covariance estimators.
//!
//! All estimators share the form `V = (X'X)⁻¹ M (X'X)⁻¹`. For the
//! heteroskedasticity-consistent family the meat is `M = X' Ω X` with a
//! diagonal `Ω`; for the cluster estimator it is the sum over clusters of
//! `(X_g' e_g)(X_g' e_g)'`.
//!
//! # References
//!
//! - White, H. (1980). "A Heteroskedasticity-Consistent Covariance Matrix Estimator
//!   and a Direct Test for Heteroskedasticity." *Econometrica*, 48(4), 817–838.
//! - MacKinnon, J.G. & White, H. (1985). "Some Heteroskedasticity-Consistent
//!   Covariance Matrix Estimators with Improved Finite Sample Properties."
//!   *Journal of Econometrics*, 29(3), 305–325.

use super::ols::OlsResult;
use crate::covariance::HcType;
use crate::panel::EntityGrouping;
use crate::PanelError;
use nalgebra::{DMatrix, DVector};

/// Classical covariance `σ² (X'X)⁻¹` with `σ² = SSE / df_resid`.
pub fn classical_vcov(fit: &OlsResult, df_resid: f64) -> DMatrix<f64> {
    &fit.xtx_inv * (fit.sse / df_resid)
}

/// Heteroskedasticity-consistent covariance.
///
/// `df_resid` is the residual degrees of freedom of the fit, which for fixed
/// effects already accounts for the absorbed entity means; HC1 scales by
/// `N / df_resid`.
pub fn hc_vcov(
    x: &DMatrix<f64>,
    fit: &OlsResult,
    hc_type: HcType,
    df_resid: f64,
) -> Result<DMatrix<f64>, PanelError> {
    let n = x.nrows();
    let omega: Vec<f64> = match hc_type {
        HcType::HC0 => fit.residuals.iter().map(|e| e * e).collect(),
        HcType::HC1 => {
            let scale = n as f64 / df_resid;
            fit.residuals.iter().map(|e| scale * e * e).collect()
        }
        HcType::HC2 | HcType::HC3 => {
            let power = if hc_type == HcType::HC2 { 1 } else { 2 };
            let leverage = leverage(x, &fit.xtx_inv);
            let mut omega = Vec::with_capacity(n);
            for (i, (&e, &h)) in fit.residuals.iter().zip(leverage.iter()).enumerate() {
                let denom = 1.0 - h;
                if denom <= f64::EPSILON {
                    return Err(PanelError::LinearAlgebra(format!(
                        "observation {} has leverage 1; {:?} is undefined",
                        i, hc_type
                    )));
                }
                omega.push(e * e / denom.powi(power));
            }
            omega
        }
    };

    let p = x.ncols();
    let mut meat = DMatrix::<f64>::zeros(p, p);
    for (i, &w) in omega.iter().enumerate() {
        let row = x.row(i);
        meat += row.transpose() * row * w;
    }

    Ok(&fit.xtx_inv * meat * &fit.xtx_inv)
}

/// Cluster-robust covariance.
///
/// Scores are summed within each cluster and the sandwich is scaled by
/// `G/(G-1) · (N-1)/(N-k)` where `k` is the number of design columns.
pub fn cluster_vcov(
    x: &DMatrix<f64>,
    fit: &OlsResult,
    groups: &EntityGrouping,
) -> Result<DMatrix<f64>, PanelError> {
    if groups.len() != x.nrows() {
        return Err(PanelError::LinearAlgebra(format!(
            "cluster grouping covers {} rows but the design matrix has {}",
            groups.len(),
            x.nrows()
        )));
    }
    let n_clusters = groups.n_groups();
    if n_clusters < 2 {
        return Err(PanelError::LinearAlgebra(format!(
            "cluster-robust covariance needs at least 2 clusters, got {}",
            n_clusters
        )));
    }

    let p = x.ncols();
    let mut scores = DMatrix::<f64>::zeros(n_clusters, p);
    for (i, &g) in groups.codes().iter().enumerate() {
        let e = fit.residuals[i];
        for c in 0..p {
            scores[(g, c)] += x[(i, c)] * e;
        }
    }
    let meat = scores.transpose() * &scores;

    let n = x.nrows() as f64;
    let k = p as f64;
    let g = n_clusters as f64;
    let scale = g / (g - 1.0) * (n - 1.0) / (n - k);

    Ok(&fit.xtx_inv * meat * &fit.xtx_inv * scale)
}

/// Diagonal of the hat matrix, `h_ii = x_i' (X'X)⁻¹ x_i`.
fn leverage(x: &DMatrix<f64>, xtx_inv: &DMatrix<f64>) -> DVector<f64> {
    let projected = x * xtx_inv;
    DVector::from_fn(x.nrows(), |i, _| projected.row(i).dot(&x.row(i)))
}
