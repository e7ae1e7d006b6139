use crate::PanelError;
use nalgebra::{DMatrix, DVector};

/// Represents the results of an OLS regression.
#[derive(Debug, Clone)]
pub struct OlsResult {
    pub coefficients: DVector<f64>,
    /// `(X'X)⁻¹`, the bread of every covariance estimator.
    pub xtx_inv: DMatrix<f64>,
    pub residuals: DVector<f64>,
    /// Sum of squared residuals.
    pub sse: f64,
    pub nobs: usize,
}

impl OlsResult {
    /// Number of estimated coefficients.
    pub fn n_params(&self) -> usize {
        self.coefficients.len()
    }
}

/// Performs an Ordinary Least Squares (OLS) regression.
///
/// The function calculates the coefficient vector `β` using the formula:
/// `β = (X'X)⁻¹ * X'y`
///
/// # Arguments
///
/// * `y` - A `DVector` representing the outcome variable.
/// * `x` - A `DMatrix` representing the predictor variables. It must already
///   contain a column of ones if an intercept is desired.
///
/// # Returns
///
/// A `Result` containing the `OlsResult` on success, or a `PanelError` if the
/// `X'X` matrix is singular and cannot be factored.
pub fn ols(y: &DVector<f64>, x: &DMatrix<f64>) -> Result<OlsResult, PanelError> {
    if x.nrows() != y.len() {
        return Err(PanelError::LinearAlgebra(format!(
            "design matrix has {} rows but the response has {}",
            x.nrows(),
            y.len()
        )));
    }
    if x.ncols() == 0 {
        return Err(PanelError::LinearAlgebra(
            "design matrix has no columns".to_string(),
        ));
    }

    let xtx = x.transpose() * x;
    let xty = x.transpose() * y;

    // Cholesky doubles as the positive-definiteness check: it fails under
    // perfect multicollinearity.
    let cholesky = xtx.cholesky().ok_or_else(|| {
        PanelError::LinearAlgebra(
            "Failed to perform Cholesky decomposition. Matrix may be singular or not positive definite due to multicollinearity.".to_string(),
        )
    })?;

    let coefficients = cholesky.solve(&xty);
    if coefficients.iter().any(|b| !b.is_finite()) {
        return Err(PanelError::LinearAlgebra(
            "non-finite coefficients; the data may contain NaN or infinite values".to_string(),
        ));
    }

    let y_hat = x * &coefficients;
    let residuals = y - y_hat;
    let sse = residuals.norm_squared();

    Ok(OlsResult {
        coefficients,
        xtx_inv: cholesky.inverse(),
        residuals,
        sse,
        nobs: x.nrows(),
    })
}
