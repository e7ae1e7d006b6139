//! Standard errors, test statistics and two-sided p-values from a covariance matrix.

use crate::PanelError;
use nalgebra::{DMatrix, DVector};
use statrs::distribution::{ContinuousCDF, Normal, StudentsT};

/// Reference distribution for the test statistics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reference {
    /// Student-t with the given degrees of freedom.
    StudentT(f64),
    /// Standard normal (large-sample inference).
    Normal,
}

#[derive(Debug, Clone)]
pub struct CoefficientInference {
    pub std_errors: DVector<f64>,
    pub t_values: DVector<f64>,
    pub p_values: DVector<f64>,
}

/// Derives standard errors, t (or z) statistics and p-values.
///
/// A negative variance on the diagonal yields a NaN standard error rather than
/// an error.
pub fn coefficient_inference(
    coefficients: &DVector<f64>,
    vcov: &DMatrix<f64>,
    reference: Reference,
) -> Result<CoefficientInference, PanelError> {
    let std_errors = DVector::from_fn(coefficients.len(), |j, _| {
        let var = vcov[(j, j)];
        if var >= 0.0 {
            var.sqrt()
        } else {
            f64::NAN
        }
    });
    let t_values = coefficients.component_div(&std_errors);

    let p_values = match reference {
        Reference::StudentT(df) => {
            if df <= 0.0 {
                return Err(PanelError::LinearAlgebra(format!(
                    "residual degrees of freedom must be positive, got {}",
                    df
                )));
            }
            let dist = StudentsT::new(0.0, 1.0, df)
                .map_err(|e| PanelError::LinearAlgebra(e.to_string()))?;
            t_values.map(|t| two_sided(&dist, t))
        }
        Reference::Normal => {
            let dist =
                Normal::new(0.0, 1.0).map_err(|e| PanelError::LinearAlgebra(e.to_string()))?;
            t_values.map(|t| two_sided(&dist, t))
        }
    };

    Ok(CoefficientInference {
        std_errors,
        t_values,
        p_values,
    })
}

fn two_sided<D: ContinuousCDF<f64, f64>>(dist: &D, t: f64) -> f64 {
    if t.is_nan() {
        f64::NAN
    } else {
        2.0 * dist.sf(t.abs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normal_p_value() {
        let b = DVector::from_vec(vec![1.959963984540054]);
        let v = DMatrix::from_element(1, 1, 1.0);
        let inf = coefficient_inference(&b, &v, Reference::Normal).unwrap();
        assert!((inf.p_values[0] - 0.05).abs() < 1e-9);
        assert!((inf.std_errors[0] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_student_t_is_wider_than_normal() {
        let b = DVector::from_vec(vec![2.0]);
        let v = DMatrix::from_element(1, 1, 1.0);
        let t = coefficient_inference(&b, &v, Reference::StudentT(5.0)).unwrap();
        let z = coefficient_inference(&b, &v, Reference::Normal).unwrap();
        assert!(t.p_values[0] > z.p_values[0]);
        // P(|T_5| > 2) = 0.101939...
        assert!((t.p_values[0] - 0.101939).abs() < 1e-5);
    }

    #[test]
    fn test_nonpositive_dof_is_an_error() {
        let b = DVector::from_vec(vec![1.0]);
        let v = DMatrix::from_element(1, 1, 1.0);
        assert!(coefficient_inference(&b, &v, Reference::StudentT(0.0)).is_err());
    }

    #[test]
    fn test_negative_variance_gives_nan() {
        let b = DVector::from_vec(vec![1.0]);
        let v = DMatrix::from_element(1, 1, -1.0);
        let inf = coefficient_inference(&b, &v, Reference::Normal).unwrap();
        assert!(inf.std_errors[0].is_nan());
        assert!(inf.p_values[0].is_nan());
    }
}
