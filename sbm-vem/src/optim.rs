//! Thin wrapper around the BFGS optimizer.
//!
//! Used by the covariate M-step and the logistic MAR estimators. The
//! parameter vectors cross into `ndarray::Array1` at this seam only;
//! everything else in the crate speaks nalgebra.

use ndarray::Array1;
use wolfe_bfgs::{Bfgs, BfgsSolution};

use crate::error::MissNetError;

/// Minimize `cost_and_grad` starting from `x0`.
///
/// Non-finite costs are replaced by a large finite value so a stray
/// overflow in a line search does not abort the whole fit.
pub fn minimize<F>(
    x0: Array1<f64>,
    cost_and_grad: F,
    tolerance: f64,
    max_iterations: usize,
) -> Result<Array1<f64>, MissNetError>
where
    F: Fn(&Array1<f64>) -> (f64, Array1<f64>),
{
    let guarded = move |x: &Array1<f64>| -> (f64, Array1<f64>) {
        let (cost, grad) = cost_and_grad(x);
        if cost.is_finite() {
            (cost, grad)
        } else {
            (1e10, grad.map(|g| if g.is_finite() { *g } else { 0.0 }))
        }
    };

    let BfgsSolution { final_point, .. } = Bfgs::new(x0, guarded)
        .with_tolerance(tolerance)
        .with_max_iterations(max_iterations)
        .run()
        .map_err(|e| MissNetError::Numerical(format!("BFGS failed: {e:?}")))?;

    Ok(final_point)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn minimizes_a_quadratic() {
        let x0 = Array1::from_vec(vec![5.0, -3.0]);
        let sol = minimize(
            x0,
            |x| {
                let cost = (x[0] - 1.0).powi(2) + (x[1] + 2.0).powi(2);
                let grad = Array1::from_vec(vec![2.0 * (x[0] - 1.0), 2.0 * (x[1] + 2.0)]);
                (cost, grad)
            },
            1e-10,
            100,
        )
        .unwrap();
        assert_abs_diff_eq!(sol[0], 1.0, epsilon = 1e-5);
        assert_abs_diff_eq!(sol[1], -2.0, epsilon = 1e-5);
    }

    #[test]
    fn recovers_logistic_regression_coefficients() {
        // 1-d logistic model with known separation direction
        let xs: Vec<f64> = (0..40).map(|i| (i as f64 - 20.0) / 5.0).collect();
        let ys: Vec<f64> = xs.iter().map(|&x| if x > 0.0 { 1.0 } else { 0.0 }).collect();

        let sol = minimize(
            Array1::zeros(1),
            |b| {
                let mut cost = 0.0;
                let mut grad = 0.0;
                for (&x, &y) in xs.iter().zip(ys.iter()) {
                    let eta = b[0] * x;
                    let p = 1.0 / (1.0 + (-eta).exp());
                    cost -= y * eta - (1.0 + eta.exp()).ln();
                    grad -= (y - p) * x;
                }
                // mild ridge keeps the separable problem bounded
                cost += 0.01 * b[0] * b[0];
                grad += 0.02 * b[0];
                (cost, Array1::from_vec(vec![grad]))
            },
            1e-8,
            200,
        )
        .unwrap();
        assert!(sol[0] > 1.0, "slope should be strongly positive: {}", sol[0]);
    }
}
