//! Bernoulli-SBM variational kernels.
//!
//! The four {undirected, directed} × {no-covariate, covariate} families
//! of lower-bound, E-step and M-step routines. The no-covariate forms
//! are closed bilinear expressions in Z, θ and π computed with
//! sparse × dense products; both triangles of an undirected network are
//! stored, hence the 1/2 factor. The covariate forms have no closed
//! matrix expression (the covariate enters through a per-dyad logistic
//! link) and are accumulated by explicit passes over the nonzero
//! triplets, visiting only `row > col` for undirected data.

use nalgebra::{DMatrix, DVector, RowDVector};
use nalgebra_sparse::csc::CscMatrix;
use net_data::Covariates;

use crate::error::MissNetError;
use crate::optim;

/// Connectivity probabilities are clamped to this open interval so that
/// log-odds stay finite.
pub const THETA_FLOOR: f64 = 1e-9;

/// Clamp a Bernoulli connectivity matrix away from {0, 1}.
pub fn clamp_theta(theta: &mut DMatrix<f64>) {
    for v in theta.iter_mut() {
        *v = v.clamp(THETA_FLOOR, 1.0 - THETA_FLOOR);
    }
}

pub(crate) fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Numerically stable log(1 + exp(x)).
pub(crate) fn log1pexp(x: f64) -> f64 {
    if x > 35.0 {
        x
    } else {
        x.exp().ln_1p()
    }
}

fn log_odds(theta: &DMatrix<f64>) -> DMatrix<f64> {
    theta.map(|t| (t / (1.0 - t)).ln())
}

fn log_one_minus(theta: &DMatrix<f64>) -> DMatrix<f64> {
    theta.map(|t| (1.0 - t).ln())
}

fn log_pi_row(pi: &DVector<f64>) -> RowDVector<f64> {
    RowDVector::from_iterator(pi.len(), pi.iter().map(|&p| p.max(THETA_FLOOR).ln()))
}

/// In-place numerically stable row softmax: subtract the row max before
/// exponentiating, then renormalize each row to a probability simplex.
pub fn row_softmax(log_tau: &mut DMatrix<f64>) {
    for mut row in log_tau.row_iter_mut() {
        let max = row.max();
        let mut sum = 0.0;
        for v in row.iter_mut() {
            *v = (*v - max).exp();
            sum += *v;
        }
        for v in row.iter_mut() {
            *v /= sum;
        }
    }
}

/// Entropy of the variational posterior, -sum Z log Z (0 log 0 = 0).
pub fn entropy(z: &DMatrix<f64>) -> f64 {
    -z.iter()
        .filter(|&&v| v > 0.0)
        .map(|&v| v * v.ln())
        .sum::<f64>()
}

// ----------------------------------------------------------------
// lower bound of the expectation of the complete log-likelihood

/// Closed-form bound for the no-covariate Bernoulli SBM.
pub fn lower_bound(
    y: &CscMatrix<f64>,
    r: &CscMatrix<f64>,
    z: &DMatrix<f64>,
    theta: &DMatrix<f64>,
    pi: &DVector<f64>,
    directed: bool,
) -> f64 {
    let factor = if directed { 1.0 } else { 0.5 };
    let yz: DMatrix<f64> = y * z;
    let rz: DMatrix<f64> = r * z;
    let zt_y_z = z.transpose() * yz;
    let zt_r_z = z.transpose() * rz;

    let log_pi = log_pi_row(pi);
    let prior: f64 = z
        .row_iter()
        .map(|row| row.iter().zip(log_pi.iter()).map(|(&a, &b)| a * b).sum::<f64>())
        .sum();

    factor
        * (zt_y_z.component_mul(&log_odds(theta)).sum()
            + zt_r_z.component_mul(&log_one_minus(theta)).sum())
        + prior
}

/// Triplet-accumulated bound for the covariate Bernoulli SBM.
///
/// `phi` holds the dyad covariate effects `beta . x_ij`.
pub fn lower_bound_covariates(
    y: &CscMatrix<f64>,
    r: &CscMatrix<f64>,
    phi: &DMatrix<f64>,
    z: &DMatrix<f64>,
    gamma: &DMatrix<f64>,
    pi: &DVector<f64>,
    directed: bool,
) -> f64 {
    let q = z.ncols();
    let log_pi = log_pi_row(pi);
    let mut loglik: f64 = z
        .row_iter()
        .map(|row| row.iter().zip(log_pi.iter()).map(|(&a, &b)| a * b).sum::<f64>())
        .sum();

    for (i, j, _) in y.triplet_iter() {
        if !directed && i <= j {
            continue;
        }
        for qq in 0..q {
            for l in 0..q {
                loglik += z[(i, qq)] * z[(j, l)] * (gamma[(qq, l)] + phi[(i, j)]);
            }
        }
    }

    for (i, j, _) in r.triplet_iter() {
        if !directed && i <= j {
            continue;
        }
        for qq in 0..q {
            for l in 0..q {
                loglik -= z[(i, qq)] * z[(j, l)] * log1pexp(gamma[(qq, l)] + phi[(i, j)]);
            }
        }
    }

    loglik
}

// ----------------------------------------------------------------
// MAXIMIZATION STEP

/// Closed-form connectivity update: θ_ql = (ZᵀYZ)_ql / (ZᵀRZ)_ql.
///
/// Block pairs with no expected observed dyad carry no information and
/// are pinned at the clamp floor.
pub fn m_step(y: &CscMatrix<f64>, r: &CscMatrix<f64>, z: &DMatrix<f64>) -> DMatrix<f64> {
    let yz: DMatrix<f64> = y * z;
    let rz: DMatrix<f64> = r * z;
    let num = z.transpose() * yz;
    let den = z.transpose() * rz;

    let mut theta = DMatrix::from_fn(num.nrows(), num.ncols(), |i, j| {
        if den[(i, j)] > 1e-12 {
            num[(i, j)] / den[(i, j)]
        } else {
            THETA_FLOOR
        }
    });
    clamp_theta(&mut theta);
    theta
}

/// Block proportion update: column means of Z, floored away from zero.
pub fn pi_update(z: &DMatrix<f64>) -> DVector<f64> {
    let n = z.nrows() as f64;
    DVector::from_iterator(
        z.ncols(),
        z.column_iter().map(|c| (c.sum() / n).max(THETA_FLOOR)),
    )
}

/// Gradient-based M-step for the covariate SBM.
///
/// Maximizes the complete-data likelihood over the Q×Q connectivity
/// offsets γ and the covariate coefficients β, with the analytic
/// gradient `Z_i ⊗ Z_j (Y_ij − σ(γ_ql + β·x_ij))` accumulated per
/// observed dyad (objective and gradient negated for the minimizer).
#[allow(clippy::too_many_arguments)]
pub fn m_step_covariates(
    y_dense: &DMatrix<f64>,
    r: &CscMatrix<f64>,
    covariates: &Covariates,
    z: &DMatrix<f64>,
    gamma0: &DMatrix<f64>,
    beta0: &[f64],
    directed: bool,
) -> Result<(DMatrix<f64>, Vec<f64>), MissNetError> {
    let q = z.ncols();
    let k = covariates.count();

    let mut x0 = ndarray::Array1::<f64>::zeros(q * q + k);
    for (idx, &g) in gamma0.iter().enumerate() {
        x0[idx] = g;
    }
    for m in 0..k {
        x0[q * q + m] = beta0[m];
    }

    // collect the visited triplets once; the closure runs many times
    let dyads: Vec<(usize, usize)> = r
        .triplet_iter()
        .filter(|&(i, j, _)| directed || i > j)
        .map(|(i, j, _)| (i, j))
        .collect();

    let cost_and_grad = move |param: &ndarray::Array1<f64>| -> (f64, ndarray::Array1<f64>) {
        let mut loglik = 0.0;
        let mut grad = ndarray::Array1::<f64>::zeros(q * q + k);

        for &(i, j) in &dyads {
            let x_ij = covariates.dyad_vector(i, j);
            let mu: f64 = x_ij
                .iter()
                .enumerate()
                .map(|(m, &x)| param[q * q + m] * x)
                .sum();
            let y_ij = y_dense[(i, j)];

            let mut delta_sum = 0.0;
            for l in 0..q {
                for qq in 0..q {
                    // gamma stored column-major, matching DMatrix layout
                    let gamma_ql = param[l * q + qq];
                    let zz = z[(i, qq)] * z[(j, l)];
                    let lin = gamma_ql + mu;
                    loglik += zz * (y_ij * lin - log1pexp(lin));
                    let delta = zz * (y_ij - sigmoid(lin));
                    grad[l * q + qq] += delta;
                    delta_sum += delta;
                }
            }
            for (m, &x) in x_ij.iter().enumerate() {
                grad[q * q + m] += delta_sum * x;
            }
        }

        (-loglik, -grad)
    };

    let solution = optim::minimize(x0, cost_and_grad, 1e-6, 100)?;

    let gamma = DMatrix::from_fn(q, q, |i, j| solution[j * q + i]);
    let beta: Vec<f64> = (0..k).map(|m| solution[q * q + m]).collect();
    Ok((gamma, beta))
}

// ----------------------------------------------------------------
// EXPECTATION STEP

/// No-covariate E-step: refresh the responsibilities from the current
/// state. `log_lambda` injects a per-node sampling contribution when
/// doing joint SBM + sampling inference.
pub fn e_step(
    y: &CscMatrix<f64>,
    r: &CscMatrix<f64>,
    z: &DMatrix<f64>,
    theta: &DMatrix<f64>,
    pi: &DVector<f64>,
    log_lambda: Option<&DMatrix<f64>>,
    directed: bool,
) -> DMatrix<f64> {
    let lo = log_odds(theta);
    let lm = log_one_minus(theta);

    let yz: DMatrix<f64> = y * z;
    let rz: DMatrix<f64> = r * z;

    let mut log_tau = if directed {
        let yt = y.transpose();
        let rt = r.transpose();
        let ytz: DMatrix<f64> = &yt * z;
        let rtz: DMatrix<f64> = &rt * z;
        &yz * lo.transpose() + &rz * lm.transpose() + ytz * &lo + rtz * &lm
    } else {
        // theta is symmetric here, no transposed terms needed
        &yz * &lo + &rz * &lm
    };

    finish_e_step(&mut log_tau, pi, log_lambda);
    log_tau
}

/// Covariate E-step: per-dyad logistic terms accumulated over the
/// observed triplets. The `Y_ij · φ_ij` part is constant in the block
/// index and drops in the row softmax.
#[allow(clippy::too_many_arguments)]
pub fn e_step_covariates(
    y: &CscMatrix<f64>,
    r: &CscMatrix<f64>,
    phi: &DMatrix<f64>,
    z: &DMatrix<f64>,
    gamma: &DMatrix<f64>,
    pi: &DVector<f64>,
    log_lambda: Option<&DMatrix<f64>>,
    directed: bool,
) -> DMatrix<f64> {
    let q = z.ncols();
    let yz: DMatrix<f64> = y * z;

    let mut log_tau = if directed {
        let yt = y.transpose();
        let ytz: DMatrix<f64> = &yt * z;
        &yz * gamma.transpose() + ytz * gamma
    } else {
        yz * gamma
    };

    // Both triangles are present in R for undirected networks, so one
    // pass over the triplets updates every row node. A directed dyad
    // i -> j additionally corrects its target node through the
    // transposed block pair.
    for (i, j, _) in r.triplet_iter() {
        for qq in 0..q {
            let mut acc = 0.0;
            for l in 0..q {
                acc += z[(j, l)] * log1pexp(gamma[(qq, l)] + phi[(i, j)]);
            }
            log_tau[(i, qq)] -= acc;
        }
        if directed {
            for qq in 0..q {
                let mut acc = 0.0;
                for l in 0..q {
                    acc += z[(i, l)] * log1pexp(gamma[(l, qq)] + phi[(i, j)]);
                }
                log_tau[(j, qq)] -= acc;
            }
        }
    }

    finish_e_step(&mut log_tau, pi, log_lambda);
    log_tau
}

fn finish_e_step(
    log_tau: &mut DMatrix<f64>,
    pi: &DVector<f64>,
    log_lambda: Option<&DMatrix<f64>>,
) {
    let log_pi = log_pi_row(pi);
    for mut row in log_tau.row_iter_mut() {
        row += &log_pi;
    }
    if let Some(ll) = log_lambda {
        *log_tau += ll;
    }
    row_softmax(log_tau);
}

#[cfg(test)]
pub(crate) mod test_util {
    use nalgebra::DMatrix;
    use nalgebra_sparse::{coo::CooMatrix, csc::CscMatrix};

    pub fn csc_from_dense(dense: &DMatrix<f64>) -> CscMatrix<f64> {
        let mut coo = CooMatrix::new(dense.nrows(), dense.ncols());
        for j in 0..dense.ncols() {
            for i in 0..dense.nrows() {
                if dense[(i, j)] != 0.0 {
                    coo.push(i, j, dense[(i, j)]);
                }
            }
        }
        CscMatrix::from(&coo)
    }
}

#[cfg(test)]
mod tests {
    use super::test_util::csc_from_dense;
    use super::*;
    use approx::assert_abs_diff_eq;
    use nalgebra::{DMatrix, DVector};

    fn toy_undirected() -> (CscMatrix<f64>, CscMatrix<f64>, DMatrix<f64>) {
        // 4 nodes, two clear pairs: (0,1) and (2,3) linked
        let mut y = DMatrix::zeros(4, 4);
        y[(0, 1)] = 1.0;
        y[(1, 0)] = 1.0;
        y[(2, 3)] = 1.0;
        y[(3, 2)] = 1.0;
        let mut r = DMatrix::from_element(4, 4, 1.0);
        for i in 0..4 {
            r[(i, i)] = 0.0;
        }
        let z = DMatrix::from_row_slice(
            4,
            2,
            &[0.9, 0.1, 0.9, 0.1, 0.1, 0.9, 0.1, 0.9],
        );
        (csc_from_dense(&y), csc_from_dense(&r), z)
    }

    #[test]
    fn m_step_matches_expected_ratios() {
        let (y, r, _) = toy_undirected();
        let z = DMatrix::from_row_slice(4, 2, &[1.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 1.0]);
        let theta = m_step(&y, &r, &z);
        // within each block: 1 edge out of 1 dyad
        assert!(theta[(0, 0)] > 0.99);
        assert!(theta[(1, 1)] > 0.99);
        // across blocks: 0 edges out of 4 dyads
        assert!(theta[(0, 1)] < 1e-6);
    }

    #[test]
    fn e_step_rows_are_simplices() {
        let (y, r, z) = toy_undirected();
        let mut theta = DMatrix::from_row_slice(2, 2, &[0.8, 0.1, 0.1, 0.8]);
        clamp_theta(&mut theta);
        let pi = DVector::from_vec(vec![0.5, 0.5]);

        let tau = e_step(&y, &r, &z, &theta, &pi, None, false);
        for row in tau.row_iter() {
            assert_abs_diff_eq!(row.sum(), 1.0, epsilon = 1e-12);
            assert!(row.iter().all(|&v| (0.0..=1.0).contains(&v)));
        }
    }

    #[test]
    fn bound_matches_brute_force_undirected() {
        let (y, r, z) = toy_undirected();
        let mut theta = DMatrix::from_row_slice(2, 2, &[0.7, 0.2, 0.2, 0.7]);
        clamp_theta(&mut theta);
        let pi = DVector::from_vec(vec![0.4, 0.6]);

        let fast = lower_bound(&y, &r, &z, &theta, &pi, false);

        // explicit loop over unordered dyads
        let y_dense = DMatrix::from_fn(4, 4, |i, j| {
            if (i, j) == (0, 1) || (i, j) == (1, 0) || (i, j) == (2, 3) || (i, j) == (3, 2) {
                1.0
            } else {
                0.0
            }
        });
        let mut slow = 0.0;
        for i in 0..4 {
            for j in 0..i {
                for qq in 0..2 {
                    for l in 0..2 {
                        let zz = z[(i, qq)] * z[(j, l)];
                        let t: f64 = theta[(qq, l)];
                        slow += zz * y_dense[(i, j)] * (t / (1.0 - t)).ln();
                        slow += zz * (1.0 - t).ln();
                    }
                }
            }
        }
        for i in 0..4 {
            for qq in 0..2 {
                slow += z[(i, qq)] * pi[qq].ln();
            }
        }

        assert_abs_diff_eq!(fast, slow, epsilon = 1e-10);
    }

    #[test]
    fn directed_bound_has_no_half_factor() {
        // a fully asymmetric toy: edge 0 -> 1 only
        let mut y = DMatrix::zeros(3, 3);
        y[(0, 1)] = 1.0;
        let mut r = DMatrix::from_element(3, 3, 1.0);
        for i in 0..3 {
            r[(i, i)] = 0.0;
        }
        let (ys, rs) = (csc_from_dense(&y), csc_from_dense(&r));
        let z = DMatrix::from_element(3, 2, 0.5);
        let mut theta = DMatrix::from_row_slice(2, 2, &[0.6, 0.3, 0.2, 0.5]);
        clamp_theta(&mut theta);
        let pi = DVector::from_vec(vec![0.5, 0.5]);

        let fast = lower_bound(&ys, &rs, &z, &theta, &pi, true);

        let mut slow = 0.0;
        for i in 0..3 {
            for j in 0..3 {
                if i == j {
                    continue;
                }
                for qq in 0..2 {
                    for l in 0..2 {
                        let zz = z[(i, qq)] * z[(j, l)];
                        let t: f64 = theta[(qq, l)];
                        slow += zz * y[(i, j)] * (t / (1.0 - t)).ln();
                        slow += zz * (1.0 - t).ln();
                    }
                }
            }
        }
        slow += 3.0 * (0.5 * pi[0].ln() + 0.5 * pi[1].ln());

        assert_abs_diff_eq!(fast, slow, epsilon = 1e-10);
    }

    #[test]
    fn covariate_bound_reduces_to_plain_when_phi_zero() {
        // with phi = 0 and gamma = logit(theta), both bounds agree
        let (y, r, z) = toy_undirected();
        let mut theta = DMatrix::from_row_slice(2, 2, &[0.7, 0.2, 0.2, 0.7]);
        clamp_theta(&mut theta);
        let pi = DVector::from_vec(vec![0.5, 0.5]);
        let gamma = theta.map(|t| (t / (1.0 - t)).ln());
        let phi = DMatrix::zeros(4, 4);

        let plain = lower_bound(&y, &r, &z, &theta, &pi, false);
        let covar = lower_bound_covariates(&y, &r, &phi, &z, &gamma, &pi, false);
        assert_abs_diff_eq!(plain, covar, epsilon = 1e-10);
    }

    #[test]
    fn covariate_e_step_matches_plain_when_phi_zero() {
        let (y, r, z) = toy_undirected();
        let mut theta = DMatrix::from_row_slice(2, 2, &[0.8, 0.1, 0.1, 0.8]);
        clamp_theta(&mut theta);
        let pi = DVector::from_vec(vec![0.5, 0.5]);
        let gamma = theta.map(|t| (t / (1.0 - t)).ln());
        let phi = DMatrix::zeros(4, 4);

        let plain = e_step(&y, &r, &z, &theta, &pi, None, false);
        let covar = e_step_covariates(&y, &r, &phi, &z, &gamma, &pi, None, false);
        for (a, b) in plain.iter().zip(covar.iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-10);
        }
    }

    #[test]
    fn entropy_of_hard_assignment_is_zero() {
        let z = DMatrix::from_row_slice(2, 2, &[1.0, 0.0, 0.0, 1.0]);
        assert_abs_diff_eq!(entropy(&z), 0.0);
        let soft = DMatrix::from_element(2, 2, 0.5);
        assert!(entropy(&soft) > 0.0);
    }

    #[test]
    fn theta_clamp_keeps_log_odds_finite() {
        let mut theta = DMatrix::from_row_slice(2, 2, &[0.0, 1.0, 0.5, 0.5]);
        clamp_theta(&mut theta);
        assert!(theta.iter().all(|&t| t > 0.0 && t < 1.0));
        assert!(theta.map(|t| (t / (1.0 - t)).ln()).iter().all(|v| v.is_finite()));
    }
}
