use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::error::CoxError;
use crate::fitter::FitBudget;

type Result<T> = std::result::Result<T, CoxError>;

/// how tied event times share the risk set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieMethod {
    /// efron approximation - tied events leave the risk set gradually
    #[default]
    Efron,
    /// breslow approximation - every tied event sees the full risk set
    Breslow,
}

/// Configuration for Cox model optimization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OptimizationConfig {
    pub l2_penalty: f64,
    pub max_iterations: usize,
    pub tolerance: f64,
    pub ties: TieMethod,
    pub max_step_halvings: usize,
}

impl Default for OptimizationConfig {
    fn default() -> Self {
        Self {
            l2_penalty: 0.0,
            max_iterations: 100,
            tolerance: 1e-9,
            ties: TieMethod::Efron,
            max_step_halvings: 30,
        }
    }
}

/// converged newton-raphson solution
#[derive(Debug, Clone)]
pub struct Solution {
    pub beta: Array1<f64>,
    /// unpenalized log partial likelihood at beta
    pub log_likelihood: f64,
    /// inverse of the (penalized) observed information at beta
    pub covariance: Array2<f64>,
    pub iterations: usize,
}

/// log partial likelihood, gradient and hessian at one beta
#[derive(Debug, Clone)]
struct Derivatives {
    loglik: f64,
    gradient: Array1<f64>,
    hessian: Array2<f64>,
}

pub struct CoxOptimizer {
    config: OptimizationConfig,
}

impl CoxOptimizer {
    pub fn new(config: OptimizationConfig) -> Self {
        Self { config }
    }

    /// maximize the cox partial likelihood for the given design
    pub fn optimize(
        &self,
        times: ArrayView1<f64>,
        events: &[bool],
        covariates: ArrayView2<f64>,
        budget: &FitBudget,
    ) -> Result<Solution> {
        let n_samples = times.len();
        let n_features = covariates.ncols();

        if events.len() != n_samples || covariates.nrows() != n_samples {
            return Err(CoxError::invalid_dimensions(format!(
                "times ({}), events ({}) and covariate rows ({}) disagree",
                n_samples,
                events.len(),
                covariates.nrows()
            )));
        }
        if n_features == 0 {
            return Err(CoxError::invalid_dimensions("need at least one covariate"));
        }
        if !events.iter().any(|&e| e) {
            return Err(CoxError::invalid_survival_data("no observed events"));
        }

        // centering leaves beta and the partial likelihood unchanged but keeps exp() tame
        let means = covariates
            .mean_axis(Axis(0))
            .ok_or_else(|| CoxError::invalid_dimensions("empty covariate matrix"))?;
        let centered = &covariates - &means;
        let risk_order = descending_time_order(times);

        let mut beta = Array1::zeros(n_features);
        let mut current = self.derivatives(times, events, &centered, &risk_order, &beta)?;

        for iteration in 1..=self.config.max_iterations {
            budget.check()?;

            let (penalized_loglik, gradient, information) = self.penalize(&current, &beta);
            let delta = solve_linear_system(&information, &gradient)?;

            if delta.iter().all(|d| d.abs() < self.config.tolerance) {
                return self.finish(beta, &current, iteration);
            }

            // step halving until the penalized likelihood doesn't get worse
            let mut step = 1.0_f64;
            let mut accepted = None;
            for _ in 0..=self.config.max_step_halvings {
                let candidate = &beta + &(step * &delta);
                let next = self.derivatives(times, events, &centered, &risk_order, &candidate);
                if let Ok(next) = next {
                    let next_penalized = next.loglik - self.ridge_term(&candidate);
                    if next_penalized >= penalized_loglik - 1e-12 * penalized_loglik.abs() {
                        accepted = Some((candidate, next, next_penalized));
                        break;
                    }
                }
                step *= 0.5;
            }

            let Some((candidate, next, next_penalized)) = accepted else {
                return Err(CoxError::optimization_failed(format!(
                    "line search stalled at iteration {}",
                    iteration
                )));
            };

            let improvement = next_penalized - penalized_loglik;
            beta = candidate;
            current = next;

            if improvement.abs() < self.config.tolerance {
                return self.finish(beta, &current, iteration);
            }
        }

        Err(CoxError::optimization_failed(format!(
            "Newton-Raphson failed to converge in {} iterations",
            self.config.max_iterations
        )))
    }

    fn ridge_term(&self, beta: &Array1<f64>) -> f64 {
        0.5 * self.config.l2_penalty * beta.dot(beta)
    }

    /// penalized loglik, penalized gradient and penalized information (-hessian)
    fn penalize(&self, d: &Derivatives, beta: &Array1<f64>) -> (f64, Array1<f64>, Array2<f64>) {
        let penalized_loglik = d.loglik - self.ridge_term(beta);
        let gradient = &d.gradient - &(self.config.l2_penalty * beta);
        let mut information = -&d.hessian;
        for i in 0..beta.len() {
            information[[i, i]] += self.config.l2_penalty;
        }
        (penalized_loglik, gradient, information)
    }

    fn finish(&self, beta: Array1<f64>, d: &Derivatives, iterations: usize) -> Result<Solution> {
        let (_, _, information) = self.penalize(d, &beta);
        let covariance = invert(&information)?;

        if covariance.diag().iter().any(|&v| !v.is_finite() || v <= 0.0) {
            return Err(CoxError::numerical_error(
                "information matrix is not positive definite at the optimum",
            ));
        }

        Ok(Solution {
            beta,
            log_likelihood: d.loglik,
            covariance,
            iterations,
        })
    }

    /// Compute log partial likelihood and its derivatives
    ///
    /// walks subjects from the latest time to the earliest so the risk set
    /// sums only ever grow. with efron ties the l-th of d tied events sees
    /// the risk set minus l/d of the tied events' own contribution.
    fn derivatives(
        &self,
        times: ArrayView1<f64>,
        events: &[bool],
        x: &Array2<f64>,
        order: &[usize],
        beta: &Array1<f64>,
    ) -> Result<Derivatives> {
        let p = beta.len();
        let eta = x.dot(beta);

        let mut loglik = 0.0;
        let mut gradient = Array1::<f64>::zeros(p);
        let mut hessian = Array2::<f64>::zeros((p, p));

        // running risk set sums
        let mut s0 = 0.0;
        let mut s1 = Array1::<f64>::zeros(p);
        let mut s2 = Array2::<f64>::zeros((p, p));

        let mut start = 0;
        while start < order.len() {
            let time = times[order[start]];
            let mut end = start;
            while end < order.len() && times[order[end]] == time {
                end += 1;
            }

            // tied-event sums at this time
            let mut d = 0usize;
            let mut d0 = 0.0;
            let mut d1 = Array1::<f64>::zeros(p);
            let mut d2 = Array2::<f64>::zeros((p, p));

            for &i in &order[start..end] {
                let w = eta[i].exp();
                if !w.is_finite() {
                    return Err(CoxError::numerical_error(format!(
                        "linear predictor overflowed ({})",
                        eta[i]
                    )));
                }
                let xi = x.row(i);
                let outer = outer_product(xi, w);

                s0 += w;
                s1.scaled_add(w, &xi);
                s2 += &outer;

                if events[i] {
                    d += 1;
                    d0 += w;
                    d1.scaled_add(w, &xi);
                    d2 += &outer;
                    loglik += eta[i];
                    gradient += &xi;
                }
            }

            for l in 0..d {
                let frac = match self.config.ties {
                    TieMethod::Efron => l as f64 / d as f64,
                    TieMethod::Breslow => 0.0,
                };
                let phi = s0 - frac * d0;
                if phi <= 0.0 || !phi.is_finite() {
                    return Err(CoxError::numerical_error("Risk set sum is non-positive"));
                }
                let mean = (&s1 - &(frac * &d1)) / phi;
                let second = (&s2 - &(frac * &d2)) / phi;

                loglik -= phi.ln();
                gradient -= &mean;
                hessian -= &(second - outer_product(mean.view(), 1.0));
            }

            start = end;
        }

        if !loglik.is_finite() {
            return Err(CoxError::numerical_error("log partial likelihood is not finite"));
        }

        Ok(Derivatives { loglik, gradient, hessian })
    }
}

fn descending_time_order(times: ArrayView1<f64>) -> Vec<usize> {
    let mut order: Vec<usize> = (0..times.len()).collect();
    order.sort_by(|&a, &b| times[b].total_cmp(&times[a]));
    order
}

fn outer_product(v: ArrayView1<f64>, scale: f64) -> Array2<f64> {
    let n = v.len();
    Array2::from_shape_fn((n, n), |(j, k)| scale * v[j] * v[k])
}

/// Solve linear system Ax = b by gaussian elimination w/ partial pivoting
pub fn solve_linear_system(a: &Array2<f64>, b: &Array1<f64>) -> Result<Array1<f64>> {
    let rhs = b.clone().insert_axis(Axis(1));
    Ok(solve_columns(a, rhs)?.column(0).to_owned())
}

/// Invert a square matrix
pub fn invert(a: &Array2<f64>) -> Result<Array2<f64>> {
    solve_columns(a, Array2::eye(a.nrows()))
}

// solves A X = B for every column of B at once
fn solve_columns(a: &Array2<f64>, mut b: Array2<f64>) -> Result<Array2<f64>> {
    let n = a.nrows();
    if n != a.ncols() || n != b.nrows() {
        return Err(CoxError::invalid_dimensions("Matrix dimensions mismatch"));
    }

    let mut a = a.clone();
    let scale = a.iter().fold(0.0_f64, |m, v| m.max(v.abs())).max(f64::MIN_POSITIVE);

    // Forward elimination
    for i in 0..n {
        let pivot_row = (i..n)
            .max_by(|&r, &s| a[[r, i]].abs().total_cmp(&a[[s, i]].abs()))
            .unwrap_or(i);

        if a[[pivot_row, i]].abs() < 1e-12 * scale {
            return Err(CoxError::numerical_error(
                "Matrix is singular - covariates are not identifiable",
            ));
        }

        if pivot_row != i {
            for j in 0..n {
                a.swap([i, j], [pivot_row, j]);
            }
            for j in 0..b.ncols() {
                b.swap([i, j], [pivot_row, j]);
            }
        }

        for k in i + 1..n {
            let factor = a[[k, i]] / a[[i, i]];
            if factor == 0.0 {
                continue;
            }
            for j in i..n {
                a[[k, j]] -= factor * a[[i, j]];
            }
            for j in 0..b.ncols() {
                b[[k, j]] -= factor * b[[i, j]];
            }
        }
    }

    // Back substitution
    let mut x = Array2::zeros(b.raw_dim());
    for c in 0..b.ncols() {
        for i in (0..n).rev() {
            let mut value = b[[i, c]];
            for j in i + 1..n {
                value -= a[[i, j]] * x[[j, c]];
            }
            x[[i, c]] = value / a[[i, i]];
        }
    }

    Ok(x)
}
