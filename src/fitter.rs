//! the hazard-fitting engine seam.
//!
//! the averaging pipeline only needs "fit these columns, give me a
//! log-likelihood, coefficients and standard errors" - anything that can do
//! that implements [`HazardFitter`]. [`CoxPhFitter`] is the built-in
//! newton-raphson implementation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::data::SurvivalView;
use crate::error::CoxError;
use crate::optimization::{CoxOptimizer, OptimizationConfig, TieMethod};

/// shared flag that cancels a running model-averaging call
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// limits a single fit has to respect, checked cooperatively by the fitter
#[derive(Debug, Clone, Default)]
pub struct FitBudget {
    deadline: Option<Instant>,
    timeout: Option<Duration>,
    cancel: Option<CancelToken>,
}

impl FitBudget {
    /// no deadline, no cancellation
    pub fn unlimited() -> Self {
        Self::default()
    }

    /// deadline starts counting now
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self.timeout = Some(timeout);
        self
    }

    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// err if the fit should stop now
    pub fn check(&self) -> Result<(), CoxError> {
        if self.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
            return Err(CoxError::Cancelled);
        }
        match (self.deadline, self.timeout) {
            (Some(deadline), Some(timeout)) if Instant::now() >= deadline => Err(CoxError::Timeout {
                seconds: timeout.as_secs_f64(),
            }),
            _ => Ok(()),
        }
    }
}

/// result of one proportional-hazards fit, ordered like the view's covariates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoxFit {
    pub covariate_names: Vec<String>,
    pub coefficients: Vec<f64>,
    pub standard_errors: Vec<f64>,
    pub log_likelihood: f64,
}

impl CoxFit {
    /// (name, coefficient) pairs
    pub fn coefficient_pairs(&self) -> impl Iterator<Item = (&str, f64)> + '_ {
        self.covariate_names.iter().map(String::as_str).zip(self.coefficients.iter().copied())
    }

    /// (name, standard error) pairs
    pub fn standard_error_pairs(&self) -> impl Iterator<Item = (&str, f64)> + '_ {
        self.covariate_names.iter().map(String::as_str).zip(self.standard_errors.iter().copied())
    }

    /// exp(coefficients)
    pub fn hazard_ratios(&self) -> Array1<f64> {
        Array1::from(self.coefficients.clone()).mapv(f64::exp)
    }

    /// print out what we learned
    pub fn print(&self) {
        println!("cox proportional hazards fit");
        println!("============================");
        println!("log partial likelihood: {:.6}", self.log_likelihood);
        println!();

        println!(
            "{:<20} {:>12} {:>12} {:>12}",
            "covariate", "coefficient", "se(coef)", "hazard ratio"
        );
        println!("{:-<58}", "");

        for (i, name) in self.covariate_names.iter().enumerate() {
            println!(
                "{:<20} {:>12.6} {:>12.6} {:>12.6}",
                name,
                self.coefficients[i],
                self.standard_errors[i],
                self.coefficients[i].exp()
            );
        }
    }
}

/// anything that can fit a proportional-hazards model to a survival view
pub trait HazardFitter: Send + Sync {
    fn fit(&self, data: &SurvivalView<'_>, budget: &FitBudget) -> Result<CoxFit, CoxError>;
}

impl<F: HazardFitter + ?Sized> HazardFitter for &F {
    fn fit(&self, data: &SurvivalView<'_>, budget: &FitBudget) -> Result<CoxFit, CoxError> {
        (**self).fit(data, budget)
    }
}

/// newton-raphson cox partial likelihood maximizer w/ optional ridge penalty
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CoxPhFitter {
    config: OptimizationConfig,
}

impl CoxPhFitter {
    /// new fitter w/ defaults (efron ties, no penalty)
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: OptimizationConfig) -> Self {
        Self { config }
    }

    /// add ridge penalty (L2) - shrinks coefficients, helps w/ separation
    pub fn with_l2_penalty(mut self, penalty: f64) -> Self {
        self.config.l2_penalty = penalty.max(0.0);
        self
    }

    /// max newton iterations before giving up
    pub fn with_max_iterations(mut self, max_iter: usize) -> Self {
        self.config.max_iterations = max_iter;
        self
    }

    /// how close is close enough for convergence
    pub fn with_tolerance(mut self, tol: f64) -> Self {
        self.config.tolerance = tol;
        self
    }

    pub fn with_ties(mut self, ties: TieMethod) -> Self {
        self.config.ties = ties;
        self
    }

    pub fn config(&self) -> &OptimizationConfig {
        &self.config
    }
}

impl HazardFitter for CoxPhFitter {
    fn fit(&self, data: &SurvivalView<'_>, budget: &FitBudget) -> Result<CoxFit, CoxError> {
        let covariates = data.covariate_matrix();
        let events = data.events();

        let solution = CoxOptimizer::new(self.config.clone()).optimize(
            data.times(),
            &events,
            covariates.view(),
            budget,
        )?;

        log::trace!(
            "newton-raphson converged in {} iterations (loglik {:.4})",
            solution.iterations,
            solution.log_likelihood
        );

        Ok(CoxFit {
            covariate_names: data.covariate_names(),
            coefficients: solution.beta.to_vec(),
            standard_errors: solution.covariance.diag().mapv(f64::sqrt).to_vec(),
            log_likelihood: solution.log_likelihood,
        })
    }
}
