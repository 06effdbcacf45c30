use std::collections::BTreeMap;
use std::sync::OnceLock;

use crate::{
    data::{Dataset, SurvivalView},
    error::{BmaError, CoxError, Result},
    fitter::{CoxFit, FitBudget, HazardFitter},
    model_space::CovariateSubset,
    prior::PriorSpecification,
};

/// one covariate subset's coefficient (or variance) by name
pub type CoefficientTable = BTreeMap<String, f64>;

/// one candidate cox model over a fixed covariate subset
///
/// the fit is deferred until the log-likelihood or summary is first asked
/// for, then memoized - fitting is deterministic so the cache never goes stale.
pub struct HazardModel<'a, F: HazardFitter + ?Sized> {
    view: SurvivalView<'a>,
    subset: CovariateSubset,
    all_covariates: Vec<String>, // full covariate ordering, for the prior
    prior: &'a PriorSpecification,
    reference_loglik: Option<f64>,
    fitter: &'a F,
    budget: FitBudget,
    fitted: OnceLock<CoxFit>,
}

impl<'a, F: HazardFitter + ?Sized> HazardModel<'a, F> {
    /// `covariates = None` means every non-reserved column (the full model)
    pub fn new(
        dataset: &'a Dataset,
        duration_col: &str,
        event_col: &str,
        prior: &'a PriorSpecification,
        reference_loglik: Option<f64>,
        covariates: Option<CovariateSubset>,
        fitter: &'a F,
    ) -> Result<Self> {
        let all_covariates = dataset.covariate_names(duration_col, event_col);
        prior.validate_against(&all_covariates)?;

        let subset = covariates.unwrap_or_else(|| CovariateSubset::new(all_covariates.clone()));
        let view = dataset
            .survival_view(duration_col, event_col, subset.names())
            .map_err(|source| BmaError::fit(subset.clone(), source))?;

        Ok(Self {
            view,
            subset,
            all_covariates,
            prior,
            reference_loglik,
            fitter,
            budget: FitBudget::unlimited(),
            fitted: OnceLock::new(),
        })
    }

    /// limits (timeout, cancellation) applied when the fit runs
    pub fn with_budget(mut self, budget: FitBudget) -> Self {
        self.budget = budget;
        self
    }

    pub fn subset(&self) -> &CovariateSubset {
        &self.subset
    }

    pub fn n_samples(&self) -> usize {
        self.view.n_samples()
    }

    pub fn is_fitted(&self) -> bool {
        self.fitted.get().is_some()
    }

    fn fit_result(&self) -> Result<&CoxFit> {
        if let Some(fit) = self.fitted.get() {
            return Ok(fit);
        }
        if self.subset.is_empty() {
            return Err(BmaError::fit(
                self.subset.clone(),
                CoxError::invalid_dimensions("model has no covariates"),
            ));
        }

        let fit = self
            .fitter
            .fit(&self.view, &self.budget)
            .map_err(|source| BmaError::fit(self.subset.clone(), source))?;

        let k = self.subset.len();
        if fit.coefficients.len() != k || fit.standard_errors.len() != k {
            return Err(BmaError::fit(
                self.subset.clone(),
                CoxError::invalid_dimensions(format!(
                    "fitter returned {} coefficients and {} standard errors for {} covariates",
                    fit.coefficients.len(),
                    fit.standard_errors.len(),
                    self.subset.len()
                )),
            ));
        }

        Ok(self.fitted.get_or_init(|| fit))
    }

    /// prior probability that exactly this subset is the true model
    pub fn prior(&self) -> Result<f64> {
        Ok(self.prior_factors()?.iter().map(|(_, f)| f).product())
    }

    /// ln(prior()), summed per covariate so small priors don't underflow
    pub fn log_prior(&self) -> Result<f64> {
        let factors = self.prior_factors()?;
        if let Some((covariate, _)) = factors.iter().find(|(_, f)| *f <= 0.0) {
            return Err(BmaError::InvalidPrior {
                subset: self.subset.clone(),
                covariate: covariate.to_string(),
            });
        }
        Ok(factors.iter().map(|(_, f)| f.ln()).sum())
    }

    fn prior_factors(&self) -> Result<Vec<(&str, f64)>> {
        self.prior.factors(&self.all_covariates, |name| self.subset.contains(name))
    }

    /// fitted log partial likelihood (fits on first call)
    pub fn log_likelihood(&self) -> Result<f64> {
        Ok(self.fit_result()?.log_likelihood)
    }

    /// fitted coefficients and variances (se^2), in subset order
    pub fn summary(&self) -> Result<ModelSummary> {
        let fit = self.fit_result()?;
        Ok(ModelSummary {
            covariate_names: fit.covariate_names.clone(),
            coefficients: fit.coefficients.clone(),
            variances: fit.standard_errors.iter().map(|se| se * se).collect(),
        })
    }

    /// k ln(n) - 2 (loglik - reference loglik) - 2 ln(prior)
    ///
    /// without a reference the model is its own reference, leaving only the
    /// complexity and prior terms.
    pub fn bayesian_information_criterion(&self) -> Result<f64> {
        let log_prior = self.log_prior()?;
        let loglik = self.log_likelihood()?;
        let reference = self.reference_loglik.unwrap_or(loglik);

        let k = self.subset.len() as f64;
        let n = self.n_samples() as f64;
        Ok(k * n.ln() - 2.0 * (loglik - reference) - 2.0 * log_prior)
    }
}

/// per-model summary in the fitter's covariate order
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSummary {
    pub covariate_names: Vec<String>,
    pub coefficients: Vec<f64>,
    pub variances: Vec<f64>,
}

impl ModelSummary {
    pub fn coefficient_table(&self) -> CoefficientTable {
        self.covariate_names.iter().cloned().zip(self.coefficients.iter().copied()).collect()
    }

    pub fn variance_table(&self) -> CoefficientTable {
        self.covariate_names.iter().cloned().zip(self.variances.iter().copied()).collect()
    }
}
