use serde::Serialize;

use crate::model::CoefficientTable;
use crate::model_space::CovariateSubset;

/// one candidate model's score and posterior weight
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelScore {
    pub subset: CovariateSubset,
    pub log_likelihood: f64,
    pub bic: f64,
    pub posterior: f64,
}

/// a candidate that got no weight, and why
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExcludedModel {
    pub subset: CovariateSubset,
    pub reason: String,
}

/// posterior-averaged estimate for one covariate
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeightedCoefficient {
    pub covariate: String,
    pub coefficient: f64,
    pub variance: f64,
    /// posterior mass of the models containing this covariate
    pub inclusion_probability: f64,
}

impl WeightedCoefficient {
    pub fn standard_error(&self) -> f64 {
        self.variance.sqrt()
    }

    pub fn hazard_ratio(&self) -> f64 {
        self.coefficient.exp()
    }
}

/// posterior-weighted coefficients and variances, in dataset covariate order
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeightedSummary {
    pub entries: Vec<WeightedCoefficient>,
}

impl WeightedSummary {
    /// lay the weighted tables out over the full covariate list; covariates no
    /// candidate model used average to zero
    pub(crate) fn from_tables(
        covariates: &[String],
        coefficients: &CoefficientTable,
        variances: &CoefficientTable,
        inclusion: &CoefficientTable,
    ) -> Self {
        let lookup = |table: &CoefficientTable, name: &str| table.get(name).copied().unwrap_or(0.0);
        let entries = covariates
            .iter()
            .map(|name| WeightedCoefficient {
                covariate: name.clone(),
                coefficient: lookup(coefficients, name),
                variance: lookup(variances, name),
                inclusion_probability: lookup(inclusion, name),
            })
            .collect();
        Self { entries }
    }

    pub fn get(&self, covariate: &str) -> Option<&WeightedCoefficient> {
        self.entries.iter().find(|e| e.covariate == covariate)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn coefficients(&self) -> CoefficientTable {
        self.entries.iter().map(|e| (e.covariate.clone(), e.coefficient)).collect()
    }

    pub fn variances(&self) -> CoefficientTable {
        self.entries.iter().map(|e| (e.covariate.clone(), e.variance)).collect()
    }

    /// print out the averaged estimates
    pub fn print(&self) {
        println!("bayesian model averaged cox estimates");
        println!("=====================================");

        println!(
            "{:<20} {:>12} {:>12} {:>12} {:>12}",
            "covariate", "coefficient", "se(coef)", "hazard ratio", "p(incl)"
        );
        println!("{:-<72}", "");

        for entry in &self.entries {
            println!(
                "{:<20} {:>12.6} {:>12.6} {:>12.6} {:>12.4}",
                entry.covariate,
                entry.coefficient,
                entry.standard_error(),
                entry.hazard_ratio(),
                entry.inclusion_probability
            );
        }
    }
}

/// everything a model-averaging run produces
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BmaResult {
    pub summary: WeightedSummary,
    /// scored candidates in enumeration order
    pub models: Vec<ModelScore>,
    pub excluded: Vec<ExcludedModel>,
    /// full-model log-likelihood every bic is anchored to
    pub reference_log_likelihood: f64,
}

impl BmaResult {
    /// posterior probabilities in `models` order
    pub fn posteriors(&self) -> Vec<f64> {
        self.models.iter().map(|m| m.posterior).collect()
    }

    /// highest-posterior model
    pub fn best_model(&self) -> Option<&ModelScore> {
        self.models.iter().max_by(|a, b| a.posterior.total_cmp(&b.posterior))
    }

    /// print the averaged table and the top models
    pub fn print(&self, top: usize) {
        self.summary.print();
        println!();

        let mut ranked: Vec<&ModelScore> = self.models.iter().collect();
        ranked.sort_by(|a, b| b.posterior.total_cmp(&a.posterior));

        println!("{:<40} {:>12} {:>12}", "model", "bic", "posterior");
        println!("{:-<66}", "");
        for model in ranked.into_iter().take(top) {
            println!(
                "{:<40} {:>12.4} {:>12.6}",
                model.subset.to_string(),
                model.bic,
                model.posterior
            );
        }

        if !self.excluded.is_empty() {
            println!();
            println!("{} candidate model(s) excluded", self.excluded.len());
        }
    }
}
