//! turning bic scores into model weights and averaging per-model tables.
//!
//! both functions are pure - no state survives between calls.

use std::collections::BTreeMap;

use crate::error::{BmaError, Result};
use crate::model::CoefficientTable;
use crate::model_space::CovariateSubset;

/// posterior model probabilities from bic scores
///
/// shifts by the smallest bic before exponentiating - exp(-bic/2) on raw
/// scores underflows to zero for every model but the best one.
pub fn posteriors_from_bic(bic_values: &[f64]) -> Result<Vec<f64>> {
    if bic_values.is_empty() {
        return Err(BmaError::enumeration("no bic values to weight"));
    }
    if let Some(bad) = bic_values.iter().find(|b| !b.is_finite()) {
        return Err(BmaError::validation(format!("bic value {} is not finite", bad)));
    }

    let min_bic = bic_values.iter().copied().fold(f64::INFINITY, f64::min);
    let weights: Vec<f64> = bic_values.iter().map(|bic| (-0.5 * (bic - min_bic)).exp()).collect();
    let total: f64 = weights.iter().sum(); // >= 1, the best model contributes exp(0)

    Ok(weights.into_iter().map(|w| w / total).collect())
}

/// posterior-weighted sum of per-model tables
///
/// covariate names are unioned across models; a model without a covariate
/// counts as a zero for it rather than dropping out of that sum.
pub fn weight_table(tables: &[CoefficientTable], posteriors: &[f64]) -> Result<CoefficientTable> {
    if tables.len() != posteriors.len() {
        return Err(BmaError::validation(format!(
            "{} tables for {} posterior probabilities",
            tables.len(),
            posteriors.len()
        )));
    }

    let mut weighted: CoefficientTable = tables
        .iter()
        .flat_map(|table| table.keys())
        .map(|name| (name.clone(), 0.0))
        .collect();

    for (name, total) in weighted.iter_mut() {
        *total = tables
            .iter()
            .zip(posteriors)
            .map(|(table, posterior)| posterior * table.get(name).copied().unwrap_or(0.0))
            .sum();
    }

    Ok(weighted)
}

/// per covariate, total posterior mass of the models that include it
pub fn inclusion_probabilities(
    subsets: &[CovariateSubset],
    posteriors: &[f64],
) -> Result<BTreeMap<String, f64>> {
    let tables: Vec<CoefficientTable> = subsets
        .iter()
        .map(|subset| subset.names().iter().map(|name| (name.clone(), 1.0)).collect())
        .collect();
    weight_table(&tables, posteriors)
}
