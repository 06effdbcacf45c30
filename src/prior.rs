use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{BmaError, Result};

/// independent-inclusion prior over model space, keyed by covariate name
///
/// each covariate enters the "true" model with its own probability, so a
/// subset's prior is the product of p over included covariates and (1 - p)
/// over excluded ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PriorSpecification {
    inclusion: BTreeMap<String, f64>,
}

impl PriorSpecification {
    /// same inclusion probability for every covariate (0.5 = uninformative)
    pub fn uniform(covariates: &[String], probability: f64) -> Result<Self> {
        Self::from_pairs(covariates.iter().map(|name| (name.clone(), probability)))
    }

    /// explicit (name, probability) pairs
    pub fn from_pairs<I, S>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        let mut inclusion = BTreeMap::new();
        for (name, probability) in pairs {
            let name = name.into();
            if !(0.0..=1.0).contains(&probability) {
                return Err(BmaError::validation(format!(
                    "inclusion probability for '{}' is {}, must be in [0, 1]",
                    name, probability
                )));
            }
            if inclusion.insert(name.clone(), probability).is_some() {
                return Err(BmaError::validation(format!("prior for '{}' given twice", name)));
            }
        }
        Ok(Self { inclusion })
    }

    /// probabilities listed in the same order as `covariates`
    pub fn from_ordered(covariates: &[String], probabilities: &[f64]) -> Result<Self> {
        if covariates.len() != probabilities.len() {
            return Err(BmaError::validation(format!(
                "{} prior probabilities for {} covariates",
                probabilities.len(),
                covariates.len()
            )));
        }
        Self::from_pairs(covariates.iter().cloned().zip(probabilities.iter().copied()))
    }

    pub fn inclusion_probability(&self, covariate: &str) -> Option<f64> {
        self.inclusion.get(covariate).copied()
    }

    pub fn len(&self) -> usize {
        self.inclusion.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inclusion.is_empty()
    }

    /// check this prior covers exactly `covariates`
    pub fn validate_against(&self, covariates: &[String]) -> Result<()> {
        let missing = covariates.iter().find(|c| !self.inclusion.contains_key(c.as_str()));
        if let Some(missing) = missing {
            return Err(BmaError::validation(format!("no prior for covariate '{}'", missing)));
        }
        if let Some(extra) = self.inclusion.keys().find(|k| !covariates.contains(k)) {
            return Err(BmaError::validation(format!(
                "prior given for '{}' which is not a covariate",
                extra
            )));
        }
        Ok(())
    }

    /// per-covariate prior factor: p if included, 1 - p if not
    ///
    /// walks `covariates` (the full set) so excluded covariates contribute too.
    pub(crate) fn factors<'a>(
        &self,
        covariates: &'a [String],
        included: impl Fn(&str) -> bool,
    ) -> Result<Vec<(&'a str, f64)>> {
        covariates
            .iter()
            .map(|name| {
                let p = self
                    .inclusion_probability(name)
                    .ok_or_else(|| {
                        BmaError::validation(format!("no prior for covariate '{}'", name))
                    })?;
                let factor = if included(name) { p } else { 1.0 - p };
                Ok((name.as_str(), factor))
            })
            .collect()
    }
}
