//! which covariate subsets get fitted.
//!
//! exhaustive enumeration visits every non-empty subset, so its cost is
//! O(2^p) fits for p covariates. it refuses to run above a cap (default 20,
//! i.e. ~1M fits); pre-filter covariates or supply a curated list instead.

use std::collections::HashSet;
use std::fmt;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::error::{BmaError, Result};

/// default cap on covariates for exhaustive enumeration
pub const MAX_EXHAUSTIVE_COVARIATES: usize = 20;

/// ordered set of covariate names defining one candidate model
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CovariateSubset {
    names: Vec<String>,
}

impl CovariateSubset {
    pub fn new(names: Vec<String>) -> Self {
        Self { names }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }
}

impl<S: Into<String>> FromIterator<S> for CovariateSubset {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self::new(iter.into_iter().map(Into::into).collect())
    }
}

impl fmt::Display for CovariateSubset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}}}", self.names.join(", "))
    }
}

/// policy for generating candidate models
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelSpace {
    /// every non-empty subset of the covariates, refused above `max_covariates`
    Exhaustive { max_covariates: usize },
    /// a fixed list of subsets chosen by the caller
    Curated(Vec<CovariateSubset>),
}

impl Default for ModelSpace {
    fn default() -> Self {
        Self::Exhaustive { max_covariates: MAX_EXHAUSTIVE_COVARIATES }
    }
}

impl ModelSpace {
    pub fn exhaustive() -> Self {
        Self::default()
    }

    /// curated list from plain name lists
    pub fn curated<I, S>(subsets: I) -> Self
    where
        I: IntoIterator<Item = Vec<S>>,
        S: Into<String>,
    {
        Self::Curated(subsets.into_iter().map(CovariateSubset::from_iter).collect())
    }

    /// produce the candidate subsets for `covariates` (the full set, in dataset order)
    pub fn enumerate(&self, covariates: &[String]) -> Result<Vec<CovariateSubset>> {
        let candidates = match self {
            Self::Exhaustive { max_covariates } => {
                if covariates.len() > *max_covariates {
                    return Err(BmaError::validation(format!(
                        "exhaustive enumeration over {} covariates needs {} fits (cap is {}); \
                         pre-filter covariates or use a curated model space",
                        covariates.len(),
                        exhaustive_size(covariates.len()),
                        max_covariates
                    )));
                }
                power_set(covariates)
            }
            Self::Curated(subsets) => {
                for subset in subsets {
                    validate_subset(subset, covariates)?;
                }
                subsets.clone()
            }
        };

        if candidates.is_empty() {
            return Err(BmaError::enumeration(format!(
                "{} policy produced no candidate models",
                self.kind()
            )));
        }
        Ok(candidates)
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Exhaustive { .. } => "exhaustive",
            Self::Curated(_) => "curated",
        }
    }
}

/// number of candidates exhaustive enumeration produces for p covariates
pub fn exhaustive_size(p: usize) -> u128 {
    (1u128 << p.min(127)) - 1
}

// ordered by size, then lexicographically by dataset position
fn power_set(covariates: &[String]) -> Vec<CovariateSubset> {
    (1..=covariates.len())
        .flat_map(|size| covariates.iter().cloned().combinations(size))
        .map(CovariateSubset::new)
        .collect()
}

fn validate_subset(subset: &CovariateSubset, covariates: &[String]) -> Result<()> {
    if subset.is_empty() {
        return Err(BmaError::validation("curated model has no covariates"));
    }
    let mut seen = HashSet::new();
    for name in subset.names() {
        if !covariates.contains(name) {
            return Err(BmaError::validation(format!(
                "curated model {} references unknown covariate '{}'",
                subset, name
            )));
        }
        if !seen.insert(name.as_str()) {
            return Err(BmaError::validation(format!(
                "curated model {} lists '{}' twice",
                subset, name
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_exhaustive_enumeration() {
        let covariates = names(&["a", "b", "c"]);
        let subsets = ModelSpace::exhaustive().enumerate(&covariates).unwrap();

        let rendered: Vec<String> = subsets.iter().map(|s| s.to_string()).collect();
        assert_eq!(
            rendered,
            vec!["{a}", "{b}", "{c}", "{a, b}", "{a, c}", "{b, c}", "{a, b, c}"]
        );
        assert_eq!(subsets.len() as u128, exhaustive_size(3));
    }

    #[test]
    fn test_exhaustive_is_stable() {
        let covariates = names(&["fin", "age", "race", "wexp", "mar"]);
        let first = ModelSpace::exhaustive().enumerate(&covariates).unwrap();
        let second = ModelSpace::exhaustive().enumerate(&covariates).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 31);
    }

    #[test]
    fn test_exhaustive_cap() {
        let covariates: Vec<String> = (0..5).map(|i| format!("x{}", i)).collect();
        let space = ModelSpace::Exhaustive { max_covariates: 4 };
        assert!(matches!(space.enumerate(&covariates), Err(BmaError::Validation { .. })));
    }

    #[test]
    fn test_exhaustive_without_covariates_is_empty() {
        assert!(matches!(
            ModelSpace::exhaustive().enumerate(&[]),
            Err(BmaError::Enumeration { .. })
        ));
    }

    #[test]
    fn test_curated_preserves_order() {
        let covariates = names(&["fin", "age", "race", "prio"]);
        let space = ModelSpace::curated(vec![vec!["prio", "race"], vec!["fin"]]);
        let subsets = space.enumerate(&covariates).unwrap();
        assert_eq!(subsets[0].names(), &names(&["prio", "race"])[..]);
        assert_eq!(subsets[1].names(), &names(&["fin"])[..]);
    }

    #[test]
    fn test_curated_validation() {
        let covariates = names(&["fin", "age"]);

        let unknown = ModelSpace::curated(vec![vec!["fin", "height"]]);
        assert!(matches!(unknown.enumerate(&covariates), Err(BmaError::Validation { .. })));

        let duplicate = ModelSpace::curated(vec![vec!["fin", "fin"]]);
        assert!(matches!(duplicate.enumerate(&covariates), Err(BmaError::Validation { .. })));

        let empty_model = ModelSpace::Curated(vec![CovariateSubset::new(Vec::new())]);
        assert!(matches!(empty_model.enumerate(&covariates), Err(BmaError::Validation { .. })));

        let no_models = ModelSpace::Curated(Vec::new());
        assert!(matches!(no_models.enumerate(&covariates), Err(BmaError::Enumeration { .. })));
    }
}
