//! # cox model averaging
//!
//! bayesian model averaging over cox proportional hazards models - fit every
//! covariate subset, weight each by its bic-derived posterior, average.
//!
//! ## what you get
//!
//! - newton-raphson cox fitter (efron or breslow ties, optional ridge)
//! - per-covariate inclusion priors
//! - exhaustive or hand-picked model spaces
//! - parallel candidate fits w/ per-fit timeouts and cancellation
//!
//! ## quick start
//!
//! ```rust
//! use cox_bma::{BmaEngine, Dataset, ModelSpace, PriorSpecification};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let data = Dataset::from_columns(vec![
//!     ("week", vec![20.0, 17.0, 25.0, 52.0, 52.0, 8.0, 30.0, 44.0]),
//!     ("arrest", vec![1.0, 1.0, 1.0, 0.0, 0.0, 1.0, 1.0, 0.0]),
//!     ("fin", vec![0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 1.0, 1.0]),
//!     ("age", vec![27.0, 18.0, 19.0, 23.0, 19.0, 24.0, 25.0, 21.0]),
//!     ("prio", vec![3.0, 8.0, 13.0, 1.0, 3.0, 2.0, 0.0, 4.0]),
//! ])?;
//!
//! // fin is in most models a priori, age and prio are coin flips
//! let prior = PriorSpecification::from_pairs(vec![("fin", 0.8), ("age", 0.5), ("prio", 0.5)])?;
//! let space = ModelSpace::curated(vec![vec!["fin"], vec!["fin", "prio"], vec!["age", "prio"]]);
//!
//! let result = BmaEngine::new().fit(&data, "week", "arrest", Some(&prior), Some(&space))?;
//!
//! let total: f64 = result.posteriors().iter().sum();
//! assert!((total - 1.0).abs() < 1e-9);
//! println!("fin: {:.4}", result.summary.get("fin").unwrap().coefficient);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod data;
pub mod engine;
pub mod error;
pub mod fitter;
pub mod model;
pub mod model_space;
pub mod optimization;
pub mod posterior;
pub mod prior;
pub mod summary;

pub use config::BmaConfig;
pub use data::{Dataset, SurvivalView};
pub use engine::BmaEngine;
pub use error::{BmaError, CoxError, Result};
pub use fitter::{CancelToken, CoxFit, CoxPhFitter, FitBudget, HazardFitter};
pub use model::{CoefficientTable, HazardModel, ModelSummary};
pub use model_space::{CovariateSubset, ModelSpace};
pub use optimization::{OptimizationConfig, TieMethod};
pub use posterior::{posteriors_from_bic, weight_table};
pub use prior::PriorSpecification;
pub use summary::{BmaResult, ExcludedModel, ModelScore, WeightedCoefficient, WeightedSummary};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_functionality() {
        let data = Dataset::from_columns(vec![
            ("time", vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]),
            ("event", vec![1.0, 1.0, 0.0, 1.0, 1.0, 0.0]),
            ("x1", vec![0.5, -1.0, 0.0, 1.5, -0.5, 1.0]),
            ("x2", vec![1.0, 0.0, 1.0, 0.0, 1.0, 1.0]),
        ])
        .unwrap();

        let result = BmaEngine::new().fit(&data, "time", "event", None, None).unwrap();
        assert_eq!(result.models.len(), 3);
        assert_eq!(result.summary.len(), 2);
    }
}
