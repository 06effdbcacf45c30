use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{BmaError, Result};
use crate::model_space::MAX_EXHAUSTIVE_COVARIATES;
use crate::optimization::OptimizationConfig;

/// knobs for a model-averaging run
///
/// every field has a default, so a TOML file only needs the ones it changes:
///
/// ```toml
/// workers = 4
/// fit_timeout_secs = 30.0
///
/// [optimizer]
/// ties = "breslow"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BmaConfig {
    /// threads fitting candidate models; `None` uses rayon's default
    pub workers: Option<usize>,
    /// wall-clock budget per candidate fit
    pub fit_timeout_secs: Option<f64>,
    /// extra attempts after a timed-out fit
    pub max_retries: usize,
    /// inclusion probability used when no prior is supplied
    pub default_inclusion_probability: f64,
    /// refuse exhaustive enumeration above this many covariates
    pub max_exhaustive_covariates: usize,
    pub optimizer: OptimizationConfig,
}

impl Default for BmaConfig {
    fn default() -> Self {
        Self {
            workers: None,
            fit_timeout_secs: None,
            max_retries: 1,
            default_inclusion_probability: 0.5,
            max_exhaustive_covariates: MAX_EXHAUSTIVE_COVARIATES,
            optimizer: OptimizationConfig::default(),
        }
    }
}

impl BmaConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_toml_str(&std::fs::read_to_string(path)?)
    }

    pub fn fit_timeout(&self) -> Option<Duration> {
        self.fit_timeout_secs.map(Duration::from_secs_f64)
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == Some(0) {
            return Err(BmaError::validation("workers must be at least 1"));
        }
        if let Some(secs) = self.fit_timeout_secs {
            if !secs.is_finite() || secs <= 0.0 {
                return Err(BmaError::validation(format!(
                    "fit_timeout_secs must be positive, got {}",
                    secs
                )));
            }
        }
        if !(0.0..=1.0).contains(&self.default_inclusion_probability) {
            return Err(BmaError::validation(format!(
                "default_inclusion_probability must be in [0, 1], got {}",
                self.default_inclusion_probability
            )));
        }
        if self.optimizer.max_iterations == 0 || self.optimizer.tolerance <= 0.0 {
            return Err(BmaError::validation(
                "optimizer needs max_iterations > 0 and tolerance > 0",
            ));
        }
        if self.optimizer.l2_penalty < 0.0 {
            return Err(BmaError::validation("l2_penalty must be non-negative"));
        }
        Ok(())
    }
}
