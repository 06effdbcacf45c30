use thiserror::Error;

use crate::model_space::CovariateSubset;

pub type Result<T> = std::result::Result<T, BmaError>;

/// errors raised by a hazard-fitting engine for a single fit
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoxError {
    #[error("dimensions don't match: {message}")]
    InvalidDimensions { message: String },

    #[error("optimization blew up: {message}")]
    OptimizationFailed { message: String },

    #[error("numerical issues: {message}")]
    NumericalError { message: String },

    #[error("survival data is broken: {message}")]
    InvalidSurvivalData { message: String },

    #[error("fit ran past its {seconds:.3}s budget")]
    Timeout { seconds: f64 },

    #[error("fit was cancelled")]
    Cancelled,
}

impl CoxError {
    pub fn invalid_dimensions(message: impl Into<String>) -> Self {
        Self::InvalidDimensions { message: message.into() }
    }

    pub fn optimization_failed(message: impl Into<String>) -> Self {
        Self::OptimizationFailed { message: message.into() }
    }

    pub fn numerical_error(message: impl Into<String>) -> Self {
        Self::NumericalError { message: message.into() }
    }

    pub fn invalid_survival_data(message: impl Into<String>) -> Self {
        Self::InvalidSurvivalData { message: message.into() }
    }

    /// only transient failures are worth retrying - a non-convergent fit
    /// stays non-convergent on identical input
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// errors surfaced by the averaging pipeline
#[derive(Error, Debug)]
pub enum BmaError {
    #[error("invalid input: {message}")]
    Validation { message: String },

    #[error("prior for '{covariate}' makes model {subset} impossible (log of zero prior)")]
    InvalidPrior { subset: CovariateSubset, covariate: String },

    #[error("fitting model {subset} failed: {source}")]
    Fit {
        subset: CovariateSubset,
        #[source]
        source: CoxError,
    },

    #[error("model space is empty: {message}")]
    Enumeration { message: String },

    #[error("model averaging was cancelled")]
    Cancelled,

    #[error("could not read csv data: {0}")]
    Csv(#[from] csv::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not parse config: {0}")]
    Config(#[from] toml::de::Error),

    #[error("could not start worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

impl BmaError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation { message: message.into() }
    }

    pub fn enumeration(message: impl Into<String>) -> Self {
        Self::Enumeration { message: message.into() }
    }

    pub fn fit(subset: CovariateSubset, source: CoxError) -> Self {
        match source {
            CoxError::Cancelled => Self::Cancelled,
            source => Self::Fit { subset, source },
        }
    }
}
