use log::{debug, info, warn};
use rayon::prelude::*;

use crate::{
    config::BmaConfig,
    data::Dataset,
    error::{BmaError, Result},
    fitter::{CancelToken, CoxPhFitter, FitBudget, HazardFitter},
    model::{CoefficientTable, HazardModel, ModelSummary},
    model_space::{CovariateSubset, ModelSpace},
    posterior,
    prior::PriorSpecification,
    summary::{BmaResult, ExcludedModel, ModelScore, WeightedSummary},
};

/// a candidate that fitted and scored
struct ScoredModel {
    subset: CovariateSubset,
    log_likelihood: f64,
    bic: f64,
    summary: ModelSummary,
}

/// inputs shared by every fit within one `fit` call
struct FitContext<'a> {
    dataset: &'a Dataset,
    duration_col: &'a str,
    event_col: &'a str,
    priors: &'a PriorSpecification,
    cancel: &'a CancelToken,
}

/// bayesian model averaging over cox models
///
/// fits the full model for a reference log-likelihood, fits every candidate
/// subset in parallel, weights them by bic-derived posteriors and averages
/// their coefficients and variances.
pub struct BmaEngine<F: HazardFitter = CoxPhFitter> {
    fitter: F,
    config: BmaConfig,
}

impl Default for BmaEngine<CoxPhFitter> {
    fn default() -> Self {
        Self::new()
    }
}

impl BmaEngine<CoxPhFitter> {
    /// engine w/ the built-in newton-raphson fitter and default config
    pub fn new() -> Self {
        Self::with_config(BmaConfig::default())
    }

    pub fn with_config(config: BmaConfig) -> Self {
        let fitter = CoxPhFitter::from_config(config.optimizer.clone());
        Self::with_fitter(fitter, config)
    }
}

impl<F: HazardFitter> BmaEngine<F> {
    /// engine over any hazard-fitting implementation
    pub fn with_fitter(fitter: F, config: BmaConfig) -> Self {
        Self { fitter, config }
    }

    pub fn config(&self) -> &BmaConfig {
        &self.config
    }

    /// average cox models over `model_space` (exhaustive by default)
    ///
    /// `priors` defaults to the configured uniform inclusion probability.
    pub fn fit(
        &self,
        dataset: &Dataset,
        duration_col: &str,
        event_col: &str,
        priors: Option<&PriorSpecification>,
        model_space: Option<&ModelSpace>,
    ) -> Result<BmaResult> {
        let cancel = CancelToken::new();
        self.fit_with_cancel(dataset, duration_col, event_col, priors, model_space, &cancel)
    }

    /// same as [`fit`](Self::fit), but stops once `cancel` fires
    ///
    /// candidates not yet started are skipped, running fits stop at their next
    /// iteration and the call returns `BmaError::Cancelled`. the token only
    /// affects this call.
    pub fn fit_with_cancel(
        &self,
        dataset: &Dataset,
        duration_col: &str,
        event_col: &str,
        priors: Option<&PriorSpecification>,
        model_space: Option<&ModelSpace>,
        cancel: &CancelToken,
    ) -> Result<BmaResult> {
        self.config.validate()?;
        let covariates = validate_columns(dataset, duration_col, event_col)?;

        let uniform;
        let priors = match priors {
            Some(priors) => priors,
            None => {
                let p = self.config.default_inclusion_probability;
                uniform = PriorSpecification::uniform(&covariates, p)?;
                &uniform
            }
        };
        priors.validate_against(&covariates)?;

        let ctx = FitContext { dataset, duration_col, event_col, priors, cancel };

        // full model anchors every bic; without it there's nothing to average against
        info!(
            "fitting full model over {} covariates ({} records)",
            covariates.len(),
            dataset.n_rows()
        );
        let full = self.fit_model(&ctx, None, None)?;
        let reference_loglik = full.log_likelihood()?;
        debug!("reference log-likelihood {:.6}", reference_loglik);

        let default_space;
        let model_space = match model_space {
            Some(space) => space,
            None => {
                default_space = ModelSpace::Exhaustive {
                    max_covariates: self.config.max_exhaustive_covariates,
                };
                &default_space
            }
        };
        let enumerated = model_space.enumerate(&covariates)?;

        let mut excluded = Vec::new();
        let mut candidates = Vec::with_capacity(enumerated.len());
        for subset in enumerated {
            let impossible = priors
                .factors(&covariates, |name| subset.contains(name))?
                .into_iter()
                .find(|(_, factor)| *factor <= 0.0)
                .map(|(name, _)| name.to_string());
            match impossible {
                Some(name) => {
                    debug!("pruning {}: prior for '{}' rules it out", subset, name);
                    excluded.push(ExcludedModel {
                        reason: format!("zero prior probability (covariate '{}')", name),
                        subset,
                    });
                }
                None => candidates.push(subset),
            }
        }
        if candidates.is_empty() {
            return Err(BmaError::enumeration(
                "every candidate model has zero prior probability",
            ));
        }

        info!("fitting {} candidate models", candidates.len());
        let pool = self.thread_pool()?;
        let outcomes: Vec<Result<ScoredModel>> = pool.install(|| {
            candidates
                .par_iter()
                .map(|subset| {
                    // the full subset was already fitted as the reference
                    if subset == full.subset() {
                        return score(&full);
                    }
                    self.fit_model(&ctx, Some(reference_loglik), Some(subset))
                        .and_then(|model| score(&model))
                })
                .collect()
        });

        // barrier: everything below needs the complete bic list
        if cancel.is_cancelled() {
            return Err(BmaError::Cancelled);
        }

        let mut scored = Vec::with_capacity(outcomes.len());
        for (subset, outcome) in candidates.into_iter().zip(outcomes) {
            match outcome {
                Ok(model) => scored.push(model),
                Err(BmaError::Fit { subset, source }) => {
                    warn!("excluding model {}: {}", subset, source);
                    excluded.push(ExcludedModel { subset, reason: source.to_string() });
                }
                Err(BmaError::Cancelled) => return Err(BmaError::Cancelled),
                Err(e) => {
                    warn!("model {} could not be scored: {}", subset, e);
                    return Err(e);
                }
            }
        }
        if scored.is_empty() {
            return Err(BmaError::enumeration("no candidate model could be fitted"));
        }

        let bics: Vec<f64> = scored.iter().map(|m| m.bic).collect();
        let posteriors = posterior::posteriors_from_bic(&bics)?;

        let coefficient_tables: Vec<CoefficientTable> =
            scored.iter().map(|m| m.summary.coefficient_table()).collect();
        let variance_tables: Vec<CoefficientTable> =
            scored.iter().map(|m| m.summary.variance_table()).collect();
        let subsets: Vec<CovariateSubset> = scored.iter().map(|m| m.subset.clone()).collect();

        let coefficients = posterior::weight_table(&coefficient_tables, &posteriors)?;
        let variances = posterior::weight_table(&variance_tables, &posteriors)?;
        let inclusion = posterior::inclusion_probabilities(&subsets, &posteriors)?;

        let models = scored
            .into_iter()
            .zip(&posteriors)
            .map(|(m, &posterior)| ModelScore {
                subset: m.subset,
                log_likelihood: m.log_likelihood,
                bic: m.bic,
                posterior,
            })
            .collect::<Vec<_>>();

        info!("averaged {} models ({} excluded)", models.len(), excluded.len());

        let summary =
            WeightedSummary::from_tables(&covariates, &coefficients, &variances, &inclusion);

        Ok(BmaResult {
            summary,
            models,
            excluded,
            reference_log_likelihood: reference_loglik,
        })
    }

    fn thread_pool(&self) -> Result<rayon::ThreadPool> {
        let mut builder = rayon::ThreadPoolBuilder::new();
        if let Some(workers) = self.config.workers {
            builder = builder.num_threads(workers);
        }
        Ok(builder.build()?)
    }

    fn budget(&self, cancel: &CancelToken) -> FitBudget {
        let budget = FitBudget::unlimited().with_cancel_token(cancel.clone());
        match self.config.fit_timeout() {
            Some(timeout) => budget.with_timeout(timeout),
            None => budget,
        }
    }

    /// build and fit one model, retrying transient failures w/ a fresh budget
    fn fit_model<'a>(
        &'a self,
        ctx: &FitContext<'a>,
        reference_loglik: Option<f64>,
        subset: Option<&CovariateSubset>,
    ) -> Result<HazardModel<'a, F>> {
        let mut attempt = 0;
        loop {
            if ctx.cancel.is_cancelled() {
                return Err(BmaError::Cancelled);
            }

            let model = HazardModel::new(
                ctx.dataset,
                ctx.duration_col,
                ctx.event_col,
                ctx.priors,
                reference_loglik,
                subset.cloned(),
                &self.fitter,
            )?
            .with_budget(self.budget(ctx.cancel));

            match model.log_likelihood() {
                Ok(_) => return Ok(model),
                Err(BmaError::Fit { subset, source })
                    if source.is_transient() && attempt < self.config.max_retries =>
                {
                    attempt += 1;
                    warn!("retrying {} after transient failure: {}", subset, source);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn score<F: HazardFitter + ?Sized>(model: &HazardModel<'_, F>) -> Result<ScoredModel> {
    let bic = model.bayesian_information_criterion()?;
    debug!("model {} bic {:.4}", model.subset(), bic);

    Ok(ScoredModel {
        subset: model.subset().clone(),
        log_likelihood: model.log_likelihood()?,
        bic,
        summary: model.summary()?,
    })
}

/// duration and event columns must exist, differ and hold valid records;
/// returns the covariates
fn validate_columns(dataset: &Dataset, duration_col: &str, event_col: &str) -> Result<Vec<String>> {
    if duration_col == event_col {
        return Err(BmaError::validation(format!(
            "duration and event column are both '{}'",
            duration_col
        )));
    }
    let column = |name: &str| {
        dataset
            .column(name)
            .ok_or_else(|| BmaError::validation(format!("no column named '{}'", name)))
    };

    let durations = column(duration_col)?;
    if let Some((row, t)) = durations.iter().enumerate().find(|(_, &t)| t < 0.0) {
        return Err(BmaError::validation(format!(
            "row {}: duration {} is negative",
            row + 1,
            t
        )));
    }

    let events = column(event_col)?;
    if let Some((row, e)) = events.iter().enumerate().find(|(_, &e)| e != 0.0 && e != 1.0) {
        return Err(BmaError::validation(format!(
            "row {}: event indicator {} is neither 0 nor 1",
            row + 1,
            e
        )));
    }

    let covariates = dataset.covariate_names(duration_col, event_col);
    if covariates.is_empty() {
        return Err(BmaError::validation("dataset has no covariate columns"));
    }
    Ok(covariates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::SurvivalView;
    use crate::error::CoxError;
    use crate::fitter::CoxFit;
    use approx::assert_relative_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// canned fits: loglik improves w/ every covariate, `fails` never converges,
    /// the first `timeouts` calls time out and `stalls` (a single-covariate
    /// model) always times out
    struct ScriptedFitter {
        fails: Option<&'static str>,
        stalls: Option<&'static str>,
        timeouts: AtomicUsize,
        calls: AtomicUsize,
    }

    impl ScriptedFitter {
        fn new() -> Self {
            Self {
                fails: None,
                stalls: None,
                timeouts: AtomicUsize::new(0),
                calls: AtomicUsize::new(0),
            }
        }

        fn failing_on(covariate: &'static str) -> Self {
            Self { fails: Some(covariate), ..Self::new() }
        }

        fn timing_out(times: usize) -> Self {
            Self { timeouts: AtomicUsize::new(times), ..Self::new() }
        }

        fn stalling_on(covariate: &'static str) -> Self {
            Self { stalls: Some(covariate), ..Self::new() }
        }
    }

    impl HazardFitter for ScriptedFitter {
        fn fit(
            &self,
            data: &SurvivalView<'_>,
            _budget: &FitBudget,
        ) -> std::result::Result<CoxFit, CoxError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self
                .timeouts
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |t| t.checked_sub(1))
                .is_ok()
            {
                return Err(CoxError::Timeout { seconds: 0.5 });
            }

            let names = data.covariate_names();
            if let Some(slow) = self.stalls {
                if names == [slow] {
                    return Err(CoxError::Timeout { seconds: 0.5 });
                }
            }
            if let Some(bad) = self.fails {
                if names.len() < 3 && names.iter().any(|n| n == bad) {
                    return Err(CoxError::optimization_failed("did not converge"));
                }
            }
            Ok(CoxFit {
                coefficients: names.iter().map(|n| n.len() as f64 / 10.0).collect(),
                standard_errors: vec![0.1; names.len()],
                log_likelihood: -100.0 + 3.0 * names.len() as f64,
                covariate_names: names,
            })
        }
    }

    /// cancels `token` on call number `after + 1`, then behaves like a fit
    /// that notices at its next budget check
    struct CancellingFitter {
        token: CancelToken,
        after: usize,
        calls: AtomicUsize,
    }

    impl HazardFitter for CancellingFitter {
        fn fit(
            &self,
            data: &SurvivalView<'_>,
            budget: &FitBudget,
        ) -> std::result::Result<CoxFit, CoxError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) >= self.after {
                self.token.cancel();
            }
            budget.check()?;
            ScriptedFitter::new().fit(data, budget)
        }
    }

    fn create_test_data() -> Dataset {
        Dataset::from_columns(vec![
            ("week", vec![1.0, 2.0, 3.0, 4.0]),
            ("arrest", vec![1.0, 0.0, 1.0, 1.0]),
            ("fin", vec![0.0, 1.0, 0.0, 1.0]),
            ("age", vec![20.0, 30.0, 25.0, 40.0]),
            ("prio", vec![1.0, 0.0, 3.0, 2.0]),
        ])
        .unwrap()
    }

    fn engine_with(fitter: ScriptedFitter) -> BmaEngine<ScriptedFitter> {
        BmaEngine::with_fitter(fitter, BmaConfig::default())
    }

    #[test]
    fn test_column_validation() {
        let data = create_test_data();
        let engine = engine_with(ScriptedFitter::new());

        let same = engine.fit(&data, "week", "week", None, None);
        assert!(matches!(same, Err(BmaError::Validation { .. })));
        let unknown = engine.fit(&data, "days", "arrest", None, None);
        assert!(matches!(unknown, Err(BmaError::Validation { .. })));

        let only_reserved =
            Dataset::from_columns(vec![("week", vec![1.0]), ("arrest", vec![1.0])]).unwrap();
        assert!(matches!(
            engine.fit(&only_reserved, "week", "arrest", None, None),
            Err(BmaError::Validation { .. })
        ));
    }

    #[test]
    fn test_malformed_records_are_validation_errors() {
        let fitter = ScriptedFitter::new();
        let engine = BmaEngine::with_fitter(&fitter, BmaConfig::default());
        let with = |week: Vec<f64>, arrest: Vec<f64>| {
            Dataset::from_columns(vec![
                ("week", week),
                ("arrest", arrest),
                ("fin", vec![0.0, 1.0, 0.0]),
                ("age", vec![20.0, 30.0, 25.0]),
            ])
            .unwrap()
        };

        let negative = with(vec![-3.0, 2.0, 3.0], vec![1.0, 0.0, 1.0]);
        match engine.fit(&negative, "week", "arrest", None, None) {
            Err(BmaError::Validation { message }) => assert!(message.contains("negative")),
            other => panic!("expected validation error, got {:?}", other.map(|r| r.models.len())),
        }

        let not_binary = with(vec![1.0, 2.0, 3.0], vec![7.5, 0.0, 1.0]);
        assert!(matches!(
            engine.fit(&not_binary, "week", "arrest", None, None),
            Err(BmaError::Validation { .. })
        ));
        let minus_one = with(vec![1.0, 2.0, 3.0], vec![1.0, -1.0, 1.0]);
        assert!(matches!(
            engine.fit(&minus_one, "week", "arrest", None, None),
            Err(BmaError::Validation { .. })
        ));

        // rejected before any fit runs
        assert_eq!(fitter.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_prior_mismatch() {
        let data = create_test_data();
        let engine = engine_with(ScriptedFitter::new());
        let prior = PriorSpecification::from_pairs(vec![("fin", 0.5), ("age", 0.5)]).unwrap();
        assert!(matches!(
            engine.fit(&data, "week", "arrest", Some(&prior), None),
            Err(BmaError::Validation { .. })
        ));
    }

    #[test]
    fn test_exhaustive_run() {
        let data = create_test_data();
        let fitter = ScriptedFitter::new();
        let engine = BmaEngine::with_fitter(&fitter, BmaConfig::default());
        let result = engine.fit(&data, "week", "arrest", None, None).unwrap();

        assert_eq!(result.models.len(), 7);
        assert!(result.excluded.is_empty());
        assert_relative_eq!(result.posteriors().iter().sum::<f64>(), 1.0, epsilon = 1e-9);
        assert_eq!(result.reference_log_likelihood, -91.0);
        // the full model's reference fit doubles as its candidate fit
        assert_eq!(fitter.calls.load(Ordering::SeqCst), 7);

        let full = result.models.last().unwrap();
        assert_eq!(full.subset.len(), 3);
        assert_eq!(full.log_likelihood, -91.0);
        let expected = 3.0 * 4.0_f64.ln() - 2.0 * 0.125_f64.ln();
        assert_relative_eq!(full.bic, expected, epsilon = 1e-12);

        // recompute one weighted coefficient by hand
        let expected_fin: f64 = result
            .models
            .iter()
            .filter(|m| m.subset.contains("fin"))
            .map(|m| m.posterior * 0.3)
            .sum();
        let fin = result.summary.get("fin").unwrap();
        assert_relative_eq!(fin.coefficient, expected_fin, epsilon = 1e-12);

        let inclusion: f64 = result
            .models
            .iter()
            .filter(|m| m.subset.contains("age"))
            .map(|m| m.posterior)
            .sum();
        let age = result.summary.get("age").unwrap();
        assert_relative_eq!(age.inclusion_probability, inclusion, epsilon = 1e-12);
    }

    #[test]
    fn test_candidate_failure_is_excluded() {
        let data = create_test_data();
        let engine = engine_with(ScriptedFitter::failing_on("prio"));
        let result = engine.fit(&data, "week", "arrest", None, None).unwrap();

        // {prio}, {fin, prio}, {age, prio} fail; the full model still fits
        assert_eq!(result.excluded.len(), 3);
        assert_eq!(result.models.len(), 4);
        assert!(result.excluded.iter().all(|e| e.subset.contains("prio")));
        assert_relative_eq!(result.posteriors().iter().sum::<f64>(), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_full_model_failure_aborts() {
        let data = Dataset::from_columns(vec![
            ("week", vec![1.0, 2.0, 3.0]),
            ("arrest", vec![1.0, 1.0, 0.0]),
            ("fin", vec![0.0, 1.0, 0.0]),
            ("prio", vec![1.0, 0.0, 3.0]),
        ])
        .unwrap();
        // two covariates, so the full model is one of the failing ones
        let engine = engine_with(ScriptedFitter::failing_on("prio"));
        assert!(matches!(
            engine.fit(&data, "week", "arrest", None, None),
            Err(BmaError::Fit { .. })
        ));
    }

    #[test]
    fn test_timeouts_are_retried_once() {
        let data = create_test_data();
        let curated = ModelSpace::curated(vec![vec!["fin"], vec!["age", "prio"]]);

        // first full-model attempt times out, the retry succeeds
        let fitter = ScriptedFitter::timing_out(1);
        let engine = BmaEngine::with_fitter(&fitter, BmaConfig::default());
        let result = engine.fit(&data, "week", "arrest", None, Some(&curated)).unwrap();
        assert_eq!(result.models.len(), 2);
        assert_eq!(fitter.calls.load(Ordering::SeqCst), 4);

        // two timeouts in a row exhaust the single retry on the full model
        let engine = engine_with(ScriptedFitter::timing_out(2));
        match engine.fit(&data, "week", "arrest", None, Some(&curated)) {
            Err(BmaError::Fit { source, .. }) => assert!(source.is_transient()),
            other => panic!("expected timeout, got {:?}", other.map(|r| r.models.len())),
        }
    }

    #[test]
    fn test_candidate_timing_out_twice_is_excluded() {
        let data = create_test_data();
        let fitter = ScriptedFitter::stalling_on("age");
        let engine = BmaEngine::with_fitter(&fitter, BmaConfig::default());
        let result = engine.fit(&data, "week", "arrest", None, None).unwrap();

        assert_eq!(result.models.len(), 6);
        assert_eq!(result.excluded.len(), 1);
        assert_eq!(result.excluded[0].subset.names(), &["age".to_string()]);
        assert!(result.excluded[0].reason.contains("budget"));
        assert!(result.models.iter().all(|m| m.subset.names() != ["age".to_string()]));
        assert_relative_eq!(result.posteriors().iter().sum::<f64>(), 1.0, epsilon = 1e-9);

        // full model once, five other candidates once, {age} twice
        assert_eq!(fitter.calls.load(Ordering::SeqCst), 8);
    }

    #[test]
    fn test_zero_prior_candidates_are_pruned() {
        let data = create_test_data();
        let engine = engine_with(ScriptedFitter::new());
        let prior =
            PriorSpecification::from_pairs(vec![("fin", 1.0), ("age", 0.5), ("prio", 0.5)])
                .unwrap();

        let result = engine.fit(&data, "week", "arrest", Some(&prior), None).unwrap();
        assert_eq!(result.models.len(), 4);
        assert_eq!(result.excluded.len(), 3);
        assert!(result.models.iter().all(|m| m.subset.contains("fin")));
        let fin = result.summary.get("fin").unwrap();
        assert_relative_eq!(fin.inclusion_probability, 1.0, epsilon = 1e-12);

        let impossible = ModelSpace::curated(vec![vec!["age"]]);
        assert!(matches!(
            engine.fit(&data, "week", "arrest", Some(&prior), Some(&impossible)),
            Err(BmaError::Enumeration { .. })
        ));
    }

    #[test]
    fn test_cancelled_before_start() {
        let data = create_test_data();
        let fitter = ScriptedFitter::new();
        let engine = BmaEngine::with_fitter(&fitter, BmaConfig::default());

        let token = CancelToken::new();
        token.cancel();
        let cancelled = engine.fit_with_cancel(&data, "week", "arrest", None, None, &token);
        assert!(matches!(cancelled, Err(BmaError::Cancelled)));
        assert_eq!(fitter.calls.load(Ordering::SeqCst), 0);

        // the cancellation belonged to that call only
        let result = engine.fit(&data, "week", "arrest", None, None).unwrap();
        assert_eq!(result.models.len(), 7);
    }

    #[test]
    fn test_cancel_during_candidate_fits() {
        let data = create_test_data();
        let token = CancelToken::new();
        let fitter = CancellingFitter {
            token: token.clone(),
            after: 2,
            calls: AtomicUsize::new(0),
        };
        let config = BmaConfig { workers: Some(1), ..Default::default() };
        let engine = BmaEngine::with_fitter(&fitter, config);

        let result = engine.fit_with_cancel(&data, "week", "arrest", None, None, &token);
        assert!(matches!(result, Err(BmaError::Cancelled)));

        // full model and one candidate finish, the next stops mid-fit and the
        // remaining candidates never reach the fitter
        assert_eq!(fitter.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_worker_count_does_not_change_result() {
        let data = create_test_data();
        let single = BmaConfig { workers: Some(1), ..Default::default() };
        let many = BmaConfig { workers: Some(4), ..Default::default() };

        let a = BmaEngine::with_fitter(ScriptedFitter::new(), single)
            .fit(&data, "week", "arrest", None, None)
            .unwrap();
        let b = BmaEngine::with_fitter(ScriptedFitter::new(), many)
            .fit(&data, "week", "arrest", None, None)
            .unwrap();
        assert_eq!(a, b);
    }
}
