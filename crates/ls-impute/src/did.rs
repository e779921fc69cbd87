//! Difference-in-differences on multiply-imputed longitudinal data.
//!
//! The workflow the rest of this crate exists for:
//!
//! 1. validate the long frame (one row per subject×time),
//! 2. run chained-equations imputation producing M completed datasets,
//! 3. fit `outcome ~ group * time (+ covariates)` with a per-subject random
//!    intercept on each completed dataset,
//! 4. pool the fits with Rubin's rules,
//! 5. report the pooled group×time interaction as the ATT.
//!
//! When the outcome's missingness depends on treatment timing, include an
//! interaction indicator among the imputation predictors — the imputation
//! model must be at least as rich as the analysis model.

use ls_core::{Error, Result};
use ls_data::{Design, LongFrame, ModelSpec};
use ls_inference::RandomEffects;

use crate::engine::{LoggedEvent, impute};
use crate::pool::{PooledFit, PooledParameter};
use crate::repeated::{lmm_complete_data_fit, pool_fits};
use crate::spec::ImputationSpec;

/// Configuration of the MI-DID analysis model.
#[derive(Debug, Clone)]
pub struct MiDidConfig {
    /// Outcome column (long format).
    pub outcome: String,
    /// Group/treatment factor (2 levels; first level = control).
    pub group: String,
    /// Time factor (2 levels; first level = pre).
    pub time: String,
    /// Numeric covariates entering the analysis model.
    pub numeric_covariates: Vec<String>,
    /// Factor covariates entering the analysis model.
    pub factor_covariates: Vec<String>,
    /// REML (default) or ML for the per-dataset mixed model.
    pub reml: bool,
    /// Confidence level for pooled intervals.
    pub conf_level: f64,
}

impl MiDidConfig {
    /// DID of `outcome` over `group` × `time`, REML, 95% intervals.
    pub fn new(outcome: &str, group: &str, time: &str) -> Self {
        Self {
            outcome: outcome.to_string(),
            group: group.to_string(),
            time: time.to_string(),
            numeric_covariates: Vec::new(),
            factor_covariates: Vec::new(),
            reml: true,
            conf_level: 0.95,
        }
    }

    /// Add a numeric covariate to the analysis model.
    pub fn numeric_covariate(mut self, name: &str) -> Self {
        self.numeric_covariates.push(name.to_string());
        self
    }

    /// Add a factor covariate to the analysis model.
    pub fn factor_covariate(mut self, name: &str) -> Self {
        self.factor_covariates.push(name.to_string());
        self
    }

    /// Analysis model spec: `outcome ~ group + time + group:time + covariates`.
    pub fn model_spec(&self) -> ModelSpec {
        let mut spec = ModelSpec::new(&self.outcome)
            .factor(&self.group)
            .factor(&self.time)
            .interaction(&[self.group.as_str(), self.time.as_str()]);
        for c in &self.numeric_covariates {
            spec = spec.numeric(c);
        }
        for c in &self.factor_covariates {
            spec = spec.factor(c);
        }
        spec
    }
}

/// Result of the multiply-imputed DID analysis.
#[derive(Debug, Clone)]
pub struct MiDidResult {
    /// Pooled fixed effects of the mixed model.
    pub pooled: PooledFit,
    /// Pooled group×time interaction — the ATT.
    pub att: PooledParameter,
    /// Name of the interaction coefficient the ATT was read from.
    pub interaction_name: String,
    /// Design of the first completed dataset (for EMMs and contrasts on the
    /// pooled fit).
    pub design: Design,
    /// Imputation events to inspect before trusting the estimate.
    pub events: Vec<LoggedEvent>,
    /// Number of imputed datasets.
    pub m: usize,
}

/// Run the full MI-DID pipeline on a long frame with missing outcomes.
pub fn did_mixed_mi(
    frame: &LongFrame,
    imputation: &ImputationSpec,
    config: &MiDidConfig,
) -> Result<MiDidResult> {
    frame.validate_unique(&config.time)?;
    for factor in [&config.group, &config.time] {
        let levels = frame.factor(factor)?.n_levels();
        if levels != 2 {
            return Err(Error::Validation(format!(
                "'{factor}' must have exactly 2 levels for a canonical DID, has {levels}"
            )));
        }
    }

    let mi = impute(frame, imputation)?;
    if !mi.events.is_empty() {
        log::warn!("imputation logged {} event(s); check MiDidResult::events", mi.events.len());
    }

    let model = config.model_spec();
    let pooled = pool_fits(&mi, config.conf_level, |completed, _| {
        lmm_complete_data_fit(completed, &model, &RandomEffects::Intercept, config.reml)
    })?;

    // The 2×2 interaction is a single column; read its pooled row.
    let design = model.build_design(&mi.completed[0])?;
    let term = design
        .interaction_term(&[config.group.as_str(), config.time.as_str()])
        .ok_or_else(|| Error::Computation("interaction term missing from design".to_string()))?;
    let cols: Vec<usize> = term.columns().collect();
    if cols.len() != 1 {
        return Err(Error::Computation(format!(
            "expected a single interaction column, found {}",
            cols.len()
        )));
    }
    let interaction_name = design.names()[cols[0]].clone();
    let att = pooled
        .parameter(&interaction_name)
        .ok_or_else(|| {
            Error::Computation(format!("pooled fit has no parameter '{interaction_name}'"))
        })?
        .clone();

    Ok(MiDidResult {
        att,
        interaction_name,
        design,
        events: mi.events,
        m: mi.m,
        pooled,
    })
}
