//! Common data types for longstat

use serde::{Deserialize, Serialize};

/// Fit result containing parameter estimates and uncertainties
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitResult {
    /// Best-fit parameter values
    pub parameters: Vec<f64>,

    /// Parameter uncertainties (sqrt of covariance diagonal)
    pub uncertainties: Vec<f64>,

    /// Covariance matrix (row-major, N×N). `None` if inversion failed or the
    /// resulting covariance is numerically invalid (e.g., non-positive variances).
    pub covariance: Option<Vec<f64>>,

    /// Negative log-likelihood at minimum
    pub nll: f64,

    /// Convergence status
    pub converged: bool,

    /// Number of optimizer iterations (L-BFGS iterations, not objective calls).
    pub n_iter: usize,

    /// Number of objective (cost) evaluations, including line-search steps.
    #[serde(default)]
    pub n_fev: usize,

    /// Number of gradient evaluations performed by the optimizer.
    #[serde(default)]
    pub n_gev: usize,

    /// Why the optimizer stopped (e.g. "SolverConverged", "MaxItersReached").
    #[serde(default)]
    pub termination_reason: String,

    /// Gradient norm at termination. `NAN` if unavailable.
    #[serde(default = "default_nan", deserialize_with = "de_nan_null")]
    pub final_grad_norm: f64,

    /// Negative log-likelihood before optimisation. `NAN` if unavailable.
    #[serde(default = "default_nan", deserialize_with = "de_nan_null")]
    pub initial_nll: f64,

    /// Number of parameters sitting at their bound at the solution.
    #[serde(default)]
    pub n_active_bounds: usize,

    /// Human-readable warnings (identifiability, covariance fallbacks).
    ///
    /// Non-convergence and near-singular information matrices are reported
    /// here rather than as hard errors; callers inspect them the way a
    /// notebook author would inspect a convergence message.
    #[serde(default)]
    pub warnings: Vec<String>,
}

fn default_nan() -> f64 {
    f64::NAN
}

/// Deserialize an `f64` that `serde_json` emits as `null` when it is `NaN`,
/// mapping the `null` back to `NaN` so the value roundtrips.
fn de_nan_null<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NAN))
}

impl FitResult {
    /// Create a new fit result
    pub fn new(
        parameters: Vec<f64>,
        uncertainties: Vec<f64>,
        nll: f64,
        converged: bool,
        n_iter: usize,
        n_fev: usize,
        n_gev: usize,
    ) -> Self {
        Self {
            parameters,
            uncertainties,
            covariance: None,
            nll,
            converged,
            n_iter,
            n_fev,
            n_gev,
            termination_reason: String::new(),
            final_grad_norm: f64::NAN,
            initial_nll: f64::NAN,
            n_active_bounds: 0,
            warnings: Vec::new(),
        }
    }

    /// Create a fit result with covariance matrix
    #[allow(clippy::too_many_arguments)]
    pub fn with_covariance(
        parameters: Vec<f64>,
        uncertainties: Vec<f64>,
        covariance: Vec<f64>,
        nll: f64,
        converged: bool,
        n_iter: usize,
        n_fev: usize,
        n_gev: usize,
    ) -> Self {
        Self {
            parameters,
            uncertainties,
            covariance: Some(covariance),
            nll,
            converged,
            n_iter,
            n_fev,
            n_gev,
            termination_reason: String::new(),
            final_grad_norm: f64::NAN,
            initial_nll: f64::NAN,
            n_active_bounds: 0,
            warnings: Vec::new(),
        }
    }

    /// Attach optimizer diagnostics (builder-style).
    pub fn with_diagnostics(
        mut self,
        termination_reason: String,
        final_grad_norm: f64,
        initial_nll: f64,
        n_active_bounds: usize,
    ) -> Self {
        self.termination_reason = termination_reason;
        self.final_grad_norm = final_grad_norm;
        self.initial_nll = initial_nll;
        self.n_active_bounds = n_active_bounds;
        self
    }

    /// Get covariance matrix element (i, j). Returns `None` if unavailable.
    pub fn covariance_at(&self, i: usize, j: usize) -> Option<f64> {
        let cov = self.covariance.as_ref()?;
        let n = self.parameters.len();
        if i >= n || j >= n {
            return None;
        }
        Some(cov[i * n + j])
    }

    /// Get correlation matrix element (i, j). Returns `None` if covariance is unavailable.
    pub fn correlation(&self, i: usize, j: usize) -> Option<f64> {
        let cov = self.covariance_at(i, j)?;
        let sigma_i = self.uncertainties[i];
        let sigma_j = self.uncertainties[j];
        if sigma_i <= 0.0 || sigma_j <= 0.0 {
            return None;
        }
        Some(cov / (sigma_i * sigma_j))
    }
}
