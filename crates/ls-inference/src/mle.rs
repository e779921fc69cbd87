//! Maximum Likelihood Estimation
//!
//! Fits any [`LogDensityModel`] by minimizing its negative log-likelihood,
//! then derives uncertainties from the observed information: the Hessian is
//! built by forward differences of the analytic gradient and inverted via a
//! damped Cholesky solve. Non-convergence and identifiability problems are
//! reported on the [`FitResult`] rather than raised as errors.

use crate::optimizer::{LbfgsOptimizer, ObjectiveFunction, OptimizerConfig};
use ls_core::traits::{LogDensityModel, PreparedNll};
use ls_core::{FitResult, Result};
use nalgebra::DMatrix;

/// Diagnostics extracted from an `OptimizationResult`.
struct OptDiagnostics {
    reason: String,
    grad_norm: f64,
    initial_nll: f64,
    n_active: usize,
}

fn diagnostics_from_opt(
    opt: &crate::optimizer::OptimizationResult,
    bounds: &[(f64, f64)],
) -> OptDiagnostics {
    let grad_norm = opt
        .final_gradient
        .as_ref()
        .map(|g| g.iter().map(|x| x * x).sum::<f64>().sqrt())
        .unwrap_or(f64::NAN);
    let n_active = opt
        .parameters
        .iter()
        .zip(bounds.iter())
        .filter(|(x, (lo, hi))| (**x - lo).abs() < 1e-10 || (**x - hi).abs() < 1e-10)
        .count();
    OptDiagnostics {
        reason: opt.message.clone(),
        grad_norm,
        initial_nll: opt.initial_cost,
        n_active,
    }
}

/// Check for identifiability issues based on the Hessian and uncertainties.
///
/// Returns a list of human-readable warning strings (empty if model is well-identified).
pub fn identifiability_warnings(
    hessian: &DMatrix<f64>,
    n: usize,
    param_names: &[String],
    uncertainties: &[f64],
) -> Vec<String> {
    let mut warnings = Vec::new();

    // Near-singular Hessian: condition number via SVD.
    if n > 0 {
        let svd = hessian.clone().svd(false, false);
        let svals = &svd.singular_values;
        let s_max = svals.iter().fold(0.0_f64, |a, &b| a.max(b));
        let s_min = svals.iter().fold(f64::INFINITY, |a, &b| a.min(b));
        if s_min > 0.0 {
            let cond = s_max / s_min;
            if cond > 1e8 {
                warnings.push(format!(
                    "Hessian condition number = {cond:.1e}: model may be poorly identified"
                ));
            }
        } else {
            warnings.push("Hessian is singular: model is not identifiable".into());
        }
    }

    // NaN/Inf per-parameter uncertainty.
    for i in 0..n.min(param_names.len()).min(uncertainties.len()) {
        if uncertainties[i].is_nan() || uncertainties[i].is_infinite() {
            warnings.push(format!(
                "Parameter '{}': uncertainty is {}",
                param_names[i], uncertainties[i]
            ));
        }
    }

    // Near-zero Hessian diagonal.
    for i in 0..n.min(param_names.len()) {
        if hessian[(i, i)].abs() < 1e-12 {
            warnings.push(format!(
                "Parameter '{}': near-zero Hessian diagonal — not identifiable",
                param_names[i]
            ));
        }
    }

    warnings
}

/// Maximum Likelihood Estimator
///
/// Fits statistical models by minimizing negative log-likelihood.
#[derive(Clone, Default)]
pub struct MaximumLikelihoodEstimator {
    config: OptimizerConfig,
}

impl MaximumLikelihoodEstimator {
    /// Create a new MLE with default configuration
    pub fn new() -> Self {
        Self { config: OptimizerConfig::default() }
    }

    /// Create MLE with custom optimizer configuration
    pub fn with_config(config: OptimizerConfig) -> Self {
        Self { config }
    }

    /// Access the optimizer configuration.
    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// Fit any [`LogDensityModel`] by minimizing negative log-likelihood.
    ///
    /// Returns best-fit parameters, uncertainties, covariance, optimizer
    /// diagnostics, and identifiability warnings.
    pub fn fit<M: LogDensityModel>(&self, model: &M) -> Result<FitResult> {
        let init = model.parameter_init();
        self.fit_from(model, &init)
    }

    /// Fit from an explicit starting point (warm-start).
    pub fn fit_from<M: LogDensityModel>(
        &self,
        model: &M,
        initial_params: &[f64],
    ) -> Result<FitResult> {
        let result = self.fit_minimum_from(model, initial_params)?;
        let bounds = model.parameter_bounds();
        let diag = diagnostics_from_opt(&result, &bounds);

        let hessian = self.compute_hessian(model, &result.parameters)?;
        let n = result.parameters.len();
        let diag_uncertainties = self.diagonal_uncertainties(&hessian, n);

        let fr = match self.invert_hessian(&hessian, n) {
            Some(covariance) => {
                let mut all_variances_ok = true;
                let mut uncertainties = Vec::with_capacity(n);
                for i in 0..n {
                    let var = covariance[(i, i)];
                    if var.is_finite() && var > 0.0 {
                        uncertainties.push(var.sqrt());
                    } else {
                        all_variances_ok = false;
                        uncertainties.push(diag_uncertainties[i]);
                    }
                }

                if all_variances_ok {
                    let cov_flat: Vec<f64> = covariance.iter().copied().collect();
                    FitResult::with_covariance(
                        result.parameters,
                        uncertainties,
                        cov_flat,
                        result.fval,
                        result.converged,
                        result.n_iter as usize,
                        result.n_fev,
                        result.n_gev,
                    )
                } else {
                    log::warn!("Invalid covariance diagonal; omitting covariance matrix");
                    FitResult::new(
                        result.parameters,
                        uncertainties,
                        result.fval,
                        result.converged,
                        result.n_iter as usize,
                        result.n_fev,
                        result.n_gev,
                    )
                }
            }
            None => {
                log::warn!("Hessian inversion failed, using diagonal approximation");
                let uncertainties = self.diagonal_uncertainties(&hessian, n);
                FitResult::new(
                    result.parameters,
                    uncertainties,
                    result.fval,
                    result.converged,
                    result.n_iter as usize,
                    result.n_fev,
                    result.n_gev,
                )
            }
        };
        let mut fr =
            fr.with_diagnostics(diag.reason, diag.grad_norm, diag.initial_nll, diag.n_active);

        let param_names = model.parameter_names();
        fr.warnings = identifiability_warnings(&hessian, n, &param_names, &fr.uncertainties);
        if !fr.converged {
            fr.warnings.push(format!("Optimizer did not converge: {}", fr.termination_reason));
        }

        Ok(fr)
    }

    /// Minimize NLL and return the raw optimizer result.
    ///
    /// Fast path: does not compute Hessian/covariance. Intended for repeated
    /// minimizations (likelihood-ratio comparisons, nested model scans).
    pub fn fit_minimum(
        &self,
        model: &impl LogDensityModel,
    ) -> Result<crate::optimizer::OptimizationResult> {
        let initial_params: Vec<f64> = model.parameter_init();
        self.fit_minimum_from(model, &initial_params)
    }

    /// Minimize NLL from an explicit starting point (warm-start).
    pub fn fit_minimum_from(
        &self,
        model: &impl LogDensityModel,
        initial_params: &[f64],
    ) -> Result<crate::optimizer::OptimizationResult> {
        if initial_params.len() != model.dim() {
            return Err(ls_core::Error::Validation(format!(
                "fit_minimum_from: initial_params length {} != model.dim() {}",
                initial_params.len(),
                model.dim()
            )));
        }
        let bounds: Vec<(f64, f64)> = model.parameter_bounds();

        struct ModelObjective<'a, M: LogDensityModel> {
            prepared: M::Prepared<'a>,
            model: &'a M,
        }

        impl<M: LogDensityModel> ObjectiveFunction for ModelObjective<'_, M> {
            fn eval(&self, params: &[f64]) -> Result<f64> {
                self.prepared.nll(params)
            }

            fn gradient(&self, params: &[f64]) -> Result<Vec<f64>> {
                self.model.grad_nll(params)
            }
        }

        let objective = ModelObjective { prepared: model.prepared(), model };
        let optimizer = LbfgsOptimizer::new(self.config.clone());
        optimizer.minimize(&objective, initial_params, &bounds)
    }

    /// Compute full Hessian matrix using forward differences of the analytic gradient.
    ///
    /// `H_{ij} = (∂g_i/∂x_j) ≈ (g_i(x + ε·e_j) − g_i(x)) / ε`
    fn compute_hessian(
        &self,
        model: &impl LogDensityModel,
        best_params: &[f64],
    ) -> Result<DMatrix<f64>> {
        let n = best_params.len();
        let grad_center = model.grad_nll(best_params)?;

        let mut hessian = DMatrix::zeros(n, n);

        for j in 0..n {
            let eps = 1e-4 * best_params[j].abs().max(1.0);

            let mut params_plus = best_params.to_vec();
            params_plus[j] += eps;
            let grad_plus = model.grad_nll(&params_plus)?;

            for i in 0..n {
                hessian[(i, j)] = (grad_plus[i] - grad_center[i]) / eps;
            }
        }

        // Symmetrise: H = (H + H^T) / 2
        let ht = hessian.transpose();
        hessian = (&hessian + &ht) * 0.5;

        Ok(hessian)
    }

    /// Invert Hessian to get covariance matrix via Cholesky decomposition.
    ///
    /// Even at a valid minimum the numerically estimated Hessian can be
    /// slightly indefinite, so the diagonal is damped geometrically until the
    /// Cholesky succeeds; an LU inverse is the last resort.
    fn invert_hessian(&self, hessian: &DMatrix<f64>, n: usize) -> Option<DMatrix<f64>> {
        let identity = DMatrix::identity(n, n);

        let diag_scale = (0..n).map(|i| hessian[(i, i)].abs()).fold(0.0_f64, f64::max).max(1.0);

        let mut h_damped = hessian.clone();
        let mut damping = 0.0_f64;
        let max_attempts = 10;

        for attempt in 0..max_attempts {
            if let Some(chol) = nalgebra::linalg::Cholesky::new(h_damped.clone()) {
                return Some(chol.solve(&identity));
            }

            if attempt + 1 == max_attempts {
                break;
            }

            let next_damping = if damping == 0.0 { diag_scale * 1e-9 } else { damping * 10.0 };
            let add = next_damping - damping;
            for i in 0..n {
                h_damped[(i, i)] += add;
            }
            damping = next_damping;
        }

        let cov = h_damped.lu().try_inverse()?;
        for i in 0..n {
            let v = cov[(i, i)];
            if !(v.is_finite() && v > 0.0) {
                return None;
            }
        }
        Some(cov)
    }

    /// Extract uncertainties from Hessian diagonal (fallback).
    fn diagonal_uncertainties(&self, hessian: &DMatrix<f64>, n: usize) -> Vec<f64> {
        (0..n)
            .map(|i| {
                let hess_ii = hessian[(i, i)];
                let denom = hess_ii.abs().max(1e-12);
                1.0 / denom.sqrt()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ls_core::traits::PreparedModelRef;

    /// Gaussian with known mean and unit variance: NLL = 0.5 Σ (y - mu)^2.
    struct MeanModel {
        y: Vec<f64>,
    }

    impl LogDensityModel for MeanModel {
        type Prepared<'a>
            = PreparedModelRef<'a, Self>
        where
            Self: 'a;

        fn dim(&self) -> usize {
            1
        }

        fn parameter_names(&self) -> Vec<String> {
            vec!["mu".to_string()]
        }

        fn parameter_bounds(&self) -> Vec<(f64, f64)> {
            vec![(f64::NEG_INFINITY, f64::INFINITY)]
        }

        fn parameter_init(&self) -> Vec<f64> {
            vec![0.0]
        }

        fn nll(&self, params: &[f64]) -> Result<f64> {
            let mu = params[0];
            Ok(0.5 * self.y.iter().map(|y| (y - mu) * (y - mu)).sum::<f64>())
        }

        fn grad_nll(&self, params: &[f64]) -> Result<Vec<f64>> {
            let mu = params[0];
            Ok(vec![self.y.iter().map(|y| mu - y).sum::<f64>()])
        }

        fn prepared(&self) -> Self::Prepared<'_> {
            PreparedModelRef::new(self)
        }
    }

    #[test]
    fn mle_recovers_sample_mean_with_exact_se() {
        let y = vec![1.0, 2.0, 3.0, 4.0];
        let model = MeanModel { y };
        let mle = MaximumLikelihoodEstimator::new();
        let fr = mle.fit(&model).unwrap();

        assert!(fr.converged);
        assert!((fr.parameters[0] - 2.5).abs() < 1e-6);
        // Observed information is n, so SE = 1/sqrt(n) = 0.5.
        assert!((fr.uncertainties[0] - 0.5).abs() < 1e-4);
        assert!(fr.covariance.is_some());
        assert!(fr.warnings.is_empty(), "unexpected warnings: {:?}", fr.warnings);
        assert!(fr.initial_nll >= fr.nll);
    }

    #[test]
    fn fit_minimum_skips_covariance() {
        let model = MeanModel { y: vec![0.0, 2.0] };
        let mle = MaximumLikelihoodEstimator::new();
        let opt = mle.fit_minimum(&model).unwrap();
        assert!((opt.parameters[0] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn wrong_start_length_rejected() {
        let model = MeanModel { y: vec![0.0] };
        let mle = MaximumLikelihoodEstimator::new();
        assert!(mle.fit_minimum_from(&model, &[0.0, 0.0]).is_err());
    }
}
