//! Linear mixed models with Gaussian outcomes.
//!
//! The marginal likelihood integrates Normal random effects out exactly, so
//! the model below is the classic LMM likelihood (per-subject random
//! intercept, optionally one random slope, independent variance components)
//! evaluated without ever forming the full n×n covariance: each subject
//! contributes through a 1×1 or 2×2 inner system via the Woodbury identity.
//!
//! Scope:
//! - random intercept, or random intercept + one random slope
//! - independent (diagonal) random-effects covariance (no correlation)
//! - ML or REML estimation

use ls_core::traits::{LogDensityModel, PreparedModelRef};
use ls_core::{Error, FitResult, Result};
use nalgebra::DMatrix;

use ls_data::Design;

use crate::effects::FixedEffects;
use crate::mle::MaximumLikelihoodEstimator;
use crate::optimizer::OptimizerConfig;

/// Random-effects structure, keyed by design column names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RandomEffects {
    /// Per-subject random intercept only.
    Intercept,
    /// Per-subject random intercept plus a random slope on the named
    /// design column.
    InterceptSlope {
        /// Design column providing the random-slope covariate.
        column: String,
    },
}

/// Per-subject index and sufficient statistics for the inner system.
#[derive(Debug, Clone)]
struct GroupStats {
    rows: Vec<usize>,
    count: f64, // number of observations
    zsum: f64,  // Σ z (slope covariate), 0 for intercept-only
    zsq: f64,   // Σ z²
}

/// Gaussian LMM with the random effects integrated out.
///
/// Parameter vector (stable order):
/// - fixed effects, in `Design::fixed_names()` order
/// - `log_sigma` (residual)
/// - `log_tau_subject` (random-intercept sd)
/// - `log_tau_<column>` (random-slope sd, only when enabled)
#[derive(Debug, Clone)]
pub struct LmmModel {
    x: Vec<f64>, // row-major n×p, no intercept column
    y: Vec<f64>,
    n: usize,
    p: usize,
    include_intercept: bool,
    fixed_names: Vec<String>,
    groups: Vec<GroupStats>,
    slope_col: Option<usize>,
    slope_name: Option<String>,
    use_reml: bool,
}

impl LmmModel {
    /// Build the model from a design matrix and a random-effects choice.
    ///
    /// Subjects come from the design's group coding; every subject forms one
    /// random-effects block.
    pub fn from_design(design: &Design, re: &RandomEffects) -> Result<Self> {
        let n = design.n();
        let p = design.p();
        if design.n_groups() == 0 {
            return Err(Error::Validation("design has no subjects".to_string()));
        }

        let (slope_col, slope_name) = match re {
            RandomEffects::Intercept => (None, None),
            RandomEffects::InterceptSlope { column } => {
                let idx = design.column_index(column).ok_or_else(|| {
                    Error::Validation(format!(
                        "random-slope column '{column}' is not a design column"
                    ))
                })?;
                (Some(idx), Some(column.clone()))
            }
        };

        let mut groups: Vec<GroupStats> = (0..design.n_groups())
            .map(|_| GroupStats { rows: Vec::new(), count: 0.0, zsum: 0.0, zsq: 0.0 })
            .collect();
        for (row, &g) in design.group_codes().iter().enumerate() {
            groups[g].rows.push(row);
        }
        for stats in &mut groups {
            stats.count = stats.rows.len() as f64;
            if let Some(col) = slope_col {
                for &row in &stats.rows {
                    let z = design.x()[row * p + col];
                    stats.zsum += z;
                    stats.zsq += z * z;
                }
            }
        }

        Ok(Self {
            x: design.x().to_vec(),
            y: design.y().to_vec(),
            n,
            p,
            include_intercept: design.include_intercept(),
            fixed_names: design.fixed_names(),
            groups,
            slope_col,
            slope_name,
            use_reml: false,
        })
    }

    /// Enable or disable REML estimation.
    ///
    /// REML corrects the marginal likelihood by `+0.5·log|XᵀV⁻¹X|`, which
    /// accounts for the degrees of freedom spent on the fixed effects and
    /// debiases the variance components in small samples. Default is ML.
    pub fn with_reml(mut self, reml: bool) -> Self {
        self.use_reml = reml;
        self
    }

    /// Returns `true` if REML estimation is enabled.
    pub fn is_reml(&self) -> bool {
        self.use_reml
    }

    /// Number of fixed-effect coefficients (intercept included).
    pub fn n_fixed(&self) -> usize {
        self.p + usize::from(self.include_intercept)
    }

    #[inline]
    fn xrow(&self, i: usize) -> &[f64] {
        &self.x[i * self.p..(i + 1) * self.p]
    }

    #[inline]
    fn eta(&self, i: usize, beta: &[f64]) -> f64 {
        let row = self.xrow(i);
        if self.include_intercept {
            beta[0] + row.iter().zip(&beta[1..]).map(|(&x, &b)| x * b).sum::<f64>()
        } else {
            row.iter().zip(beta).map(|(&x, &b)| x * b).sum()
        }
    }

    #[inline]
    fn unpack<'a>(&self, params: &'a [f64]) -> Result<(&'a [f64], f64, f64, Option<f64>)> {
        if params.len() != self.dim() {
            return Err(Error::Validation(format!(
                "expected {} parameters, got {}",
                self.dim(),
                params.len()
            )));
        }
        if params.iter().any(|v| !v.is_finite()) {
            return Err(Error::Validation("params must contain only finite values".to_string()));
        }
        let nb = self.n_fixed();
        let sigma = params[nb].exp();
        let tau0 = params[nb + 1].exp();
        let tau1 = self.slope_col.map(|_| params[nb + 2].exp());
        Ok((&params[..nb], sigma, tau0, tau1))
    }

    /// Inner 1×1 or 2×2 solve for one subject: returns
    /// `(log_det_m, u0, u1, quad)` where `u = M⁻¹ (a·t)` and
    /// `quad = (a·t)ᵀ u` is the Woodbury quadratic correction.
    #[allow(clippy::too_many_arguments)]
    fn inner_solve(
        &self,
        stats: &GroupStats,
        a: f64,
        tau0: f64,
        tau1: Option<f64>,
        t0: f64,
        t1: f64,
    ) -> Result<(f64, f64, f64, f64)> {
        match tau1 {
            None => {
                let m00 = 1.0 / (tau0 * tau0) + a * stats.count;
                let b0 = a * t0;
                let u0 = b0 / m00;
                Ok((m00.ln(), u0, 0.0, b0 * u0))
            }
            Some(t_slope) => {
                let m00 = 1.0 / (tau0 * tau0) + a * stats.count;
                let m01 = a * stats.zsum;
                let m11 = 1.0 / (t_slope * t_slope) + a * stats.zsq;
                let det = m00 * m11 - m01 * m01;
                if !det.is_finite() || det <= 0.0 {
                    return Err(Error::Computation(
                        "mixed-model inner system is not positive definite".to_string(),
                    ));
                }
                let b0 = a * t0;
                let b1 = a * t1;
                let u0 = (m11 * b0 - m01 * b1) / det;
                let u1 = (-m01 * b0 + m00 * b1) / det;
                Ok((det.ln(), u0, u1, b0 * u0 + b1 * u1))
            }
        }
    }

    fn nll_internal(&self, beta: &[f64], sigma: f64, tau0: f64, tau1: Option<f64>) -> Result<f64> {
        if !sigma.is_finite() || sigma <= 0.0 {
            return Err(Error::Validation("sigma must be finite and > 0".to_string()));
        }
        if !tau0.is_finite() || tau0 <= 0.0 {
            return Err(Error::Validation("tau_subject must be finite and > 0".to_string()));
        }
        if let Some(t) = tau1
            && (!t.is_finite() || t <= 0.0)
        {
            return Err(Error::Validation("tau_slope must be finite and > 0".to_string()));
        }

        let a = 1.0 / (sigma * sigma);
        let log_a = (sigma * sigma).ln();
        let log_c = (tau0 * tau0).ln() + tau1.map(|t| (t * t).ln()).unwrap_or(0.0);

        let nb = self.n_fixed();
        let mut xtvinvx =
            if self.use_reml { Some(DMatrix::<f64>::zeros(nb, nb)) } else { None };

        let mut nll = 0.0;
        for stats in &self.groups {
            if stats.rows.is_empty() {
                continue;
            }

            let mut ssr = 0.0;
            let mut t0 = 0.0;
            let mut t1 = 0.0;
            for &i in &stats.rows {
                let r = self.y[i] - self.eta(i, beta);
                ssr += r * r;
                t0 += r;
                if let Some(col) = self.slope_col {
                    t1 += self.xrow(i)[col] * r;
                }
            }

            let (log_det_m, _, _, quad_corr) = self.inner_solve(stats, a, tau0, tau1, t0, t1)?;
            let log_det_v = stats.count * log_a + log_c + log_det_m;
            nll += 0.5 * (log_det_v + a * ssr - quad_corr);

            if let Some(acc) = xtvinvx.as_mut() {
                self.accumulate_xtvinvx(acc, stats, a, tau0, tau1)?;
            }
        }

        if let Some(acc) = xtvinvx {
            let chol = nalgebra::linalg::Cholesky::new(acc).ok_or_else(|| {
                Error::Computation("REML: XᵀV⁻¹X is not positive definite".to_string())
            })?;
            let l = chol.l();
            let mut logdet = 0.0;
            for i in 0..nb {
                logdet += 2.0 * l[(i, i)].ln();
            }
            nll += 0.5 * logdet;
        }

        Ok(nll)
    }

    /// Accumulate one subject's block of `XᵀV⁻¹X` via the Woodbury identity:
    /// `a·XᵀX − a²·(XᵀZ) M⁻¹ (XᵀZ)ᵀ`.
    fn accumulate_xtvinvx(
        &self,
        acc: &mut DMatrix<f64>,
        stats: &GroupStats,
        a: f64,
        tau0: f64,
        tau1: Option<f64>,
    ) -> Result<()> {
        let nb = self.n_fixed();
        let off = usize::from(self.include_intercept);

        let mut xtz0 = vec![0.0; nb];
        let mut xtz1 = vec![0.0; nb];
        let mut fixed_row = vec![0.0; nb];

        for &i in &stats.rows {
            let row = self.xrow(i);
            if self.include_intercept {
                fixed_row[0] = 1.0;
            }
            fixed_row[off..].copy_from_slice(row);

            for j in 0..nb {
                xtz0[j] += fixed_row[j];
                for k in 0..nb {
                    acc[(j, k)] += a * fixed_row[j] * fixed_row[k];
                }
            }
            if let Some(col) = self.slope_col {
                let z = row[col];
                for j in 0..nb {
                    xtz1[j] += z * fixed_row[j];
                }
            }
        }

        match tau1 {
            None => {
                let m00 = 1.0 / (tau0 * tau0) + a * stats.count;
                let coeff = a * a / m00;
                for j in 0..nb {
                    for k in 0..nb {
                        acc[(j, k)] -= coeff * xtz0[j] * xtz0[k];
                    }
                }
            }
            Some(t_slope) => {
                let m00 = 1.0 / (tau0 * tau0) + a * stats.count;
                let m01 = a * stats.zsum;
                let m11 = 1.0 / (t_slope * t_slope) + a * stats.zsq;
                let det = m00 * m11 - m01 * m01;
                if !det.is_finite() || det <= 0.0 {
                    return Err(Error::Computation(
                        "mixed-model inner system is not positive definite".to_string(),
                    ));
                }
                let coeff = a * a / det;
                for j in 0..nb {
                    for k in 0..nb {
                        acc[(j, k)] -= coeff
                            * (m11 * xtz0[j] * xtz0[k]
                                - m01 * (xtz0[j] * xtz1[k] + xtz1[j] * xtz0[k])
                                + m00 * xtz1[j] * xtz1[k]);
                    }
                }
            }
        }
        Ok(())
    }
}

impl LogDensityModel for LmmModel {
    type Prepared<'a>
        = PreparedModelRef<'a, Self>
    where
        Self: 'a;

    fn dim(&self) -> usize {
        self.n_fixed() + 2 + usize::from(self.slope_col.is_some())
    }

    fn parameter_names(&self) -> Vec<String> {
        let mut out = self.fixed_names.clone();
        out.push("log_sigma".to_string());
        out.push("log_tau_subject".to_string());
        if let Some(name) = &self.slope_name {
            out.push(format!("log_tau_{name}"));
        }
        out
    }

    fn parameter_bounds(&self) -> Vec<(f64, f64)> {
        vec![(f64::NEG_INFINITY, f64::INFINITY); self.dim()]
    }

    fn parameter_init(&self) -> Vec<f64> {
        // Heuristic start to keep the quasi-Newton solver out of flat regions:
        // intercept at mean(y), betas at univariate centered slopes, sigma at
        // the residual sd of that rough fit, taus at the spread of group-wise
        // residual summaries.
        let n = self.n;
        let nb = self.n_fixed();
        let off = usize::from(self.include_intercept);

        let y_mean = self.y.iter().sum::<f64>() / n as f64;
        let mut x_mean = vec![0.0; self.p];
        for i in 0..n {
            let row = self.xrow(i);
            for j in 0..self.p {
                x_mean[j] += row[j];
            }
        }
        for m in &mut x_mean {
            *m /= n as f64;
        }

        let mut beta = vec![0.0; nb];
        if self.include_intercept {
            beta[0] = y_mean;
        }
        for j in 0..self.p {
            let mut num = 0.0;
            let mut den = 0.0;
            for i in 0..n {
                let xc = self.xrow(i)[j] - x_mean[j];
                num += xc * (self.y[i] - y_mean);
                den += xc * xc;
            }
            beta[off + j] = if den > 0.0 { num / den } else { 0.0 };
        }

        let mut resid = vec![0.0; n];
        let mut ss = 0.0;
        for i in 0..n {
            let r = self.y[i] - self.eta(i, &beta);
            resid[i] = r;
            ss += r * r;
        }
        let sigma = (ss / n as f64).sqrt().max(1e-6);

        let spread = |vals: &[f64]| -> Option<f64> {
            if vals.len() < 2 {
                return None;
            }
            let m = vals.len() as f64;
            let mean = vals.iter().sum::<f64>() / m;
            let var = vals.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / m;
            Some(var.sqrt().max(1e-6))
        };

        let group_means: Vec<f64> = self
            .groups
            .iter()
            .filter(|g| !g.rows.is_empty())
            .map(|g| g.rows.iter().map(|&i| resid[i]).sum::<f64>() / g.count)
            .collect();
        let tau0 = spread(&group_means).unwrap_or(1.0);

        let tau1 = self.slope_col.map(|col| {
            let mut slopes = Vec::new();
            for g in &self.groups {
                if g.rows.len() < 2 {
                    continue;
                }
                let mut num = 0.0;
                let mut den = 0.0;
                for &i in &g.rows {
                    let zc = self.xrow(i)[col] - x_mean[col];
                    num += zc * resid[i];
                    den += zc * zc;
                }
                if den > 0.0 {
                    slopes.push(num / den);
                }
            }
            spread(&slopes).unwrap_or(1.0)
        });

        let mut init = vec![0.0; self.dim()];
        init[..nb].copy_from_slice(&beta);
        init[nb] = sigma.ln();
        init[nb + 1] = tau0.ln();
        if let Some(t) = tau1 {
            init[nb + 2] = t.ln();
        }
        init
    }

    fn nll(&self, params: &[f64]) -> Result<f64> {
        let (beta, sigma, tau0, tau1) = self.unpack(params)?;
        self.nll_internal(beta, sigma, tau0, tau1)
    }

    fn grad_nll(&self, params: &[f64]) -> Result<Vec<f64>> {
        let (beta, sigma, tau0, tau1) = self.unpack(params)?;
        if !sigma.is_finite() || sigma <= 0.0 || !tau0.is_finite() || tau0 <= 0.0 {
            return Err(Error::Validation("variance parameters must be > 0".to_string()));
        }

        let a = 1.0 / (sigma * sigma);
        let nb = self.n_fixed();
        let off = usize::from(self.include_intercept);
        let mut grad = vec![0.0; self.dim()];

        // Analytic fixed-effects gradient: −Xᵀ V⁻¹ r, with
        // V⁻¹ r = a·r − a·Z u per subject.
        for stats in &self.groups {
            if stats.rows.is_empty() {
                continue;
            }
            let mut t0 = 0.0;
            let mut t1 = 0.0;
            let mut resid = Vec::with_capacity(stats.rows.len());
            for &i in &stats.rows {
                let r = self.y[i] - self.eta(i, beta);
                t0 += r;
                if let Some(col) = self.slope_col {
                    t1 += self.xrow(i)[col] * r;
                }
                resid.push((i, r));
            }

            let (_, u0, u1, _) = self.inner_solve(stats, a, tau0, tau1, t0, t1)?;

            for (i, r) in resid {
                let row = self.xrow(i);
                let z_dot_u = match self.slope_col {
                    None => u0,
                    Some(col) => u0 + row[col] * u1,
                };
                let v = a * (r - z_dot_u);
                if self.include_intercept {
                    grad[0] -= v;
                }
                for j in 0..self.p {
                    grad[off + j] -= v * row[j];
                }
            }
        }

        // The few log-scale variance parameters go through central differences;
        // the REML correction term is picked up automatically this way.
        let eps = 1e-5;
        for k in nb..self.dim() {
            let mut hi = params.to_vec();
            let mut lo = params.to_vec();
            hi[k] += eps;
            lo[k] -= eps;
            grad[k] = (self.nll(&hi)? - self.nll(&lo)?) / (2.0 * eps);
        }

        // The REML term 0.5·log|XᵀV⁻¹X| does not involve beta, so the
        // analytic beta gradient above is exact under REML as well.

        Ok(grad)
    }

    fn prepared(&self) -> Self::Prepared<'_> {
        PreparedModelRef::new(self)
    }
}

// ---------------------------------------------------------------------------
// High-level fit
// ---------------------------------------------------------------------------

/// A fitted linear mixed model with extracted components.
#[derive(Debug, Clone)]
pub struct LmmFit {
    /// Raw optimizer/covariance output over the full parameter vector.
    pub result: FitResult,
    /// Fixed-effect names, `(Intercept)` first when present.
    pub fixed_names: Vec<String>,
    /// Fixed-effect estimates.
    pub beta: Vec<f64>,
    /// Covariance of the fixed effects (row-major, nb×nb).
    pub beta_cov: Vec<f64>,
    /// Residual standard deviation.
    pub sigma: f64,
    /// Random-intercept standard deviation.
    pub tau_subject: f64,
    /// Random-slope standard deviation, when fitted.
    pub tau_slope: Option<f64>,
    /// Number of observations.
    pub n_obs: usize,
    /// Number of subjects.
    pub n_subjects: usize,
    /// Residual degrees of freedom used for t-based inference (n − nb).
    pub df_resid: f64,
    /// Whether REML was used.
    pub reml: bool,
}

impl LmmFit {
    /// Fixed-effects view for Wald tests, EMMs, and contrasts.
    pub fn fixed_effects(&self) -> FixedEffects {
        FixedEffects {
            names: self.fixed_names.clone(),
            estimates: self.beta.clone(),
            covariance: self.beta_cov.clone(),
            df: self.df_resid,
        }
    }

    /// Estimate and SE of a named coefficient.
    pub fn coefficient(&self, name: &str) -> Option<(f64, f64)> {
        let i = self.fixed_names.iter().position(|n| n == name)?;
        let nb = self.fixed_names.len();
        Some((self.beta[i], self.beta_cov[i * nb + i].max(0.0).sqrt()))
    }

    /// −2·log-likelihood at the optimum (ML fits only are comparable).
    pub fn deviance(&self) -> f64 {
        2.0 * self.result.nll
    }
}

/// Fit a linear mixed model on a design with default optimizer settings.
pub fn fit_lmm(design: &Design, re: &RandomEffects, reml: bool) -> Result<LmmFit> {
    fit_lmm_with(design, re, reml, &OptimizerConfig::default())
}

/// Fit a linear mixed model with explicit optimizer settings.
pub fn fit_lmm_with(
    design: &Design,
    re: &RandomEffects,
    reml: bool,
    config: &OptimizerConfig,
) -> Result<LmmFit> {
    let model = LmmModel::from_design(design, re)?.with_reml(reml);
    let mle = MaximumLikelihoodEstimator::with_config(config.clone());
    let fr = mle.fit(&model)?;

    let nb = model.n_fixed();
    let dim = model.dim();
    let beta = fr.parameters[..nb].to_vec();
    let beta_cov = match &fr.covariance {
        Some(cov) => {
            let mut block = vec![0.0; nb * nb];
            for i in 0..nb {
                for j in 0..nb {
                    block[i * nb + j] = cov[i * dim + j];
                }
            }
            block
        }
        None => {
            log::warn!("fixed-effects covariance unavailable; using diagonal uncertainties");
            let mut block = vec![0.0; nb * nb];
            for i in 0..nb {
                block[i * nb + i] = fr.uncertainties[i] * fr.uncertainties[i];
            }
            block
        }
    };

    let sigma = fr.parameters[nb].exp();
    let tau_subject = fr.parameters[nb + 1].exp();
    let tau_slope = (dim > nb + 2).then(|| fr.parameters[nb + 2].exp());

    Ok(LmmFit {
        fixed_names: model.parameter_names()[..nb].to_vec(),
        beta,
        beta_cov,
        sigma,
        tau_subject,
        tau_slope,
        n_obs: design.n(),
        n_subjects: design.n_groups(),
        df_resid: (design.n() as f64 - nb as f64).max(1.0),
        reml,
        result: fr,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ls_data::{LongFrame, ModelSpec};
    use nalgebra::DVector;

    /// Small frame: 2 subjects × 3 observations, one numeric covariate.
    fn small_frame() -> LongFrame {
        let mut f = LongFrame::new(vec![1, 1, 1, 2, 2, 2]);
        f.push_numeric(
            "x",
            vec![Some(1.0), Some(2.0), Some(3.0), Some(4.0), Some(1.5), Some(2.5)],
        )
        .unwrap();
        f.push_numeric(
            "y",
            vec![Some(1.0), Some(2.1), Some(2.9), Some(4.2), Some(1.4), Some(2.7)],
        )
        .unwrap();
        f
    }

    fn small_model(reml: bool) -> LmmModel {
        let frame = small_frame();
        let design =
            ModelSpec::new("y").numeric("x").without_intercept().build_design(&frame).unwrap();
        LmmModel::from_design(&design, &RandomEffects::Intercept).unwrap().with_reml(reml)
    }

    fn slope_model() -> LmmModel {
        let mut f = LongFrame::new(vec![1, 1, 1, 2, 2, 2]);
        f.push_numeric(
            "dose",
            vec![Some(0.1), Some(0.2), Some(0.3), Some(0.1), Some(0.2), Some(0.3)],
        )
        .unwrap();
        f.push_numeric(
            "y",
            vec![Some(1.0), Some(1.1), Some(0.9), Some(1.4), Some(1.6), Some(1.3)],
        )
        .unwrap();
        let design = ModelSpec::new("y").numeric("dose").build_design(&f).unwrap();
        LmmModel::from_design(&design, &RandomEffects::InterceptSlope { column: "dose".into() })
            .unwrap()
    }

    fn finite_diff_grad<M: LogDensityModel>(m: &M, params: &[f64], eps: f64) -> Vec<f64> {
        let mut g = vec![0.0; params.len()];
        for i in 0..params.len() {
            let mut hi = params.to_vec();
            let mut lo = params.to_vec();
            hi[i] += eps;
            lo[i] -= eps;
            g[i] = (m.nll(&hi).unwrap() - m.nll(&lo).unwrap()) / (2.0 * eps);
        }
        g
    }

    /// Dense reference: NLL of one subject block from the explicit covariance
    /// `V = τ₀²·J + τ₁²·zzᵀ + σ²·I`.
    fn dense_block_nll(r: &[f64], sigma: f64, tau0: f64, slope: Option<(f64, &[f64])>) -> f64 {
        let m = r.len();
        let mut v = DMatrix::zeros(m, m);
        for i in 0..m {
            for j in 0..m {
                let mut val = tau0 * tau0;
                if let Some((t1, z)) = slope {
                    val += t1 * t1 * z[i] * z[j];
                }
                if i == j {
                    val += sigma * sigma;
                }
                v[(i, j)] = val;
            }
        }
        let chol = nalgebra::linalg::Cholesky::new(v).unwrap();
        let l = chol.l();
        let mut log_det = 0.0;
        for i in 0..m {
            log_det += 2.0 * l[(i, i)].ln();
        }
        let rv = DVector::from_row_slice(r);
        let solved = chol.solve(&rv);
        0.5 * (log_det + rv.dot(&solved))
    }

    #[test]
    fn nll_matches_dense_covariance_intercept() {
        let m = small_model(false);
        let params = vec![0.2, (0.5f64).ln(), (1.2f64).ln()];
        let nll = m.nll(&params).unwrap();

        let mut dense = 0.0;
        for stats in &m.groups {
            let r: Vec<f64> =
                stats.rows.iter().map(|&i| m.y[i] - m.xrow(i)[0] * params[0]).collect();
            dense += dense_block_nll(&r, 0.5, 1.2, None);
        }
        assert!((nll - dense).abs() < 1e-10, "sparse {nll} vs dense {dense}");
    }

    #[test]
    fn nll_matches_dense_covariance_intercept_slope() {
        let m = slope_model();
        // intercept, dose, log_sigma, log_tau_subject, log_tau_dose
        let params = vec![0.2, 0.1, (0.7f64).ln(), (1.1f64).ln(), (0.6f64).ln()];
        let nll = m.nll(&params).unwrap();

        let mut dense = 0.0;
        for stats in &m.groups {
            let mut r = Vec::new();
            let mut z = Vec::new();
            for &i in &stats.rows {
                r.push(m.y[i] - (params[0] + m.xrow(i)[0] * params[1]));
                z.push(m.xrow(i)[0]);
            }
            dense += dense_block_nll(&r, 0.7, 1.1, Some((0.6, &z)));
        }
        assert!((nll - dense).abs() < 1e-10, "sparse {nll} vs dense {dense}");
    }

    #[test]
    fn gradient_matches_finite_differences() {
        let m = small_model(false);
        let p = vec![0.1, 0.0, 0.0];
        let g = m.grad_nll(&p).unwrap();
        let g_fd = finite_diff_grad(&m, &p, 1e-6);
        for i in 0..p.len() {
            assert!((g[i] - g_fd[i]).abs() < 5e-4, "grad[{i}]: {} vs {}", g[i], g_fd[i]);
        }
    }

    #[test]
    fn gradient_matches_finite_differences_slope() {
        let m = slope_model();
        let p = vec![0.2, 0.1, 0.0, 0.0, 0.0];
        let g = m.grad_nll(&p).unwrap();
        let g_fd = finite_diff_grad(&m, &p, 1e-6);
        for i in 0..p.len() {
            assert!((g[i] - g_fd[i]).abs() < 5e-4, "grad[{i}]: {} vs {}", g[i], g_fd[i]);
        }
    }

    #[test]
    fn reml_gradient_matches_finite_differences() {
        let m = small_model(true);
        let p = vec![0.1, 0.0, 0.0];
        let g = m.grad_nll(&p).unwrap();
        let g_fd = finite_diff_grad(&m, &p, 1e-6);
        for i in 0..p.len() {
            assert!((g[i] - g_fd[i]).abs() < 5e-4, "REML grad[{i}]: {} vs {}", g[i], g_fd[i]);
        }
    }

    #[test]
    fn reml_equals_ml_plus_dense_correction() {
        let m_ml = small_model(false);
        let m_reml = small_model(true);
        let params = vec![0.2, (0.5f64).ln(), (1.2f64).ln()];

        let nll_ml = m_ml.nll(&params).unwrap();
        let nll_reml = m_reml.nll(&params).unwrap();

        // Dense correction: 0.5·log|XᵀV⁻¹X| over the full stacked system.
        let n = m_ml.n;
        let sigma = params[1].exp();
        let tau0 = params[2].exp();
        let mut x_full = DMatrix::zeros(n, 1);
        for i in 0..n {
            x_full[(i, 0)] = m_ml.xrow(i)[0];
        }
        let mut v = DMatrix::zeros(n, n);
        for stats in &m_ml.groups {
            for &i in &stats.rows {
                for &j in &stats.rows {
                    let mut val = tau0 * tau0;
                    if i == j {
                        val += sigma * sigma;
                    }
                    v[(i, j)] = val;
                }
            }
        }
        let chol_v = nalgebra::linalg::Cholesky::new(v).unwrap();
        let vinv_x = chol_v.solve(&x_full);
        let xtvinvx = x_full.transpose() * vinv_x;
        let chol = nalgebra::linalg::Cholesky::new(xtvinvx).unwrap();
        let correction = 0.5 * 2.0 * chol.l()[(0, 0)].ln();

        assert!(
            (nll_reml - (nll_ml + correction)).abs() < 1e-10,
            "reml {nll_reml} vs ml+corr {}",
            nll_ml + correction
        );
        assert!(nll_reml != nll_ml);
        assert!(m_reml.is_reml() && !m_ml.is_reml());
    }

    #[test]
    fn with_reml_false_is_plain_ml() {
        let m_ml = small_model(false);
        let m_off = small_model(true).with_reml(false);
        let params = vec![0.2, (0.5f64).ln(), (1.2f64).ln()];
        let a = m_ml.nll(&params).unwrap();
        let b = m_off.nll(&params).unwrap();
        assert!((a - b).abs() < 1e-15);
    }

    #[test]
    fn unknown_slope_column_rejected() {
        let frame = small_frame();
        let design = ModelSpec::new("y").numeric("x").build_design(&frame).unwrap();
        let err = LmmModel::from_design(
            &design,
            &RandomEffects::InterceptSlope { column: "dose".into() },
        );
        assert!(err.is_err());
    }

    #[test]
    fn fit_recovers_group_structure() {
        // Two clearly separated subjects with a common slope of ~1.
        let m = small_model(false);
        let mle = MaximumLikelihoodEstimator::new();
        let fr = mle.fit(&m).unwrap();
        assert_eq!(fr.parameters.len(), 3);
        assert!(fr.nll.is_finite());
        // Slope should land near the pooled OLS slope of ~1.
        assert!((fr.parameters[0] - 1.0).abs() < 0.5, "slope {}", fr.parameters[0]);
    }
}
