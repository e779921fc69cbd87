//! Rubin's combination rules for repeated complete-data fits.
//!
//! Given the same model fit on each of the M completed datasets, the pooled
//! estimate of a parameter is the mean of the complete-data estimates; its
//! variance splits into the average within-imputation variance Ū and the
//! between-imputation variance B, combined as `T = Ū + (1 + 1/M)·B`.
//! Degrees of freedom follow Barnard & Rubin (1999), which respects the
//! complete-data degrees of freedom in small samples. The full total
//! covariance matrix is pooled the same way so contrasts and marginal means
//! can be computed on the pooled fit.

use ls_core::{Error, Result};
use ls_inference::effects::{FixedEffects, t_quantile, t_two_sided};
use ls_inference::summary::{Table, fmt_num, fmt_p};

/// One model fit on one completed dataset.
#[derive(Debug, Clone)]
pub struct CompleteDataFit {
    /// Parameter names (must agree across fits).
    pub names: Vec<String>,
    /// Point estimates.
    pub estimates: Vec<f64>,
    /// Covariance matrix, row-major `k×k`.
    pub covariance: Vec<f64>,
    /// Complete-data degrees of freedom (e.g. n − k).
    pub df_complete: f64,
}

/// Pooled inference for one parameter.
#[derive(Debug, Clone)]
pub struct PooledParameter {
    /// Parameter name.
    pub name: String,
    /// Pooled estimate Q̄.
    pub estimate: f64,
    /// Total standard error √T.
    pub se: f64,
    /// Average within-imputation variance Ū.
    pub within: f64,
    /// Between-imputation variance B.
    pub between: f64,
    /// Relative increase in variance due to nonresponse.
    pub riv: f64,
    /// Fraction of missing information.
    pub fmi: f64,
    /// Barnard–Rubin degrees of freedom.
    pub df: f64,
    /// t statistic (estimate / se).
    pub statistic: f64,
    /// Two-sided p-value.
    pub p_value: f64,
    /// Lower confidence bound.
    pub ci_lower: f64,
    /// Upper confidence bound.
    pub ci_upper: f64,
}

/// Pooled fit across M imputed datasets.
#[derive(Debug, Clone)]
pub struct PooledFit {
    /// Per-parameter pooled inference, in fit order.
    pub parameters: Vec<PooledParameter>,
    /// Pooled total covariance `Ū + (1 + 1/M)·B`, row-major `k×k`.
    pub covariance: Vec<f64>,
    /// Number of imputed datasets.
    pub m: usize,
    /// Complete-data degrees of freedom used in the Barnard–Rubin formula.
    pub df_complete: f64,
    /// Confidence level of the intervals.
    pub conf_level: f64,
}

impl PooledFit {
    /// Look up a pooled parameter by name.
    pub fn parameter(&self, name: &str) -> Option<&PooledParameter> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// Fixed-effects view over the pooled estimates and total covariance.
    ///
    /// The reference df is the smallest per-parameter Barnard–Rubin df, a
    /// conservative choice for contrasts that mix parameters.
    pub fn fixed_effects(&self) -> FixedEffects {
        let df = self
            .parameters
            .iter()
            .map(|p| p.df)
            .fold(f64::INFINITY, f64::min);
        FixedEffects {
            names: self.parameters.iter().map(|p| p.name.clone()).collect(),
            estimates: self.parameters.iter().map(|p| p.estimate).collect(),
            covariance: self.covariance.clone(),
            df,
        }
    }

    /// Render the pooled-estimate table.
    pub fn table(&self) -> Table {
        let mut table = Table::new(&[
            "term", "estimate", "se", "df", "t", "p", "riv", "fmi", "ci_lower", "ci_upper",
        ])
        .with_title(&format!("Pooled estimates (m = {})", self.m));
        for p in &self.parameters {
            table.push_row(vec![
                p.name.clone(),
                fmt_num(p.estimate),
                fmt_num(p.se),
                fmt_num(p.df),
                fmt_num(p.statistic),
                fmt_p(p.p_value),
                fmt_num(p.riv),
                fmt_num(p.fmi),
                fmt_num(p.ci_lower),
                fmt_num(p.ci_upper),
            ]);
        }
        table
    }
}

/// Barnard–Rubin adjusted degrees of freedom.
fn barnard_rubin_df(m: usize, lambda: f64, df_complete: f64) -> f64 {
    if lambda < 1e-10 {
        return df_complete;
    }
    let df_old = (m as f64 - 1.0) / (lambda * lambda);
    if !df_complete.is_finite() {
        return df_old;
    }
    let df_obs = (df_complete + 1.0) / (df_complete + 3.0) * df_complete * (1.0 - lambda);
    df_old * df_obs / (df_old + df_obs)
}

/// Pool repeated complete-data fits with Rubin's rules.
pub fn pool(fits: &[CompleteDataFit], conf_level: f64) -> Result<PooledFit> {
    let m = fits.len();
    if m < 2 {
        return Err(Error::Validation("pooling requires at least 2 fits".to_string()));
    }
    if !(conf_level > 0.0 && conf_level < 1.0) {
        return Err(Error::Validation("conf_level must be in (0, 1)".to_string()));
    }

    let names = &fits[0].names;
    let k = names.len();
    if k == 0 {
        return Err(Error::Validation("fits have no parameters".to_string()));
    }
    for (i, fit) in fits.iter().enumerate() {
        if &fit.names != names {
            return Err(Error::Validation(format!(
                "fit {i} has different parameter names than fit 0"
            )));
        }
        if fit.estimates.len() != k || fit.covariance.len() != k * k {
            return Err(Error::Validation(format!("fit {i} has inconsistent dimensions")));
        }
        if !fit.df_complete.is_finite() || fit.df_complete <= 0.0 {
            return Err(Error::Validation(format!(
                "fit {i} has invalid complete-data df {}",
                fit.df_complete
            )));
        }
    }
    let df_complete = fits.iter().map(|f| f.df_complete).fold(f64::INFINITY, f64::min);
    let m_f = m as f64;

    // Q̄ and the between/within matrices.
    let mut qbar = vec![0.0; k];
    for fit in fits {
        for j in 0..k {
            qbar[j] += fit.estimates[j] / m_f;
        }
    }

    let mut ubar = vec![0.0; k * k];
    let mut between = vec![0.0; k * k];
    for fit in fits {
        for a in 0..k {
            let da = fit.estimates[a] - qbar[a];
            for b in 0..k {
                ubar[a * k + b] += fit.covariance[a * k + b] / m_f;
                between[a * k + b] += da * (fit.estimates[b] - qbar[b]) / (m_f - 1.0);
            }
        }
    }

    let inflate = 1.0 + 1.0 / m_f;
    let total: Vec<f64> = ubar
        .iter()
        .zip(&between)
        .map(|(u, b)| u + inflate * b)
        .collect();

    let crit_of = |df: f64| t_quantile((1.0 + conf_level) / 2.0, df);

    let mut parameters = Vec::with_capacity(k);
    for j in 0..k {
        let estimate = qbar[j];
        let within = ubar[j * k + j];
        let b = between[j * k + j];
        let t = total[j * k + j];
        let se = t.max(0.0).sqrt();

        let riv = if within > 0.0 { inflate * b / within } else { f64::INFINITY };
        let lambda = if t > 0.0 { inflate * b / t } else { 0.0 };
        let df = barnard_rubin_df(m, lambda, df_complete);
        let fmi = if riv.is_finite() { (riv + 2.0 / (df + 3.0)) / (1.0 + riv) } else { 1.0 };

        let statistic = if se > 0.0 { estimate / se } else { f64::NAN };
        let crit = crit_of(df);
        parameters.push(PooledParameter {
            name: names[j].clone(),
            estimate,
            se,
            within,
            between: b,
            riv,
            fmi,
            df,
            statistic,
            p_value: t_two_sided(statistic, df),
            ci_lower: estimate - crit * se,
            ci_upper: estimate + crit * se,
        });
    }

    Ok(PooledFit { parameters, covariance: total, m, df_complete, conf_level })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fit(estimates: Vec<f64>, variances: Vec<f64>, df: f64) -> CompleteDataFit {
        let k = estimates.len();
        let mut cov = vec![0.0; k * k];
        for (j, v) in variances.iter().enumerate() {
            cov[j * k + j] = *v;
        }
        CompleteDataFit {
            names: (0..k).map(|j| format!("b{j}")).collect(),
            estimates,
            covariance: cov,
            df_complete: df,
        }
    }

    #[test]
    fn two_imputation_hand_example() {
        // Estimates 1.0 and 2.0, both with within-variance 0.25, df_com = 100.
        let fits = vec![fit(vec![1.0], vec![0.25], 100.0), fit(vec![2.0], vec![0.25], 100.0)];
        let pooled = pool(&fits, 0.95).unwrap();
        let p = &pooled.parameters[0];

        // Q̄ = 1.5, Ū = 0.25, B = 0.5, T = 0.25 + 1.5·0.5 = 1.0.
        assert!((p.estimate - 1.5).abs() < 1e-12);
        assert!((p.within - 0.25).abs() < 1e-12);
        assert!((p.between - 0.5).abs() < 1e-12);
        assert!((p.se - 1.0).abs() < 1e-12);

        // riv = 0.75/0.25 = 3, lambda = 0.75.
        assert!((p.riv - 3.0).abs() < 1e-12);
        // Barnard–Rubin: df_old = 1/0.5625 ≈ 1.778, df_obs ≈ 24.75,
        // df = (1.778·24.75)/(1.778+24.75) ≈ 1.659.
        assert!((p.df - 1.659).abs() < 0.01, "df = {}", p.df);
        assert!(p.fmi > 0.5 && p.fmi < 1.0);
        assert!(p.ci_lower < p.estimate && p.estimate < p.ci_upper);
    }

    #[test]
    fn zero_between_variance_collapses_to_complete_data() {
        // Identical estimates across imputations: B = 0, df = df_complete.
        let fits = vec![
            fit(vec![2.0, -1.0], vec![0.04, 0.09], 50.0),
            fit(vec![2.0, -1.0], vec![0.04, 0.09], 50.0),
            fit(vec![2.0, -1.0], vec![0.04, 0.09], 50.0),
        ];
        let pooled = pool(&fits, 0.95).unwrap();
        for (p, (e, v)) in pooled.parameters.iter().zip([(2.0f64, 0.04f64), (-1.0, 0.09)]) {
            assert!((p.estimate - e).abs() < 1e-12);
            assert!((p.se - v.sqrt()).abs() < 1e-12);
            assert_eq!(p.between, 0.0);
            assert_eq!(p.df, 50.0);
            assert!(p.fmi < 0.05, "fmi = {}", p.fmi);
        }
    }

    #[test]
    fn pooled_covariance_is_total_matrix() {
        let fits = vec![fit(vec![1.0, 0.0], vec![0.25, 0.25], 30.0),
                        fit(vec![2.0, 1.0], vec![0.25, 0.25], 30.0)];
        let pooled = pool(&fits, 0.95).unwrap();
        // Between covariance of (1,0) and (2,1): off-diagonal 0.5;
        // total off-diagonal = 0 + 1.5·0.5 = 0.75.
        assert!((pooled.covariance[1] - 0.75).abs() < 1e-12);
        let fx = pooled.fixed_effects();
        assert_eq!(fx.names, vec!["b0", "b1"]);
        assert!(fx.df.is_finite());

        let rendered = pooled.table().to_string();
        assert!(rendered.contains("Pooled estimates (m = 2)"));
        assert!(rendered.contains("b0"));
    }

    #[test]
    fn validation_errors() {
        let one = vec![fit(vec![1.0], vec![0.1], 10.0)];
        assert!(pool(&one, 0.95).is_err());

        let mut other = fit(vec![1.0], vec![0.1], 10.0);
        other.names = vec!["different".to_string()];
        let fits = vec![fit(vec![1.0], vec![0.1], 10.0), other];
        assert!(pool(&fits, 0.95).is_err());

        let fits = vec![fit(vec![1.0], vec![0.1], 10.0), fit(vec![2.0], vec![0.1], 10.0)];
        assert!(pool(&fits, 1.5).is_err());

        let bad_df = vec![fit(vec![1.0], vec![0.1], 0.0), fit(vec![2.0], vec![0.1], 10.0)];
        assert!(pool(&bad_df, 0.95).is_err());
    }
}
