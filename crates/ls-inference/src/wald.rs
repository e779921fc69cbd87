//! Coefficient tests, joint Wald tests, and likelihood-ratio tests.
//!
//! Per-coefficient inference is t-based with the residual degrees of freedom
//! carried on the [`FixedEffects`] view. Joint tests on a term block (the
//! moderation workhorse) use the Wald chi-squared statistic
//! `βᵀ Σ⁻¹ β` over the block; nested ML fits are compared with the usual
//! likelihood-ratio chi-squared.

use ls_core::{Error, Result};
use nalgebra::{DMatrix, DVector};

use crate::effects::{FixedEffects, chi_squared_sf, t_quantile, t_two_sided};

/// One row of a coefficient table.
#[derive(Debug, Clone)]
pub struct CoefTest {
    /// Coefficient name.
    pub name: String,
    /// Point estimate.
    pub estimate: f64,
    /// Standard error.
    pub se: f64,
    /// Degrees of freedom used for the t reference.
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

/// t-based tests and confidence intervals for every coefficient.
pub fn coef_tests(fx: &FixedEffects, conf_level: f64) -> Result<Vec<CoefTest>> {
    fx.validate()?;
    if !(conf_level > 0.0 && conf_level < 1.0) {
        return Err(Error::Validation("conf_level must be in (0, 1)".to_string()));
    }
    let crit = t_quantile((1.0 + conf_level) / 2.0, fx.df);
    let mut out = Vec::with_capacity(fx.len());
    for i in 0..fx.len() {
        let estimate = fx.estimates[i];
        let se = fx.se(i);
        let statistic = if se > 0.0 { estimate / se } else { f64::NAN };
        out.push(CoefTest {
            name: fx.names[i].clone(),
            estimate,
            se,
            df: fx.df,
            statistic,
            p_value: t_two_sided(statistic, fx.df),
            ci_lower: estimate - crit * se,
            ci_upper: estimate + crit * se,
        });
    }
    Ok(out)
}

/// Result of a joint Wald test on a coefficient block.
#[derive(Debug, Clone)]
pub struct WaldTest {
    /// Label of the tested block (usually a term label).
    pub label: String,
    /// Wald chi-squared statistic.
    pub statistic: f64,
    /// Degrees of freedom (block size).
    pub df: usize,
    /// p-value against the chi-squared reference.
    pub p_value: f64,
}

/// Joint Wald chi-squared test that all coefficients in `indices` are zero.
pub fn wald_block_test(fx: &FixedEffects, indices: &[usize], label: &str) -> Result<WaldTest> {
    fx.validate()?;
    if indices.is_empty() {
        return Err(Error::Validation("wald_block_test: empty index set".to_string()));
    }
    let k = fx.len();
    for &i in indices {
        if i >= k {
            return Err(Error::Validation(format!(
                "wald_block_test: index {i} out of range (k={k})"
            )));
        }
    }

    let q = indices.len();
    let b = DVector::from_iterator(q, indices.iter().map(|&i| fx.estimates[i]));
    let mut v = DMatrix::zeros(q, q);
    for (a, &i) in indices.iter().enumerate() {
        for (c, &j) in indices.iter().enumerate() {
            v[(a, c)] = fx.cov(i, j);
        }
    }

    let v_inv = v.try_inverse().ok_or_else(|| {
        Error::Computation(format!("singular covariance block in Wald test for '{label}'"))
    })?;
    let statistic = (b.transpose() * v_inv * &b)[(0, 0)];

    Ok(WaldTest {
        label: label.to_string(),
        statistic,
        df: q,
        p_value: chi_squared_sf(statistic, q as f64),
    })
}

/// Result of a likelihood-ratio test between nested ML fits.
#[derive(Debug, Clone)]
pub struct LikelihoodRatioTest {
    /// 2·(NLL_reduced − NLL_full).
    pub statistic: f64,
    /// Difference in parameter count.
    pub df: usize,
    /// Chi-squared p-value.
    pub p_value: f64,
}

/// Likelihood-ratio test from the NLLs of nested ML fits.
///
/// Both fits must be maximum likelihood (not REML) for the statistic to be
/// chi-squared under the null. A slightly negative statistic from optimizer
/// noise is clamped to zero.
pub fn likelihood_ratio_test(
    nll_reduced: f64,
    nll_full: f64,
    df: usize,
) -> Result<LikelihoodRatioTest> {
    if df == 0 {
        return Err(Error::Validation("likelihood_ratio_test: df must be > 0".to_string()));
    }
    if !nll_reduced.is_finite() || !nll_full.is_finite() {
        return Err(Error::Validation("likelihood_ratio_test: NLLs must be finite".to_string()));
    }
    let statistic = (2.0 * (nll_reduced - nll_full)).max(0.0);
    Ok(LikelihoodRatioTest { statistic, df, p_value: chi_squared_sf(statistic, df as f64) })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn example() -> FixedEffects {
        FixedEffects {
            names: vec!["(Intercept)".into(), "x".into(), "x:m".into()],
            estimates: vec![1.0, 2.0, 0.5],
            covariance: vec![
                0.25, 0.00, 0.00, //
                0.00, 1.00, 0.00, //
                0.00, 0.00, 0.25,
            ],
            df: f64::INFINITY,
        }
    }

    #[test]
    fn coef_tests_match_hand_values() {
        let fx = example();
        let tests = coef_tests(&fx, 0.95).unwrap();
        assert_eq!(tests.len(), 3);

        // Intercept: 1.0 / 0.5 = 2.0
        assert!((tests[0].statistic - 2.0).abs() < 1e-12);
        assert!((tests[0].ci_lower - (1.0 - 1.959964 * 0.5)).abs() < 1e-4);
        // x: z = 2 → p ≈ 0.0455
        assert!((tests[1].p_value - 0.0455).abs() < 1e-3);
        assert!(coef_tests(&fx, 1.5).is_err());
    }

    #[test]
    fn wald_block_on_diagonal_covariance_sums_squares() {
        let fx = example();
        // x and x:m with diagonal covariance: chi2 = 2²/1 + 0.5²/0.25 = 5.
        let w = wald_block_test(&fx, &[1, 2], "x:m block").unwrap();
        assert!((w.statistic - 5.0).abs() < 1e-10);
        assert_eq!(w.df, 2);
        assert!(w.p_value > 0.0 && w.p_value < 1.0);

        assert!(wald_block_test(&fx, &[], "empty").is_err());
        assert!(wald_block_test(&fx, &[9], "oob").is_err());
    }

    #[test]
    fn lrt_matches_chi_squared_reference() {
        // 2·(10 − 8.0793) ≈ 3.841 → p ≈ 0.05 with 1 df.
        let lrt = likelihood_ratio_test(10.0, 10.0 - 3.841459 / 2.0, 1).unwrap();
        assert!((lrt.p_value - 0.05).abs() < 1e-4);

        // Tiny negative statistic clamps to zero.
        let lrt = likelihood_ratio_test(5.0, 5.0 + 1e-9, 1).unwrap();
        assert_eq!(lrt.statistic, 0.0);
        assert!((lrt.p_value - 1.0).abs() < 1e-12);

        assert!(likelihood_ratio_test(1.0, 1.0, 0).is_err());
    }
}
