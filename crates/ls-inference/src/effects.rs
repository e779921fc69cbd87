//! Fixed-effects view shared by tests, marginal means, and contrasts.
//!
//! Both a single mixed-model fit and a pooled multiple-imputation fit reduce
//! to the same thing for downstream inference: named estimates, their
//! covariance, and a reference degrees-of-freedom value. [`FixedEffects`]
//! carries exactly that, plus the linear-combination algebra everything else
//! is built from.

use ls_core::{Error, Result};
use statrs::distribution::{ContinuousCDF, Normal, StudentsT};
use statrs::function::gamma::gamma_lr;

/// Named coefficient estimates with covariance and a reference df.
#[derive(Debug, Clone)]
pub struct FixedEffects {
    /// Coefficient names (stable order).
    pub names: Vec<String>,
    /// Point estimates.
    pub estimates: Vec<f64>,
    /// Covariance matrix, row-major `len×len`.
    pub covariance: Vec<f64>,
    /// Degrees of freedom for t-based inference; `f64::INFINITY` means
    /// normal-based inference.
    pub df: f64,
}

impl FixedEffects {
    /// Number of coefficients.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// `true` when there are no coefficients.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Index of a named coefficient.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    /// Covariance element (i, j).
    pub fn cov(&self, i: usize, j: usize) -> f64 {
        self.covariance[i * self.len() + j]
    }

    /// Standard error of coefficient `i`.
    pub fn se(&self, i: usize) -> f64 {
        self.cov(i, i).max(0.0).sqrt()
    }

    /// Check internal shape consistency.
    pub fn validate(&self) -> Result<()> {
        let k = self.len();
        if k == 0 {
            return Err(Error::Validation("fixed effects are empty".to_string()));
        }
        if self.estimates.len() != k {
            return Err(Error::Validation(format!(
                "fixed effects: {} names but {} estimates",
                k,
                self.estimates.len()
            )));
        }
        if self.covariance.len() != k * k {
            return Err(Error::Validation(format!(
                "fixed effects: covariance must be {}×{}, got {} entries",
                k,
                k,
                self.covariance.len()
            )));
        }
        Ok(())
    }

    /// Estimate and SE of the linear combination `wᵀ·β`.
    pub fn linear_combo(&self, weights: &[f64]) -> Result<(f64, f64)> {
        self.validate()?;
        let k = self.len();
        if weights.len() != k {
            return Err(Error::Validation(format!(
                "weight vector has length {}, expected {}",
                weights.len(),
                k
            )));
        }
        let estimate: f64 = weights.iter().zip(&self.estimates).map(|(w, b)| w * b).sum();
        let mut var = 0.0;
        for i in 0..k {
            for j in 0..k {
                var += weights[i] * weights[j] * self.cov(i, j);
            }
        }
        Ok((estimate, var.max(0.0).sqrt()))
    }
}

// ---------------------------------------------------------------------------
// Distribution helpers (statrs-backed)
// ---------------------------------------------------------------------------

/// Switch to normal-based inference beyond this df; Student-t is numerically
/// indistinguishable from the normal there.
const NORMAL_DF_CUTOFF: f64 = 1e7;

/// Two-sided p-value of a t statistic with `df` degrees of freedom.
///
/// Infinite (or huge) df falls back to the standard normal. Invalid inputs
/// yield `NaN` rather than a panic, matching how summary tables surface
/// undefined statistics.
pub fn t_two_sided(stat: f64, df: f64) -> f64 {
    if !stat.is_finite() {
        return f64::NAN;
    }
    if !df.is_finite() || df > NORMAL_DF_CUTOFF {
        let normal = Normal::new(0.0, 1.0).unwrap();
        return 2.0 * (1.0 - normal.cdf(stat.abs()));
    }
    if df <= 0.0 {
        return f64::NAN;
    }
    match StudentsT::new(0.0, 1.0, df) {
        Ok(t) => 2.0 * (1.0 - t.cdf(stat.abs())),
        Err(_) => f64::NAN,
    }
}

/// Quantile of the t distribution with `df` degrees of freedom.
pub fn t_quantile(p: f64, df: f64) -> f64 {
    if !(0.0..1.0).contains(&p) {
        return f64::NAN;
    }
    if !df.is_finite() || df > NORMAL_DF_CUTOFF {
        let normal = Normal::new(0.0, 1.0).unwrap();
        return normal.inverse_cdf(p);
    }
    if df <= 0.0 {
        return f64::NAN;
    }
    match StudentsT::new(0.0, 1.0, df) {
        Ok(t) => t.inverse_cdf(p),
        Err(_) => f64::NAN,
    }
}

/// Chi-squared survival function `P(X > x)` via the regularized incomplete gamma.
pub fn chi_squared_sf(x: f64, df: f64) -> f64 {
    if x <= 0.0 {
        return 1.0;
    }
    1.0 - gamma_lr(df / 2.0, x / 2.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn example() -> FixedEffects {
        FixedEffects {
            names: vec!["a".into(), "b".into()],
            estimates: vec![2.0, 1.0],
            covariance: vec![0.04, 0.01, 0.01, 0.09],
            df: f64::INFINITY,
        }
    }

    #[test]
    fn linear_combo_matches_hand_computation() {
        let fx = example();
        // a − b: var = 0.04 + 0.09 − 2·0.01 = 0.11
        let (est, se) = fx.linear_combo(&[1.0, -1.0]).unwrap();
        assert!((est - 1.0).abs() < 1e-12);
        assert!((se - 0.11f64.sqrt()).abs() < 1e-12);

        assert!(fx.linear_combo(&[1.0]).is_err());
        assert_eq!(fx.index_of("b"), Some(1));
        assert!((fx.se(0) - 0.2).abs() < 1e-12);
    }

    #[test]
    fn t_helpers_match_known_values() {
        // Normal: two-sided p at 1.96 ≈ 0.05.
        assert!((t_two_sided(1.959964, f64::INFINITY) - 0.05).abs() < 1e-4);
        assert!((t_quantile(0.975, f64::INFINITY) - 1.959964).abs() < 1e-4);
        // t with 10 df: 97.5% quantile ≈ 2.228.
        assert!((t_quantile(0.975, 10.0) - 2.228).abs() < 1e-3);
        assert!((t_two_sided(2.228, 10.0) - 0.05).abs() < 1e-3);
        assert!(t_two_sided(1.0, -1.0).is_nan());
    }

    #[test]
    fn chi_squared_sf_known_values() {
        // P(X > 3.841) with 1 df ≈ 0.05.
        assert!((chi_squared_sf(3.841459, 1.0) - 0.05).abs() < 1e-4);
        assert_eq!(chi_squared_sf(-1.0, 1.0), 1.0);
    }
}
