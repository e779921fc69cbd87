//! Seeded toy-data simulation and amputation helpers.
//!
//! Generates the kind of two-group, two-period longitudinal dataset the
//! analysis workflows operate on: subject-level covariates (sex, age, race),
//! a treatment assignment, a subject random intercept, and pre/post outcomes
//! with a known group×time effect. Amputation helpers punch MCAR or MAR
//! holes into outcome columns so the imputation pipeline has something to do.

use ls_core::{Error, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

use crate::factor::Factor;
use crate::reshape::WideFrame;

/// Configuration for [`simulate_two_group`].
#[derive(Debug, Clone)]
pub struct TwoGroupConfig {
    /// Subjects per group.
    pub n_per_group: usize,
    /// Outcome level of the control group at the pre period.
    pub baseline: f64,
    /// Group main effect (treated vs control at pre).
    pub effect_group: f64,
    /// Secular time trend (post vs pre in the control group).
    pub effect_time: f64,
    /// Group×time effect: the treatment effect a DID analysis targets.
    pub effect_did: f64,
    /// Slope of the (centered) age covariate.
    pub beta_age: f64,
    /// Standard deviation of the subject random intercept.
    pub sigma_subject: f64,
    /// Residual standard deviation.
    pub sigma_resid: f64,
}

impl Default for TwoGroupConfig {
    fn default() -> Self {
        Self {
            n_per_group: 100,
            baseline: 20.0,
            effect_group: 1.0,
            effect_time: 2.0,
            effect_did: 3.0,
            beta_age: 0.1,
            sigma_subject: 1.5,
            sigma_resid: 1.0,
        }
    }
}

/// Simulate a wide two-group longitudinal dataset.
///
/// Columns: `group` (control/treated), `sex` (female/male), `race`
/// (3 levels), `age` (numeric), `y_pre`, `y_post`. Outcomes follow
///
/// `y_it = baseline + g_i·effect_group + t·effect_time + g_i·t·effect_did
///        + beta_age·(age_i − 50) + α_i + ε_it`
///
/// with `α_i ~ N(0, sigma_subject²)` and `ε_it ~ N(0, sigma_resid²)`.
/// Deterministic for a fixed seed.
pub fn simulate_two_group(config: &TwoGroupConfig, seed: u64) -> Result<WideFrame> {
    if config.n_per_group == 0 {
        return Err(Error::Validation("n_per_group must be > 0".to_string()));
    }
    if config.sigma_subject < 0.0 || config.sigma_resid <= 0.0 {
        return Err(Error::Validation(
            "sigma_subject must be >= 0 and sigma_resid > 0".to_string(),
        ));
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let subj_dist = Normal::new(0.0, config.sigma_subject.max(1e-12))
        .map_err(|e| Error::Validation(format!("invalid sigma_subject: {e}")))?;
    let resid_dist = Normal::new(0.0, config.sigma_resid)
        .map_err(|e| Error::Validation(format!("invalid sigma_resid: {e}")))?;
    let age_dist = Normal::new(50.0, 10.0).unwrap();

    let n = 2 * config.n_per_group;
    let subjects: Vec<u64> = (1..=n as u64).collect();

    let mut group = Vec::with_capacity(n);
    let mut sex = Vec::with_capacity(n);
    let mut race = Vec::with_capacity(n);
    let mut age = Vec::with_capacity(n);
    let mut y_pre = Vec::with_capacity(n);
    let mut y_post = Vec::with_capacity(n);

    for i in 0..n {
        let treated = i >= config.n_per_group;
        let g = if treated { 1.0 } else { 0.0 };
        group.push(if treated { "treated" } else { "control" });
        sex.push(if rng.random::<f64>() < 0.5 { "female" } else { "male" });
        race.push(match rng.random_range(0..3u8) {
            0 => "white",
            1 => "black",
            _ => "other",
        });
        let a: f64 = age_dist.sample(&mut rng);
        let alpha: f64 = subj_dist.sample(&mut rng);
        let mu_pre = config.baseline + g * config.effect_group + config.beta_age * (a - 50.0);
        let mu_post = mu_pre + config.effect_time + g * config.effect_did;
        age.push(Some(a));
        y_pre.push(Some(mu_pre + alpha + resid_dist.sample(&mut rng)));
        y_post.push(Some(mu_post + alpha + resid_dist.sample(&mut rng)));
    }

    let mut wide = WideFrame::new(subjects)?;
    let group_opt: Vec<Option<&str>> = group.iter().map(|g| Some(*g)).collect();
    wide.push_factor("group", Factor::with_levels(&group_opt, &["control", "treated"])?)?;
    let sex_opt: Vec<Option<&str>> = sex.iter().map(|s| Some(*s)).collect();
    wide.push_factor("sex", Factor::with_levels(&sex_opt, &["female", "male"])?)?;
    let race_opt: Vec<Option<&str>> = race.iter().map(|r| Some(*r)).collect();
    wide.push_factor("race", Factor::with_levels(&race_opt, &["white", "black", "other"])?)?;
    wide.push_numeric("age", age)?;
    wide.push_numeric("y_pre", y_pre)?;
    wide.push_numeric("y_post", y_post)?;
    Ok(wide)
}

/// Punch MCAR holes into a numeric column.
///
/// Each present cell is set missing independently with probability
/// `fraction`. Returns the number of cells removed.
pub fn ampute_mcar(
    wide: &mut WideFrame,
    column: &str,
    fraction: f64,
    seed: u64,
) -> Result<usize> {
    if !(0.0..=1.0).contains(&fraction) {
        return Err(Error::Validation("fraction must be in [0, 1]".to_string()));
    }
    let present: Vec<usize> = (0..wide.n_rows())
        .filter(|&i| wide.numeric(column).map(|v| v[i].is_some()).unwrap_or(false))
        .collect();
    // Column existence check (and type check) before mutating anything.
    wide.numeric(column)?;

    let mut rng = StdRng::seed_from_u64(seed);
    let mut removed = 0;
    for i in present {
        if rng.random::<f64>() < fraction {
            wide.set_numeric(column, i, None)?;
            removed += 1;
        }
    }
    log::debug!("ampute_mcar: removed {removed} cells from '{column}'");
    Ok(removed)
}

/// Punch MAR holes into a numeric column.
///
/// Missingness probability increases with the (standardized) value of the
/// numeric `driver` column through a logistic link, with an average rate of
/// roughly `fraction`. Rows with a missing driver are never amputed.
/// Returns the number of cells removed.
pub fn ampute_mar(
    wide: &mut WideFrame,
    column: &str,
    driver: &str,
    fraction: f64,
    seed: u64,
) -> Result<usize> {
    if !(0.0..1.0).contains(&fraction) {
        return Err(Error::Validation("fraction must be in [0, 1)".to_string()));
    }
    wide.numeric(column)?;
    let driver_vals = wide.numeric(driver)?.to_vec();

    let observed: Vec<f64> = driver_vals.iter().flatten().copied().collect();
    if observed.len() < 2 {
        return Err(Error::Validation(format!(
            "driver '{driver}' needs at least 2 observed values"
        )));
    }
    let mean = observed.iter().sum::<f64>() / observed.len() as f64;
    let var =
        observed.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / observed.len() as f64;
    let sd = var.sqrt().max(1e-12);

    // Logistic missingness model centered so the average rate is ~fraction.
    let intercept = (fraction / (1.0 - fraction)).ln();
    let mut rng = StdRng::seed_from_u64(seed);
    let mut removed = 0;
    for i in 0..wide.n_rows() {
        let Some(d) = driver_vals[i] else { continue };
        if wide.numeric(column)?[i].is_none() {
            continue;
        }
        let z = (d - mean) / sd;
        let p = 1.0 / (1.0 + (-(intercept + z)).exp());
        if rng.random::<f64>() < p {
            wide.set_numeric(column, i, None)?;
            removed += 1;
        }
    }
    log::debug!("ampute_mar: removed {removed} cells from '{column}' (driver '{driver}')");
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simulation_is_deterministic_and_complete() {
        let cfg = TwoGroupConfig::default();
        let a = simulate_two_group(&cfg, 7).unwrap();
        let b = simulate_two_group(&cfg, 7).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.n_rows(), 200);
        assert!(a.numeric("y_pre").unwrap().iter().all(|v| v.is_some()));
        assert!(a.numeric("y_post").unwrap().iter().all(|v| v.is_some()));

        let c = simulate_two_group(&cfg, 8).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn group_means_reflect_did_effect() {
        let cfg = TwoGroupConfig {
            n_per_group: 500,
            sigma_subject: 0.5,
            sigma_resid: 0.5,
            ..TwoGroupConfig::default()
        };
        let wide = simulate_two_group(&cfg, 42).unwrap();
        let group = wide.factor("group").unwrap().codes().to_vec();
        let pre = wide.numeric("y_pre").unwrap().to_vec();
        let post = wide.numeric("y_post").unwrap().to_vec();

        let mean = |g: usize, vals: &[Option<f64>]| {
            let xs: Vec<f64> = vals
                .iter()
                .zip(&group)
                .filter(|(_, c)| **c == Some(g))
                .map(|(v, _)| v.unwrap())
                .collect();
            xs.iter().sum::<f64>() / xs.len() as f64
        };
        let did = (mean(1, &post) - mean(1, &pre)) - (mean(0, &post) - mean(0, &pre));
        assert!(
            (did - cfg.effect_did).abs() < 0.3,
            "empirical DID {did} far from {}",
            cfg.effect_did
        );
    }

    #[test]
    fn mcar_removes_roughly_the_requested_fraction() {
        let cfg = TwoGroupConfig { n_per_group: 500, ..TwoGroupConfig::default() };
        let mut wide = simulate_two_group(&cfg, 3).unwrap();
        let removed = ampute_mcar(&mut wide, "y_post", 0.3, 11).unwrap();
        let frac = removed as f64 / 1000.0;
        assert!((frac - 0.3).abs() < 0.08, "removed fraction {frac}");
        assert_eq!(
            wide.numeric("y_post").unwrap().iter().filter(|v| v.is_none()).count(),
            removed
        );
    }

    #[test]
    fn mar_targets_high_driver_values() {
        let cfg = TwoGroupConfig { n_per_group: 500, ..TwoGroupConfig::default() };
        let mut wide = simulate_two_group(&cfg, 5).unwrap();
        let removed = ampute_mar(&mut wide, "y_post", "age", 0.3, 13).unwrap();
        assert!(removed > 100, "too few removed: {removed}");

        // Missingness should concentrate in older subjects.
        let age = wide.numeric("age").unwrap().to_vec();
        let post = wide.numeric("y_post").unwrap().to_vec();
        let (mut miss_sum, mut miss_n, mut obs_sum, mut obs_n) = (0.0, 0usize, 0.0, 0usize);
        for (a, y) in age.iter().zip(&post) {
            let a = a.unwrap();
            if y.is_none() {
                miss_sum += a;
                miss_n += 1;
            } else {
                obs_sum += a;
                obs_n += 1;
            }
        }
        assert!(miss_sum / miss_n as f64 > obs_sum / obs_n as f64);
    }
}
