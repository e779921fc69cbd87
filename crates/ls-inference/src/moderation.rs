//! Moderation analysis: interaction testing and simple slopes.
//!
//! A moderation question ("does the effect of x depend on m?") is answered
//! by comparing a base mixed model against the same model plus an
//! interaction term, reporting both the joint Wald test on the interaction
//! block and the likelihood-ratio test between the nested ML fits. Two-way
//! and three-way interactions go through the same machinery. A significant
//! interaction is then probed with simple slopes: the effect of the focal
//! predictor at each level of the moderator, with delta-method standard
//! errors from the fixed-effects covariance.

use ls_core::{Error, Result};
use ls_data::{Design, LongFrame, ModelSpec};

use crate::effects::{FixedEffects, t_quantile, t_two_sided};
use crate::lmm::{LmmFit, RandomEffects, fit_lmm};
use crate::wald::{LikelihoodRatioTest, WaldTest, likelihood_ratio_test, wald_block_test};

/// Result of an interaction (moderation) test.
#[derive(Debug, Clone)]
pub struct InteractionTest {
    /// Label of the tested interaction term.
    pub label: String,
    /// Joint Wald chi-squared test on the interaction block (full model).
    pub wald: WaldTest,
    /// Likelihood-ratio test between the nested ML fits.
    pub lrt: LikelihoodRatioTest,
    /// The base (reduced) fit.
    pub base: LmmFit,
    /// The fit including the interaction.
    pub full: LmmFit,
}

/// Test whether adding an interaction term improves the base model.
///
/// Both models are fit by maximum likelihood (not REML), as required for a
/// valid likelihood-ratio comparison of fixed effects. The base model must
/// contain every variable of the interaction so both fits see the same
/// complete cases.
pub fn test_interaction(
    frame: &LongFrame,
    base: &ModelSpec,
    interaction: &[&str],
    re: &RandomEffects,
) -> Result<InteractionTest> {
    let base_design = base.build_design(frame)?;
    let full_spec = base.clone().interaction(interaction);
    let full_design = full_spec.build_design(frame)?;
    if base_design.rows() != full_design.rows() {
        return Err(Error::Validation(
            "base and interaction models use different complete cases; \
             include every interaction variable in the base model"
                .to_string(),
        ));
    }

    let base_fit = fit_lmm(&base_design, re, false)?;
    let full_fit = fit_lmm(&full_design, re, false)?;

    let term = full_design.interaction_term(interaction).ok_or_else(|| {
        Error::Validation(format!("no interaction term over {interaction:?} in the full model"))
    })?;
    let off = usize::from(full_design.include_intercept());
    let indices: Vec<usize> = term.columns().map(|c| c + off).collect();
    let label = term.label().to_string();

    let fx = full_fit.fixed_effects();
    let wald = wald_block_test(&fx, &indices, &label)?;
    let df = full_design.n_fixed() - base_design.n_fixed();
    let lrt = likelihood_ratio_test(base_fit.result.nll, full_fit.result.nll, df)?;

    Ok(InteractionTest { label, wald, lrt, base: base_fit, full: full_fit })
}

/// Effect of the focal predictor at one moderator level.
#[derive(Debug, Clone)]
pub struct SimpleSlope {
    /// Moderator level the slope is conditioned on.
    pub level: String,
    /// Slope estimate.
    pub estimate: f64,
    /// Delta-method standard error.
    pub se: f64,
    /// Degrees of freedom of the t reference.
    pub df: f64,
    /// t statistic.
    pub statistic: f64,
    /// Two-sided p-value.
    pub p_value: f64,
    /// Lower confidence bound.
    pub ci_lower: f64,
    /// Upper confidence bound.
    pub ci_upper: f64,
}

/// Simple slopes of a numeric focal predictor at each level of a factor
/// moderator.
///
/// Requires the design to contain the focal main effect and the
/// focal×moderator interaction. At the reference level the slope is the
/// focal main effect; at level `l` it is `β_focal + β_focal:moderator[l]`.
pub fn simple_slopes(
    fx: &FixedEffects,
    design: &Design,
    focal: &str,
    moderator: &str,
    conf_level: f64,
) -> Result<Vec<SimpleSlope>> {
    fx.validate()?;
    if !(conf_level > 0.0 && conf_level < 1.0) {
        return Err(Error::Validation("conf_level must be in (0, 1)".to_string()));
    }
    let off = usize::from(design.include_intercept());
    let focal_col = design.column_index(focal).ok_or_else(|| {
        Error::Validation(format!("'{focal}' is not a (numeric) design column"))
    })?;
    let levels = design
        .factor_levels(moderator)
        .ok_or_else(|| Error::Validation(format!("'{moderator}' is not a factor in the design")))?
        .to_vec();
    let term = design.interaction_term(&[focal, moderator]).ok_or_else(|| {
        Error::Validation(format!("no {focal}×{moderator} interaction in the design"))
    })?;
    let term_cols: Vec<usize> = term.columns().collect();
    let term_names: Vec<&String> = term_cols.iter().map(|&c| &design.names()[c]).collect();

    let crit = t_quantile((1.0 + conf_level) / 2.0, fx.df);
    let mut out = Vec::with_capacity(levels.len());
    for (idx, level) in levels.iter().enumerate() {
        let mut weights = vec![0.0; fx.len()];
        weights[off + focal_col] = 1.0;
        if idx > 0 {
            let tag = format!("{moderator}[{level}]");
            let within = term_names
                .iter()
                .position(|n| n.contains(&tag))
                .ok_or_else(|| {
                    Error::Computation(format!("interaction column for level '{level}' not found"))
                })?;
            weights[off + term_cols[within]] = 1.0;
        }
        let (estimate, se) = fx.linear_combo(&weights)?;
        let statistic = if se > 0.0 { estimate / se } else { f64::NAN };
        out.push(SimpleSlope {
            level: level.clone(),
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

#[cfg(test)]
mod tests {
    use super::*;
    use ls_data::Factor;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rand_distr::{Distribution, Normal};

    /// Two groups of subjects with different x-slopes: a clear moderation.
    fn moderated_frame(slope_gap: f64) -> LongFrame {
        let mut rng = StdRng::seed_from_u64(42);
        let noise = Normal::new(0.0, 0.3).unwrap();
        let alpha = Normal::new(0.0, 0.5).unwrap();

        let n_subjects = 24;
        let obs_per_subject = 4;
        let mut subjects = Vec::new();
        let mut group = Vec::new();
        let mut x = Vec::new();
        let mut y = Vec::new();

        for s in 0..n_subjects {
            let treated = s >= n_subjects / 2;
            let a: f64 = alpha.sample(&mut rng);
            for k in 0..obs_per_subject {
                subjects.push(s as u64);
                group.push(if treated { "b" } else { "a" });
                let xv = k as f64;
                let slope = if treated { 2.0 + slope_gap } else { 2.0 };
                x.push(Some(xv));
                y.push(Some(1.0 + slope * xv + a + noise.sample(&mut rng)));
            }
        }

        let mut frame = LongFrame::new(subjects);
        let group_opt: Vec<Option<&str>> = group.iter().map(|g| Some(*g)).collect();
        frame.push_factor("group", Factor::with_levels(&group_opt, &["a", "b"]).unwrap()).unwrap();
        frame.push_numeric("x", x).unwrap();
        frame.push_numeric("y", y).unwrap();
        frame
    }

    #[test]
    fn strong_interaction_is_detected() {
        let frame = moderated_frame(3.0);
        let base = ModelSpec::new("y").numeric("x").factor("group");
        let res =
            test_interaction(&frame, &base, &["x", "group"], &RandomEffects::Intercept).unwrap();

        assert_eq!(res.label, "x:group");
        assert_eq!(res.wald.df, 1);
        assert_eq!(res.lrt.df, 1);
        assert!(res.wald.p_value < 1e-3, "wald p = {}", res.wald.p_value);
        assert!(res.lrt.p_value < 1e-3, "lrt p = {}", res.lrt.p_value);
        assert!(res.full.result.nll <= res.base.result.nll + 1e-6);
    }

    #[test]
    fn simple_slopes_recover_group_slopes() {
        let frame = moderated_frame(3.0);
        let design = ModelSpec::new("y")
            .numeric("x")
            .factor("group")
            .interaction(&["x", "group"])
            .build_design(&frame)
            .unwrap();
        let fit = fit_lmm(&design, &RandomEffects::Intercept, true).unwrap();
        let slopes =
            simple_slopes(&fit.fixed_effects(), &design, "x", "group", 0.95).unwrap();

        assert_eq!(slopes.len(), 2);
        assert_eq!(slopes[0].level, "a");
        assert_eq!(slopes[1].level, "b");
        assert!((slopes[0].estimate - 2.0).abs() < 0.3, "slope a = {}", slopes[0].estimate);
        assert!((slopes[1].estimate - 5.0).abs() < 0.3, "slope b = {}", slopes[1].estimate);
        assert!(slopes[0].se > 0.0 && slopes[1].se > 0.0);
        assert!(slopes[1].ci_lower < slopes[1].estimate);
    }

    #[test]
    fn mismatched_complete_cases_rejected() {
        let mut frame = moderated_frame(0.0);
        // Covariate with a hole that the base model does not use.
        let n = frame.n_rows();
        let mut z = vec![Some(1.0); n];
        z[0] = None;
        frame.push_numeric("z", z).unwrap();

        let base = ModelSpec::new("y").numeric("x").factor("group");
        let err = test_interaction(&frame, &base, &["x", "z"], &RandomEffects::Intercept);
        assert!(err.is_err());
    }

    #[test]
    fn three_way_interaction_block_size() {
        // No real 3-way effect; just exercise the block bookkeeping.
        let mut frame = moderated_frame(1.0);
        let n = frame.n_rows();
        let sex: Vec<Option<&str>> =
            (0..n).map(|i| Some(if i % 2 == 0 { "f" } else { "m" })).collect();
        frame.push_factor("sex", Factor::with_levels(&sex, &["f", "m"]).unwrap()).unwrap();

        let base = ModelSpec::new("y")
            .numeric("x")
            .factor("group")
            .factor("sex")
            .interaction(&["x", "group"])
            .interaction(&["x", "sex"])
            .interaction(&["group", "sex"]);
        let res = test_interaction(&frame, &base, &["x", "group", "sex"], &RandomEffects::Intercept)
            .unwrap();
        assert_eq!(res.label, "x:group:sex");
        assert_eq!(res.wald.df, 1);
        assert_eq!(res.lrt.df, 1);
        assert!(res.wald.p_value > 0.0 && res.wald.p_value <= 1.0);
    }
}
