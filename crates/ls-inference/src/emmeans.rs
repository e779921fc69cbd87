//! Estimated marginal means and post-hoc contrasts.
//!
//! EMMs are predictions on a reference grid: the named factors are crossed
//! over all their levels while numeric covariates sit at their design means
//! and factors outside the grid are averaged over their levels with equal
//! weight. Every estimate is a linear combination `Lᵀβ` of the fixed
//! effects, so standard errors come straight from `Lᵀ Σ L` — which is why
//! the same code serves a single mixed-model fit and a pooled
//! multiple-imputation fit.
//!
//! Contrasts:
//! - pairwise differences between grid cells, with multiplicity adjustment,
//! - interaction contrasts (differences of differences) for two factors.

use std::collections::HashMap;

use ls_core::{Error, Result};
use ls_data::{Design, GridValue};

use crate::effects::{FixedEffects, t_quantile, t_two_sided};

/// Multiplicity adjustment for families of contrasts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Adjust {
    /// No adjustment (raw p-values).
    None,
    /// Bonferroni: `p·m`, clamped to 1.
    Bonferroni,
    /// Holm step-down.
    Holm,
    /// Šidák: `1 − (1−p)^m`.
    Sidak,
}

/// One estimated marginal mean.
#[derive(Debug, Clone)]
pub struct Emm {
    /// (factor, level) pairs identifying the grid cell.
    pub levels: Vec<(String, String)>,
    /// Display label, e.g. `group=treated, time=post`.
    pub label: String,
    /// Predicted marginal mean.
    pub estimate: f64,
    /// Standard error.
    pub se: f64,
    /// Degrees of freedom of the t reference.
    pub df: f64,
    /// Lower confidence bound.
    pub ci_lower: f64,
    /// Upper confidence bound.
    pub ci_upper: f64,
}

/// One contrast row.
#[derive(Debug, Clone)]
pub struct ContrastRow {
    /// Display label, e.g. `treated:post - control:post`.
    pub label: String,
    /// Contrast estimate.
    pub estimate: f64,
    /// Standard error.
    pub se: f64,
    /// Degrees of freedom of the t reference.
    pub df: f64,
    /// t statistic.
    pub statistic: f64,
    /// Raw two-sided p-value.
    pub p_value: f64,
    /// Multiplicity-adjusted p-value.
    pub p_adjusted: f64,
    /// Lower confidence bound (unadjusted).
    pub ci_lower: f64,
    /// Upper confidence bound (unadjusted).
    pub ci_upper: f64,
}

/// Apply a multiplicity adjustment to a family of raw p-values.
pub fn adjust_p_values(raw: &[f64], adjust: Adjust) -> Vec<f64> {
    let m = raw.len();
    if m == 0 {
        return Vec::new();
    }
    match adjust {
        Adjust::None => raw.to_vec(),
        Adjust::Bonferroni => raw.iter().map(|p| (p * m as f64).min(1.0)).collect(),
        Adjust::Sidak => raw.iter().map(|p| 1.0 - (1.0 - p).powi(m as i32)).collect(),
        Adjust::Holm => {
            let mut order: Vec<usize> = (0..m).collect();
            order.sort_by(|&a, &b| raw[a].partial_cmp(&raw[b]).unwrap_or(std::cmp::Ordering::Equal));
            let mut out = vec![0.0; m];
            let mut running = 0.0_f64;
            for (rank, &idx) in order.iter().enumerate() {
                let scaled = ((m - rank) as f64 * raw[idx]).min(1.0);
                running = running.max(scaled);
                out[idx] = running;
            }
            out
        }
    }
}

/// Grid cells (level-index combinations) over the given factors.
fn reference_grid(design: &Design, factors: &[&str]) -> Result<Vec<Vec<(String, String)>>> {
    if factors.is_empty() {
        return Err(Error::Validation("emmeans needs at least one factor".to_string()));
    }
    let mut level_sets: Vec<(String, Vec<String>)> = Vec::with_capacity(factors.len());
    for f in factors {
        let levels = design.factor_levels(f).ok_or_else(|| {
            Error::Validation(format!("'{f}' is not a factor in the design"))
        })?;
        level_sets.push(((*f).to_string(), levels.to_vec()));
    }

    let mut grid: Vec<Vec<(String, String)>> = vec![Vec::new()];
    for (name, levels) in &level_sets {
        let mut next = Vec::with_capacity(grid.len() * levels.len());
        for cell in &grid {
            for level in levels {
                let mut c = cell.clone();
                c.push((name.clone(), level.clone()));
                next.push(c);
            }
        }
        grid = next;
    }
    Ok(grid)
}

fn cell_assign(cell: &[(String, String)]) -> HashMap<String, GridValue> {
    cell.iter()
        .map(|(f, l)| (f.clone(), GridValue::Level(l.clone())))
        .collect()
}

fn cell_label(cell: &[(String, String)]) -> String {
    cell.iter().map(|(f, l)| format!("{f}={l}")).collect::<Vec<_>>().join(", ")
}

fn cell_short_label(cell: &[(String, String)]) -> String {
    cell.iter().map(|(_, l)| l.clone()).collect::<Vec<_>>().join(":")
}

fn check_dimensions(fx: &FixedEffects, design: &Design) -> Result<()> {
    fx.validate()?;
    if fx.len() != design.n_fixed() {
        return Err(Error::Validation(format!(
            "fixed effects have {} coefficients but the design has {}",
            fx.len(),
            design.n_fixed()
        )));
    }
    Ok(())
}

/// Estimated marginal means over the reference grid of the named factors.
pub fn emmeans(
    fx: &FixedEffects,
    design: &Design,
    factors: &[&str],
    conf_level: f64,
) -> Result<Vec<Emm>> {
    check_dimensions(fx, design)?;
    if !(conf_level > 0.0 && conf_level < 1.0) {
        return Err(Error::Validation("conf_level must be in (0, 1)".to_string()));
    }
    let crit = t_quantile((1.0 + conf_level) / 2.0, fx.df);

    let mut out = Vec::new();
    for cell in reference_grid(design, factors)? {
        let row = design.fixed_row(&cell_assign(&cell))?;
        let (estimate, se) = fx.linear_combo(&row)?;
        out.push(Emm {
            label: cell_label(&cell),
            levels: cell,
            estimate,
            se,
            df: fx.df,
            ci_lower: estimate - crit * se,
            ci_upper: estimate + crit * se,
        });
    }
    Ok(out)
}

fn contrast_from_weights(
    fx: &FixedEffects,
    weights: &[f64],
    label: String,
    crit: f64,
) -> Result<ContrastRow> {
    let (estimate, se) = fx.linear_combo(weights)?;
    let statistic = if se > 0.0 { estimate / se } else { f64::NAN };
    Ok(ContrastRow {
        label,
        estimate,
        se,
        df: fx.df,
        statistic,
        p_value: t_two_sided(statistic, fx.df),
        p_adjusted: f64::NAN,
        ci_lower: estimate - crit * se,
        ci_upper: estimate + crit * se,
    })
}

fn fill_adjusted(rows: &mut [ContrastRow], adjust: Adjust) {
    let raw: Vec<f64> = rows.iter().map(|r| r.p_value).collect();
    let adj = adjust_p_values(&raw, adjust);
    for (row, p) in rows.iter_mut().zip(adj) {
        row.p_adjusted = p;
    }
}

/// All pairwise differences between grid cells of the named factors.
pub fn pairwise_contrasts(
    fx: &FixedEffects,
    design: &Design,
    factors: &[&str],
    adjust: Adjust,
    conf_level: f64,
) -> Result<Vec<ContrastRow>> {
    check_dimensions(fx, design)?;
    if !(conf_level > 0.0 && conf_level < 1.0) {
        return Err(Error::Validation("conf_level must be in (0, 1)".to_string()));
    }
    let crit = t_quantile((1.0 + conf_level) / 2.0, fx.df);

    let grid = reference_grid(design, factors)?;
    let rows: Vec<Vec<f64>> = grid
        .iter()
        .map(|cell| design.fixed_row(&cell_assign(cell)))
        .collect::<Result<_>>()?;

    let mut out = Vec::new();
    for i in 0..grid.len() {
        for j in (i + 1)..grid.len() {
            let weights: Vec<f64> =
                rows[i].iter().zip(&rows[j]).map(|(a, b)| a - b).collect();
            let label =
                format!("{} - {}", cell_short_label(&grid[i]), cell_short_label(&grid[j]));
            out.push(contrast_from_weights(fx, &weights, label, crit)?);
        }
    }
    fill_adjusted(&mut out, adjust);
    Ok(out)
}

/// Interaction contrasts (differences of differences) for two factors.
///
/// For each level pair (a, b) of `factor_a` and (u, v) of `factor_b`, the
/// contrast is `(b@v − a@v) − (b@u − a@u)`: the change in the
/// `factor_a` difference across `factor_b`. In a 2×2 design with treatment
/// coding this reproduces the interaction coefficient exactly.
pub fn interaction_contrasts(
    fx: &FixedEffects,
    design: &Design,
    factor_a: &str,
    factor_b: &str,
    adjust: Adjust,
    conf_level: f64,
) -> Result<Vec<ContrastRow>> {
    check_dimensions(fx, design)?;
    if !(conf_level > 0.0 && conf_level < 1.0) {
        return Err(Error::Validation("conf_level must be in (0, 1)".to_string()));
    }
    let crit = t_quantile((1.0 + conf_level) / 2.0, fx.df);

    let levels_a = design
        .factor_levels(factor_a)
        .ok_or_else(|| Error::Validation(format!("'{factor_a}' is not a factor in the design")))?
        .to_vec();
    let levels_b = design
        .factor_levels(factor_b)
        .ok_or_else(|| Error::Validation(format!("'{factor_b}' is not a factor in the design")))?
        .to_vec();

    let row_at = |la: &str, lb: &str| -> Result<Vec<f64>> {
        let mut assign = HashMap::new();
        assign.insert(factor_a.to_string(), GridValue::Level(la.to_string()));
        assign.insert(factor_b.to_string(), GridValue::Level(lb.to_string()));
        design.fixed_row(&assign)
    };

    let mut out = Vec::new();
    for a in 0..levels_a.len() {
        for b in (a + 1)..levels_a.len() {
            for u in 0..levels_b.len() {
                for v in (u + 1)..levels_b.len() {
                    let r_bv = row_at(&levels_a[b], &levels_b[v])?;
                    let r_av = row_at(&levels_a[a], &levels_b[v])?;
                    let r_bu = row_at(&levels_a[b], &levels_b[u])?;
                    let r_au = row_at(&levels_a[a], &levels_b[u])?;
                    let weights: Vec<f64> = (0..fx.len())
                        .map(|k| (r_bv[k] - r_av[k]) - (r_bu[k] - r_au[k]))
                        .collect();
                    let label = format!(
                        "({} - {}) x ({} - {})",
                        levels_a[b], levels_a[a], levels_b[v], levels_b[u]
                    );
                    out.push(contrast_from_weights(fx, &weights, label, crit)?);
                }
            }
        }
    }
    fill_adjusted(&mut out, adjust);
    Ok(out)
}
