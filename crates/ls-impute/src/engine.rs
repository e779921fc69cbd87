//! Chained-equations multiple imputation.
//!
//! For each of the M datasets, missing cells are first filled with randomly
//! sampled observed values, then the incomplete variables are revisited for
//! `n_iter` sweeps. Each visit fits a Bayesian linear regression of the
//! observed cells on the predictors (drawing σ² from a scaled
//! inverse-chi-square and β from its normal posterior) and replaces the
//! missing cells by predictive draws (`NormDraw`), donor values matched on
//! predictions (`Pmm`), or plain observed-value samples (`SampleObserved`).
//!
//! Model degradation never aborts an imputation: constant predictors are
//! dropped and singular systems fall back to observed-value sampling, with a
//! [`LoggedEvent`] recorded for later inspection — the imputation analogue
//! of "check the logged events" in the analysis workflow.

use ls_core::{Error, Result};
use ls_data::{Column, LongFrame};
use nalgebra::{DMatrix, DVector};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{ChiSquared, Distribution, StandardNormal};

use crate::spec::{ImputationSpec, ImputeMethod, VariableSpec};

/// One recorded imputation anomaly.
#[derive(Debug, Clone)]
pub struct LoggedEvent {
    /// Imputed dataset index (0-based).
    pub imputation: usize,
    /// Chained-equation sweep (1-based; 0 = initialization).
    pub iteration: usize,
    /// Variable being imputed.
    pub variable: String,
    /// What happened.
    pub message: String,
}

/// M completed datasets plus the imputation event log.
#[derive(Debug, Clone)]
pub struct MultipleImputation {
    /// Completed datasets, differing only in previously missing cells.
    pub completed: Vec<LongFrame>,
    /// Events recorded while imputing (inspect before trusting results).
    pub events: Vec<LoggedEvent>,
    /// Number of datasets.
    pub m: usize,
    /// Sweeps per dataset.
    pub n_iter: usize,
    /// Base seed; dataset `i` used `seed + i`.
    pub seed: u64,
}

/// Run chained-equations multiple imputation.
pub fn impute(frame: &LongFrame, spec: &ImputationSpec) -> Result<MultipleImputation> {
    spec.validate(frame)?;

    // Original missingness pattern per variable; fixed across sweeps.
    let mut missing: Vec<(usize, Vec<usize>)> = Vec::with_capacity(spec.variables.len());
    for (vi, var) in spec.variables.iter().enumerate() {
        let rows: Vec<usize> = frame
            .numeric(&var.name)?
            .iter()
            .enumerate()
            .filter_map(|(i, c)| if c.is_none() { Some(i) } else { None })
            .collect();
        if rows.len() == frame.n_rows() {
            return Err(Error::Validation(format!(
                "variable '{}' has no observed values",
                var.name
            )));
        }
        if rows.is_empty() {
            log::debug!("variable '{}' is complete; nothing to impute", var.name);
        }
        missing.push((vi, rows));
    }

    let mut completed = Vec::with_capacity(spec.m);
    let mut events = Vec::new();

    for imp in 0..spec.m {
        let mut rng = StdRng::seed_from_u64(spec.seed.wrapping_add(imp as u64));
        let mut work = frame.clone();

        // Initialize every hole with a random observed value.
        for (vi, rows) in &missing {
            let var = &spec.variables[*vi];
            if rows.is_empty() {
                continue;
            }
            let observed: Vec<f64> =
                frame.numeric(&var.name)?.iter().flatten().copied().collect();
            for &row in rows {
                let pick = observed[rng.random_range(0..observed.len())];
                work.set_numeric(&var.name, row, pick)?;
            }
        }

        for iter in 1..=spec.n_iter {
            for (vi, rows) in &missing {
                if rows.is_empty() {
                    continue;
                }
                let var = &spec.variables[*vi];
                impute_variable(&mut work, var, rows, &mut rng, imp, iter, &mut events)?;
            }
        }

        completed.push(work);
    }

    Ok(MultipleImputation {
        completed,
        events,
        m: spec.m,
        n_iter: spec.n_iter,
        seed: spec.seed,
    })
}

/// One chained-equation visit to one variable.
fn impute_variable(
    work: &mut LongFrame,
    var: &VariableSpec,
    missing_rows: &[usize],
    rng: &mut StdRng,
    imp: usize,
    iter: usize,
    events: &mut Vec<LoggedEvent>,
) -> Result<()> {
    let n = work.n_rows();
    let in_missing = {
        let mut mask = vec![false; n];
        for &r in missing_rows {
            mask[r] = true;
        }
        mask
    };
    let observed_rows: Vec<usize> = (0..n).filter(|&i| !in_missing[i]).collect();

    let y_current: Vec<f64> = work
        .numeric(&var.name)?
        .iter()
        .map(|c| c.ok_or_else(|| Error::Computation("hole survived initialization".into())))
        .collect::<Result<_>>()?;
    let y_obs: Vec<f64> = observed_rows.iter().map(|&i| y_current[i]).collect();

    if matches!(var.method, ImputeMethod::SampleObserved) {
        for &row in missing_rows {
            let pick = y_obs[rng.random_range(0..y_obs.len())];
            work.set_numeric(&var.name, row, pick)?;
        }
        return Ok(());
    }

    // Predictor columns over all rows (current completed values).
    let (columns, names) = predictor_columns(work, &var.predictors)?;

    // Drop predictors that are constant among the observed cases.
    let mut keep = Vec::with_capacity(columns.len());
    for (col, name) in columns.iter().zip(&names) {
        let obs: Vec<f64> = observed_rows.iter().map(|&i| col[i]).collect();
        let mean = obs.iter().sum::<f64>() / obs.len() as f64;
        let var_obs = obs.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / obs.len() as f64;
        if var_obs < 1e-12 {
            log::warn!("imputation of '{}': predictor '{}' is constant, dropped", var.name, name);
            events.push(LoggedEvent {
                imputation: imp,
                iteration: iter,
                variable: var.name.clone(),
                message: format!("predictor '{name}' has no variance among observed cases; dropped"),
            });
            keep.push(false);
        } else {
            keep.push(true);
        }
    }
    let mut kept_columns = Vec::with_capacity(columns.len());
    for (col, keep) in columns.into_iter().zip(&keep) {
        if *keep {
            kept_columns.push(col);
        }
    }
    let columns = kept_columns;

    let q = columns.len() + 1; // intercept
    let n_obs = observed_rows.len();
    if columns.is_empty() || n_obs <= q + 1 {
        events.push(LoggedEvent {
            imputation: imp,
            iteration: iter,
            variable: var.name.clone(),
            message: format!(
                "imputation model not estimable ({n_obs} observed cases, {q} coefficients); \
                 falling back to observed-value sampling"
            ),
        });
        for &row in missing_rows {
            let pick = y_obs[rng.random_range(0..y_obs.len())];
            work.set_numeric(&var.name, row, pick)?;
        }
        return Ok(());
    }

    // X over observed rows, with intercept.
    let mut x_obs = DMatrix::zeros(n_obs, q);
    for (r, &i) in observed_rows.iter().enumerate() {
        x_obs[(r, 0)] = 1.0;
        for (c, col) in columns.iter().enumerate() {
            x_obs[(r, c + 1)] = col[i];
        }
    }
    let y_vec = DVector::from_vec(y_obs.clone());

    let xtx = x_obs.transpose() * &x_obs;
    let xty = x_obs.transpose() * &y_vec;
    let Some(chol) = nalgebra::linalg::Cholesky::new(xtx) else {
        events.push(LoggedEvent {
            imputation: imp,
            iteration: iter,
            variable: var.name.clone(),
            message: "singular imputation model; falling back to observed-value sampling"
                .to_string(),
        });
        for &row in missing_rows {
            let pick = y_obs[rng.random_range(0..y_obs.len())];
            work.set_numeric(&var.name, row, pick)?;
        }
        return Ok(());
    };
    let beta_hat = chol.solve(&xty);

    let fitted = &x_obs * &beta_hat;
    let rss: f64 = y_vec
        .iter()
        .zip(fitted.iter())
        .map(|(y, f)| (y - f) * (y - f))
        .sum::<f64>()
        .max(1e-12);

    // σ² | data  ~  rss / χ²(df),   β | σ², data  ~  N(β̂, σ²(XᵀX)⁻¹).
    let df = (n_obs - q) as f64;
    let chi2 = ChiSquared::new(df)
        .map_err(|e| Error::Computation(format!("invalid chi-square df {df}: {e}")))?;
    let sigma2: f64 = rss / chi2.sample(rng);
    let sigma = sigma2.sqrt();

    let z = DVector::from_iterator(q, (0..q).map(|_| {
        let draw: f64 = StandardNormal.sample(rng);
        draw
    }));
    let lt = chol.l().transpose();
    let noise = lt
        .solve_upper_triangular(&z)
        .ok_or_else(|| Error::Computation("triangular solve failed in beta draw".to_string()))?;
    let beta_draw = &beta_hat + noise * sigma;

    let predict = |row: usize, beta: &DVector<f64>| -> f64 {
        let mut eta = beta[0];
        for (c, col) in columns.iter().enumerate() {
            eta += beta[c + 1] * col[row];
        }
        eta
    };

    match var.method {
        ImputeMethod::NormDraw => {
            for &row in missing_rows {
                let eps: f64 = StandardNormal.sample(rng);
                work.set_numeric(&var.name, row, predict(row, &beta_draw) + sigma * eps)?;
            }
        }
        ImputeMethod::Pmm { donors } => {
            // Type-1 matching: observed predictions from β̂, missing
            // predictions from the β draw.
            let pred_obs: Vec<f64> = observed_rows.iter().map(|&i| predict(i, &beta_hat)).collect();
            let k = donors.min(n_obs);
            for &row in missing_rows {
                let target = predict(row, &beta_draw);
                let mut ranked: Vec<(f64, usize)> = pred_obs
                    .iter()
                    .enumerate()
                    .map(|(j, p)| ((p - target).abs(), j))
                    .collect();
                ranked.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
                let donor = ranked[rng.random_range(0..k)].1;
                work.set_numeric(&var.name, row, y_obs[donor])?;
            }
        }
        ImputeMethod::SampleObserved => unreachable!("handled above"),
    }

    Ok(())
}

/// Materialize predictor columns (numeric as-is, factors as dummies) over all rows.
fn predictor_columns(
    frame: &LongFrame,
    predictors: &[String],
) -> Result<(Vec<Vec<f64>>, Vec<String>)> {
    let mut columns = Vec::new();
    let mut names = Vec::new();
    for p in predictors {
        match frame.column(p) {
            Some(Column::Numeric(values)) => {
                let col: Vec<f64> = values
                    .iter()
                    .map(|c| {
                        c.ok_or_else(|| {
                            Error::Computation(format!("predictor '{p}' still has holes"))
                        })
                    })
                    .collect::<Result<_>>()?;
                columns.push(col);
                names.push(p.clone());
            }
            Some(Column::Factor(f)) => {
                for level in 1..f.n_levels() {
                    let col: Vec<f64> = f
                        .codes()
                        .iter()
                        .map(|c| {
                            let code = c.ok_or_else(|| {
                                Error::Computation(format!("factor predictor '{p}' has holes"))
                            })?;
                            Ok(if code == level { 1.0 } else { 0.0 })
                        })
                        .collect::<Result<_>>()?;
                    columns.push(col);
                    names.push(format!("{p}[{}]", f.levels()[level]));
                }
            }
            None => return Err(Error::Validation(format!("no predictor column '{p}'"))),
        }
    }
    Ok((columns, names))
}
