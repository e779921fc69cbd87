//! Difference-in-differences: the canonical two-period, two-group estimator.
//!
//! Estimates the ATT from the 2×2 interaction OLS
//! `y = α + β₁·treat + β₂·post + δ·(treat×post) + ε`,
//! where δ equals the difference-in-differences of the four cell means.
//! Standard errors are reported both as plain OLS and as Liang–Zeger
//! cluster-robust (HC0 sandwich) with the usual small-sample correction,
//! clustering on the caller's id (typically the subject).
//!
//! The multiply-imputed longitudinal variant (mixed model per completed
//! dataset, Rubin pooling) lives in `ls-impute`; this module is the
//! complete-data building block.

use std::collections::HashMap;

use ls_core::{Error, Result};
use nalgebra::{DMatrix, DVector};

use crate::effects::t_two_sided;

/// Result of a canonical (2×2) DID estimate.
#[derive(Debug, Clone)]
pub struct DidResult {
    /// ATT estimate (coefficient on treat×post).
    pub att: f64,
    /// OLS standard error of the ATT.
    pub se: f64,
    /// Cluster-robust standard error of the ATT.
    pub se_cluster: f64,
    /// t statistic (ATT / cluster-robust SE).
    pub t_stat: f64,
    /// Two-sided p-value using a normal reference on the cluster-robust t.
    pub p_value: f64,
    /// Mean outcome per (treat, post) cell.
    pub cell_means: CellMeans,
    /// Number of observations.
    pub n_obs: usize,
    /// Number of clusters.
    pub n_clusters: usize,
}

/// Mean outcome of the four DID cells.
#[derive(Debug, Clone, Copy, Default)]
pub struct CellMeans {
    /// Treated group, post period.
    pub treated_post: f64,
    /// Treated group, pre period.
    pub treated_pre: f64,
    /// Control group, post period.
    pub control_post: f64,
    /// Control group, pre period.
    pub control_pre: f64,
}

impl CellMeans {
    /// The raw difference-in-differences of the cell means.
    pub fn did(&self) -> f64 {
        (self.treated_post - self.treated_pre) - (self.control_post - self.control_pre)
    }
}

#[derive(Default)]
struct CellAccumulator {
    sums: [f64; 4],
    counts: [usize; 4],
}

impl CellAccumulator {
    fn add(&mut self, treat: u8, post: u8, y: f64) -> Result<()> {
        if treat > 1 || post > 1 {
            return Err(Error::Validation("treat and post must be 0 or 1".to_string()));
        }
        let cell = (treat * 2 + post) as usize;
        self.sums[cell] += y;
        self.counts[cell] += 1;
        Ok(())
    }

    fn means(&self) -> Result<CellMeans> {
        if self.counts.iter().any(|&c| c == 0) {
            return Err(Error::Validation(
                "all four (treat × post) cells must have observations".to_string(),
            ));
        }
        let mean = |cell: usize| self.sums[cell] / self.counts[cell] as f64;
        Ok(CellMeans {
            control_pre: mean(0),
            control_post: mean(1),
            treated_pre: mean(2),
            treated_post: mean(3),
        })
    }
}

/// Canonical two-period DID estimator with cluster-robust standard errors.
///
/// # Arguments
///
/// - `y` — outcome (length n).
/// - `treat` — 1 = treated group, 0 = control (length n).
/// - `post` — 1 = post period, 0 = pre (length n).
/// - `cluster_ids` — clustering variable for the robust SE (typically the
///   subject id).
pub fn did_canonical(
    y: &[f64],
    treat: &[u8],
    post: &[u8],
    cluster_ids: &[u64],
) -> Result<DidResult> {
    let n = y.len();
    if n == 0 {
        return Err(Error::Validation("y must be non-empty".to_string()));
    }
    if treat.len() != n || post.len() != n || cluster_ids.len() != n {
        return Err(Error::Validation(
            "treat, post, cluster_ids must have the same length as y".to_string(),
        ));
    }
    if y.iter().any(|v| !v.is_finite()) {
        return Err(Error::Validation("y must contain only finite values".to_string()));
    }

    let mut cells = CellAccumulator::default();
    for i in 0..n {
        cells.add(treat[i], post[i], y[i])?;
    }
    let cell_means = cells.means()?;

    // OLS on [1, treat, post, treat·post].
    let k = 4usize;
    let mut x_data = Vec::with_capacity(n * k);
    for i in 0..n {
        let d = treat[i] as f64;
        let p = post[i] as f64;
        x_data.extend_from_slice(&[1.0, d, p, d * p]);
    }
    let x = DMatrix::from_row_slice(n, k, &x_data);
    let y_vec = DVector::from_column_slice(y);

    let xtx = x.transpose() * &x;
    let xtx_inv = xtx
        .try_inverse()
        .ok_or_else(|| Error::Computation("X'X singular in DID OLS".to_string()))?;
    let beta = &xtx_inv * (x.transpose() * &y_vec);
    let att = beta[3];

    let resid = &y_vec - &x * &beta;
    let rss: f64 = resid.iter().map(|r| r * r).sum();
    let dof = n as f64 - k as f64;
    let sigma2 = if dof > 0.0 { rss / dof } else { f64::NAN };
    let se = (sigma2 * xtx_inv[(3, 3)]).max(0.0).sqrt();

    let (se_cluster_vec, n_clusters) = cluster_robust_se(&x, &resid, &xtx_inv, cluster_ids)?;
    let se_cluster = se_cluster_vec[3];
    let t_stat = if se_cluster > 0.0 { att / se_cluster } else { f64::NAN };

    Ok(DidResult {
        att,
        se,
        se_cluster,
        t_stat,
        p_value: t_two_sided(t_stat, f64::INFINITY),
        cell_means,
        n_obs: n,
        n_clusters,
    })
}

/// Liang–Zeger cluster-robust (HC0 sandwich) standard errors.
///
/// `V = (X'X)⁻¹ · (Σ_g X_g' e_g e_g' X_g) · (X'X)⁻¹`, scaled by the
/// `G/(G−1) · (N−1)/(N−K)` small-sample correction. Returns the SEs and the
/// number of clusters.
fn cluster_robust_se(
    x: &DMatrix<f64>,
    residuals: &DVector<f64>,
    xtx_inv: &DMatrix<f64>,
    cluster_ids: &[u64],
) -> Result<(Vec<f64>, usize)> {
    let n = x.nrows();
    let p = x.ncols();

    let mut clusters: HashMap<u64, Vec<usize>> = HashMap::new();
    for (i, &cid) in cluster_ids.iter().enumerate() {
        clusters.entry(cid).or_default().push(i);
    }
    let g = clusters.len();
    if g < 2 {
        return Err(Error::Validation(
            "cluster-robust SE needs at least 2 clusters".to_string(),
        ));
    }

    let mut meat = DMatrix::zeros(p, p);
    for rows in clusters.values() {
        // Cluster score s_g = X_g' e_g.
        let mut score = vec![0.0_f64; p];
        for &i in rows {
            let e = residuals[i];
            for j in 0..p {
                score[j] += x[(i, j)] * e;
            }
        }
        for a in 0..p {
            for b in 0..p {
                meat[(a, b)] += score[a] * score[b];
            }
        }
    }

    let (g_f, n_f, p_f) = (g as f64, n as f64, p as f64);
    let correction =
        if n_f > p_f { (g_f / (g_f - 1.0)) * ((n_f - 1.0) / (n_f - p_f)) } else { 1.0 };
    let vcr = (xtx_inv * &meat) * xtx_inv * correction;

    Ok(((0..p).map(|j| vcr[(j, j)].max(0.0).sqrt()).collect(), g))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noiseless_cells_give_exact_att() {
        // Control trend +2, treated trend +5: ATT = 3.
        let y = vec![10.0, 10.0, 12.0, 12.0, 10.0, 10.0, 15.0, 15.0];
        let treat = vec![0, 0, 0, 0, 1, 1, 1, 1];
        let post = vec![0, 0, 1, 1, 0, 0, 1, 1];
        let cluster = vec![1, 2, 1, 2, 3, 4, 3, 4];

        let res = did_canonical(&y, &treat, &post, &cluster).unwrap();
        assert!((res.att - 3.0).abs() < 1e-10, "ATT = {}", res.att);
        assert!((res.att - res.cell_means.did()).abs() < 1e-10);
        assert_eq!(res.n_obs, 8);
        assert_eq!(res.n_clusters, 4);
        assert!((res.cell_means.treated_post - 15.0).abs() < 1e-10);
        assert!((res.cell_means.control_pre - 10.0).abs() < 1e-10);
    }

    #[test]
    fn ols_delta_equals_cell_mean_did_with_noise() {
        // Unbalanced, noisy cells: the OLS interaction coefficient still
        // equals the difference-in-differences of cell means exactly.
        let y = vec![9.8, 10.3, 12.1, 11.7, 12.2, 10.4, 9.9, 10.1, 15.3, 14.6, 15.2];
        let treat = vec![0, 0, 0, 0, 0, 1, 1, 1, 1, 1, 1];
        let post = vec![0, 0, 1, 1, 1, 0, 0, 0, 1, 1, 1];
        let cluster = vec![1, 2, 1, 2, 3, 4, 5, 6, 4, 5, 6];

        let res = did_canonical(&y, &treat, &post, &cluster).unwrap();
        assert!((res.att - res.cell_means.did()).abs() < 1e-10);
        assert!(res.se > 0.0);
        assert!(res.se_cluster > 0.0);
        assert!(res.p_value > 0.0 && res.p_value <= 1.0);
    }

    #[test]
    fn validation_errors() {
        assert!(did_canonical(&[], &[], &[], &[]).is_err());
        // Invalid indicator.
        assert!(did_canonical(&[1.0], &[2], &[0], &[1]).is_err());
        // Empty cell: nobody is treated-post.
        let y = vec![1.0, 2.0, 3.0, 4.0];
        assert!(did_canonical(&y, &[0, 0, 1, 1], &[0, 1, 0, 0], &[1, 1, 2, 2]).is_err());
        // One cluster only.
        let y = vec![1.0, 2.0, 3.0, 4.0];
        assert!(did_canonical(&y, &[0, 0, 1, 1], &[0, 1, 0, 1], &[1, 1, 1, 1]).is_err());
    }
}
