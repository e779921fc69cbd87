//! Fixed-width text tables for human consumption.
//!
//! The analysis results render as plain monospace tables — the "output" of
//! this library, in the sense a notebook reader would expect: coefficient
//! tables, EMM tables, and contrast tables. Numbers get a compact fixed
//! precision; p-values below 0.001 print as `<0.001`.

use std::fmt;

use crate::emmeans::{ContrastRow, Emm};
use crate::wald::CoefTest;

/// A fixed-width text table.
#[derive(Debug, Clone)]
pub struct Table {
    title: Option<String>,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    /// Create a table with the given column headers.
    pub fn new(headers: &[&str]) -> Self {
        Self {
            title: None,
            headers: headers.iter().map(|h| (*h).to_string()).collect(),
            rows: Vec::new(),
        }
    }

    /// Set a title line printed above the header.
    pub fn with_title(mut self, title: &str) -> Self {
        self.title = Some(title.to_string());
        self
    }

    /// Append a row; must match the header width.
    pub fn push_row(&mut self, cells: Vec<String>) {
        debug_assert_eq!(cells.len(), self.headers.len());
        self.rows.push(cells);
    }

    /// Number of data rows.
    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ncol = self.headers.len();
        let mut widths: Vec<usize> = self.headers.iter().map(|h| h.len()).collect();
        for row in &self.rows {
            for (j, cell) in row.iter().enumerate().take(ncol) {
                widths[j] = widths[j].max(cell.len());
            }
        }

        if let Some(title) = &self.title {
            writeln!(f, "{title}")?;
        }
        // Header: first column left-aligned, the rest right-aligned.
        for (j, h) in self.headers.iter().enumerate() {
            if j == 0 {
                write!(f, "{h:<w$}", w = widths[0])?;
            } else {
                write!(f, "  {h:>w$}", w = widths[j])?;
            }
        }
        writeln!(f)?;
        let total: usize = widths.iter().sum::<usize>() + 2 * (ncol - 1);
        writeln!(f, "{}", "-".repeat(total))?;
        for row in &self.rows {
            for (j, cell) in row.iter().enumerate() {
                if j == 0 {
                    write!(f, "{cell:<w$}", w = widths[0])?;
                } else {
                    write!(f, "  {cell:>w$}", w = widths[j])?;
                }
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// Format a number with 4 significant-ish digits for table cells.
pub fn fmt_num(x: f64) -> String {
    if x.is_nan() {
        return "NA".to_string();
    }
    if x == 0.0 {
        return "0.000".to_string();
    }
    let ax = x.abs();
    if !(1e-3..1e6).contains(&ax) {
        format!("{x:.3e}")
    } else {
        format!("{x:.3}")
    }
}

/// Format a p-value; very small values print as `<0.001`.
pub fn fmt_p(p: f64) -> String {
    if p.is_nan() {
        "NA".to_string()
    } else if p < 0.001 {
        "<0.001".to_string()
    } else {
        format!("{p:.3}")
    }
}

/// Format a degrees-of-freedom value (`Inf` for normal-based inference).
fn fmt_df(df: f64) -> String {
    if df.is_infinite() { "Inf".to_string() } else { format!("{df:.1}") }
}

/// Render a coefficient table.
pub fn coef_table(tests: &[CoefTest]) -> Table {
    let mut table =
        Table::new(&["term", "estimate", "se", "df", "t", "p", "ci_lower", "ci_upper"]);
    for t in tests {
        table.push_row(vec![
            t.name.clone(),
            fmt_num(t.estimate),
            fmt_num(t.se),
            fmt_df(t.df),
            fmt_num(t.statistic),
            fmt_p(t.p_value),
            fmt_num(t.ci_lower),
            fmt_num(t.ci_upper),
        ]);
    }
    table
}

/// Render an estimated-marginal-means table.
pub fn emm_table(emms: &[Emm]) -> Table {
    let mut table = Table::new(&["cell", "emmean", "se", "df", "ci_lower", "ci_upper"]);
    for e in emms {
        table.push_row(vec![
            e.label.clone(),
            fmt_num(e.estimate),
            fmt_num(e.se),
            fmt_df(e.df),
            fmt_num(e.ci_lower),
            fmt_num(e.ci_upper),
        ]);
    }
    table
}

/// Render a contrast table.
pub fn contrast_table(rows: &[ContrastRow]) -> Table {
    let mut table =
        Table::new(&["contrast", "estimate", "se", "df", "t", "p", "p_adj"]);
    for r in rows {
        table.push_row(vec![
            r.label.clone(),
            fmt_num(r.estimate),
            fmt_num(r.se),
            fmt_df(r.df),
            fmt_num(r.statistic),
            fmt_p(r.p_value),
            fmt_p(r.p_adjusted),
        ]);
    }
    table
}
