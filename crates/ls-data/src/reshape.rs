//! Wide-format frames and wide-to-long reshaping.
//!
//! Longitudinal toy datasets start wide: one row per subject, one outcome
//! column per measurement occasion. [`pivot_longer`] stacks the occasion
//! columns into a single outcome column plus a time factor, repeating the
//! subject-level covariates, and guarantees the (subject, time) uniqueness
//! invariant of the resulting [`LongFrame`].

use std::collections::HashSet;

use ls_core::{Error, Result};

use crate::factor::Factor;
use crate::frame::{Column, LongFrame};

/// Wide-format dataset: one row per subject.
#[derive(Debug, Clone, PartialEq)]
pub struct WideFrame {
    subjects: Vec<u64>,
    columns: Vec<(String, Column)>,
}

impl WideFrame {
    /// Create a wide frame; subject identifiers must be unique.
    pub fn new(subjects: Vec<u64>) -> Result<Self> {
        let mut seen = HashSet::new();
        for &sid in &subjects {
            if !seen.insert(sid) {
                return Err(Error::Validation(format!("duplicate subject id {sid}")));
            }
        }
        Ok(Self { subjects, columns: Vec::new() })
    }

    /// Number of subjects (rows).
    pub fn n_rows(&self) -> usize {
        self.subjects.len()
    }

    /// Subject identifiers.
    pub fn subjects(&self) -> &[u64] {
        &self.subjects
    }

    fn check_new_column(&self, name: &str, len: usize) -> Result<()> {
        if len != self.n_rows() {
            return Err(Error::Validation(format!(
                "column '{}' has {} rows, frame has {}",
                name,
                len,
                self.n_rows()
            )));
        }
        if self.columns.iter().any(|(n, _)| n == name) {
            return Err(Error::Validation(format!("duplicate column '{name}'")));
        }
        Ok(())
    }

    /// Add a numeric column. Present values must be finite.
    pub fn push_numeric(&mut self, name: &str, values: Vec<Option<f64>>) -> Result<()> {
        self.check_new_column(name, values.len())?;
        if values.iter().flatten().any(|v| !v.is_finite()) {
            return Err(Error::Validation(format!(
                "column '{name}' must contain only finite values"
            )));
        }
        self.columns.push((name.to_string(), Column::Numeric(values)));
        Ok(())
    }

    /// Add a factor column.
    pub fn push_factor(&mut self, name: &str, factor: Factor) -> Result<()> {
        self.check_new_column(name, factor.len())?;
        self.columns.push((name.to_string(), Column::Factor(factor)));
        Ok(())
    }

    /// Look up a column by name.
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|(n, _)| n == name).map(|(_, c)| c)
    }

    /// Numeric column by name, or a validation error.
    pub fn numeric(&self, name: &str) -> Result<&[Option<f64>]> {
        match self.column(name) {
            Some(Column::Numeric(v)) => Ok(v),
            Some(Column::Factor(_)) => {
                Err(Error::Validation(format!("column '{name}' is a factor, expected numeric")))
            }
            None => Err(Error::Validation(format!("no column named '{name}'"))),
        }
    }

    /// Factor column by name, or a validation error.
    pub fn factor(&self, name: &str) -> Result<&Factor> {
        match self.column(name) {
            Some(Column::Factor(f)) => Ok(f),
            Some(Column::Numeric(_)) => {
                Err(Error::Validation(format!("column '{name}' is numeric, expected a factor")))
            }
            None => Err(Error::Validation(format!("no column named '{name}'"))),
        }
    }

    /// Overwrite one numeric cell, or punch a hole with `None` (amputation).
    pub fn set_numeric(&mut self, name: &str, row: usize, value: Option<f64>) -> Result<()> {
        if let Some(v) = value
            && !v.is_finite()
        {
            return Err(Error::Validation(format!(
                "cannot write non-finite value into '{name}'"
            )));
        }
        let n = self.n_rows();
        let col = self
            .columns
            .iter_mut()
            .find(|(cn, _)| cn == name)
            .map(|(_, c)| c)
            .ok_or_else(|| Error::Validation(format!("no column named '{name}'")))?;
        match col {
            Column::Numeric(v) => {
                if row >= n {
                    return Err(Error::Validation(format!(
                        "row {row} out of range for column '{name}' (n={n})"
                    )));
                }
                v[row] = value;
                Ok(())
            }
            Column::Factor(_) => {
                Err(Error::Validation(format!("column '{name}' is a factor, cannot set numeric")))
            }
        }
    }

    /// Column names in insertion order.
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|(n, _)| n.as_str()).collect()
    }
}

/// Stack wide outcome columns into long format.
///
/// `occasions` maps each wide outcome column to its time label, in the
/// desired time-level order (the first entry becomes the reference level).
/// Every other column of `wide` is carried over as a subject-level covariate,
/// repeated across that subject's long rows. The long frame gains:
/// - a `time` factor column named `time_name`,
/// - an outcome column named `value_name`.
///
/// Each subject contributes exactly one row per occasion, so the
/// (subject, time) pairs of the result are unique by construction; the
/// invariant is still re-checked before returning.
pub fn pivot_longer(
    wide: &WideFrame,
    occasions: &[(&str, &str)],
    time_name: &str,
    value_name: &str,
) -> Result<LongFrame> {
    if occasions.is_empty() {
        return Err(Error::Validation("pivot_longer needs at least one occasion".to_string()));
    }
    let mut labels: Vec<&str> = Vec::with_capacity(occasions.len());
    for (col, label) in occasions {
        wide.numeric(col)?;
        if labels.contains(label) {
            return Err(Error::Validation(format!("duplicate time label '{label}'")));
        }
        labels.push(label);
    }

    let n_wide = wide.n_rows();
    let n_long = n_wide * occasions.len();

    // One row per (subject, occasion), occasion varying fastest.
    let mut subjects = Vec::with_capacity(n_long);
    for &sid in wide.subjects() {
        for _ in occasions {
            subjects.push(sid);
        }
    }
    let mut long = LongFrame::new(subjects);

    // Time factor with declared level order.
    let time_values: Vec<Option<&str>> = (0..n_wide)
        .flat_map(|_| occasions.iter().map(|(_, label)| Some(*label)))
        .collect();
    long.push_factor(time_name, Factor::with_levels(&time_values, &labels)?)?;

    // Outcome column, taken occasion-by-occasion.
    let mut values = Vec::with_capacity(n_long);
    for row in 0..n_wide {
        for (col, _) in occasions {
            values.push(wide.numeric(col)?[row]);
        }
    }
    long.push_numeric(value_name, values)?;

    // Carry over subject-level covariates.
    let occasion_cols: HashSet<&str> = occasions.iter().map(|(c, _)| *c).collect();
    for name in wide.column_names() {
        if occasion_cols.contains(name) {
            continue;
        }
        if name == time_name || name == value_name {
            return Err(Error::Validation(format!(
                "covariate '{name}' collides with a pivot output column"
            )));
        }
        match wide.column(name) {
            Some(Column::Numeric(v)) => {
                let repeated: Vec<Option<f64>> =
                    v.iter().flat_map(|x| std::iter::repeat_n(*x, occasions.len())).collect();
                long.push_numeric(name, repeated)?;
            }
            Some(Column::Factor(f)) => {
                let repeated: Vec<Option<&str>> = (0..n_wide)
                    .flat_map(|row| std::iter::repeat_n(f.level_of(row), occasions.len()))
                    .collect();
                let levels: Vec<&str> = f.levels().iter().map(|l| l.as_str()).collect();
                long.push_factor(name, Factor::with_levels(&repeated, &levels)?)?;
            }
            None => unreachable!("column_names() returned a missing column"),
        }
    }

    long.validate_unique(time_name)?;
    Ok(long)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toy_wide() -> WideFrame {
        let mut w = WideFrame::new(vec![10, 20]).unwrap();
        w.push_factor(
            "group",
            Factor::with_levels(&[Some("control"), Some("treated")], &["control", "treated"])
                .unwrap(),
        )
        .unwrap();
        w.push_numeric("age", vec![Some(40.0), Some(55.0)]).unwrap();
        w.push_numeric("y_pre", vec![Some(1.0), Some(2.0)]).unwrap();
        w.push_numeric("y_post", vec![Some(3.0), None]).unwrap();
        w
    }

    #[test]
    fn pivot_produces_one_row_per_subject_time() {
        let w = toy_wide();
        let long =
            pivot_longer(&w, &[("y_pre", "pre"), ("y_post", "post")], "time", "y").unwrap();
        assert_eq!(long.n_rows(), 4);
        assert_eq!(long.subjects(), &[10, 10, 20, 20]);

        let time = long.factor("time").unwrap();
        assert_eq!(time.levels(), &["pre".to_string(), "post".to_string()]);
        assert_eq!(time.level_of(0), Some("pre"));
        assert_eq!(time.level_of(1), Some("post"));

        let y = long.numeric("y").unwrap();
        assert_eq!(y, &[Some(1.0), Some(3.0), Some(2.0), None]);

        // Covariates repeat within subject.
        let age = long.numeric("age").unwrap();
        assert_eq!(age, &[Some(40.0), Some(40.0), Some(55.0), Some(55.0)]);
        let group = long.factor("group").unwrap();
        assert_eq!(group.level_of(0), Some("control"));
        assert_eq!(group.level_of(3), Some("treated"));

        long.validate_unique("time").unwrap();
    }

    #[test]
    fn duplicate_wide_subjects_rejected() {
        assert!(WideFrame::new(vec![1, 1]).is_err());
    }

    #[test]
    fn duplicate_time_labels_rejected() {
        let w = toy_wide();
        let err = pivot_longer(&w, &[("y_pre", "t"), ("y_post", "t")], "time", "y");
        assert!(err.is_err());
    }
}
