//! Column-oriented long-format data frame.
//!
//! A [`LongFrame`] holds one row per (subject, time) observation: a subject
//! identifier column plus named numeric and factor columns. Numeric columns
//! carry explicit missingness (`Option<f64>`), which is what the imputation
//! engine operates on. Factor columns may also carry missing codes, but only
//! numeric columns are imputable.

use std::collections::{HashMap, HashSet};

use ls_core::{Error, Result};

use crate::factor::Factor;

/// A named column: numeric with explicit missingness, or categorical.
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    /// Numeric values; `None` marks a missing cell. Present values are finite.
    Numeric(Vec<Option<f64>>),
    /// Categorical values with stable level order.
    Factor(Factor),
}

impl Column {
    /// Number of rows in the column.
    pub fn len(&self) -> usize {
        match self {
            Column::Numeric(v) => v.len(),
            Column::Factor(f) => f.len(),
        }
    }

    /// `true` if the column has no rows.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `true` when the cell at `row` holds a value.
    pub fn is_present(&self, row: usize) -> bool {
        match self {
            Column::Numeric(v) => v.get(row).copied().flatten().is_some(),
            Column::Factor(f) => f.code(row).is_some(),
        }
    }

    /// Row indices with a missing cell.
    pub fn missing_rows(&self) -> Vec<usize> {
        match self {
            Column::Numeric(v) => v
                .iter()
                .enumerate()
                .filter_map(|(i, c)| if c.is_none() { Some(i) } else { None })
                .collect(),
            Column::Factor(f) => f.missing_rows(),
        }
    }
}

/// Long-format dataset: one row per (subject, time) observation.
#[derive(Debug, Clone, PartialEq)]
pub struct LongFrame {
    subjects: Vec<u64>,
    columns: Vec<(String, Column)>,
}

impl LongFrame {
    /// Create a frame with the given subject identifier per row.
    pub fn new(subjects: Vec<u64>) -> Self {
        Self { subjects, columns: Vec::new() }
    }

    /// Number of rows.
    pub fn n_rows(&self) -> usize {
        self.subjects.len()
    }

    /// Subject identifier per row.
    pub fn subjects(&self) -> &[u64] {
        &self.subjects
    }

    /// Column names in insertion order.
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|(n, _)| n.as_str()).collect()
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

    /// Overwrite one numeric cell (used by the imputation engine).
    pub fn set_numeric(&mut self, name: &str, row: usize, value: f64) -> Result<()> {
        if !value.is_finite() {
            return Err(Error::Validation(format!(
                "cannot write non-finite value into '{name}'"
            )));
        }
        let n = self.n_rows();
        let col = self
            .columns
            .iter_mut()
            .find(|(n, _)| n == name)
            .map(|(_, c)| c)
            .ok_or_else(|| Error::Validation(format!("no column named '{name}'")))?;
        match col {
            Column::Numeric(v) => {
                if row >= n {
                    return Err(Error::Validation(format!(
                        "row {row} out of range for column '{name}' (n={n})"
                    )));
                }
                v[row] = Some(value);
                Ok(())
            }
            Column::Factor(_) => {
                Err(Error::Validation(format!("column '{name}' is a factor, cannot set numeric")))
            }
        }
    }

    /// Rows where every listed column (and the subject id) is present.
    pub fn complete_rows(&self, names: &[&str]) -> Result<Vec<usize>> {
        let mut cols = Vec::with_capacity(names.len());
        for name in names {
            let c = self
                .column(name)
                .ok_or_else(|| Error::Validation(format!("no column named '{name}'")))?;
            cols.push(c);
        }
        Ok((0..self.n_rows())
            .filter(|&i| cols.iter().all(|c| c.is_present(i)))
            .collect())
    }

    /// Dense 0-based subject codes (first-appearance order) and group count.
    pub fn subject_codes(&self) -> (Vec<usize>, usize) {
        let mut map: HashMap<u64, usize> = HashMap::new();
        let mut codes = Vec::with_capacity(self.subjects.len());
        for &sid in &self.subjects {
            let next = map.len();
            codes.push(*map.entry(sid).or_insert(next));
        }
        let n_groups = map.len();
        (codes, n_groups)
    }

    /// Enforce the reshape invariant: each (subject, time) pair occurs once.
    ///
    /// `time` names a complete factor column; duplicate pairs or missing time
    /// codes are validation errors.
    pub fn validate_unique(&self, time: &str) -> Result<()> {
        let time_factor = self.factor(time)?;
        let mut seen: HashSet<(u64, usize)> = HashSet::new();
        for row in 0..self.n_rows() {
            let code = time_factor.code(row).ok_or_else(|| {
                Error::Validation(format!("row {row}: missing time code in '{time}'"))
            })?;
            if !seen.insert((self.subjects[row], code)) {
                return Err(Error::Validation(format!(
                    "duplicate (subject, time) pair: subject {} at '{}'",
                    self.subjects[row],
                    time_factor.levels()[code]
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toy_frame() -> LongFrame {
        let mut f = LongFrame::new(vec![1, 1, 2, 2]);
        f.push_factor(
            "time",
            Factor::with_levels(
                &[Some("pre"), Some("post"), Some("pre"), Some("post")],
                &["pre", "post"],
            )
            .unwrap(),
        )
        .unwrap();
        f.push_numeric("y", vec![Some(1.0), Some(2.0), None, Some(4.0)]).unwrap();
        f
    }

    #[test]
    fn column_lookup_and_missingness() {
        let f = toy_frame();
        assert_eq!(f.n_rows(), 4);
        assert_eq!(f.numeric("y").unwrap()[1], Some(2.0));
        assert!(f.numeric("time").is_err());
        assert_eq!(f.column("y").unwrap().missing_rows(), vec![2]);
        assert_eq!(f.complete_rows(&["time", "y"]).unwrap(), vec![0, 1, 3]);
    }

    #[test]
    fn set_numeric_fills_missing_cell() {
        let mut f = toy_frame();
        f.set_numeric("y", 2, 3.0).unwrap();
        assert_eq!(f.numeric("y").unwrap()[2], Some(3.0));
        assert!(f.set_numeric("y", 9, 0.0).is_err());
        assert!(f.set_numeric("y", 0, f64::NAN).is_err());
    }

    #[test]
    fn unique_subject_time_enforced() {
        let f = toy_frame();
        f.validate_unique("time").unwrap();

        let mut dup = LongFrame::new(vec![1, 1]);
        dup.push_factor(
            "time",
            Factor::with_levels(&[Some("pre"), Some("pre")], &["pre", "post"]).unwrap(),
        )
        .unwrap();
        assert!(dup.validate_unique("time").is_err());
    }

    #[test]
    fn subject_codes_are_dense() {
        let f = toy_frame();
        let (codes, n) = f.subject_codes();
        assert_eq!(codes, vec![0, 0, 1, 1]);
        assert_eq!(n, 2);
    }

    #[test]
    fn duplicate_column_rejected() {
        let mut f = LongFrame::new(vec![1]);
        f.push_numeric("y", vec![Some(0.0)]).unwrap();
        assert!(f.push_numeric("y", vec![Some(1.0)]).is_err());
        assert!(f.push_numeric("z", vec![Some(f64::INFINITY)]).is_err());
    }
}
