//! Categorical variables with a stable level order.
//!
//! A [`Factor`] stores the distinct levels of a categorical variable plus a
//! per-row level code. Level order is significant: the first level is the
//! reference level under treatment coding, so dummy columns are emitted for
//! `levels[1..]` only.

use ls_core::{Error, Result};

/// A categorical column: levels in stable order, one optional code per row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Factor {
    levels: Vec<String>,
    codes: Vec<Option<usize>>,
}

impl Factor {
    /// Build a factor from string values, levels ordered by first appearance.
    ///
    /// `None` entries are kept as missing codes.
    pub fn from_values(values: &[Option<&str>]) -> Self {
        let mut levels: Vec<String> = Vec::new();
        let mut codes = Vec::with_capacity(values.len());
        for v in values {
            match v {
                Some(s) => {
                    let idx = match levels.iter().position(|l| l == s) {
                        Some(idx) => idx,
                        None => {
                            levels.push((*s).to_string());
                            levels.len() - 1
                        }
                    };
                    codes.push(Some(idx));
                }
                None => codes.push(None),
            }
        }
        Self { levels, codes }
    }

    /// Build a factor with an explicit level order.
    ///
    /// Every observed value must be one of `levels`; the reference level is
    /// `levels[0]` regardless of the order values appear in.
    pub fn with_levels(values: &[Option<&str>], levels: &[&str]) -> Result<Self> {
        if levels.is_empty() {
            return Err(Error::Validation("factor must have at least one level".to_string()));
        }
        let owned: Vec<String> = levels.iter().map(|l| (*l).to_string()).collect();
        for (i, l) in owned.iter().enumerate() {
            if owned[..i].contains(l) {
                return Err(Error::Validation(format!("duplicate factor level '{l}'")));
            }
        }
        let mut codes = Vec::with_capacity(values.len());
        for v in values {
            match v {
                Some(s) => {
                    let idx = owned.iter().position(|l| l == s).ok_or_else(|| {
                        Error::Validation(format!("value '{s}' is not a declared level"))
                    })?;
                    codes.push(Some(idx));
                }
                None => codes.push(None),
            }
        }
        Ok(Self { levels: owned, codes })
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.codes.len()
    }

    /// `true` if the factor has no rows.
    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    /// Number of levels.
    pub fn n_levels(&self) -> usize {
        self.levels.len()
    }

    /// Level names in stable order.
    pub fn levels(&self) -> &[String] {
        &self.levels
    }

    /// Level code for `row` (`None` if missing).
    pub fn code(&self, row: usize) -> Option<usize> {
        self.codes.get(row).copied().flatten()
    }

    /// All per-row codes.
    pub fn codes(&self) -> &[Option<usize>] {
        &self.codes
    }

    /// Level name for `row` (`None` if missing).
    pub fn level_of(&self, row: usize) -> Option<&str> {
        self.code(row).map(|c| self.levels[c].as_str())
    }

    /// `true` when no row has a missing code.
    pub fn is_complete(&self) -> bool {
        self.codes.iter().all(|c| c.is_some())
    }

    /// Row indices with a missing code.
    pub fn missing_rows(&self) -> Vec<usize> {
        self.codes
            .iter()
            .enumerate()
            .filter_map(|(i, c)| if c.is_none() { Some(i) } else { None })
            .collect()
    }

    /// Observation count per level.
    pub fn counts(&self) -> Vec<usize> {
        let mut out = vec![0usize; self.levels.len()];
        for c in self.codes.iter().flatten() {
            out[*c] += 1;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_follow_first_appearance() {
        let f = Factor::from_values(&[Some("b"), Some("a"), Some("b"), None]);
        assert_eq!(f.levels(), &["b".to_string(), "a".to_string()]);
        assert_eq!(f.code(0), Some(0));
        assert_eq!(f.code(1), Some(1));
        assert_eq!(f.code(3), None);
        assert!(!f.is_complete());
        assert_eq!(f.missing_rows(), vec![3]);
        assert_eq!(f.counts(), vec![2, 1]);
    }

    #[test]
    fn explicit_level_order_sets_reference() {
        let f =
            Factor::with_levels(&[Some("post"), Some("pre")], &["pre", "post"]).unwrap();
        assert_eq!(f.levels()[0], "pre");
        assert_eq!(f.code(0), Some(1));
        assert_eq!(f.code(1), Some(0));
    }

    #[test]
    fn unknown_value_is_rejected() {
        let err = Factor::with_levels(&[Some("x")], &["a", "b"]);
        assert!(err.is_err());
    }
}
