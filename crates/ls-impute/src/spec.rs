//! Imputation specifications: which variables to impute, how, and from what.

use ls_core::{Error, Result};
use ls_data::{Column, LongFrame};

/// Imputation method for one variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImputeMethod {
    /// Bayesian linear regression draws: σ² from a scaled inverse-chi-square,
    /// β from its normal posterior, imputations from the predictive normal.
    NormDraw,
    /// Predictive mean matching: impute an observed donor value whose
    /// prediction is closest to the missing cell's prediction.
    Pmm {
        /// Donor-pool size (nearest predictions considered).
        donors: usize,
    },
    /// Draw uniformly from the observed values of the variable.
    SampleObserved,
}

/// One variable's imputation setup.
#[derive(Debug, Clone)]
pub struct VariableSpec {
    /// Name of the (numeric) variable to impute.
    pub name: String,
    /// Imputation method.
    pub method: ImputeMethod,
    /// Predictor columns (numeric or factor) for the imputation model.
    /// Ignored by [`ImputeMethod::SampleObserved`].
    pub predictors: Vec<String>,
}

/// Full imputation specification.
#[derive(Debug, Clone)]
pub struct ImputationSpec {
    /// Variables to impute, in chained-equation visit order.
    pub variables: Vec<VariableSpec>,
    /// Number of imputed datasets to produce.
    pub m: usize,
    /// Number of chained-equation sweeps per dataset.
    pub n_iter: usize,
    /// Base RNG seed; dataset `i` uses `seed + i`.
    pub seed: u64,
}

impl ImputationSpec {
    /// Start a spec producing `m` datasets with the given base seed
    /// (5 chained-equation sweeps by default).
    pub fn new(m: usize, seed: u64) -> Self {
        Self { variables: Vec::new(), m, n_iter: 5, seed }
    }

    /// Set the number of chained-equation sweeps.
    pub fn with_iterations(mut self, n_iter: usize) -> Self {
        self.n_iter = n_iter;
        self
    }

    /// Add a variable with its method and predictors.
    pub fn variable(mut self, name: &str, method: ImputeMethod, predictors: &[&str]) -> Self {
        self.variables.push(VariableSpec {
            name: name.to_string(),
            method,
            predictors: predictors.iter().map(|p| (*p).to_string()).collect(),
        });
        self
    }

    /// Validate the spec against a frame.
    ///
    /// Rules:
    /// - `m >= 2` (a single imputation cannot be pooled), `n_iter >= 1`;
    /// - imputed variables are numeric columns of the frame, listed once;
    /// - regression methods have at least one predictor, PMM at least one donor;
    /// - every predictor exists and is either complete or itself imputed
    ///   (otherwise the imputation model would see missing regressors).
    pub fn validate(&self, frame: &LongFrame) -> Result<()> {
        if self.m < 2 {
            return Err(Error::Validation("m must be >= 2".to_string()));
        }
        if self.n_iter == 0 {
            return Err(Error::Validation("n_iter must be >= 1".to_string()));
        }
        if self.variables.is_empty() {
            return Err(Error::Validation("no variables to impute".to_string()));
        }

        let imputed: Vec<&str> = self.variables.iter().map(|v| v.name.as_str()).collect();
        for (i, v) in self.variables.iter().enumerate() {
            if imputed[..i].contains(&v.name.as_str()) {
                return Err(Error::Validation(format!(
                    "variable '{}' is listed twice",
                    v.name
                )));
            }
            frame.numeric(&v.name)?;

            match v.method {
                ImputeMethod::SampleObserved => {}
                ImputeMethod::NormDraw => {
                    if v.predictors.is_empty() {
                        return Err(Error::Validation(format!(
                            "variable '{}': norm draws need at least one predictor",
                            v.name
                        )));
                    }
                }
                ImputeMethod::Pmm { donors } => {
                    if donors == 0 {
                        return Err(Error::Validation(format!(
                            "variable '{}': PMM needs at least one donor",
                            v.name
                        )));
                    }
                    if v.predictors.is_empty() {
                        return Err(Error::Validation(format!(
                            "variable '{}': PMM needs at least one predictor",
                            v.name
                        )));
                    }
                }
            }

            for p in &v.predictors {
                if p == &v.name {
                    return Err(Error::Validation(format!(
                        "variable '{}' cannot predict itself",
                        v.name
                    )));
                }
                let col = frame
                    .column(p)
                    .ok_or_else(|| Error::Validation(format!("no predictor column '{p}'")))?;
                let complete = match col {
                    Column::Numeric(values) => values.iter().all(|c| c.is_some()),
                    Column::Factor(f) => f.is_complete(),
                };
                if !complete && !imputed.contains(&p.as_str()) {
                    return Err(Error::Validation(format!(
                        "predictor '{p}' has missing values and is not itself imputed"
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ls_data::Factor;

    fn frame() -> LongFrame {
        let mut f = LongFrame::new(vec![1, 2, 3, 4]);
        f.push_factor(
            "g",
            Factor::with_levels(&[Some("a"), Some("a"), Some("b"), Some("b")], &["a", "b"])
                .unwrap(),
        )
        .unwrap();
        f.push_numeric("x", vec![Some(1.0), Some(2.0), Some(3.0), Some(4.0)]).unwrap();
        f.push_numeric("y", vec![Some(1.0), None, Some(3.0), None]).unwrap();
        f
    }

    #[test]
    fn valid_spec_passes() {
        let spec = ImputationSpec::new(5, 1)
            .variable("y", ImputeMethod::Pmm { donors: 3 }, &["g", "x"]);
        spec.validate(&frame()).unwrap();
        assert_eq!(spec.n_iter, 5);
    }

    #[test]
    fn invalid_specs_rejected() {
        let f = frame();
        assert!(ImputationSpec::new(1, 0)
            .variable("y", ImputeMethod::SampleObserved, &[])
            .validate(&f)
            .is_err());
        assert!(ImputationSpec::new(5, 0)
            .variable("y", ImputeMethod::SampleObserved, &[])
            .with_iterations(0)
            .validate(&f)
            .is_err());
        // Factor target.
        assert!(ImputationSpec::new(5, 0)
            .variable("g", ImputeMethod::SampleObserved, &[])
            .validate(&f)
            .is_err());
        // No predictors for a regression method.
        assert!(ImputationSpec::new(5, 0)
            .variable("y", ImputeMethod::NormDraw, &[])
            .validate(&f)
            .is_err());
        // Zero donors.
        assert!(ImputationSpec::new(5, 0)
            .variable("y", ImputeMethod::Pmm { donors: 0 }, &["x"])
            .validate(&f)
            .is_err());
        // Self-prediction.
        assert!(ImputationSpec::new(5, 0)
            .variable("y", ImputeMethod::NormDraw, &["y"])
            .validate(&f)
            .is_err());
        // Unknown predictor.
        assert!(ImputationSpec::new(5, 0)
            .variable("y", ImputeMethod::NormDraw, &["z"])
            .validate(&f)
            .is_err());
        // Duplicate variable.
        assert!(ImputationSpec::new(5, 0)
            .variable("y", ImputeMethod::SampleObserved, &[])
            .variable("y", ImputeMethod::SampleObserved, &[])
            .validate(&f)
            .is_err());
    }

    #[test]
    fn incomplete_predictor_must_be_imputed() {
        let mut f = frame();
        f.push_numeric("w", vec![Some(1.0), None, Some(2.0), Some(3.0)]).unwrap();

        // w is missing and not imputed → rejected.
        assert!(ImputationSpec::new(5, 0)
            .variable("y", ImputeMethod::NormDraw, &["w"])
            .validate(&f)
            .is_err());

        // Imputing w as well makes it a legal predictor.
        ImputationSpec::new(5, 0)
            .variable("w", ImputeMethod::SampleObserved, &[])
            .variable("y", ImputeMethod::NormDraw, &["w", "x"])
            .validate(&f)
            .unwrap();
    }
}
