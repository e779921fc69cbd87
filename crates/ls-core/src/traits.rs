//! Model traits for longstat
//!
//! Estimators (MLE, pooled repeated fits) depend on the [`LogDensityModel`]
//! interface, not on concrete model types. Any regression or mixed model
//! that can evaluate a negative log-likelihood and its gradient plugs into
//! the same fitting machinery.

use crate::Result;

/// Prepared negative log-likelihood evaluator.
///
/// Models that can cache constants (group indices, sufficient statistics)
/// for repeated NLL evaluations expose them through this trait. The fitting
/// layer prefers `prepared().nll(...)` inside optimizer loops.
pub trait PreparedNll: Send + Sync {
    /// Compute negative log-likelihood at `params`.
    fn nll(&self, params: &[f64]) -> Result<f64>;
}

/// Default prepared wrapper that forwards to the model's `nll`.
#[derive(Debug, Clone, Copy)]
pub struct PreparedModelRef<'a, M: LogDensityModel + ?Sized> {
    model: &'a M,
}

impl<'a, M: LogDensityModel + ?Sized> PreparedModelRef<'a, M> {
    /// Create a new prepared wrapper that forwards `nll` to the model.
    pub fn new(model: &'a M) -> Self {
        Self { model }
    }
}

impl<M: LogDensityModel + ?Sized> PreparedNll for PreparedModelRef<'_, M> {
    fn nll(&self, params: &[f64]) -> Result<f64> {
        self.model.nll(params)
    }
}

/// Universal model interface for likelihood-based fitting.
///
/// Parameter order is stable: `parameter_names`, `parameter_bounds`,
/// `parameter_init`, `nll` and `grad_nll` all agree on it.
pub trait LogDensityModel: Send + Sync {
    /// Prepared evaluator type (can cache constants).
    ///
    /// If a model has nothing to cache, use:
    /// `type Prepared<'a> = PreparedModelRef<'a, Self> where Self: 'a;`
    type Prepared<'a>: PreparedNll + 'a
    where
        Self: 'a;

    /// Number of parameters.
    fn dim(&self) -> usize;

    /// Parameter names (stable order).
    fn parameter_names(&self) -> Vec<String>;

    /// Parameter bounds (min, max) (stable order).
    fn parameter_bounds(&self) -> Vec<(f64, f64)>;

    /// Suggested initial values (stable order).
    fn parameter_init(&self) -> Vec<f64>;

    /// Negative log-likelihood.
    fn nll(&self, params: &[f64]) -> Result<f64>;

    /// Gradient of NLL.
    fn grad_nll(&self, params: &[f64]) -> Result<Vec<f64>>;

    /// Create a prepared evaluator.
    fn prepared(&self) -> Self::Prepared<'_>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Quadratic;

    impl LogDensityModel for Quadratic {
        type Prepared<'a>
            = PreparedModelRef<'a, Self>
        where
            Self: 'a;

        fn dim(&self) -> usize {
            2
        }

        fn parameter_names(&self) -> Vec<String> {
            vec!["a".to_string(), "b".to_string()]
        }

        fn parameter_bounds(&self) -> Vec<(f64, f64)> {
            vec![(f64::NEG_INFINITY, f64::INFINITY); 2]
        }

        fn parameter_init(&self) -> Vec<f64> {
            vec![0.0, 0.0]
        }

        fn nll(&self, params: &[f64]) -> Result<f64> {
            Ok(params.iter().map(|&x| x * x).sum())
        }

        fn grad_nll(&self, params: &[f64]) -> Result<Vec<f64>> {
            Ok(params.iter().map(|&x| 2.0 * x).collect())
        }

        fn prepared(&self) -> Self::Prepared<'_> {
            PreparedModelRef::new(self)
        }
    }

    #[test]
    fn prepared_forwards_nll() {
        let m = Quadratic;
        let p = m.prepared();
        assert!((p.nll(&[2.0, 3.0]).unwrap() - 13.0).abs() < 1e-12);
    }

    #[test]
    fn metadata_lengths_agree() {
        let m = Quadratic;
        assert_eq!(m.parameter_names().len(), m.dim());
        assert_eq!(m.parameter_bounds().len(), m.dim());
        assert_eq!(m.parameter_init().len(), m.dim());
    }
}
