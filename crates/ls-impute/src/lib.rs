//! # ls-impute
//!
//! Multiple imputation and pooled inference for longstat:
//! - per-variable imputation specifications (Bayesian regression draws,
//!   predictive mean matching, observed-value sampling),
//! - a chained-equations engine producing M completed datasets plus a log
//!   of imputation events,
//! - Rubin's combination rules with Barnard–Rubin degrees of freedom,
//! - a parallel repeated-fit driver (one model fit per completed dataset),
//! - the multiply-imputed difference-in-differences workflow.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// The multiply-imputed DID workflow.
pub mod did;
/// Chained-equations imputation engine.
pub mod engine;
/// Rubin pooling of repeated complete-data fits.
pub mod pool;
/// Parallel repeated-fit driver.
pub mod repeated;
/// Imputation specifications.
pub mod spec;

pub use did::{MiDidConfig, MiDidResult, did_mixed_mi};
pub use engine::{LoggedEvent, MultipleImputation, impute};
pub use pool::{CompleteDataFit, PooledFit, PooledParameter, pool};
pub use repeated::{lmm_complete_data_fit, pool_fits};
pub use spec::{ImputationSpec, ImputeMethod, VariableSpec};
