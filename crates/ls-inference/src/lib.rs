//! # ls-inference
//!
//! Statistical inference for longstat.
//!
//! This crate provides:
//! - Maximum-likelihood estimation over any [`ls_core::traits::LogDensityModel`]
//! - Linear mixed models (random intercept, optional random slope, ML/REML)
//! - Moderation analysis: interaction tests and simple slopes
//! - Estimated marginal means and post-hoc contrasts
//! - The canonical two-period difference-in-differences estimator
//!
//! ## Architecture
//!
//! Models implement the `LogDensityModel` trait from ls-core; the MLE layer
//! depends only on that trait, so the mixed model here and the pooled
//! repeated fits in ls-impute share the same optimizer and covariance
//! machinery.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Difference-in-differences estimators.
pub mod did;
/// Fixed-effects view and distribution helpers.
pub mod effects;
/// Estimated marginal means and contrasts.
pub mod emmeans;
/// Linear mixed models with Gaussian outcomes.
pub mod lmm;
/// Maximum-likelihood estimation.
pub mod mle;
/// Moderation analysis: interaction tests and simple slopes.
pub mod moderation;
/// Generic numerical optimizer (argmin L-BFGS backend).
pub mod optimizer;
/// Fixed-width text tables.
pub mod summary;
/// Coefficient, Wald, and likelihood-ratio tests.
pub mod wald;

pub use did::{DidResult, did_canonical};
pub use effects::FixedEffects;
pub use emmeans::{Adjust, ContrastRow, Emm, emmeans, interaction_contrasts, pairwise_contrasts};
pub use lmm::{LmmFit, LmmModel, RandomEffects, fit_lmm, fit_lmm_with};
pub use mle::MaximumLikelihoodEstimator;
pub use moderation::{InteractionTest, SimpleSlope, simple_slopes, test_interaction};
pub use optimizer::{LbfgsOptimizer, ObjectiveFunction, OptimizationResult, OptimizerConfig};
pub use summary::{Table, coef_table, contrast_table, emm_table};
pub use wald::{CoefTest, LikelihoodRatioTest, WaldTest, coef_tests, likelihood_ratio_test, wald_block_test};
