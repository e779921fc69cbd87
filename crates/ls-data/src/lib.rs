//! # ls-data
//!
//! Tabular data handling for longstat:
//! - column-oriented long and wide frames with explicit missingness,
//! - categorical variables with stable level order,
//! - wide-to-long reshaping with a (subject, time) uniqueness invariant,
//! - model terms and dense design matrices (main effects, two- and
//!   three-way interactions, treatment coding),
//! - seeded simulation of two-group longitudinal toy datasets and
//!   MCAR/MAR amputation helpers.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod design;
pub mod factor;
pub mod frame;
pub mod reshape;
pub mod simulate;

pub use design::{Design, GridValue, ModelSpec, Term, TermColumns};
pub use factor::Factor;
pub use frame::{Column, LongFrame};
pub use reshape::{WideFrame, pivot_longer};
pub use simulate::{TwoGroupConfig, ampute_mar, ampute_mcar, simulate_two_group};
