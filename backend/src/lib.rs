//! # Optimo Rust Backend
//!
//! Iterative optimizer for class-section layouts.
//!
//! Given students with course requests, teachers, rooms, periods and an initial
//! set of sections, the optimizer alternates between an exact assignment of
//! students to sections (mixed-integer programming) and structural edits to the
//! section layout (split, merge, add, remove) until utilization settles inside
//! the configured band or the iteration budget runs out.
//!
//! ## Architecture
//!
//! - [`models`]: Domain types, layouts, assignments and input loading
//! - [`solver`]: MILP assignment of students to sections
//! - [`analysis`]: Per-section and aggregate utilization
//! - [`planner`]: Threshold rules that turn utilization into structural edits
//! - [`advisor`]: Optional external arbitration of ambiguous edits
//! - [`controller`]: The optimization state machine
//! - [`services`]: Job tracking, the background run processor and reports
//! - [`config`]: TOML configuration bundle
//! - [`error`]: Error taxonomy shared by every stage

// Allow large error types - OptimizerError carries rich context for debugging
#![allow(clippy::result_large_err)]

pub mod advisor;
pub mod analysis;
pub mod config;
pub mod controller;
pub mod error;
pub mod models;
pub mod planner;
pub mod services;
pub mod solver;

pub use config::OptimizerConfig;
pub use controller::{OptimizationController, RunOutcome, RunState};
pub use error::{OptimizerError, OptimizerResult};
