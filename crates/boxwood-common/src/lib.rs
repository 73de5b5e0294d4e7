//! # boxwood-common
//!
//! Shared types, error definitions, configuration models, and constants
//! used across the entire boxwood workspace.
//!
//! This crate is the leaf of the dependency graph. It depends on no other
//! internal crate and provides the primitives every other crate builds on,
//! including the [`rollback::Rollback`] stack used by every multi-step
//! setup path.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used, clippy::panic))]

pub mod config;
pub mod constants;
pub mod error;
pub mod rollback;
pub mod types;
