//! Box lifecycle management for the boxwood runtime.
//!
//! [`engine::Engine`] is the context object every command goes through. It
//! owns the record store, the workspace provider and the network controller,
//! and sequences launch, stop and removal on top of them.

#![allow(unsafe_code)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod engine;
pub mod logs;
pub mod process;
pub mod state;
pub mod workspace;
