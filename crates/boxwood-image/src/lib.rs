//! # boxwood-image
//!
//! Images are plain root filesystem directories under `<root>/image/<name>`.
//! They are imported from tar archives (optionally gzip-compressed) and used
//! read-only as the lower layer of every box started from them.
//!
//! - [`store::ImageStore`]: import, list and resolve images.
//! - [`layer`]: archive extraction.
//! - [`hash`]: SHA-256 digests for import verification.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod hash;
pub mod layer;
pub mod store;
