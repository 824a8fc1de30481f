#![deny(unsafe_code)]

//! Shared test utilities for the SpriteNav workspace.
//!
//! Provides reusable fixtures, config builders, and tracing helpers so that
//! individual crate tests stay concise and consistent.
//!
//! Add this crate as a `[dev-dependency]` in any workspace member:
//!
//! ```toml
//! [dev-dependencies]
//! spritenav-test-utils = { workspace = true }
//! ```
//!
//! Inside `spritenav-core` itself, use it from `tests/` only: unit tests see
//! a different copy of the core types.

pub mod config;
pub mod fixtures;
pub mod navigator;
pub mod tracing_setup;
