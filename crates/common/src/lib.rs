//! ppewatch Common Utilities
//!
//! Shared infrastructure for all ppewatch crates:
//! - Error types and result aliases
//! - Pipeline configuration (typed, defaulted, validated)
//! - Capture pacing and duration helpers
//! - Tracing/logging initialization

pub mod clock;
pub mod config;
pub mod error;
pub mod logging;

pub use clock::*;
pub use config::*;
pub use error::*;
