//! ppewatch Alerts
//!
//! Turns per-frame violation observations into confirmed, deduplicated
//! alerts:
//! - **Confirmation:** a streak must last both N frames and T seconds
//! - **Spatial suppression:** one alert per grid cell until it goes quiet
//! - **Duplicate suppression:** one alert per (track, equipment set) per TTL
//! - **Records:** alert records and notification text for fired alerts
//!
//! This crate is pure computation. Time is passed in by the caller; side
//! effects are left to the runtime.

pub mod dedup;
pub mod engine;
pub mod grid;
pub mod message;
pub mod record;

pub use engine::{AlertEngine, AlertStatus, Confirmation, Outcome, Violation};
pub use grid::SuppressionGrid;
pub use record::{build_alert, AlertSource};
