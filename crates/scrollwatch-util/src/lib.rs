//! Shared utilities for scrollwatch
//!
//! This crate provides:
//! - ID types (RuleId, ClientId)
//! - Domain normalization
//! - Time utilities (wall clock with debug mock time, elapsed helpers)
//! - Error types
//! - Default paths for socket, data, and config

mod domain;
mod error;
mod ids;
mod paths;
mod time;

pub use domain::*;
pub use error::*;
pub use ids::*;
pub use paths::*;
pub use time::*;
