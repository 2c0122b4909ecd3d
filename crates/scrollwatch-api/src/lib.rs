//! Protocol and persisted types for scrollwatch
//!
//! This crate defines the stable shapes shared by the engine, the store and
//! clients:
//! - Rules, reset policies, stats and the persisted aggregate
//! - Commands (requests from observers and management surfaces)
//! - Responses
//! - Events (engine -> observers)
//! - Versioning

mod commands;
mod events;
mod types;

pub use commands::*;
pub use events::*;
pub use types::*;

/// Current API version
pub const API_VERSION: u32 = 1;
