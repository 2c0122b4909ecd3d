//! Rule enforcement core for scrollwatch
//!
//! This crate contains:
//! - The rule registry (domain -> rule working set)
//! - Tick accounting with debounce, elapsed cap and bounded tracker memory
//! - The rule state machine for quota and cooldown reset policies
//! - Notification fan-out to page observers and management surfaces
//! - Background timers (reset sweep, batched flush)

mod engine;
mod notify;
mod registry;
mod reset;
mod scheduler;
mod tracker;

pub use engine::*;
pub use notify::*;
pub use registry::*;
pub use reset::*;
pub use scheduler::*;
pub use tracker::*;
