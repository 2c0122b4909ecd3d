//! Event types for engine -> observer streaming

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use scrollwatch_util::Domain;

use crate::{PageSignal, API_VERSION};

/// Event envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub api_version: u32,
    pub timestamp: DateTime<Local>,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(payload: EventPayload) -> Self {
        Self {
            api_version: API_VERSION,
            timestamp: scrollwatch_util::now(),
            payload,
        }
    }

    /// Build the page event for a block state change
    pub fn page(domain: Domain, signal: PageSignal) -> Self {
        let payload = match signal {
            PageSignal::Block => EventPayload::BlockPage { domain },
            PageSignal::Unblock => EventPayload::UnblockPage { domain },
        };
        Self::new(payload)
    }

    /// Domain this event concerns, if any
    pub fn domain(&self) -> Option<&Domain> {
        match &self.payload {
            EventPayload::BlockPage { domain } | EventPayload::UnblockPage { domain } => {
                Some(domain)
            }
            EventPayload::Shutdown => None,
        }
    }
}

/// All possible events from the service to subscribers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    /// Allowance exhausted: observers should show the block overlay
    BlockPage { domain: Domain },

    /// Reset happened: observers should lift the overlay
    UnblockPage { domain: Domain },

    /// Service is shutting down
    Shutdown,
}
