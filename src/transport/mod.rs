//! Switch Transport
//!
//! Requests go out fire-and-forget; replies come back asynchronously as
//! [`SwitchEvent`](crate::protocol::SwitchEvent)s on a channel handed to the
//! router.

pub mod simulated;

pub use simulated::{SimulatedFabric, SimulationConfig};

use crate::protocol::{DatapathId, StatsRequest};
use crate::Result;
use async_trait::async_trait;

/// Outbound half of a switch control channel
#[async_trait]
pub trait StatsTransport: Send + Sync {
    /// Send one stats request. Returns once the request is handed off; the
    /// reply, if any, arrives later as an event.
    async fn send(&self, datapath_id: DatapathId, request: StatsRequest) -> Result<()>;
}
