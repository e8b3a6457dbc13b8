//! Point-to-point delivery of completion frames between peers.
//!
//! Sending is fire-and-forget; every peer reads its frames from one inbox.

pub mod mem;
pub mod tcp;

use tokio::sync::mpsc::UnboundedReceiver;
use trustflow_core::id::PartyId;

use crate::error::TransportError;

/// Frames addressed to the local party, in arrival order.
pub type Inbox = UnboundedReceiver<Vec<u8>>;

pub trait Transport: Send + Sync {
    /// Queue `frame` for delivery to `to`. Returns once queued, not delivered.
    fn send(&self, to: PartyId, frame: Vec<u8>) -> Result<(), TransportError>;
}
