//! In-process transport: one unbounded channel per party.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
use trustflow_core::id::PartyId;

use super::{Inbox, Transport};
use crate::error::TransportError;

#[derive(Debug, Clone)]
pub struct MemTransport {
    local: PartyId,
    routes: BTreeMap<PartyId, UnboundedSender<Vec<u8>>>,
}

impl MemTransport {
    pub fn local(&self) -> PartyId {
        self.local
    }
}

impl Transport for MemTransport {
    fn send(&self, to: PartyId, frame: Vec<u8>) -> Result<(), TransportError> {
        let route = self.routes.get(&to).ok_or(TransportError::UnknownParty(to))?;
        route.send(frame).map_err(|_| TransportError::Closed(to))
    }
}

/// Wire up every party in `parties` to every other one.
pub fn network(
    parties: impl IntoIterator<Item = PartyId>,
) -> BTreeMap<PartyId, (Arc<MemTransport>, Inbox)> {
    let mut senders = BTreeMap::new();
    let mut inboxes = BTreeMap::new();
    for p in parties {
        let (tx, rx) = unbounded_channel();
        senders.insert(p, tx);
        inboxes.insert(p, rx);
    }

    inboxes
        .into_iter()
        .map(|(p, inbox)| {
            let routes = senders
                .iter()
                .filter(|(q, _)| **q != p)
                .map(|(q, tx)| (*q, tx.clone()))
                .collect();
            (p, (Arc::new(MemTransport { local: p, routes }), inbox))
        })
        .collect()
}
