use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::{Span, WaitlistStatus};

const CHANNEL_CAPACITY: usize = 256;

/// What subscribers of a service hear about. Derived from committed events;
/// never written to the WAL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Change {
    /// Bookable time for the service may differ inside `span`.
    SlotsChanged { service_id: Ulid, span: Span },
    /// A waitlist entry moved to a new status.
    Waitlist {
        service_id: Ulid,
        entry_id: Ulid,
        client_id: Ulid,
        status: WaitlistStatus,
    },
    /// Duration, buffer or capacity rules changed; cached slot lists are stale.
    ServiceUpdated { service_id: Ulid },
    ServiceRemoved { service_id: Ulid },
}

impl Change {
    pub fn service_id(&self) -> Ulid {
        match self {
            Change::SlotsChanged { service_id, .. }
            | Change::Waitlist { service_id, .. }
            | Change::ServiceUpdated { service_id }
            | Change::ServiceRemoved { service_id } => *service_id,
        }
    }
}

/// Per-service broadcast of booking and waitlist changes inside one company.
#[derive(Default)]
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Change>>,
}

impl NotifyHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Receiver for one service's changes. Slow receivers lag rather than
    /// holding up commits.
    pub fn subscribe(&self, service_id: Ulid) -> broadcast::Receiver<Change> {
        self.channels
            .entry(service_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Route a change to its service's subscribers. Returns how many received it.
    pub fn publish(&self, change: Change) -> usize {
        let service_id = change.service_id();
        let delivered = match self.channels.get(&service_id) {
            Some(sender) => sender.send(change).unwrap_or(0),
            None => 0,
        };
        if delivered == 0 {
            // Nobody left listening.
            self.channels.remove_if(&service_id, |_, s| s.receiver_count() == 0);
        }
        delivered
    }

    /// Close a removed service's channel.
    pub fn close(&self, service_id: &Ulid) {
        self.channels.remove(service_id);
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}
