//! Entity-change notifications.
//!
//! Every committed create/update/delete publishes a [`ChangeEvent`] keyed by
//! collection + document id on a broadcast channel. Subscribers get
//! at-least-once delivery into a bounded per-receiver buffer; a receiver
//! that falls more than [`EVENT_BUFFER`] events behind observes
//! `RecvError::Lagged` and should re-list the affected collections.
//!
//! Events are published after commit, so a subscriber may momentarily lag a
//! just-committed local write, and ordering across concurrent writers is
//! not guaranteed.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Per-subscriber buffer capacity.
pub const EVENT_BUFFER: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Collection {
    Products,
    Customers,
    Invoices,
    InvoiceItems,
    Payments,
    Users,
}

impl Collection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Products => "products",
            Collection::Customers => "customers",
            Collection::Invoices => "invoices",
            Collection::InvoiceItems => "invoiceItems",
            Collection::Payments => "payments",
            Collection::Users => "users",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
}

/// One entity change, published after the write committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    pub collection: Collection,
    pub id: String,
    pub kind: ChangeKind,
}

impl ChangeEvent {
    pub fn new(collection: Collection, id: impl Into<String>, kind: ChangeKind) -> Self {
        ChangeEvent {
            collection,
            id: id.into(),
            kind,
        }
    }
}

/// Broadcast fan-out for change events.
pub(crate) struct EventBus {
    tx: broadcast::Sender<ChangeEvent>,
}

impl EventBus {
    pub(crate) fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_BUFFER);
        EventBus { tx }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.tx.subscribe()
    }

    /// Publish one event. A send error only means there are no live
    /// subscribers, which is fine.
    pub(crate) fn publish(&self, event: ChangeEvent) {
        let _ = self.tx.send(event);
    }

    /// Publish a batch collected during a transaction, in commit order.
    pub(crate) fn publish_all(&self, events: Vec<ChangeEvent>) {
        for event in events {
            self.publish(event);
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscriber_receives_published_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.publish(ChangeEvent::new(
            Collection::Products,
            "prd-1",
            ChangeKind::Created,
        ));
        bus.publish(ChangeEvent::new(
            Collection::Products,
            "prd-1",
            ChangeKind::Updated,
        ));

        let first = rx.try_recv().expect("first event");
        assert_eq!(first.collection, Collection::Products);
        assert_eq!(first.id, "prd-1");
        assert_eq!(first.kind, ChangeKind::Created);

        let second = rx.try_recv().expect("second event");
        assert_eq!(second.kind, ChangeKind::Updated);
    }

    #[test]
    fn test_publish_without_subscribers_is_a_noop() {
        let bus = EventBus::new();
        // Must not panic or error
        bus.publish(ChangeEvent::new(
            Collection::Invoices,
            "inv-1",
            ChangeKind::Deleted,
        ));
    }

    #[test]
    fn test_each_subscriber_sees_every_event() {
        let bus = EventBus::new();
        let mut rx_a = bus.subscribe();
        let mut rx_b = bus.subscribe();

        bus.publish_all(vec![
            ChangeEvent::new(Collection::Customers, "cus-1", ChangeKind::Created),
            ChangeEvent::new(Collection::Invoices, "inv-1", ChangeKind::Created),
        ]);

        for rx in [&mut rx_a, &mut rx_b] {
            assert_eq!(rx.try_recv().unwrap().id, "cus-1");
            assert_eq!(rx.try_recv().unwrap().id, "inv-1");
        }
    }

    #[test]
    fn test_event_json_shape() {
        let event = ChangeEvent::new(Collection::InvoiceItems, "itm-1", ChangeKind::Deleted);
        let v = serde_json::to_value(&event).unwrap();
        assert_eq!(v["collection"], "invoiceItems");
        assert_eq!(v["kind"], "deleted");
        assert_eq!(v["id"], "itm-1");
    }
}
