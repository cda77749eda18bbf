//! Subscriptions, container references, and the notification batch.
//!
//! The store never talks to other ranks. Everything an operation wants
//! delivered elsewhere is appended to a caller-owned [`Notifications`] batch,
//! which the transport layer drains after the call returns.

use bytes::Bytes;
use datastore_types::{DataType, DatumId, RefCounts, Subscript};

use crate::datum::Datum;

/// A participating process.
pub type Rank = u32;

/// One-shot request to be told when `(datum, subscript)` becomes set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Subscriber {
    /// Who to tell.
    pub rank: Rank,
    /// Slot or field; `None` for the datum as a whole.
    pub subscript: Option<Subscript>,
}

/// Queued request to bind a container slot's eventual value into another datum.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContainerReference {
    /// Container holding the slot.
    pub container: DatumId,
    /// Slot being waited on.
    pub subscript: Subscript,
    /// Datum that receives the value.
    pub referencing: DatumId,
    /// Type the referencing datum expects.
    pub ref_type: DataType,
}

/// A fired subscription.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notify {
    /// Subscriber to tell.
    pub rank: Rank,
    /// Datum that became set.
    pub id: DatumId,
    /// Slot or field that became set.
    pub subscript: Option<Subscript>,
}

/// A resolved container reference: store `data` into datum `id`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RefBinding {
    /// Referencing datum.
    pub id: DatumId,
    /// Encoded value.
    pub data: Bytes,
    /// Type of `data`.
    pub data_type: DataType,
    /// Container the value came from.
    pub container: DatumId,
    /// Slot the value came from.
    pub subscript: Subscript,
}

/// A refcount change on a datum owned by another server.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RefcountChange {
    /// Target datum.
    pub id: DatumId,
    /// Signed delta.
    pub change: RefCounts,
    /// Server owning the datum.
    pub server: u32,
}

/// Output batch of an operation, owned by the caller.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Notifications {
    /// Fired subscriptions.
    pub notify: Vec<Notify>,
    /// Resolved container references.
    pub references: Vec<RefBinding>,
    /// Refcount changes to forward to other servers.
    pub rc_changes: Vec<RefcountChange>,
}

impl Notifications {
    /// An empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// True if nothing needs delivering.
    pub fn is_empty(&self) -> bool {
        self.notify.is_empty() && self.references.is_empty() && self.rc_changes.is_empty()
    }

    /// Total number of records.
    pub fn len(&self) -> usize {
        self.notify.len() + self.references.len() + self.rc_changes.len()
    }
}

/// Result of [`DataStore::subscribe`](crate::DataStore::subscribe).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Subscription {
    /// Recorded; a later store will fire it.
    Pending,
    /// Already set; nothing was recorded.
    Available,
}

/// Result of [`DataStore::container_reference`](crate::DataStore::container_reference).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ContainerRefOutcome {
    /// Queued; a later store will produce a [`RefBinding`].
    Pending,
    /// Already set; the caller binds this value into the referencing datum.
    Resolved {
        /// Encoded value.
        data: Bytes,
        /// Type of `data`.
        data_type: DataType,
    },
}

impl Datum {
    /// Fire every subscriber waiting on `subscript` (`None`: the whole datum).
    pub(crate) fn fire_subscribers(
        &mut self,
        subscript: Option<&Subscript>,
        notifications: &mut Notifications,
    ) {
        let id = self.id;
        let mut fired = 0usize;
        self.subscribers.retain(|sub| {
            if sub.subscript.as_ref() == subscript {
                notifications.notify.push(Notify {
                    rank: sub.rank,
                    id,
                    subscript: sub.subscript.clone(),
                });
                fired += 1;
                false
            } else {
                true
            }
        });
        if fired > 0 {
            tracing::trace!(id = %id, fired, "notified subscribers");
        }
    }

    /// Remove and return the container references waiting on `subscript`.
    pub(crate) fn take_references(&mut self, subscript: &Subscript) -> Vec<ContainerReference> {
        let (fired, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.references)
            .into_iter()
            .partition(|r| &r.subscript == subscript);
        self.references = waiting;
        fired
    }

    /// Close a composite and fire its whole-datum subscribers, once.
    pub(crate) fn close(&mut self, notifications: &mut Notifications) {
        if self.closed {
            return;
        }
        self.closed = true;
        tracing::debug!(id = %self.id, data_type = %self.data_type, "closed");
        self.fire_subscribers(None, notifications);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::TypeRegistry;
    use datastore_types::{CreateProps, TypeExtra};

    fn container() -> Datum {
        Datum::new(
            DatumId::new(1),
            DataType::Container,
            TypeExtra::Container {
                key_type: DataType::Integer,
                val_type: DataType::Integer,
            },
            &CreateProps::default(),
            &TypeRegistry::new(),
        )
        .unwrap()
    }

    #[test]
    fn subscribers_fire_once_and_only_for_their_subscript() {
        let mut d = container();
        d.subscribers.push(Subscriber {
            rank: 3,
            subscript: Some(Subscript::from(1i64)),
        });
        d.subscribers.push(Subscriber {
            rank: 4,
            subscript: None,
        });

        let mut n = Notifications::new();
        d.fire_subscribers(Some(&Subscript::from(2i64)), &mut n);
        assert!(n.is_empty());

        d.fire_subscribers(Some(&Subscript::from(1i64)), &mut n);
        assert_eq!(n.notify.len(), 1);
        assert_eq!(n.notify[0].rank, 3);

        d.fire_subscribers(Some(&Subscript::from(1i64)), &mut n);
        assert_eq!(n.notify.len(), 1);
        assert_eq!(d.subscribers.len(), 1);
    }

    #[test]
    fn close_fires_whole_datum_subscribers_once() {
        let mut d = container();
        d.subscribers.push(Subscriber {
            rank: 4,
            subscript: None,
        });
        let mut n = Notifications::new();
        d.close(&mut n);
        d.close(&mut n);
        assert_eq!(n.notify.len(), 1);
        assert!(d.closed);
    }

    #[test]
    fn take_references_leaves_others_queued() {
        let mut d = container();
        for (key, referencing) in [(1i64, 10i64), (2, 20), (1, 30)] {
            d.references.push(ContainerReference {
                container: DatumId::new(1),
                subscript: Subscript::from(key),
                referencing: DatumId::new(referencing),
                ref_type: DataType::Integer,
            });
        }
        let fired = d.take_references(&Subscript::from(1i64));
        assert_eq!(fired.len(), 2);
        assert_eq!(d.references.len(), 1);
        assert_eq!(d.references[0].referencing, DatumId::new(20));
    }
}
