//! Refcount manager and garbage collection.
//!
//! Every datum carries a read and a write refcount. A composite closes when
//! its write refcount reaches zero. A datum is collected once both counts
//! are zero and it has a value (composites always do), unless it is
//! permanent.
//!
//! Collection walks a work list rather than recursing: each collected datum
//! releases one read refcount on every datum its value references, which
//! may queue those in turn. A datum is flagged `freed` before it is queued,
//! so it is collected exactly once however many paths reach it. Referands
//! owned by other servers are not touched; their changes are emitted as
//! [`RefcountChange`] records instead.

use std::collections::VecDeque;

use datastore_types::{DataType, DatumId, RefCounts, Subscript};

use crate::container::{decode_container, decode_multiset};
use crate::error::{DataError, Result};
use crate::notify::{Notifications, RefcountChange};
use crate::store::DataStore;
use crate::value::Value;

/// Refcounts a caller would like to take over from a datum's referands,
/// should the datum be collected by the same operation.
///
/// Taking over a refcount the collected datum held avoids releasing it and
/// immediately acquiring it again, which could collect the referand in
/// between.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Scavenge {
    /// Only referands held under this slot or field; all of them if `None`.
    pub subscript: Option<Subscript>,
    /// How much to take from each referand, at most one read refcount.
    pub refcounts: RefCounts,
}

impl Scavenge {
    /// Scavenge nothing.
    pub fn none() -> Self {
        Self::default()
    }

    /// Scavenge `refcounts` from referands under `subscript`.
    pub fn new(subscript: Option<Subscript>, refcounts: RefCounts) -> Self {
        Self {
            subscript,
            refcounts,
        }
    }

    fn applies_to(&self, held_under: Option<&Subscript>) -> bool {
        match &self.subscript {
            None => true,
            Some(subscript) => held_under == Some(subscript),
        }
    }
}

/// Result of [`DataStore::reference_count`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RefcountOutcome {
    /// The datum was collected.
    pub garbage_collected: bool,
    /// Refcounts handed to the caller on each scavenged referand.
    pub scavenged: RefCounts,
}

impl DataStore {
    /// Apply a signed refcount change to a local datum.
    ///
    /// Changes to permanent datums are accepted and ignored. A change that
    /// would drive either count below zero fails without effect.
    pub fn reference_count(
        &mut self,
        id: DatumId,
        change: RefCounts,
        scavenge: Scavenge,
        notifications: &mut Notifications,
    ) -> Result<RefcountOutcome> {
        let datum = self.datum_mut(id)?;
        if datum.permanent {
            tracing::trace!(id = %id, change = %change, "ignored refcount change on permanent datum");
            return Ok(RefcountOutcome::default());
        }

        let updated = datum
            .refcounts
            .checked_add(change)
            .filter(|rc| !rc.has_negative())
            .ok_or_else(|| {
                DataError::invalid(format!(
                    "refcount change {} on {} would leave {} out of range",
                    change, id, datum.refcounts
                ))
            })?;
        datum.refcounts = updated;
        if let Some(kind) = change.kind() {
            tracing::trace!(id = %id, kind = kind.as_str(), change = %change, now = %updated, "refcount");
        }

        if datum.data_type.is_composite() && updated.write == 0 {
            datum.close(notifications);
        }
        if !datum.is_collectable() {
            return Ok(RefcountOutcome::default());
        }

        datum.freed = true;
        let scavenged = self.collect(id, &scavenge, notifications);
        Ok(RefcountOutcome {
            garbage_collected: true,
            scavenged,
        })
    }

    /// Apply `change` to every datum referenced from an encoded value of
    /// type `data_type`, skipping references back to `owner`.
    ///
    /// Used when a value leaves the store some other way than collection,
    /// such as a value copied out to a caller that now owns references.
    pub fn referand_refcount(
        &mut self,
        data: &[u8],
        data_type: DataType,
        owner: DatumId,
        change: RefCounts,
        notifications: &mut Notifications,
    ) -> Result<()> {
        let mut referands = Vec::new();
        match data_type {
            DataType::Container => {
                let (_, _, members) = decode_container(owner, data, &self.registry)?;
                for (_, value) in &members {
                    value.referands(&mut referands);
                }
            }
            DataType::Multiset => {
                let (_, members) = decode_multiset(data, &self.registry)?;
                for value in &members {
                    value.referands(&mut referands);
                }
            }
            _ => Value::decode(data_type, data, &self.registry)?.referands(&mut referands),
        }
        referands.retain(|r| *r != owner);
        self.change_referands(&referands, change, notifications);
        Ok(())
    }

    /// Collect a datum now, whatever its refcounts.
    pub fn free(&mut self, id: DatumId, notifications: &mut Notifications) -> Result<()> {
        let datum = self.datum_mut(id)?;
        if datum.permanent {
            return Err(DataError::invalid(format!(
                "{} is permanent and cannot be freed",
                id
            )));
        }
        datum.freed = true;
        self.collect(id, &Scavenge::none(), notifications);
        Ok(())
    }

    /// Apply `change` to each of `referands`, collecting whatever drops out.
    pub(crate) fn change_referands(
        &mut self,
        referands: &[DatumId],
        change: RefCounts,
        notifications: &mut Notifications,
    ) {
        if change.is_zero() {
            return;
        }
        let mut work = VecDeque::new();
        for id in referands {
            self.apply_referand_change(*id, change, &mut work, notifications);
        }
        self.sweep(work, None, notifications);
    }

    /// Collect `root`, already flagged freed, and everything that drops out
    /// with it. Returns the refcounts scavenged from root's referands.
    fn collect(
        &mut self,
        root: DatumId,
        scavenge: &Scavenge,
        notifications: &mut Notifications,
    ) -> RefCounts {
        self.sweep(VecDeque::from([root]), Some((root, scavenge)), notifications)
    }

    fn sweep(
        &mut self,
        mut work: VecDeque<DatumId>,
        scavenge: Option<(DatumId, &Scavenge)>,
        notifications: &mut Notifications,
    ) -> RefCounts {
        let mut scavenged = RefCounts::ZERO;

        while let Some(id) = work.pop_front() {
            let Some(datum) = self.table.remove(&id) else {
                tracing::warn!(id = %id, "queued for collection but already gone");
                continue;
            };
            if datum.has_listeners() {
                tracing::warn!(
                    id = %id,
                    subscribers = datum.subscribers.len(),
                    references = datum.references.len(),
                    "collected datum with pending listeners"
                );
            }
            tracing::debug!(id = %id, data_type = %datum.data_type, "collected");

            for (held_under, referand) in datum.held_referands() {
                let mut release = RefCounts::READ;
                if let Some((root, scav)) = scavenge {
                    if id == root && scav.applies_to(held_under.as_ref()) {
                        let take = release.min_each(scav.refcounts);
                        scavenged = take;
                        release = release - take;
                    }
                }
                if !release.is_zero() {
                    self.apply_referand_change(referand, release.negate(), &mut work, notifications);
                }
            }
        }
        scavenged
    }

    /// Apply one referand change, queueing the referand if it becomes
    /// collectable.
    ///
    /// Referand changes come from values already accepted into the store, so
    /// problems are logged rather than failing the operation that caused them.
    fn apply_referand_change(
        &mut self,
        id: DatumId,
        change: RefCounts,
        work: &mut VecDeque<DatumId>,
        notifications: &mut Notifications,
    ) {
        if !self.ids.owns(id) {
            match self.ids.owner_of(id) {
                Some(server) => notifications
                    .rc_changes
                    .push(RefcountChange { id, change, server }),
                None => tracing::warn!(id = %id, change = %change, "refcount change on invalid id"),
            }
            return;
        }

        let Some(datum) = self.table.get_mut(&id) else {
            tracing::warn!(id = %id, change = %change, "refcount change on missing datum");
            return;
        };
        if datum.permanent {
            return;
        }
        if datum.freed {
            tracing::warn!(id = %id, change = %change, "refcount change on datum already queued for collection");
            return;
        }

        let Some(mut updated) = datum.refcounts.checked_add(change) else {
            tracing::warn!(id = %id, change = %change, "refcount overflow, change dropped");
            return;
        };
        if updated.has_negative() {
            tracing::warn!(id = %id, change = %change, was = %datum.refcounts, "refcount underflow, clamped to zero");
            updated = RefCounts::new(updated.read.max(0), updated.write.max(0));
        }
        datum.refcounts = updated;
        tracing::trace!(id = %id, change = %change, now = %updated, "referand refcount");

        if datum.data_type.is_composite() && updated.write == 0 {
            datum.close(notifications);
        }
        if datum.is_collectable() {
            datum.freed = true;
            work.push_back(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use datastore_types::{CreateProps, DataCode, TypeExtra};

    fn store() -> DataStore {
        DataStore::new(StoreConfig::default()).unwrap()
    }

    fn int(s: &mut DataStore, id: i64, read: i32, write: i32) -> DatumId {
        let id = DatumId::new(id);
        s.create(
            id,
            DataType::Integer,
            TypeExtra::None,
            CreateProps::with_refcounts(read, write),
        )
        .unwrap();
        id
    }

    fn set_int(s: &mut DataStore, id: DatumId, v: i64) {
        let mut n = Notifications::new();
        s.store(id, None, &Value::Integer(v).encode(), DataType::Integer, RefCounts::ZERO, &mut n)
            .unwrap();
    }

    #[test]
    fn underflow_is_rejected_without_effect() {
        let mut s = store();
        let id = int(&mut s, 1, 1, 1);
        let mut n = Notifications::new();
        let err = s
            .reference_count(id, RefCounts::new(-2, 0), Scavenge::none(), &mut n)
            .unwrap_err();
        assert_eq!(err.code(), DataCode::Invalid);
        assert_eq!(s.status(id).unwrap().refcounts, RefCounts::new(1, 1));
    }

    #[test]
    fn permanent_datums_ignore_changes() {
        let mut s = store();
        let id = DatumId::new(1);
        s.create(id, DataType::Integer, TypeExtra::None, CreateProps::default().permanent())
            .unwrap();
        set_int(&mut s, id, 3);
        let mut n = Notifications::new();
        let outcome = s
            .reference_count(id, RefCounts::new(-5, -5), Scavenge::none(), &mut n)
            .unwrap();
        assert!(!outcome.garbage_collected);
        assert!(s.exists(id, None).unwrap());
        assert_eq!(s.free(id, &mut n).unwrap_err().code(), DataCode::Invalid);
    }

    #[test]
    fn unset_scalar_survives_zero_until_stored() {
        let mut s = store();
        let id = int(&mut s, 1, 1, 0);
        let mut n = Notifications::new();
        let outcome = s
            .reference_count(id, RefCounts::new(-1, 0), Scavenge::none(), &mut n)
            .unwrap();
        assert!(!outcome.garbage_collected);
        assert!(s.exists(id, None).unwrap());

        set_int(&mut s, id, 1);
        assert!(!s.exists(id, None).unwrap());
    }

    #[test]
    fn collection_releases_referands() {
        let mut s = store();
        // The single read refcount on target is handed to the stored ref
        let target = int(&mut s, 1, 1, 0);
        set_int(&mut s, target, 5);
        let holder = DatumId::new(2);
        s.create(holder, DataType::Ref, TypeExtra::None, CreateProps::default())
            .unwrap();

        let mut n = Notifications::new();
        s.store(
            holder,
            None,
            &Value::Ref(target).encode(),
            DataType::Ref,
            RefCounts::WRITE,
            &mut n,
        )
        .unwrap();
        assert!(s.exists(target, None).unwrap());

        let outcome = s
            .reference_count(holder, RefCounts::new(-1, 0), Scavenge::none(), &mut n)
            .unwrap();
        assert!(outcome.garbage_collected);
        assert_eq!(outcome.scavenged, RefCounts::ZERO);
        assert!(s.is_empty());
    }

    #[test]
    fn remote_referands_become_rc_changes() {
        let mut s = DataStore::new(StoreConfig::for_server(0, 2)).unwrap();
        let holder = DatumId::new(1);
        s.create(holder, DataType::Ref, TypeExtra::None, CreateProps::with_refcounts(1, 1))
            .unwrap();
        let mut n = Notifications::new();
        // Id 2 belongs to server 1
        s.store(
            holder,
            None,
            &Value::Ref(DatumId::new(2)).encode(),
            DataType::Ref,
            RefCounts::new(1, 1),
            &mut n,
        )
        .unwrap();
        assert!(s.is_empty());
        assert_eq!(
            n.rc_changes,
            vec![RefcountChange {
                id: DatumId::new(2),
                change: RefCounts::new(-1, 0),
                server: 1,
            }]
        );
    }

    #[test]
    fn referand_refcount_skips_owner() {
        let mut s = store();
        let a = int(&mut s, 1, 1, 0);
        let b = int(&mut s, 2, 1, 0);
        let mut c = crate::container::Container::new(DataType::Integer, DataType::Ref);
        c.insert(Subscript::from(0i64), Value::Ref(a));
        c.insert(Subscript::from(1i64), Value::Ref(b));

        let mut n = Notifications::new();
        s.referand_refcount(&c.encode(), DataType::Container, b, RefCounts::READ, &mut n)
            .unwrap();
        assert_eq!(s.status(a).unwrap().refcounts, RefCounts::new(2, 0));
        assert_eq!(s.status(b).unwrap().refcounts, RefCounts::new(1, 0));
    }

    #[test]
    fn free_collects_regardless_of_refcounts() {
        let mut s = store();
        let target = int(&mut s, 1, 2, 0);
        set_int(&mut s, target, 1);
        let holder = DatumId::new(2);
        s.create(holder, DataType::Ref, TypeExtra::None, CreateProps::with_refcounts(5, 1))
            .unwrap();
        let mut n = Notifications::new();
        s.store(
            holder,
            None,
            &Value::Ref(target).encode(),
            DataType::Ref,
            RefCounts::ZERO,
            &mut n,
        )
        .unwrap();
        assert_eq!(s.status(target).unwrap().refcounts, RefCounts::new(2, 0));

        s.free(holder, &mut n).unwrap();
        assert!(!s.exists(holder, None).unwrap());
        assert_eq!(s.status(target).unwrap().refcounts, RefCounts::new(1, 0));
    }

    #[test]
    fn scavenge_applies_to_matching_subscript_only() {
        let scav = Scavenge::new(Some(Subscript::from(1i64)), RefCounts::READ);
        assert!(scav.applies_to(Some(&Subscript::from(1i64))));
        assert!(!scav.applies_to(Some(&Subscript::from(2i64))));
        assert!(!scav.applies_to(None));
        assert!(Scavenge::none().applies_to(None));
    }
}
