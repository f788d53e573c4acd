// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! The backing stock store.
//!
//! [`StockStore`] is the seam between the allocator and whatever holds the
//! authoritative lot table, the stock-by-lot view, and the movement journal.
//! [`MemoryStore`] implements it in process.
//!
//! # Thread Safety
//!
//! [`MemoryStore`] keeps the variant registry in a [`DashMap`] and the lot
//! book together with the movement journal behind a single
//! [`parking_lot::Mutex`]. [`StockStore::issue_atomic`] reads availability and
//! writes every movement under that one lock, so concurrent issuances against
//! the same lot are serialised. Reading lots and appending movements in
//! separate calls (the allocator's fallback path) holds the lock only per
//! call and gives no such guarantee.

use crate::allocation::{Allocation, plan};
use crate::base::{ItemCode, LotId, VariantId};
use crate::error::{AllocationError, StoreError};
use crate::movement::{IssueKind, Lot, LotKey, Movement, MovementKind};
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, warn};

/// Backing store for lots and movements.
pub trait StockStore: Send + Sync {
    /// Looks up the variant registered under `item`.
    fn resolve_variant(&self, item: &ItemCode) -> Result<Option<VariantId>, StoreError>;

    /// Lots of `variant` with positive quantity, soonest expiry first.
    fn lots_for_variant(&self, variant: VariantId) -> Result<Vec<Lot>, StoreError>;

    /// Issues `quantity` of `item` FEFO in one all-or-nothing step.
    ///
    /// Stores without such a procedure keep the default, which reports
    /// [`StoreError::Unsupported`].
    fn issue_atomic(
        &self,
        item: &ItemCode,
        kind: IssueKind,
        quantity: u32,
        note: Option<&str>,
    ) -> Result<Vec<Allocation>, StoreError> {
        let _ = (item, kind, quantity, note);
        Err(StoreError::Unsupported)
    }

    /// Returns the lot for `key`, creating an empty one if needed.
    fn upsert_lot(&self, key: LotKey) -> Result<Lot, StoreError>;

    /// Applies one movement to `lot` and records it in the journal.
    fn append_movement(
        &self,
        lot: LotId,
        kind: MovementKind,
        quantity: u32,
        note: Option<&str>,
    ) -> Result<Movement, StoreError>;
}

impl<T: StockStore + ?Sized> StockStore for Arc<T> {
    fn resolve_variant(&self, item: &ItemCode) -> Result<Option<VariantId>, StoreError> {
        (**self).resolve_variant(item)
    }

    fn lots_for_variant(&self, variant: VariantId) -> Result<Vec<Lot>, StoreError> {
        (**self).lots_for_variant(variant)
    }

    fn issue_atomic(
        &self,
        item: &ItemCode,
        kind: IssueKind,
        quantity: u32,
        note: Option<&str>,
    ) -> Result<Vec<Allocation>, StoreError> {
        (**self).issue_atomic(item, kind, quantity, note)
    }

    fn upsert_lot(&self, key: LotKey) -> Result<Lot, StoreError> {
        (**self).upsert_lot(key)
    }

    fn append_movement(
        &self,
        lot: LotId,
        kind: MovementKind,
        quantity: u32,
        note: Option<&str>,
    ) -> Result<Movement, StoreError> {
        (**self).append_movement(lot, kind, quantity, note)
    }
}

/// Carries a failed plan across the store boundary without losing its class.
fn planning_failure(error: AllocationError) -> StoreError {
    match error {
        AllocationError::InsufficientStock {
            requested,
            available,
        } => StoreError::InsufficientStock {
            requested,
            available,
        },
        AllocationError::InternalConsistency { remaining } => {
            StoreError::InternalConsistency { remaining }
        }
        AllocationError::ItemNotRegistered(item) => StoreError::UnknownItem(item),
        AllocationError::Store(source) | AllocationError::PartialFallback { source, .. } => source,
        other => StoreError::Rejected(other.to_string()),
    }
}

#[derive(Debug, Default)]
struct LotBook {
    lots: BTreeMap<LotId, Lot>,
    by_key: HashMap<LotKey, LotId>,
    journal: Vec<Movement>,
}

impl LotBook {
    fn assert_invariants(&self) {
        debug_assert_eq!(
            self.lots.len(),
            self.by_key.len(),
            "Invariant violated: lot index out of sync with lot table"
        );
    }

    fn next_id(&self) -> LotId {
        LotId(self.lots.keys().next_back().map_or(1, |id| id.0 + 1))
    }

    fn positive_lots(&self, variant: VariantId) -> Vec<Lot> {
        let mut lots: Vec<Lot> = self
            .lots
            .values()
            .filter(|lot| lot.variant == variant && lot.quantity > 0)
            .cloned()
            .collect();
        lots.sort_by_key(Lot::fefo_key);
        lots
    }

    /// Quantity `lot` would hold after the movement, without applying it.
    fn projected(&self, lot: LotId, kind: MovementKind, quantity: u32) -> Result<u32, StoreError> {
        let current = self
            .lots
            .get(&lot)
            .ok_or(StoreError::UnknownLot(lot))?
            .quantity;

        if kind.is_inbound() {
            current
                .checked_add(quantity)
                .ok_or(StoreError::QuantityOverflow(lot))
        } else {
            current
                .checked_sub(quantity)
                .ok_or(StoreError::WouldGoNegative {
                    lot,
                    quantity,
                    available: current,
                })
        }
    }

    fn commit(
        &mut self,
        lot: LotId,
        kind: MovementKind,
        quantity: u32,
        note: Option<&str>,
    ) -> Result<Movement, StoreError> {
        let next = self.projected(lot, kind, quantity)?;
        if let Some(entry) = self.lots.get_mut(&lot) {
            entry.quantity = next;
        }

        let movement = Movement {
            lot,
            kind,
            quantity,
            note: note.map(str::to_owned),
            recorded_at: Utc::now(),
        };
        self.journal.push(movement.clone());
        Ok(movement)
    }
}

/// In-process [`StockStore`].
///
/// # Example
///
/// ```
/// use chrono::NaiveDate;
/// use stockbook::{IssueKind, ItemCode, LotKey, MemoryStore, MovementKind, StockStore, VariantId};
///
/// let store = MemoryStore::new();
/// store.register(ItemCode::from("880100"), VariantId(1));
///
/// let expiry = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
/// let lot = store.upsert_lot(LotKey { variant: VariantId(1), expiry }).unwrap();
/// store.append_movement(lot.id, MovementKind::In, 12, None).unwrap();
///
/// let issued = store
///     .issue_atomic(&ItemCode::from("880100"), IssueKind::Out, 5, None)
///     .unwrap();
/// assert_eq!(issued[0].quantity, 5);
/// assert_eq!(store.lot(lot.id).unwrap().quantity, 7);
/// ```
#[derive(Debug)]
pub struct MemoryStore {
    variants: DashMap<ItemCode, VariantId>,
    book: Mutex<LotBook>,
    atomic_issuance: bool,
}

impl MemoryStore {
    /// Creates an empty store with the atomic issuance procedure enabled.
    pub fn new() -> Self {
        Self {
            variants: DashMap::new(),
            book: Mutex::new(LotBook::default()),
            atomic_issuance: true,
        }
    }

    /// Disables [`StockStore::issue_atomic`], modelling a backend that lacks
    /// the procedure.
    pub fn without_atomic_issuance(mut self) -> Self {
        self.atomic_issuance = false;
        self
    }

    pub fn register(&self, item: ItemCode, variant: VariantId) {
        self.variants.insert(item, variant);
    }

    /// Removes `item` from the registry.
    ///
    /// # Errors
    ///
    /// [`StoreError::VariantInUse`] if any lot of the variant has movements.
    pub fn unregister(&self, item: &ItemCode) -> Result<(), StoreError> {
        let Some(variant) = self.variants.get(item).map(|entry| *entry) else {
            return Err(StoreError::UnknownItem(item.clone()));
        };

        let book = self.book.lock();
        let referenced = book.journal.iter().any(|movement| {
            book.lots
                .get(&movement.lot)
                .is_some_and(|lot| lot.variant == variant)
        });
        if referenced {
            return Err(StoreError::VariantInUse(variant));
        }
        drop(book);

        self.variants.remove(item);
        Ok(())
    }

    /// Seeds a lot snapshot, e.g. from an exported stock-by-lot view.
    ///
    /// No movement is recorded. A lot with the same id or key is replaced
    /// and returned; each replacement is logged at `warn`.
    pub fn insert_lot(&self, lot: Lot) -> Vec<Lot> {
        let mut book = self.book.lock();
        let mut displaced = Vec::new();
        if let Some(old) = book.lots.remove(&lot.id) {
            book.by_key.remove(&old.key());
            displaced.push(old);
        }
        let previous = book.by_key.insert(lot.key(), lot.id);
        if let Some(old) = previous.and_then(|id| book.lots.remove(&id)) {
            displaced.push(old);
        }
        for old in &displaced {
            warn!(
                lot = %lot.id,
                replaced = %old.id,
                variant = %old.variant,
                expiry = %old.expiry,
                dropped_quantity = old.quantity,
                "lot snapshot replaced an existing lot"
            );
        }
        book.lots.insert(lot.id, lot);
        book.assert_invariants();
        displaced
    }

    pub fn lot(&self, id: LotId) -> Option<Lot> {
        self.book.lock().lots.get(&id).cloned()
    }

    /// Snapshot of the movement journal in commit order.
    pub fn movements(&self) -> Vec<Movement> {
        self.book.lock().journal.clone()
    }

    fn variant_of(&self, item: &ItemCode) -> Option<VariantId> {
        self.variants.get(item).map(|entry| *entry)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StockStore for MemoryStore {
    fn resolve_variant(&self, item: &ItemCode) -> Result<Option<VariantId>, StoreError> {
        Ok(self.variant_of(item))
    }

    fn lots_for_variant(&self, variant: VariantId) -> Result<Vec<Lot>, StoreError> {
        Ok(self.book.lock().positive_lots(variant))
    }

    fn issue_atomic(
        &self,
        item: &ItemCode,
        kind: IssueKind,
        quantity: u32,
        note: Option<&str>,
    ) -> Result<Vec<Allocation>, StoreError> {
        if !self.atomic_issuance {
            return Err(StoreError::Unsupported);
        }
        let variant = self
            .variant_of(item)
            .ok_or_else(|| StoreError::UnknownItem(item.clone()))?;

        let mut book = self.book.lock();
        let candidates = book.positive_lots(variant);
        let allocations = plan(&candidates, quantity, kind).map_err(planning_failure)?;

        // Validate every draw before writing any of them.
        for allocation in &allocations {
            book.projected(allocation.lot, kind.into(), allocation.quantity)?;
        }
        for allocation in &allocations {
            book.commit(allocation.lot, kind.into(), allocation.quantity, note)?;
        }

        debug!(%item, lots = allocations.len(), "atomic issuance committed");
        Ok(allocations)
    }

    fn upsert_lot(&self, key: LotKey) -> Result<Lot, StoreError> {
        let mut book = self.book.lock();
        if let Some(lot) = book.by_key.get(&key).and_then(|id| book.lots.get(id)) {
            return Ok(lot.clone());
        }

        let lot = Lot {
            id: book.next_id(),
            variant: key.variant,
            expiry: key.expiry,
            quantity: 0,
        };
        book.by_key.insert(key, lot.id);
        book.lots.insert(lot.id, lot.clone());
        book.assert_invariants();
        Ok(lot)
    }

    fn append_movement(
        &self,
        lot: LotId,
        kind: MovementKind,
        quantity: u32,
        note: Option<&str>,
    ) -> Result<Movement, StoreError> {
        self.book.lock().commit(lot, kind, quantity, note)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 1, day).unwrap()
    }

    fn seeded() -> MemoryStore {
        let store = MemoryStore::new();
        store.register(ItemCode::from("X"), VariantId(1));
        store.insert_lot(Lot {
            id: LotId(1),
            variant: VariantId(1),
            expiry: date(10),
            quantity: 5,
        });
        store.insert_lot(Lot {
            id: LotId(2),
            variant: VariantId(1),
            expiry: date(20),
            quantity: 10,
        });
        store
    }

    #[test]
    fn upsert_reuses_lot_for_same_key() {
        let store = MemoryStore::new();
        let key = LotKey {
            variant: VariantId(3),
            expiry: date(1),
        };
        let first = store.upsert_lot(key).unwrap();
        let second = store.upsert_lot(key).unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(first.quantity, 0);
    }

    #[test]
    fn new_lots_get_fresh_ids() {
        let store = seeded();
        let lot = store
            .upsert_lot(LotKey {
                variant: VariantId(1),
                expiry: date(30),
            })
            .unwrap();
        assert_eq!(lot.id, LotId(3));
    }

    #[test]
    fn lots_for_variant_hides_empty_lots() {
        let store = seeded();
        store
            .append_movement(LotId(1), MovementKind::Discard, 5, None)
            .unwrap();
        let lots = store.lots_for_variant(VariantId(1)).unwrap();
        assert_eq!(lots.len(), 1);
        assert_eq!(lots[0].id, LotId(2));
    }

    #[test]
    fn append_rejects_overdraw() {
        let store = seeded();
        let result = store.append_movement(LotId(1), MovementKind::Out, 6, None);
        assert_eq!(
            result,
            Err(StoreError::WouldGoNegative {
                lot: LotId(1),
                quantity: 6,
                available: 5
            })
        );
        assert!(store.movements().is_empty());
        assert_eq!(store.lot(LotId(1)).unwrap().quantity, 5);
    }

    #[test]
    fn append_rejects_unknown_lot() {
        let store = seeded();
        let result = store.append_movement(LotId(99), MovementKind::In, 1, None);
        assert_eq!(result, Err(StoreError::UnknownLot(LotId(99))));
    }

    #[test]
    fn inbound_overflow_is_rejected() {
        let store = seeded();
        let result = store.append_movement(LotId(1), MovementKind::In, u32::MAX, None);
        assert_eq!(result, Err(StoreError::QuantityOverflow(LotId(1))));
    }

    #[test]
    fn atomic_issue_commits_all_movements() {
        let store = seeded();
        let allocations = store
            .issue_atomic(&ItemCode::from("X"), IssueKind::Out, 8, Some("order 17"))
            .unwrap();
        assert_eq!(allocations.len(), 2);
        assert_eq!(store.lot(LotId(1)).unwrap().quantity, 0);
        assert_eq!(store.lot(LotId(2)).unwrap().quantity, 7);

        let journal = store.movements();
        assert_eq!(journal.len(), 2);
        assert!(journal.iter().all(|m| m.kind == MovementKind::Out));
        assert!(journal.iter().all(|m| m.note.as_deref() == Some("order 17")));
    }

    #[test]
    fn atomic_issue_shortage_commits_nothing() {
        let store = seeded();
        let result = store.issue_atomic(&ItemCode::from("X"), IssueKind::Out, 20, None);
        assert_eq!(
            result,
            Err(StoreError::InsufficientStock {
                requested: 20,
                available: 15
            })
        );
        assert!(store.movements().is_empty());
    }

    #[test]
    fn atomic_issue_unknown_item() {
        let store = seeded();
        let result = store.issue_atomic(&ItemCode::from("nope"), IssueKind::Gift, 1, None);
        assert_eq!(result, Err(StoreError::UnknownItem(ItemCode::from("nope"))));
    }

    #[test]
    fn failed_plan_keeps_its_class_across_the_store() {
        assert_eq!(
            planning_failure(AllocationError::InternalConsistency { remaining: 3 }),
            StoreError::InternalConsistency { remaining: 3 }
        );
        assert_eq!(
            planning_failure(AllocationError::InsufficientStock {
                requested: 8,
                available: 2
            }),
            StoreError::InsufficientStock {
                requested: 8,
                available: 2
            }
        );
        assert_eq!(
            planning_failure(AllocationError::InvalidQuantity),
            StoreError::Rejected("invalid quantity (must be at least 1)".into())
        );

        let round_trip: AllocationError =
            planning_failure(AllocationError::InternalConsistency { remaining: 3 }).into();
        assert_eq!(round_trip, AllocationError::InternalConsistency { remaining: 3 });
    }

    #[test]
    fn atomic_issue_of_zero_is_rejected() {
        let store = seeded();
        let result = store.issue_atomic(&ItemCode::from("X"), IssueKind::Out, 0, None);
        assert!(matches!(result, Err(StoreError::Rejected(_))));
        assert!(store.movements().is_empty());
    }

    #[test]
    fn disabled_atomic_issue_is_unsupported() {
        let store = seeded().without_atomic_issuance();
        let result = store.issue_atomic(&ItemCode::from("X"), IssueKind::Out, 1, None);
        assert_eq!(result, Err(StoreError::Unsupported));
    }

    #[test]
    fn unregister_blocked_by_movement_history() {
        let store = seeded();
        store
            .append_movement(LotId(2), MovementKind::Gift, 1, None)
            .unwrap();
        assert_eq!(
            store.unregister(&ItemCode::from("X")),
            Err(StoreError::VariantInUse(VariantId(1)))
        );
    }

    #[test]
    fn unregister_without_history() {
        let store = seeded();
        store.unregister(&ItemCode::from("X")).unwrap();
        assert_eq!(store.resolve_variant(&ItemCode::from("X")), Ok(None));
    }

    #[test]
    fn insert_lot_replaces_same_key() {
        let store = seeded();
        let displaced = store.insert_lot(Lot {
            id: LotId(7),
            variant: VariantId(1),
            expiry: date(10),
            quantity: 2,
        });
        assert_eq!(displaced.len(), 1);
        assert_eq!(displaced[0].id, LotId(1));
        assert_eq!(displaced[0].quantity, 5);
        assert!(store.lot(LotId(1)).is_none());
        assert_eq!(store.lot(LotId(7)).unwrap().quantity, 2);
    }

    #[test]
    fn insert_lot_reports_both_replacements() {
        let store = seeded();
        // Same id as lot 1, same key as lot 2.
        let displaced = store.insert_lot(Lot {
            id: LotId(1),
            variant: VariantId(1),
            expiry: date(20),
            quantity: 3,
        });
        let ids: Vec<LotId> = displaced.iter().map(|lot| lot.id).collect();
        assert_eq!(ids, vec![LotId(1), LotId(2)]);
        assert!(store.lot(LotId(2)).is_none());
        assert_eq!(store.lots_for_variant(VariantId(1)).unwrap().len(), 1);
    }

    #[test]
    fn insert_fresh_lot_displaces_nothing() {
        let store = seeded();
        let displaced = store.insert_lot(Lot {
            id: LotId(3),
            variant: VariantId(1),
            expiry: date(30),
            quantity: 1,
        });
        assert!(displaced.is_empty());
    }
}
