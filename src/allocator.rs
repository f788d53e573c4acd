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

//! Stock issuance against a [`StockStore`].
//!
//! The [`LotAllocator`] turns an operator's "ship N of item X" into
//! movements. It resolves the item first, then prefers the store's atomic
//! issuance procedure. When the store does not offer one it falls back to
//! planning the FEFO split itself and appending one movement per lot.
//!
//! # Fallback path
//!
//! The fallback reads lots and writes movements in separate store calls.
//! Two callers issuing against the same item at the same time can both see
//! enough stock; the second one then fails part-way with a store rejection
//! after some of its movements are already written. It is meant for
//! low-volume manual use only and every use is logged at `warn`.
//!
//! # Example
//!
//! ```
//! use chrono::NaiveDate;
//! use stockbook::{IssueKind, IssuePath, IssueRequest, ItemCode, LotAllocator, MemoryStore, VariantId};
//!
//! let store = MemoryStore::new();
//! store.register(ItemCode::from("X"), VariantId(1));
//! let allocator = LotAllocator::new(store);
//!
//! let expiry = NaiveDate::from_ymd_opt(2026, 1, 10).unwrap();
//! allocator.receive(&ItemCode::from("X"), expiry, 5, None).unwrap();
//!
//! let receipt = allocator
//!     .issue(&IssueRequest::new("X", IssueKind::Out, 3))
//!     .unwrap();
//! assert_eq!(receipt.path, IssuePath::Atomic);
//! assert_eq!(receipt.lots_touched(), 1);
//! assert_eq!(allocator.available(&ItemCode::from("X")).unwrap(), 2);
//! ```

use crate::allocation::{Allocation, plan, total_available};
use crate::base::{ItemCode, LotId, VariantId};
use crate::error::{AllocationError, StoreError};
use crate::movement::{IssueKind, Lot, LotKey, Movement, MovementKind};
use crate::store::StockStore;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};

/// Allocator behaviour switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocatorConfig {
    /// Use the client-side FEFO fallback when the store has no atomic
    /// procedure. When `false`, [`StoreError::Unsupported`] is returned as a
    /// store failure instead.
    pub allow_fallback: bool,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            allow_fallback: true,
        }
    }
}

/// An outbound or gift issuance request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueRequest {
    pub item: ItemCode,
    pub kind: IssueKind,
    pub quantity: u32,
    pub note: Option<String>,
}

impl IssueRequest {
    pub fn new(item: impl Into<String>, kind: IssueKind, quantity: u32) -> Self {
        Self {
            item: ItemCode::new(item),
            kind,
            quantity,
            note: None,
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

/// Which path committed the movements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IssuePath {
    /// The store's all-or-nothing procedure.
    Atomic,
    /// Client-side FEFO with one append per lot (best effort).
    Fallback,
}

/// Outcome of a successful issuance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueReceipt {
    pub path: IssuePath,
    pub allocations: Vec<Allocation>,
}

impl IssueReceipt {
    /// Number of lots drawn from, for the operator's confirmation message.
    pub fn lots_touched(&self) -> usize {
        self.allocations.len()
    }

    pub fn total(&self) -> u64 {
        self.allocations
            .iter()
            .map(|allocation| u64::from(allocation.quantity))
            .sum()
    }
}

/// FEFO stock issuance over a [`StockStore`].
#[derive(Debug)]
pub struct LotAllocator<S> {
    store: S,
    config: AllocatorConfig,
}

impl<S: StockStore> LotAllocator<S> {
    pub fn new(store: S) -> Self {
        Self::with_config(store, AllocatorConfig::default())
    }

    pub fn with_config(store: S, config: AllocatorConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> AllocatorConfig {
        self.config
    }

    /// Issues `request.quantity` of `request.item`, soonest expiry first.
    ///
    /// Write failures are never retried here; re-submitting is the
    /// operator's call since a retry could issue twice.
    ///
    /// # Errors
    ///
    /// - [`AllocationError::InvalidQuantity`] - quantity is zero.
    /// - [`AllocationError::ItemNotRegistered`] - raised before any allocation
    ///   is attempted.
    /// - [`AllocationError::InsufficientStock`] - nothing is committed.
    /// - [`AllocationError::InternalConsistency`] - FEFO walk left a remainder.
    /// - [`AllocationError::Store`] - the store failed before writing anything.
    /// - [`AllocationError::PartialFallback`] - the fallback stopped after
    ///   writing some movements.
    #[instrument(skip(self, request), fields(item = %request.item, kind = %request.kind, quantity = request.quantity))]
    pub fn issue(&self, request: &IssueRequest) -> Result<IssueReceipt, AllocationError> {
        if request.quantity == 0 {
            return Err(AllocationError::InvalidQuantity);
        }
        let variant = self.resolve(&request.item)?;

        let note = request.note.as_deref();
        match self
            .store
            .issue_atomic(&request.item, request.kind, request.quantity, note)
        {
            Ok(allocations) => {
                info!(lots = allocations.len(), "issued via atomic procedure");
                Ok(IssueReceipt {
                    path: IssuePath::Atomic,
                    allocations,
                })
            }
            Err(StoreError::Unsupported) if self.config.allow_fallback => {
                self.issue_fallback(variant, request)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn issue_fallback(
        &self,
        variant: VariantId,
        request: &IssueRequest,
    ) -> Result<IssueReceipt, AllocationError> {
        warn!(
            %variant,
            "atomic issuance unavailable, using client-side FEFO (not safe under concurrent callers)"
        );

        let lots = self.store.lots_for_variant(variant)?;
        let allocations = plan(&lots, request.quantity, request.kind)?;

        let note = request.note.as_deref();
        for (committed, allocation) in allocations.iter().enumerate() {
            let appended = self.store.append_movement(
                allocation.lot,
                allocation.kind.into(),
                allocation.quantity,
                note,
            );
            if let Err(source) = appended {
                if committed == 0 {
                    return Err(source.into());
                }
                error!(
                    committed,
                    planned = allocations.len(),
                    lot = %allocation.lot,
                    %source,
                    "fallback issuance stopped part-way"
                );
                return Err(AllocationError::PartialFallback { committed, source });
            }
        }

        info!(lots = allocations.len(), "issued via client-side fallback");
        Ok(IssueReceipt {
            path: IssuePath::Fallback,
            allocations,
        })
    }

    /// Records inbound stock, creating the (variant, expiry) lot on first use.
    ///
    /// Returns the lot as it stood right after this receipt. Once the IN
    /// movement is committed the call succeeds, even if another caller has
    /// drained the lot since.
    pub fn receive(
        &self,
        item: &ItemCode,
        expiry: NaiveDate,
        quantity: u32,
        note: Option<&str>,
    ) -> Result<Lot, AllocationError> {
        if quantity == 0 {
            return Err(AllocationError::InvalidQuantity);
        }
        let variant = self.resolve(item)?;

        let lot = self.store.upsert_lot(LotKey { variant, expiry })?;
        let movement = self
            .store
            .append_movement(lot.id, MovementKind::In, quantity, note)?;
        info!(%item, lot = %lot.id, quantity, "received");

        Ok(Lot {
            quantity: lot.quantity.saturating_add(movement.quantity),
            ..lot
        })
    }

    /// Writes off `quantity` from an explicit lot.
    pub fn discard(
        &self,
        lot: LotId,
        quantity: u32,
        note: Option<&str>,
    ) -> Result<Movement, AllocationError> {
        if quantity == 0 {
            return Err(AllocationError::InvalidQuantity);
        }
        let movement = self
            .store
            .append_movement(lot, MovementKind::Discard, quantity, note)?;
        info!(%lot, quantity, "discarded");
        Ok(movement)
    }

    /// On-hand lots of `item`, soonest expiry first.
    pub fn stock(&self, item: &ItemCode) -> Result<Vec<Lot>, AllocationError> {
        let variant = self.resolve(item)?;
        Ok(self.store.lots_for_variant(variant)?)
    }

    /// Total on-hand quantity of `item` across lots.
    pub fn available(&self, item: &ItemCode) -> Result<u64, AllocationError> {
        Ok(total_available(&self.stock(item)?))
    }

    fn resolve(&self, item: &ItemCode) -> Result<VariantId, AllocationError> {
        self.store
            .resolve_variant(item)?
            .ok_or_else(|| AllocationError::ItemNotRegistered(item.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 1, day).unwrap()
    }

    fn allocator(store: MemoryStore, config: AllocatorConfig) -> LotAllocator<MemoryStore> {
        let allocator = LotAllocator::with_config(store, config);
        allocator.store().register(ItemCode::from("X"), VariantId(1));
        allocator.receive(&ItemCode::from("X"), date(10), 5, None).unwrap();
        allocator.receive(&ItemCode::from("X"), date(20), 10, None).unwrap();
        allocator
    }

    #[test]
    fn zero_quantity_rejected_before_lookup() {
        let allocator = LotAllocator::new(MemoryStore::new());
        let result = allocator.issue(&IssueRequest::new("unknown", IssueKind::Out, 0));
        assert_eq!(result, Err(AllocationError::InvalidQuantity));
    }

    #[test]
    fn receive_accumulates_on_same_lot() {
        let allocator = allocator(MemoryStore::new(), AllocatorConfig::default());
        let lot = allocator
            .receive(&ItemCode::from("X"), date(10), 2, Some("return"))
            .unwrap();
        assert_eq!(lot.quantity, 7);
        assert_eq!(allocator.stock(&ItemCode::from("X")).unwrap().len(), 2);
    }

    #[test]
    fn fallback_disabled_surfaces_unsupported() {
        let allocator = allocator(
            MemoryStore::new().without_atomic_issuance(),
            AllocatorConfig {
                allow_fallback: false,
            },
        );
        let result = allocator.issue(&IssueRequest::new("X", IssueKind::Out, 1));
        assert_eq!(result, Err(AllocationError::Store(StoreError::Unsupported)));
    }

    #[test]
    fn fallback_used_when_atomic_missing() {
        let allocator = allocator(
            MemoryStore::new().without_atomic_issuance(),
            AllocatorConfig::default(),
        );
        let receipt = allocator
            .issue(&IssueRequest::new("X", IssueKind::Gift, 6).with_note("sample"))
            .unwrap();
        assert_eq!(receipt.path, IssuePath::Fallback);
        assert_eq!(receipt.lots_touched(), 2);
        assert_eq!(receipt.total(), 6);
        assert_eq!(allocator.available(&ItemCode::from("X")).unwrap(), 9);
    }

    #[test]
    fn discard_rejects_zero() {
        let allocator = allocator(MemoryStore::new(), AllocatorConfig::default());
        assert_eq!(
            allocator.discard(LotId(1), 0, None),
            Err(AllocationError::InvalidQuantity)
        );
    }
}
