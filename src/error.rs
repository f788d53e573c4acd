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

//! Error types for stock issuance, the backing store, and the ledger.

use crate::base::{ItemCode, LotId, OrderId, VariantId};
use thiserror::Error;

/// Stock issuance errors.
///
/// [`AllocationError::ItemNotRegistered`] and
/// [`AllocationError::InsufficientStock`] are operator mistakes and are shown
/// verbatim. [`AllocationError::InternalConsistency`] is a logic fault and
/// must never be presented as a stock shortage.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AllocationError {
    /// Requested quantity is zero
    #[error("invalid quantity (must be at least 1)")]
    InvalidQuantity,

    /// The item code does not resolve to any registered variant
    #[error("item not registered: {0}")]
    ItemNotRegistered(ItemCode),

    /// Summed availability across lots is below the request
    #[error("insufficient stock: requested {requested}, available {available}")]
    InsufficientStock { requested: u64, available: u64 },

    /// Quantity left over after walking every lot despite a passed availability check
    #[error("internal consistency fault: {remaining} left unallocated after exhausting all lots")]
    InternalConsistency { remaining: u64 },

    /// The backing store failed; the request may be re-submitted by the operator
    #[error("stock store failure: {0}")]
    Store(StoreError),

    /// The fallback path failed after some movements were already written
    #[error("fallback issuance stopped after {committed} movement(s): {source}")]
    PartialFallback { committed: usize, source: StoreError },
}

impl From<StoreError> for AllocationError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::InsufficientStock {
                requested,
                available,
            } => Self::InsufficientStock {
                requested,
                available,
            },
            StoreError::UnknownItem(item) => Self::ItemNotRegistered(item),
            StoreError::InternalConsistency { remaining } => {
                Self::InternalConsistency { remaining }
            }
            other => Self::Store(other),
        }
    }
}

/// Errors reported by a [`StockStore`](crate::StockStore) implementation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The backend has no atomic issuance procedure
    #[error("atomic issuance is not supported by this store")]
    Unsupported,

    /// Item code is not registered with the store
    #[error("item not registered: {0}")]
    UnknownItem(ItemCode),

    /// Referenced lot does not exist
    #[error("lot {0} not found")]
    UnknownLot(LotId),

    /// The atomic procedure found too little stock and committed nothing
    #[error("insufficient stock: requested {requested}, available {available}")]
    InsufficientStock { requested: u64, available: u64 },

    /// The store's own FEFO walk left a remainder; nothing was committed
    #[error("internal consistency fault: {remaining} left unallocated after exhausting all lots")]
    InternalConsistency { remaining: u64 },

    /// Appending the movement would drive the lot below zero
    #[error("movement of {quantity} would drive lot {lot} negative (available {available})")]
    WouldGoNegative {
        lot: LotId,
        quantity: u32,
        available: u32,
    },

    /// Inbound movement would overflow the lot quantity
    #[error("lot {0} quantity overflow")]
    QuantityOverflow(LotId),

    /// The issuance procedure refused the request
    #[error("issuance rejected: {0}")]
    Rejected(String),

    /// Variant still has movement history and cannot be removed
    #[error("variant {0} has recorded movements")]
    VariantInUse(VariantId),

    /// Infrastructure failure (connection, timeout, rejected write)
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Ledger entry errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Amount is zero
    #[error("invalid amount (must be positive)")]
    InvalidAmount,

    /// Entry is already voided
    #[error("entry already voided")]
    AlreadyVoid,

    /// Order lines, subtotal or tax do not fit in a whole-unit amount
    #[error("order {0} total overflows")]
    AmountOverflow(OrderId),

    /// The running balance or a period total left the representable range
    #[error("running balance overflow")]
    BalanceOverflow,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insufficient_stock_message_carries_both_totals() {
        let error = AllocationError::InsufficientStock {
            requested: 20,
            available: 15,
        };
        assert_eq!(
            error.to_string(),
            "insufficient stock: requested 20, available 15"
        );
    }

    #[test]
    fn error_display_messages() {
        assert_eq!(
            AllocationError::InvalidQuantity.to_string(),
            "invalid quantity (must be at least 1)"
        );
        assert_eq!(
            AllocationError::ItemNotRegistered(ItemCode::from("880123")).to_string(),
            "item not registered: 880123"
        );
        assert_eq!(
            AllocationError::InternalConsistency { remaining: 3 }.to_string(),
            "internal consistency fault: 3 left unallocated after exhausting all lots"
        );
        assert_eq!(
            StoreError::WouldGoNegative {
                lot: LotId(4),
                quantity: 9,
                available: 2
            }
            .to_string(),
            "movement of 9 would drive lot 4 negative (available 2)"
        );
        assert_eq!(LedgerError::InvalidAmount.to_string(), "invalid amount (must be positive)");
        assert_eq!(LedgerError::AlreadyVoid.to_string(), "entry already voided");
        assert_eq!(
            LedgerError::AmountOverflow(OrderId(12)).to_string(),
            "order 12 total overflows"
        );
    }

    #[test]
    fn store_shortage_maps_to_allocation_shortage() {
        let error: AllocationError = StoreError::InsufficientStock {
            requested: 8,
            available: 3,
        }
        .into();
        assert_eq!(
            error,
            AllocationError::InsufficientStock {
                requested: 8,
                available: 3
            }
        );
    }

    #[test]
    fn unknown_item_maps_to_not_registered() {
        let error: AllocationError = StoreError::UnknownItem(ItemCode::from("X")).into();
        assert_eq!(error, AllocationError::ItemNotRegistered(ItemCode::from("X")));
    }

    #[test]
    fn store_consistency_fault_stays_a_logic_fault() {
        let error: AllocationError = StoreError::InternalConsistency { remaining: 3 }.into();
        assert_eq!(error, AllocationError::InternalConsistency { remaining: 3 });
    }

    #[test]
    fn other_store_errors_stay_store_errors() {
        let error: AllocationError = StoreError::Unavailable("timeout".into()).into();
        assert_eq!(
            error,
            AllocationError::Store(StoreError::Unavailable("timeout".into()))
        );
    }

    #[test]
    fn partial_fallback_exposes_source() {
        use std::error::Error as _;

        let error = AllocationError::PartialFallback {
            committed: 1,
            source: StoreError::UnknownLot(LotId(2)),
        };
        assert!(error.source().is_some());
        assert_eq!(
            error.to_string(),
            "fallback issuance stopped after 1 movement(s): lot 2 not found"
        );
    }
}
