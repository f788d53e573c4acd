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

//! FEFO (first-expire-first-out) planning.
//!
//! [`plan`] is the pure half of stock issuance: given the candidate lots of
//! one variant, it decides how much to draw from each. It never touches a
//! store, so the same function backs the client-side fallback and can be
//! used by a store to implement its own atomic procedure.
//!
//! # Example
//!
//! ```
//! use chrono::NaiveDate;
//! use stockbook::{plan, IssueKind, Lot, LotId, VariantId};
//!
//! let lot = |id, day, quantity| Lot {
//!     id: LotId(id),
//!     variant: VariantId(1),
//!     expiry: NaiveDate::from_ymd_opt(2026, 1, day).unwrap(),
//!     quantity,
//! };
//! let lots = [lot(2, 20, 10), lot(1, 10, 5)];
//!
//! let allocations = plan(&lots, 8, IssueKind::Out).unwrap();
//! assert_eq!(allocations.len(), 2);
//! assert_eq!((allocations[0].lot, allocations[0].quantity), (LotId(1), 5));
//! assert_eq!((allocations[1].lot, allocations[1].quantity), (LotId(2), 3));
//! ```

use crate::base::LotId;
use crate::error::AllocationError;
use crate::movement::{IssueKind, Lot};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

/// Quantity drawn from one lot for one issuance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub lot: LotId,
    pub expiry: NaiveDate,
    pub kind: IssueKind,
    pub quantity: u32,
}

/// Sum of available quantity across `lots`.
pub fn total_available(lots: &[Lot]) -> u64 {
    lots.iter().map(|lot| u64::from(lot.quantity)).sum()
}

/// Splits `requested` across `candidates`, soonest expiry first.
///
/// Zero-quantity candidates are ignored. Input order does not matter; lots
/// are sorted by expiry with the lot id as the tie-break.
///
/// # Errors
///
/// - [`AllocationError::InvalidQuantity`] - `requested` is zero.
/// - [`AllocationError::InsufficientStock`] - the candidates hold less than
///   `requested` in total (including when there are none).
/// - [`AllocationError::InternalConsistency`] - the walk ended with a
///   remainder even though availability was verified.
pub fn plan(
    candidates: &[Lot],
    requested: u32,
    kind: IssueKind,
) -> Result<Vec<Allocation>, AllocationError> {
    if requested == 0 {
        return Err(AllocationError::InvalidQuantity);
    }

    let mut lots: Vec<&Lot> = candidates.iter().filter(|lot| lot.quantity > 0).collect();
    let available: u64 = lots.iter().map(|lot| u64::from(lot.quantity)).sum();
    if available < u64::from(requested) {
        return Err(AllocationError::InsufficientStock {
            requested: u64::from(requested),
            available,
        });
    }

    lots.sort_by_key(|lot| lot.fefo_key());
    let (allocations, remaining) = walk(&lots, requested, kind);
    settle(allocations, remaining)
}

/// Draws `min(lot, remaining)` from each lot in order until nothing remains.
fn walk(sorted: &[&Lot], requested: u32, kind: IssueKind) -> (Vec<Allocation>, u32) {
    let mut remaining = requested;
    let mut allocations = Vec::new();

    for lot in sorted {
        if remaining == 0 {
            break;
        }
        let quantity = lot.quantity.min(remaining);
        if quantity == 0 {
            continue;
        }
        allocations.push(Allocation {
            lot: lot.id,
            expiry: lot.expiry,
            kind,
            quantity,
        });
        remaining -= quantity;
    }

    (allocations, remaining)
}

fn settle(allocations: Vec<Allocation>, remaining: u32) -> Result<Vec<Allocation>, AllocationError> {
    if remaining != 0 {
        error!(
            remaining,
            lots = allocations.len(),
            "FEFO walk left a remainder after a passed availability check"
        );
        return Err(AllocationError::InternalConsistency {
            remaining: u64::from(remaining),
        });
    }

    debug!(lots = allocations.len(), "FEFO plan computed");
    Ok(allocations)
}
