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

//! # Stockbook
//!
//! Core of a small-business back office: FEFO stock issuance against
//! lot-level inventory, and running-balance projection over orders and
//! ledger entries.
//!
//! ## Core Components
//!
//! - [`LotAllocator`]: issues stock soonest-expiry-first through a [`StockStore`]
//! - [`plan`]: the pure FEFO split used by the allocator's fallback path
//! - [`MemoryStore`]: in-process store with an atomic issuance procedure
//! - [`project`] / [`project_period`]: running balance across [`Order`]s and [`LedgerEntry`]s
//! - [`AllocationError`], [`StoreError`], [`LedgerError`]: failure taxonomy
//!
//! ## Example
//!
//! ```
//! use chrono::NaiveDate;
//! use stockbook::{AllocationError, IssueKind, IssueRequest, ItemCode, LotAllocator, MemoryStore, VariantId};
//!
//! let store = MemoryStore::new();
//! store.register(ItemCode::from("X"), VariantId(1));
//! let allocator = LotAllocator::new(store);
//!
//! let day = |d| NaiveDate::from_ymd_opt(2026, 1, d).unwrap();
//! allocator.receive(&ItemCode::from("X"), day(10), 5, None).unwrap();
//! allocator.receive(&ItemCode::from("X"), day(20), 10, None).unwrap();
//!
//! let receipt = allocator.issue(&IssueRequest::new("X", IssueKind::Out, 8)).unwrap();
//! assert_eq!(receipt.lots_touched(), 2);
//!
//! let shortage = allocator.issue(&IssueRequest::new("X", IssueKind::Out, 20));
//! assert_eq!(
//!     shortage,
//!     Err(AllocationError::InsufficientStock { requested: 20, available: 7 })
//! );
//! ```
//!
//! ## Thread Safety
//!
//! [`MemoryStore`] serialises atomic issuance under one lock. The allocator's
//! client-side fallback does not, and is only suitable for a single operator
//! per item at a time.

mod allocation;
mod allocator;
mod base;
pub mod error;
mod ledger;
mod movement;
mod projector;
mod store;

pub use allocation::{Allocation, plan, total_available};
pub use allocator::{AllocatorConfig, IssuePath, IssueReceipt, IssueRequest, LotAllocator};
pub use base::{CounterpartyId, EntryId, ItemCode, LotId, OrderId, VariantId};
pub use error::{AllocationError, LedgerError, StoreError};
pub use ledger::{Direction, EntryStatus, LedgerEntry, LineItem, Order, OrderStatus};
pub use movement::{IssueKind, Lot, LotKey, Movement, MovementKind};
pub use projector::{
    BalanceRow, Origin, Period, Projection, ProjectionFilter, opening_balance, project,
    project_period,
};
pub use store::{MemoryStore, StockStore};
