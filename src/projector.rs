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

//! Running-balance projection over orders and ledger entries.
//!
//! Orders count as outflows of their total on the ship date. Ledger entries
//! count per their [`Direction`]. Both are merged into one chronological
//! list and annotated with the balance after each row:
//!
//! ```text
//! opening ──► row 1 (+in / -out) ──► row 2 ──► ... ──► final balance
//! ```
//!
//! Chronological order is (date, intra-day sequence, inflow before outflow,
//! orders before entries, id). The inflow-first tie-break is kept for
//! stable output only.
//!
//! Void entries and cancelled orders are skipped everywhere, including the
//! opening balance. Projection is read-only and deterministic.
//!
//! # Example
//!
//! ```
//! use chrono::NaiveDate;
//! use stockbook::{project, Direction, EntryId, LedgerEntry, ProjectionFilter};
//!
//! let day = |d| NaiveDate::from_ymd_opt(2026, 1, d).unwrap();
//! let entries = vec![
//!     LedgerEntry::new(EntryId(1), day(1), Direction::In, 500, "sales").unwrap(),
//!     LedgerEntry::new(EntryId(2), day(2), Direction::Out, 300, "rent").unwrap(),
//! ];
//!
//! let projection = project(1000, &entries, &[], &ProjectionFilter::default()).unwrap();
//! assert_eq!(projection.rows[0].balance, 1500);
//! assert_eq!(projection.rows[1].balance, 1200);
//! assert_eq!(projection.final_balance, 1200);
//! ```

use crate::base::{CounterpartyId, EntryId, OrderId};
use crate::error::LedgerError;
use crate::ledger::{Direction, LedgerEntry, Order};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use tracing::{debug, error};

/// Where a projected row came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Origin {
    Order(OrderId),
    Entry(EntryId),
}

/// Restricts both sources to one counterparty.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectionFilter {
    pub counterparty: Option<CounterpartyId>,
}

impl ProjectionFilter {
    pub fn counterparty(counterparty: CounterpartyId) -> Self {
        Self {
            counterparty: Some(counterparty),
        }
    }

    fn admits(&self, counterparty: Option<CounterpartyId>) -> bool {
        self.counterparty.is_none() || self.counterparty == counterparty
    }
}

/// Inclusive date range. An open end runs to the latest row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Period {
    pub start: NaiveDate,
    pub end: Option<NaiveDate>,
}

impl Period {
    pub fn starting(start: NaiveDate) -> Self {
        Self { start, end: None }
    }

    pub fn between(start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            start,
            end: Some(end),
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && self.end.is_none_or(|end| date <= end)
    }
}

/// One annotated row. `balance` is fixed at projection time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceRow {
    pub date: NaiveDate,
    pub seq: u32,
    pub origin: Origin,
    pub direction: Direction,
    pub amount: u64,
    pub counterparty: Option<CounterpartyId>,
    /// Balance after this row.
    pub balance: i64,
    /// Index in chronological order.
    pub position: usize,
}

impl BalanceRow {
    fn chronological_key(&self) -> (NaiveDate, u32, Direction, Origin) {
        (self.date, self.seq, self.direction, self.origin)
    }
}

/// Annotated rows plus period totals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Projection {
    pub opening_balance: i64,
    pub rows: Vec<BalanceRow>,
    pub total_in: u64,
    pub total_out: u64,
    /// Balance of the chronologically last row, or the opening balance.
    pub final_balance: i64,
}

impl Projection {
    /// Reorders rows most-recent-first. Balances and totals are untouched.
    pub fn sort_for_display(&mut self) {
        self.rows
            .sort_by_key(|row| Reverse((row.date, row.seq, row.position)));
    }

    /// Restores chronological order after [`Projection::sort_for_display`].
    pub fn sort_chronological(&mut self) {
        self.rows.sort_by_key(|row| row.position);
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

fn collect_rows(
    entries: &[LedgerEntry],
    orders: &[Order],
    filter: &ProjectionFilter,
    in_range: impl Fn(NaiveDate) -> bool,
) -> Result<Vec<BalanceRow>, LedgerError> {
    let order_rows = orders
        .iter()
        .filter(|order| !order.is_cancelled())
        .filter(|order| filter.admits(Some(order.counterparty)))
        .filter(|order| in_range(order.ship_date))
        .map(|order| -> Result<BalanceRow, LedgerError> {
            Ok(BalanceRow {
                date: order.ship_date,
                seq: 0,
                origin: Origin::Order(order.id),
                direction: Direction::Out,
                amount: order.total()?,
                counterparty: Some(order.counterparty),
                balance: 0,
                position: 0,
            })
        });

    let entry_rows = entries
        .iter()
        .filter(|entry| !entry.is_void())
        .filter(|entry| filter.admits(entry.counterparty()))
        .filter(|entry| in_range(entry.date()))
        .map(|entry| -> Result<BalanceRow, LedgerError> {
            Ok(BalanceRow {
                date: entry.date(),
                seq: entry.seq().unwrap_or_default(),
                origin: Origin::Entry(entry.id()),
                direction: entry.direction(),
                amount: entry.amount(),
                counterparty: entry.counterparty(),
                balance: 0,
                position: 0,
            })
        });

    order_rows.chain(entry_rows).collect()
}

fn accumulate(
    opening_balance: i64,
    mut rows: Vec<BalanceRow>,
) -> Result<Projection, LedgerError> {
    rows.sort_by_key(BalanceRow::chronological_key);

    let mut running = opening_balance;
    let mut total_in = 0u64;
    let mut total_out = 0u64;
    for (position, row) in rows.iter_mut().enumerate() {
        let (total, next) = match row.direction {
            Direction::In => (&mut total_in, running.checked_add_unsigned(row.amount)),
            Direction::Out => (&mut total_out, running.checked_sub_unsigned(row.amount)),
        };
        let Some((sum, next)) = total.checked_add(row.amount).zip(next) else {
            error!(
                date = %row.date,
                origin = ?row.origin,
                amount = row.amount,
                running,
                "running balance overflow"
            );
            return Err(LedgerError::BalanceOverflow);
        };
        *total = sum;
        running = next;
        row.balance = running;
        row.position = position;
    }

    debug_assert_eq!(
        rows.last().map_or(opening_balance, |row| row.balance),
        running,
        "Invariant violated: final balance differs from last row"
    );

    Ok(Projection {
        opening_balance,
        rows,
        total_in,
        total_out,
        final_balance: running,
    })
}

/// Projects every non-void row admitted by `filter`, seeded by
/// `opening_balance`. Callers pass only the rows of the period they want.
///
/// # Errors
///
/// - [`LedgerError::AmountOverflow`] - an order total does not fit in a `u64`.
/// - [`LedgerError::BalanceOverflow`] - the running balance or a total left
///   its range.
pub fn project(
    opening_balance: i64,
    entries: &[LedgerEntry],
    orders: &[Order],
    filter: &ProjectionFilter,
) -> Result<Projection, LedgerError> {
    accumulate(
        opening_balance,
        collect_rows(entries, orders, filter, |_| true)?,
    )
}

/// Net of all inflows minus outflows strictly before `start`.
pub fn opening_balance(
    entries: &[LedgerEntry],
    orders: &[Order],
    start: NaiveDate,
    filter: &ProjectionFilter,
) -> Result<i64, LedgerError> {
    let rows = collect_rows(entries, orders, filter, |date| date < start)?;
    Ok(accumulate(0, rows)?.final_balance)
}

/// Computes the opening balance at `period.start` and projects the period.
pub fn project_period(
    entries: &[LedgerEntry],
    orders: &[Order],
    period: &Period,
    filter: &ProjectionFilter,
) -> Result<Projection, LedgerError> {
    let opening = opening_balance(entries, orders, period.start, filter)?;
    let projection = accumulate(
        opening,
        collect_rows(entries, orders, filter, |date| period.contains(date))?,
    )?;
    debug!(
        start = %period.start,
        rows = projection.rows.len(),
        opening,
        final_balance = projection.final_balance,
        "projected period"
    );
    Ok(projection)
}
