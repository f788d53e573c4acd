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

//! Ledger entries and orders, the two sources of cash movement.
//!
//! Amounts are whole currency units. The stored amount is never negative;
//! [`Direction`] alone carries the sign. Nothing here is ever deleted:
//! entries are voided and orders cancelled by status transition, so past
//! balances stay reproducible.
//!
//! ```text
//! LedgerEntry (Posted) ──void──► LedgerEntry (Void)
//! Order (Open) ──ship──► Order (Shipped)
//!        └──cancel──► Order (Cancelled)
//! ```

use crate::base::{CounterpartyId, EntryId, OrderId};
use crate::error::LedgerError;
use chrono::NaiveDate;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    In,
    Out,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::In => write!(f, "IN"),
            Self::Out => write!(f, "OUT"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EntryStatus {
    Posted,
    Void,
}

/// A dated cash movement independent of physical stock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerEntry {
    id: EntryId,
    date: NaiveDate,
    /// Intra-day ordering key; entries without one sort as 0.
    seq: Option<u32>,
    direction: Direction,
    amount: u64,
    category: String,
    counterparty: Option<CounterpartyId>,
    status: EntryStatus,
    memo: Option<String>,
}

impl LedgerEntry {
    /// Creates a posted entry.
    ///
    /// # Errors
    ///
    /// [`LedgerError::InvalidAmount`] if `amount` is zero.
    pub fn new(
        id: EntryId,
        date: NaiveDate,
        direction: Direction,
        amount: u64,
        category: impl Into<String>,
    ) -> Result<Self, LedgerError> {
        if amount == 0 {
            return Err(LedgerError::InvalidAmount);
        }
        Ok(Self {
            id,
            date,
            seq: None,
            direction,
            amount,
            category: category.into(),
            counterparty: None,
            status: EntryStatus::Posted,
            memo: None,
        })
    }

    pub fn with_seq(mut self, seq: u32) -> Self {
        self.seq = Some(seq);
        self
    }

    pub fn with_counterparty(mut self, counterparty: CounterpartyId) -> Self {
        self.counterparty = Some(counterparty);
        self
    }

    pub fn with_memo(mut self, memo: impl Into<String>) -> Self {
        self.memo = Some(memo.into());
        self
    }

    /// Marks the entry void. Voided entries drop out of every balance.
    pub fn void(&mut self) -> Result<(), LedgerError> {
        if self.status == EntryStatus::Void {
            return Err(LedgerError::AlreadyVoid);
        }
        self.status = EntryStatus::Void;
        Ok(())
    }

    pub fn id(&self) -> EntryId {
        self.id
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn seq(&self) -> Option<u32> {
        self.seq
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn amount(&self) -> u64 {
        self.amount
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn counterparty(&self) -> Option<CounterpartyId> {
        self.counterparty
    }

    pub fn status(&self) -> EntryStatus {
        self.status
    }

    pub fn memo(&self) -> Option<&str> {
        self.memo.as_deref()
    }

    pub fn is_void(&self) -> bool {
        self.status == EntryStatus::Void
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub name: String,
    pub quantity: u32,
    pub unit_price: u64,
}

impl LineItem {
    pub fn new(name: impl Into<String>, quantity: u32, unit_price: u64) -> Self {
        Self {
            name: name.into(),
            quantity,
            unit_price,
        }
    }

    /// quantity × unit price, or `None` if that does not fit in a `u64`.
    pub fn amount(&self) -> Option<u64> {
        u64::from(self.quantity).checked_mul(self.unit_price)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderStatus {
    Open,
    Shipped,
    Cancelled,
}

/// A sales/shipment order. For balance purposes it is one outflow of
/// [`Order::total`] on its ship date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub ship_date: NaiveDate,
    pub counterparty: CounterpartyId,
    pub status: OrderStatus,
    pub lines: Vec<LineItem>,
}

impl Order {
    /// VAT added on top of the line subtotal.
    pub const TAX_RATE: Decimal = dec!(0.1);

    pub fn new(id: OrderId, ship_date: NaiveDate, counterparty: CounterpartyId) -> Self {
        Self {
            id,
            ship_date,
            counterparty,
            status: OrderStatus::Open,
            lines: Vec::new(),
        }
    }

    pub fn with_line(mut self, line: LineItem) -> Self {
        self.lines.push(line);
        self
    }

    pub fn with_status(mut self, status: OrderStatus) -> Self {
        self.status = status;
        self
    }

    /// Σ quantity × unit price.
    ///
    /// # Errors
    ///
    /// [`LedgerError::AmountOverflow`] if a line or the sum exceeds `u64`.
    pub fn subtotal(&self) -> Result<u64, LedgerError> {
        self.lines
            .iter()
            .try_fold(0u64, |sum, line| {
                line.amount().and_then(|amount| sum.checked_add(amount))
            })
            .ok_or(LedgerError::AmountOverflow(self.id))
    }

    /// Tax add-on, rounded half-up to whole currency units.
    pub fn tax(&self) -> Result<u64, LedgerError> {
        let subtotal = self.subtotal()?;
        Self::tax_on(subtotal).ok_or(LedgerError::AmountOverflow(self.id))
    }

    /// Subtotal plus tax; the amount an order moves out of the balance.
    pub fn total(&self) -> Result<u64, LedgerError> {
        let subtotal = self.subtotal()?;
        Self::tax_on(subtotal)
            .and_then(|tax| subtotal.checked_add(tax))
            .ok_or(LedgerError::AmountOverflow(self.id))
    }

    fn tax_on(subtotal: u64) -> Option<u64> {
        (Decimal::from(subtotal) * Self::TAX_RATE)
            .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
            .to_u64()
    }

    pub fn is_cancelled(&self) -> bool {
        self.status == OrderStatus::Cancelled
    }
}
