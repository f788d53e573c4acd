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

//! Lots and the movements that change them.
//!
//! A [`Lot`] is one variant expiring on one date. Every quantity change is
//! an append-only [`Movement`] whose [`MovementKind`] carries the sign:
//!
//! | Kind | Effect |
//! |------|--------|
//! | `IN` | adds to the lot (receiving, returns) |
//! | `OUT` | removes from the lot (shipment) |
//! | `DISCARD` | removes from the lot (spoilage, damage) |
//! | `GIFT` | removes from the lot (samples, giveaways) |

use crate::base::{LotId, VariantId};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identity of a lot: one variant on one expiry date.
///
/// Receiving against an existing key reuses the lot instead of creating a
/// new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LotKey {
    pub variant: VariantId,
    pub expiry: NaiveDate,
}

/// On-hand inventory of one variant sharing one expiry date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lot {
    pub id: LotId,
    pub variant: VariantId,
    pub expiry: NaiveDate,
    /// Available quantity in EA.
    pub quantity: u32,
}

impl Lot {
    pub fn key(&self) -> LotKey {
        LotKey {
            variant: self.variant,
            expiry: self.expiry,
        }
    }

    /// FEFO order: earliest expiry first, lot id breaks ties.
    pub fn fefo_key(&self) -> (NaiveDate, LotId) {
        (self.expiry, self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MovementKind {
    In,
    Out,
    Discard,
    Gift,
}

impl MovementKind {
    pub fn is_inbound(&self) -> bool {
        matches!(self, Self::In)
    }

    /// Signed effect of `quantity` units of this kind on a lot.
    pub fn signed(&self, quantity: u32) -> i64 {
        if self.is_inbound() {
            i64::from(quantity)
        } else {
            -i64::from(quantity)
        }
    }
}

impl fmt::Display for MovementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::In => write!(f, "IN"),
            Self::Out => write!(f, "OUT"),
            Self::Discard => write!(f, "DISCARD"),
            Self::Gift => write!(f, "GIFT"),
        }
    }
}

/// Movement kinds that may be issued through FEFO allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum IssueKind {
    Out,
    Gift,
}

impl From<IssueKind> for MovementKind {
    fn from(kind: IssueKind) -> Self {
        match kind {
            IssueKind::Out => MovementKind::Out,
            IssueKind::Gift => MovementKind::Gift,
        }
    }
}

impl FromStr for IssueKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "OUT" => Ok(Self::Out),
            "GIFT" => Ok(Self::Gift),
            _ => Err(format!("unknown issue kind: {s} (expected OUT or GIFT)")),
        }
    }
}

impl fmt::Display for IssueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        MovementKind::from(*self).fmt(f)
    }
}

/// One committed quantity change against a lot. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Movement {
    pub lot: LotId,
    pub kind: MovementKind,
    pub quantity: u32,
    pub note: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl Movement {
    pub fn signed_quantity(&self) -> i64 {
        self.kind.signed(self.quantity)
    }
}
