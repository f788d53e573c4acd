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

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use csv::{ReaderBuilder, Trim, Writer};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process;
use stockbook::{
    AllocationError, AllocatorConfig, CounterpartyId, Direction, EntryId, IssueKind,
    IssueReceipt, IssueRequest, ItemCode, LedgerEntry, LedgerError, LineItem, Lot, LotAllocator,
    LotId, MemoryStore, Order, OrderId, OrderStatus, Origin, Period, Projection,
    ProjectionFilter, VariantId, project_period,
};
use thiserror::Error;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Stockbook - FEFO stock issuance and running-balance reports
///
/// Reads CSV snapshots, writes CSV results to stdout. Logs go to stderr.
#[derive(Parser, Debug)]
#[command(name = "stockbook")]
#[command(about = "FEFO stock issuance and ledger balance reports over CSV", long_about = None)]
struct Args {
    /// Log filter used when RUST_LOG is not set (e.g. "info", "stockbook=debug")
    #[arg(long, global = true, env = "STOCKBOOK_LOG", default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Issue stock soonest-expiry-first and print the per-lot split
    ///
    /// Lots CSV columns: lot,item,variant,expiry,quantity
    Issue {
        /// Path to the stock-by-lot CSV
        #[arg(long, value_name = "FILE")]
        lots: PathBuf,

        /// Item code (barcode or SKU)
        #[arg(long)]
        item: String,

        /// Quantity to issue, in EA
        #[arg(long)]
        quantity: u32,

        /// Movement kind: out or gift
        #[arg(long, default_value = "out")]
        kind: IssueKind,

        #[arg(long)]
        note: Option<String>,

        /// Pretend the store has no atomic issuance procedure
        #[arg(long)]
        no_atomic: bool,

        /// Fail instead of falling back to client-side FEFO
        #[arg(long)]
        no_fallback: bool,
    },

    /// Print running-balance rows for a period
    ///
    /// Entries CSV columns: id,date,seq,direction,amount,category,counterparty,status,memo
    /// Orders CSV columns: order,ship_date,counterparty,status,name,quantity,unit_price
    Balance {
        #[arg(long, value_name = "FILE")]
        entries: PathBuf,

        #[arg(long, value_name = "FILE")]
        orders: PathBuf,

        /// First day of the period (YYYY-MM-DD)
        #[arg(long)]
        from: NaiveDate,

        /// Last day of the period, inclusive
        #[arg(long)]
        to: Option<NaiveDate>,

        /// Only rows for this counterparty
        #[arg(long)]
        counterparty: Option<u32>,

        /// Most-recent-first instead of chronological
        #[arg(long)]
        display: bool,
    },
}

#[derive(Debug, Error)]
enum CliError {
    #[error("cannot open '{path}': {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Allocation(#[from] AllocationError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

fn main() {
    let args = Args::parse();
    init_tracing(&args.log_level);

    let result = match args.command {
        Command::Issue {
            lots,
            item,
            quantity,
            kind,
            note,
            no_atomic,
            no_fallback,
        } => {
            let mut request = IssueRequest::new(item, kind, quantity);
            request.note = note;
            let config = AllocatorConfig {
                allow_fallback: !no_fallback,
            };
            run_issue(&lots, &request, no_atomic, config)
        }
        Command::Balance {
            entries,
            orders,
            from,
            to,
            counterparty,
            display,
        } => {
            let period = Period { start: from, end: to };
            let filter = ProjectionFilter {
                counterparty: counterparty.map(CounterpartyId),
            };
            run_balance(&entries, &orders, &period, &filter, display)
        }
    };

    if let Err(e) = result {
        if matches!(
            e,
            CliError::Allocation(AllocationError::InternalConsistency { .. })
        ) {
            error!(error = %e, "internal consistency fault");
        }
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn open(path: &Path) -> Result<BufReader<File>, CliError> {
    File::open(path).map(BufReader::new).map_err(|source| CliError::Open {
        path: path.to_path_buf(),
        source,
    })
}

fn csv_reader<R: Read>(reader: R) -> csv::Reader<R> {
    ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .has_headers(true)
        .from_reader(reader)
}

fn run_issue(
    lots: &Path,
    request: &IssueRequest,
    no_atomic: bool,
    config: AllocatorConfig,
) -> Result<(), CliError> {
    let mut store = load_lots(open(lots)?)?;
    if no_atomic {
        store = store.without_atomic_issuance();
    }
    let allocator = LotAllocator::with_config(store, config);

    let receipt = allocator.issue(request)?;
    info!(
        path = ?receipt.path,
        lots = receipt.lots_touched(),
        total = receipt.total(),
        "issued"
    );
    write_allocations(&receipt, std::io::stdout())
}

fn run_balance(
    entries: &Path,
    orders: &Path,
    period: &Period,
    filter: &ProjectionFilter,
    display: bool,
) -> Result<(), CliError> {
    let entries = load_entries(open(entries)?)?;
    let orders = load_orders(open(orders)?)?;

    let mut projection = project_period(&entries, &orders, period, filter)?;
    info!(
        opening = projection.opening_balance,
        total_in = projection.total_in,
        total_out = projection.total_out,
        final_balance = projection.final_balance,
        "balance"
    );
    if display {
        projection.sort_for_display();
    }
    write_rows(&projection, std::io::stdout())
}

/// Stock-by-lot CSV record.
///
/// Fields: `lot, item, variant, expiry, quantity`
#[derive(Debug, Deserialize)]
struct LotRecord {
    lot: u64,
    item: String,
    variant: u32,
    expiry: NaiveDate,
    quantity: u32,
}

/// Loads a stock-by-lot snapshot into a fresh [`MemoryStore`].
///
/// Each row registers its item code and seeds one lot. Malformed rows are
/// skipped with a warning.
fn load_lots<R: Read>(reader: R) -> Result<MemoryStore, CliError> {
    let store = MemoryStore::new();

    for result in csv_reader(reader).deserialize::<LotRecord>() {
        match result {
            Ok(record) => {
                store.register(ItemCode::new(record.item), VariantId(record.variant));
                store.insert_lot(Lot {
                    id: LotId(record.lot),
                    variant: VariantId(record.variant),
                    expiry: record.expiry,
                    quantity: record.quantity,
                });
            }
            Err(e) => warn!(error = %e, "skipping malformed lot row"),
        }
    }

    Ok(store)
}

/// Ledger entry CSV record.
///
/// Fields: `id, date, seq, direction, amount, category, counterparty, status, memo`
#[derive(Debug, Deserialize)]
struct EntryRecord {
    id: u64,
    date: NaiveDate,
    #[serde(deserialize_with = "csv::invalid_option")]
    seq: Option<u32>,
    direction: String,
    amount: u64,
    category: String,
    #[serde(deserialize_with = "csv::invalid_option")]
    counterparty: Option<u32>,
    status: String,
    #[serde(default)]
    memo: Option<String>,
}

impl EntryRecord {
    fn into_entry(self) -> Result<LedgerEntry, String> {
        let direction = match self.direction.to_uppercase().as_str() {
            "IN" => Direction::In,
            "OUT" => Direction::Out,
            other => return Err(format!("unknown direction: {other}")),
        };
        let mut entry = LedgerEntry::new(
            EntryId(self.id),
            self.date,
            direction,
            self.amount,
            self.category,
        )
        .map_err(|e: LedgerError| e.to_string())?;

        if let Some(seq) = self.seq {
            entry = entry.with_seq(seq);
        }
        if let Some(counterparty) = self.counterparty {
            entry = entry.with_counterparty(CounterpartyId(counterparty));
        }
        if let Some(memo) = self.memo.filter(|memo| !memo.is_empty()) {
            entry = entry.with_memo(memo);
        }
        match self.status.to_uppercase().as_str() {
            "POSTED" => {}
            "VOID" => entry.void().map_err(|e| e.to_string())?,
            other => return Err(format!("unknown status: {other}")),
        }
        Ok(entry)
    }
}

fn load_entries<R: Read>(reader: R) -> Result<Vec<LedgerEntry>, CliError> {
    let mut entries = Vec::new();

    for result in csv_reader(reader).deserialize::<EntryRecord>() {
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                warn!(error = %e, "skipping malformed entry row");
                continue;
            }
        };
        let id = record.id;
        match record.into_entry() {
            Ok(entry) => entries.push(entry),
            Err(reason) => warn!(id, %reason, "skipping invalid entry"),
        }
    }

    Ok(entries)
}

/// Order line CSV record. Lines sharing `order` form one order.
///
/// Fields: `order, ship_date, counterparty, status, name, quantity, unit_price`
#[derive(Debug, Deserialize)]
struct OrderLineRecord {
    order: u64,
    ship_date: NaiveDate,
    counterparty: u32,
    status: String,
    name: String,
    quantity: u32,
    unit_price: u64,
}

fn parse_order_status(status: &str) -> Option<OrderStatus> {
    match status.to_uppercase().as_str() {
        "OPEN" => Some(OrderStatus::Open),
        "SHIPPED" => Some(OrderStatus::Shipped),
        "CANCELLED" | "CANCELED" => Some(OrderStatus::Cancelled),
        _ => None,
    }
}

/// Groups order lines into orders. Header fields come from the first line
/// seen for each order.
fn load_orders<R: Read>(reader: R) -> Result<Vec<Order>, CliError> {
    let mut orders: BTreeMap<OrderId, Order> = BTreeMap::new();

    for result in csv_reader(reader).deserialize::<OrderLineRecord>() {
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                warn!(error = %e, "skipping malformed order row");
                continue;
            }
        };
        let Some(status) = parse_order_status(&record.status) else {
            warn!(order = record.order, status = %record.status, "skipping order line with unknown status");
            continue;
        };

        let id = OrderId(record.order);
        orders
            .entry(id)
            .or_insert_with(|| {
                Order::new(id, record.ship_date, CounterpartyId(record.counterparty))
                    .with_status(status)
            })
            .lines
            .push(LineItem::new(record.name, record.quantity, record.unit_price));
    }

    Ok(orders
        .into_values()
        .filter(|order| match order.total() {
            Ok(_) => true,
            Err(e) => {
                warn!(
                    order = %order.id,
                    error = %e,
                    "skipping order with unrepresentable total"
                );
                false
            }
        })
        .collect())
}

/// Allocation CSV record.
///
/// Columns: `lot, expiry, kind, quantity`
#[derive(Debug, Serialize)]
struct AllocationRecord {
    lot: u64,
    expiry: NaiveDate,
    kind: IssueKind,
    quantity: u32,
}

fn write_allocations<W: Write>(receipt: &IssueReceipt, writer: W) -> Result<(), CliError> {
    let mut wtr = Writer::from_writer(writer);

    for allocation in &receipt.allocations {
        wtr.serialize(AllocationRecord {
            lot: allocation.lot.0,
            expiry: allocation.expiry,
            kind: allocation.kind,
            quantity: allocation.quantity,
        })?;
    }

    wtr.flush().map_err(csv::Error::from)?;
    Ok(())
}

/// Balance row CSV record.
///
/// Columns: `date, origin, id, direction, amount, balance`
#[derive(Debug, Serialize)]
struct RowRecord {
    date: NaiveDate,
    origin: &'static str,
    id: u64,
    direction: Direction,
    amount: u64,
    balance: i64,
}

fn write_rows<W: Write>(projection: &Projection, writer: W) -> Result<(), CliError> {
    let mut wtr = Writer::from_writer(writer);

    for row in &projection.rows {
        let (origin, id) = match row.origin {
            Origin::Order(id) => ("order", id.0),
            Origin::Entry(id) => ("entry", id.0),
        };
        wtr.serialize(RowRecord {
            date: row.date,
            origin,
            id,
            direction: row.direction,
            amount: row.amount,
            balance: row.balance,
        })?;
    }

    wtr.flush().map_err(csv::Error::from)?;
    Ok(())
}
