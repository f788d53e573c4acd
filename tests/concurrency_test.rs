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

//! Concurrent issuance tests.
//!
//! The atomic path must never over-draw a lot no matter how many callers race
//! on one item. The client-side fallback has a read-then-write window; these
//! tests pin down what that window looks like rather than pretend it is safe.
//!
//! Locking is checked with parking_lot's `deadlock_detection` feature.

use chrono::NaiveDate;
use parking_lot::{Mutex, deadlock};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;
use stockbook::{
    Allocation, AllocationError, IssueKind, IssueRequest, ItemCode, Lot, LotAllocator, LotId,
    LotKey, MemoryStore, Movement, MovementKind, StockStore, StoreError, VariantId,
};

// === Helpers ===

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 1, d).unwrap()
}

/// Ten lots of item "X", 10 EA each, expiring on consecutive days.
fn stocked(store: MemoryStore) -> MemoryStore {
    store.register(ItemCode::from("X"), VariantId(1));
    for i in 1..=10 {
        store.insert_lot(Lot {
            id: LotId(u64::from(i)),
            variant: VariantId(1),
            expiry: day(i),
            quantity: 10,
        });
    }
    store
}

fn journal_total(store: &MemoryStore) -> i64 {
    store.movements().iter().map(Movement::signed_quantity).sum()
}

/// Serves a lot snapshot taken earlier instead of live stock.
struct StaleReadStore {
    inner: Arc<MemoryStore>,
    snapshot: Mutex<Option<Vec<Lot>>>,
}

impl StockStore for StaleReadStore {
    fn resolve_variant(&self, item: &ItemCode) -> Result<Option<VariantId>, StoreError> {
        self.inner.resolve_variant(item)
    }

    fn lots_for_variant(&self, variant: VariantId) -> Result<Vec<Lot>, StoreError> {
        match self.snapshot.lock().take() {
            Some(stale) => Ok(stale),
            None => self.inner.lots_for_variant(variant),
        }
    }

    fn issue_atomic(
        &self,
        _item: &ItemCode,
        _kind: IssueKind,
        _quantity: u32,
        _note: Option<&str>,
    ) -> Result<Vec<Allocation>, StoreError> {
        Err(StoreError::Unsupported)
    }

    fn upsert_lot(&self, key: LotKey) -> Result<Lot, StoreError> {
        self.inner.upsert_lot(key)
    }

    fn append_movement(
        &self,
        lot: LotId,
        kind: MovementKind,
        quantity: u32,
        note: Option<&str>,
    ) -> Result<Movement, StoreError> {
        self.inner.append_movement(lot, kind, quantity, note)
    }
}

// === Deadlock Detection Infrastructure ===

/// Starts a background thread that checks for deadlocks.
fn start_deadlock_detector() -> Arc<AtomicBool> {
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = running.clone();

    thread::spawn(move || {
        while running_clone.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(100));
            let deadlocks = deadlock::check_deadlock();
            if !deadlocks.is_empty() {
                eprintln!("\n=== DEADLOCK DETECTED ===");
                for (i, threads) in deadlocks.iter().enumerate() {
                    eprintln!("\nDeadlock #{}", i + 1);
                    for t in threads {
                        eprintln!("Thread ID: {:?}", t.thread_id());
                        eprintln!("Backtrace:\n{:#?}", t.backtrace());
                    }
                }
                panic!("Deadlock detected! See output above for details.");
            }
        }
    });

    running
}

fn stop_deadlock_detector(running: Arc<AtomicBool>) {
    running.store(false, Ordering::SeqCst);
    thread::sleep(Duration::from_millis(150));
}

// === Tests ===

/// Many callers draining one item through the atomic path issue exactly the
/// stock on hand and no more.
#[test]
fn atomic_issuance_never_overdraws() {
    let detector = start_deadlock_detector();
    let allocator = Arc::new(LotAllocator::new(stocked(MemoryStore::new())));
    let issued = Arc::new(AtomicUsize::new(0));
    let rejected = Arc::new(AtomicUsize::new(0));

    const NUM_THREADS: usize = 16;
    const OPS_PER_THREAD: usize = 10;

    let mut handles = Vec::with_capacity(NUM_THREADS);
    for t in 0..NUM_THREADS {
        let allocator = allocator.clone();
        let issued = issued.clone();
        let rejected = rejected.clone();

        handles.push(thread::spawn(move || {
            for i in 0..OPS_PER_THREAD {
                let quantity = ((t + i) % 3 + 1) as u32;
                let request = IssueRequest::new("X", IssueKind::Out, quantity);
                match allocator.issue(&request) {
                    Ok(receipt) => {
                        issued.fetch_add(receipt.total() as usize, Ordering::SeqCst);
                    }
                    Err(AllocationError::InsufficientStock { .. }) => {
                        rejected.fetch_add(1, Ordering::SeqCst);
                    }
                    Err(other) => panic!("unexpected error: {other}"),
                }
            }
        }));
    }

    for handle in handles {
        handle.join().expect("Thread panicked");
    }
    stop_deadlock_detector(detector);

    let store = allocator.store();
    let remaining = allocator.available(&ItemCode::from("X")).unwrap();
    assert_eq!(issued.load(Ordering::SeqCst) as u64 + remaining, 100);
    assert_eq!(journal_total(store), -(issued.load(Ordering::SeqCst) as i64));
    // 16 × 10 requests of 1..=3 EA ask for far more than 100.
    assert!(rejected.load(Ordering::SeqCst) > 0);
}

/// The fallback path keeps the journal and lot table in agreement even when
/// callers collide; collisions show up as store rejections, not negative stock.
#[test]
fn fallback_collisions_surface_as_store_errors() {
    let detector = start_deadlock_detector();
    let allocator = Arc::new(LotAllocator::new(stocked(
        MemoryStore::new().without_atomic_issuance(),
    )));

    const NUM_THREADS: usize = 16;

    let mut handles = Vec::with_capacity(NUM_THREADS);
    for _ in 0..NUM_THREADS {
        let allocator = allocator.clone();
        handles.push(thread::spawn(move || {
            for _ in 0..10 {
                let request = IssueRequest::new("X", IssueKind::Gift, 2);
                match allocator.issue(&request) {
                    Ok(_)
                    | Err(AllocationError::InsufficientStock { .. })
                    | Err(AllocationError::Store(StoreError::WouldGoNegative { .. }))
                    | Err(AllocationError::PartialFallback {
                        source: StoreError::WouldGoNegative { .. },
                        ..
                    }) => {}
                    Err(other) => panic!("unexpected error: {other}"),
                }
            }
        }));
    }

    for handle in handles {
        handle.join().expect("Thread panicked");
    }
    stop_deadlock_detector(detector);

    let store = allocator.store();
    let remaining = allocator.available(&ItemCode::from("X")).unwrap() as i64;
    assert_eq!(100 + journal_total(store), remaining);
}

/// Deterministic replay of the fallback race: a plan built from a stale read
/// commits its first draw, then hits a lot someone else already drained.
#[test]
fn stale_fallback_read_leaves_partial_issue() {
    let shared = Arc::new(MemoryStore::new().without_atomic_issuance());
    shared.register(ItemCode::from("X"), VariantId(1));
    shared.insert_lot(Lot {
        id: LotId(1),
        variant: VariantId(1),
        expiry: day(10),
        quantity: 5,
    });
    shared.insert_lot(Lot {
        id: LotId(2),
        variant: VariantId(1),
        expiry: day(20),
        quantity: 10,
    });

    // Operator B reads stock...
    let snapshot = shared.lots_for_variant(VariantId(1)).unwrap();
    let racing = LotAllocator::new(StaleReadStore {
        inner: shared.clone(),
        snapshot: Mutex::new(Some(snapshot)),
    });

    // ...operator A writes off most of L2 in between...
    let operator_a = LotAllocator::new(shared.clone());
    operator_a.discard(LotId(2), 8, Some("damaged")).unwrap();

    // ...and B commits a plan for L1 = 5, L2 = 3 against L2 = 2.
    let result = racing.issue(&IssueRequest::new("X", IssueKind::Out, 8));

    assert_eq!(
        result,
        Err(AllocationError::PartialFallback {
            committed: 1,
            source: StoreError::WouldGoNegative {
                lot: LotId(2),
                quantity: 3,
                available: 2
            },
        })
    );
    assert_eq!(shared.lot(LotId(1)).unwrap().quantity, 0);
    assert_eq!(shared.lot(LotId(2)).unwrap().quantity, 2);
    assert_eq!(shared.movements().len(), 2);
}
