// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use pretty_assertions::assert_eq;
use siphon::{BufPool, PoolConfig, WaiterId};
use siphon::buffer::BufferSlot;

fn pool(limit: usize) -> Arc<BufPool> {
	Arc::new(BufPool::new(PoolConfig { buffer_size: 64, limit }))
}

// Ceiling 4, margin 1: four consumers get their buffer, the fifth gets the
// wanted marker instead of blocking.
#[test]
fn margin_one_fills_the_ceiling_then_parks() {
	let pool = pool(4);
	let mut slots: Vec<BufferSlot> = (0..5).map(|_| BufferSlot::Null).collect();

	for slot in &mut slots[..4] {
		assert!(pool.acquire(slot, 1));
		assert!(slot.is_ready());
	}
	assert_eq!(pool.counters(), (4, 4));

	assert!(!pool.acquire(&mut slots[4], 1));
	assert!(slots[4].is_wanted());
	assert_eq!(pool.counters(), (4, 4));
}

#[test]
fn growth_is_bounded_under_contention() {
	let pool = pool(8);
	let mut handles = Vec::new();

	for _ in 0..4 {
		let pool = Arc::clone(&pool);
		handles.push(thread::spawn(move || {
			for _ in 0..200 {
				let mut slot = BufferSlot::Null;
				if pool.acquire(&mut slot, 2) {
					let buf = slot.take().unwrap();
					pool.release(buf, None);
				}
			}
		}));
	}
	for handle in handles {
		handle.join().unwrap();
	}

	let (allocated, used) = pool.counters();
	assert!(allocated <= 8);
	assert_eq!(used, 0);
}

#[test]
fn release_never_wakes_the_releaser() {
	let pool = pool(1);
	let mut slot = BufferSlot::Null;
	assert!(pool.acquire(&mut slot, 0));

	let me = WaiterId::fresh();
	let woken = Arc::new(AtomicBool::new(false));
	let flag = Arc::clone(&woken);
	pool.subscribe(me, Box::new(move || {
		flag.store(true, Ordering::SeqCst);
		true
	}));

	// Releasing under our own identity must skip us but leave us queued.
	pool.release(slot.take().unwrap(), Some(me));
	assert!(!woken.load(Ordering::SeqCst));
	assert!(!pool.no_waiters());

	// An offer from anyone else reaches us.
	pool.offer(None, 1);
	assert!(woken.load(Ordering::SeqCst));
	assert!(pool.no_waiters());
}

// A parked waiter claims the released buffer from inside its callback, which
// re-enters acquire; no lock is held across the callback so this must not
// deadlock.
#[test]
fn woken_waiter_claims_from_its_callback() {
	let pool = pool(1);
	let mut slot = BufferSlot::Null;
	assert!(pool.acquire(&mut slot, 0));

	let parked = Arc::new(Mutex::new(BufferSlot::Null));
	{
		let mut parked = parked.lock().unwrap();
		assert!(!pool.acquire(&mut parked, 0));
		assert!(parked.is_wanted());
	}

	let claim_pool = Arc::clone(&pool);
	let claim_slot = Arc::clone(&parked);
	pool.subscribe(WaiterId::fresh(), Box::new(move || {
		claim_pool.acquire(&mut claim_slot.lock().unwrap(), 0)
	}));

	pool.release(slot.take().unwrap(), None);
	assert!(parked.lock().unwrap().is_ready());
	assert!(pool.no_waiters());
	assert_eq!(pool.counters(), (1, 1));
}

// A callback declining the offer forfeits its slot and the offer moves on in
// FIFO order.
#[test]
fn declined_offers_move_down_the_queue() {
	let pool = pool(1);
	let mut slot = BufferSlot::Null;
	assert!(pool.acquire(&mut slot, 0));

	let order = Arc::new(Mutex::new(Vec::new()));
	for (name, claims) in [("first", false), ("second", true), ("third", true)] {
		let order = Arc::clone(&order);
		pool.subscribe(WaiterId::fresh(), Box::new(move || {
			order.lock().unwrap().push(name);
			claims
		}));
	}

	pool.release(slot.take().unwrap(), None);
	assert_eq!(*order.lock().unwrap(), ["first", "second"]);
	// The third waiter stays parked for the next release.
	assert!(!pool.no_waiters());
}

#[test]
fn cancelled_waiters_are_never_woken() {
	let pool = pool(1);
	let mut slot = BufferSlot::Null;
	assert!(pool.acquire(&mut slot, 0));

	let wakes = Arc::new(AtomicUsize::new(0));
	let id = WaiterId::fresh();
	let count = Arc::clone(&wakes);
	pool.subscribe(id, Box::new(move || {
		count.fetch_add(1, Ordering::SeqCst);
		true
	}));

	assert!(pool.unsubscribe(id));
	pool.release(slot.take().unwrap(), None);
	assert_eq!(wakes.load(Ordering::SeqCst), 0);
}

#[test]
fn null_release_is_a_no_op() {
	let pool = pool(2);
	pool.release(siphon::Buffer::null(), None);
	assert_eq!(pool.counters(), (0, 0));
}
