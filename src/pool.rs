// SPDX-License-Identifier: Apache-2.0

//! Bounded buffer pool with margin-guaranteed acquisition and a wakeup wait
//! queue.
//!
//! The pool recycles fixed-size [`Buffer`]s: `allocated` only grows (up to the
//! configured ceiling) and released buffers go back on the free list rather
//! than to the allocator. Acquisition is margin-aware: the fast path only pops
//! the free list when enough free buffers remain afterwards, and the slow path
//! grows the pool to restore that margin first. This is what prevents the
//! classic two-buffer deadlock, where a burst of sessions each taking one
//! buffer leaves a session that structurally needs two unable to ever finish.
//!
//! Nothing here blocks a thread. A caller that cannot get a buffer receives
//! the [`BufferSlot::Wanted`] marker, parks a wakeup callback with
//! [`BufPool::subscribe`], and returns control; releasing a buffer offers it
//! to the first eligible waiter in FIFO order. The free list and the wait
//! queue are each guarded by their own short-held spinlock, and no lock is
//! held across a waiter callback.

use std::collections::VecDeque;
use std::fmt;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use once_cell::sync::Lazy;
use spin::{Mutex, RwLock};
use tracing::trace;
use crate::DEFAULT_BUF_SIZE;
use crate::buffer::{Buffer, BufferSlot};

/// Pool sizing, supplied by the process at start-up.
#[derive(Copy, Clone, Debug)]
pub struct PoolConfig {
	/// Capacity of every buffer handed out by the pool.
	pub buffer_size: usize,
	/// Ceiling on the total number of buffers the pool may ever allocate.
	pub limit: usize,
}

impl Default for PoolConfig {
	fn default() -> Self {
		Self {
			buffer_size: DEFAULT_BUF_SIZE,
			limit: 1024,
		}
	}
}

/// Identity of a wait-queue entry. Used both to cancel a pending wait and as
/// the self-skip key in [`BufPool::offer`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct WaiterId(u64);

impl WaiterId {
	/// Mints a process-unique identity.
	pub fn fresh() -> Self {
		static NEXT: AtomicU64 = AtomicU64::new(1);
		Self(NEXT.fetch_add(1, Ordering::Relaxed))
	}
}

/// Wakeup callback of a parked waiter. Returns `true` if the waiter made
/// progress (claimed a buffer), `false` to let the offer move on.
pub type WakeFn = Box<dyn FnMut() -> bool + Send>;

struct Waiter {
	id: WaiterId,
	wake: WakeFn,
}

struct Inner {
	allocated: usize,
	used: usize,
	free: Vec<Buffer>,
}

impl Inner {
	fn avail(&self) -> usize {
		debug_assert!(self.free.len() == self.allocated - self.used);
		self.allocated - self.used
	}
}

/// A bounded pool of fixed-size buffers with a FIFO of waiters.
///
/// Pools are plain values wrapped in `Arc` by their owner; independent pools
/// can coexist (tests rely on this). The process-wide default lives behind
/// [`init`]/[`get`]/[`teardown`].
pub struct BufPool {
	buffer_size: usize,
	limit: usize,
	inner: Mutex<Inner>,
	waiters: Mutex<VecDeque<Waiter>>,
}

impl BufPool {
	pub fn new(config: PoolConfig) -> Self {
		Self {
			buffer_size: config.buffer_size,
			limit: config.limit,
			inner: Mutex::new(Inner {
				allocated: 0,
				used: 0,
				free: Vec::new(),
			}),
			waiters: Mutex::new(VecDeque::new()),
		}
	}

	pub fn buffer_size(&self) -> usize { self.buffer_size }

	pub fn limit(&self) -> usize { self.limit }

	/// Current `(allocated, used)` counters.
	pub fn counters(&self) -> (usize, usize) {
		let inner = self.inner.lock();
		(inner.allocated, inner.used)
	}

	/// Fills `slot` with a ready buffer, guaranteeing that at least `margin`
	/// free buffers remain available for concurrent acquirers where possible.
	///
	/// Fast path: pop the free list if enough buffers stay behind. Slow path:
	/// grow the pool (bounded by the ceiling) until the margin holds again,
	/// then pop. If neither works, `slot` becomes [`BufferSlot::Wanted`] and
	/// `false` is returned; the caller must subscribe a waiter and retry once
	/// a buffer is released. A slot already holding a buffer is left alone.
	///
	/// The margin check and the pop share one critical section, so the
	/// guarantee holds under concurrent acquirers.
	pub fn acquire(&self, slot: &mut BufferSlot, margin: usize) -> bool {
		if slot.is_ready() {
			return true;
		}

		let mut inner = self.inner.lock();

		// Fast path: satisfying this allocation must not eat into the margin
		// that was available before the call.
		if inner.avail() >= margin.max(1) {
			let buf = inner.free.pop().expect("free list tracks avail");
			inner.used += 1;
			*slot = BufferSlot::Ready(buf);
			return true;
		}

		// Slow path: restore the margin by growing, then allocate.
		while inner.allocated < self.limit && inner.avail() <= margin {
			let buf = Buffer::new(self.buffer_size);
			inner.free.push(buf);
			inner.allocated += 1;
		}
		if inner.avail() > margin {
			let buf = inner.free.pop().expect("just grown");
			inner.used += 1;
			trace!(allocated = inner.allocated, used = inner.used, "pool grown");
			*slot = BufferSlot::Ready(buf);
			return true;
		}

		trace!(allocated = inner.allocated, used = inner.used, margin, "pool exhausted");
		*slot = BufferSlot::Wanted;
		false
	}

	/// Returns `buf` to the free list and offers it to waiters. `from` is the
	/// releasing identity, skipped during the offer so a participant releasing
	/// one buffer while waiting for another never wakes itself.
	pub fn release(&self, buf: Buffer, from: Option<WaiterId>) {
		if buf.is_null() {
			return;
		}
		debug_assert!(buf.capacity() == self.buffer_size);

		{
			let mut inner = self.inner.lock();
			debug_assert!(inner.used > 0);
			inner.used -= 1;
			let mut buf = buf;
			buf.reset();
			inner.free.push(buf);
		}
		self.offer(from, 1);
	}

	/// Walks the wait queue in FIFO order and wakes the first eligible waiter,
	/// provided at least `threshold` buffers are available. Entries whose
	/// identity equals `from` are skipped but left queued. The woken entry is
	/// removed before its callback runs, and the callback runs with no pool
	/// lock held, so it may re-enter [`acquire`](Self::acquire) or even
	/// `offer` itself. Stops after the first callback reporting progress; a
	/// callback returning `false` forfeits its slot (it can resubscribe).
	pub fn offer(&self, from: Option<WaiterId>, threshold: usize) {
		loop {
			let waiter = {
				let mut waiters = self.waiters.lock();
				if waiters.is_empty() || self.inner.lock().avail() < threshold {
					return;
				}
				let Some(at) = waiters.iter().position(|w| Some(w.id) != from) else {
					return;
				};
				waiters.remove(at).expect("position is in range")
			};

			let mut waiter = waiter;
			trace!(waiter = waiter.id.0, "offering buffer");
			if (waiter.wake)() {
				return;
			}
		}
	}

	/// Parks a wakeup callback at the tail of the wait queue.
	pub fn subscribe(&self, id: WaiterId, wake: WakeFn) {
		let mut waiters = self.waiters.lock();
		debug_assert!(
			waiters.iter().all(|w| w.id != id),
			"waiter subscribed twice"
		);
		waiters.push_back(Waiter { id, wake });
	}

	/// Cancels a pending wait. Safe to call from any context holding no pool
	/// lock; queue entries carry nothing that outlives them. Returns `true`
	/// if an entry was removed.
	pub fn unsubscribe(&self, id: WaiterId) -> bool {
		let mut waiters = self.waiters.lock();
		match waiters.iter().position(|w| w.id == id) {
			Some(at) => {
				waiters.remove(at);
				true
			}
			None => false,
		}
	}

	/// Returns `true` if no waiter is parked.
	pub fn no_waiters(&self) -> bool {
		self.waiters.lock().is_empty()
	}
}

impl Debug for BufPool {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		let (allocated, used) = self.counters();
		f.debug_struct("BufPool")
			.field("buffer_size", &self.buffer_size)
			.field("limit", &self.limit)
			.field("allocated", &allocated)
			.field("used", &used)
			.finish_non_exhaustive()
	}
}

static INSTALLED: RwLock<Option<Arc<BufPool>>> = RwLock::new(None);
static FALLBACK: Lazy<Arc<BufPool>> = Lazy::new(|| Arc::new(BufPool::new(PoolConfig::default())));

/// Installs the process-wide pool. Called once at process start; calling it
/// again replaces the pool, which only tests should do.
pub fn init(config: PoolConfig) -> Arc<BufPool> {
	let pool = Arc::new(BufPool::new(config));
	*INSTALLED.write() = Some(Arc::clone(&pool));
	pool
}

/// The process-wide pool, or a default-configured fallback if [`init`] was
/// never called.
pub fn get() -> Arc<BufPool> {
	if let Some(pool) = INSTALLED.read().as_ref() {
		return Arc::clone(pool);
	}
	Arc::clone(&FALLBACK)
}

/// Drops the installed process-wide pool at process exit. Outstanding buffers
/// keep the pool alive through their owners' `Arc`s until they are released.
pub fn teardown() {
	*INSTALLED.write() = None;
}
