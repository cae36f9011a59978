// SPDX-License-Identifier: Apache-2.0

//! Endpoint descriptors: the non-application side of a stream connector.
//!
//! A [`Sedesc`] is the small shared record describing "the other side" of a
//! stream: its half-duplex shutdown state, end-of-input/end-of-stream markers,
//! the two-severity error state, and the activity timestamps the scheduler
//! reads for idle/stall timeout computation. The descriptor is shared between
//! the connector and the layer that created the endpoint (mux or applet), so
//! its flag word is atomic and its timestamps sit behind spinlocks.
//!
//! The concrete endpoint is the [`Endpoint`] tagged union: a multiplexed
//! connection (with or without a mux attached yet) or an in-process applet,
//! each reached through a small capability trait rather than an inheritance
//! hierarchy.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use spin::Mutex;
use crate::buffer::Buffer;
use crate::flags::bitset;
use crate::pool::WaiterId;

bitset! {
	/// Endpoint state flags. Receive and send shutdown are independent axes;
	/// each axis records the mode it was shut with.
	pub struct SeFlags {
		/// Read shut, draining extra data.
		const SHUT_RD_DRAIN = 0x0001;
		/// Read shut, resetting extra data.
		const SHUT_RD_RESET = 0x0002;
		/// Read shut status, either mode.
		const SHUT_RD = 0x0003;
		/// Write shut, notifying the peer.
		const SHUT_WR_NORMAL = 0x0004;
		/// Write shut, silent mode.
		const SHUT_WR_SILENT = 0x0008;
		/// Write shut status, either mode.
		const SHUT_WR = 0x000c;
		/// A fatal error was surfaced to the application.
		const ERROR = 0x0010;
		/// An error was detected but data received before it is still pending.
		const ERR_PENDING = 0x0020;
		/// End of stream delivered to the application layer.
		const EOS = 0x0040;
		/// End of input reached.
		const EOI = 0x0080;
		/// The endpoint may have more bytes to transfer.
		const RCV_MORE = 0x0100;
		/// More bytes to transfer, but no room for them.
		const WANT_ROOM = 0x0200;
	}
}

bitset! {
	/// I/O readiness events for mux subscriptions.
	pub struct IoEvents {
		const RECV = 0x1;
		const SEND = 0x2;
	}
}

impl IoEvents {
	pub const ALL: Self = Self::from_bits(0x3);
}

/// Read-shutdown mode.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ShutR {
	/// Drain any extra data before closing.
	Drain,
	/// Reset, discarding extra data.
	Reset,
}

/// Write-shutdown mode.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ShutW {
	/// Regular shutdown, the peer is notified.
	Normal,
	/// Imminent close, don't notify the peer.
	Silent,
}

/// Shared endpoint descriptor.
pub struct Sedesc {
	flags: AtomicU32,
	/// Last read activity. Unset until the first read.
	lra: Mutex<Option<Instant>>,
	/// First blocked send attempt. Unset while sends are flowing.
	fsb: Mutex<Option<Instant>>,
	/// Token of the owning connector; 0 when orphaned. Lookup-only, never a
	/// pointer: the descriptor must not keep its connector alive.
	owner: AtomicU64,
}

impl Sedesc {
	pub fn new() -> Self {
		Self {
			flags: AtomicU32::new(0),
			lra: Mutex::new(None),
			fsb: Mutex::new(None),
			owner: AtomicU64::new(0),
		}
	}

	pub fn flags(&self) -> SeFlags {
		SeFlags::from_bits(self.flags.load(Ordering::Acquire))
	}

	pub fn set(&self, flags: SeFlags) {
		self.flags.fetch_or(flags.bits(), Ordering::AcqRel);
	}

	pub fn clear(&self, flags: SeFlags) {
		self.flags.fetch_and(!flags.bits(), Ordering::AcqRel);
	}

	/// Any-bit test, the way flag lattices are usually queried.
	pub fn test(&self, flags: SeFlags) -> bool {
		self.flags().intersects(flags)
	}

	/// Resets the flag word to the neutral baseline, after an endpoint detach.
	pub fn reset(&self) {
		self.flags.store(0, Ordering::Release);
	}

	/// Records an error. The error is only surfaced (`ERROR`) once end of
	/// stream or end of input has already been observed; otherwise it stays
	/// pending (`ERR_PENDING`), because an error must not be reported before
	/// everything that arrived ahead of it has been delivered.
	pub fn set_error(&self) {
		if self.test(SeFlags::EOS | SeFlags::EOI) {
			self.set(SeFlags::ERROR);
		} else {
			self.set(SeFlags::ERR_PENDING);
		}
	}

	/// Records a read activity, resetting idle-timeout accounting.
	pub fn report_read_activity(&self) {
		*self.lra.lock() = Some(Instant::now());
	}

	/// Records the first blocked send attempt. Idempotent: only the first
	/// blocked attempt sets the timestamp, so stall timeouts measure from the
	/// moment progress stopped.
	pub fn report_blocked_send(&self) {
		let mut fsb = self.fsb.lock();
		if fsb.is_none() {
			*fsb = Some(Instant::now());
		}
	}

	/// Records a successful send, clearing any blocked-send timestamp and
	/// counting as read activity.
	pub fn report_send_activity(&self) {
		*self.fsb.lock() = None;
		self.report_read_activity();
	}

	pub fn last_read_activity(&self) -> Option<Instant> {
		*self.lra.lock()
	}

	pub fn first_blocked_send(&self) -> Option<Instant> {
		*self.fsb.lock()
	}

	/// Receive-side expiry for an `ioto` I/O timeout, or `None` if no read
	/// activity was ever recorded.
	pub fn read_expiry(&self, ioto: Duration) -> Option<Instant> {
		self.last_read_activity().map(|at| at + ioto)
	}

	/// Send-side expiry for an `ioto` I/O timeout, or `None` while sends are
	/// not blocked.
	pub fn send_expiry(&self, ioto: Duration) -> Option<Instant> {
		self.first_blocked_send().map(|at| at + ioto)
	}

	/// Binds the owning connector's token.
	pub fn bind_owner(&self, token: u64) {
		debug_assert!(token != 0);
		self.owner.store(token, Ordering::Release);
	}

	pub fn clear_owner(&self) {
		self.owner.store(0, Ordering::Release);
	}

	/// The owning connector's token, if any. A lookup key for whatever arena
	/// or registry the caller keeps its connectors in; liveness must be
	/// checked there, at lookup time.
	pub fn owner(&self) -> Option<u64> {
		match self.owner.load(Ordering::Acquire) {
			0 => None,
			token => Some(token),
		}
	}
}

impl Default for Sedesc {
	fn default() -> Self { Self::new() }
}

/// Operations a multiplexer supplies per connection.
pub trait MuxOps: Send {
	fn shutdown_read(&mut self, mode: ShutR);
	fn shutdown_write(&mut self, mode: ShutW);
	/// Detaches the mux-side stream bound to `sd`. The mux frees its own
	/// resources; the connector resets the descriptor afterwards.
	fn detach(&mut self, sd: &Sedesc);
	fn subscribe(&mut self, events: IoEvents, waiter: WaiterId);
	fn unsubscribe(&mut self, events: IoEvents, waiter: WaiterId);
	/// Consumes up to `count` pending-output bytes from `buf`. Truncating:
	/// returns bytes actually taken.
	fn send(&mut self, buf: &mut Buffer, count: usize) -> usize;
	/// Fills `buf`'s pending input with up to `count` bytes. Truncating:
	/// returns bytes actually delivered.
	fn recv(&mut self, buf: &mut Buffer, count: usize) -> usize;
}

/// A raw connection that no mux owns yet. Only needed for the early-detach
/// case, where the connector itself must close what it was handed.
pub trait RawConnection: Send {
	fn close(&mut self);
}

/// Operations an in-process applet supplies.
pub trait AppletOps: Send {
	/// Called once when the applet is attached. Returning `false` aborts the
	/// attach.
	fn init(&mut self, sd: &Sedesc) -> bool;
	/// Called once when the applet is detached.
	fn release(&mut self) {}
	/// Per-event-loop-iteration execution hook.
	fn run(&mut self, sd: &Sedesc);
}

/// The concrete endpoint behind a descriptor: a (possibly not-yet-muxed)
/// connection, or an applet.
pub enum Endpoint {
	Conn {
		/// The owning multiplexer, absent before mux creation.
		mux: Option<Box<dyn MuxOps>>,
		raw: Box<dyn RawConnection>,
	},
	Applet(Box<dyn AppletOps>),
}

/// Endpoint kind, for callers that only need the tag.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EndpointKind {
	Conn,
	Applet,
}

impl Endpoint {
	pub fn kind(&self) -> EndpointKind {
		match self {
			Self::Conn { .. } => EndpointKind::Conn,
			Self::Applet(_) => EndpointKind::Applet,
		}
	}

	pub fn is_conn(&self) -> bool { self.kind() == EndpointKind::Conn }

	pub fn is_applet(&self) -> bool { self.kind() == EndpointKind::Applet }
}
