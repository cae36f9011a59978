// SPDX-License-Identifier: Apache-2.0

//! Per-stream flow-control ledgers for a QUIC multiplexer.
//!
//! Each logical stream keeps two independent ledgers, receive and transmit,
//! as absolute offsets from the start of the stream. Ceilings come from the
//! peer out-of-band; this module only enforces them. A peer exceeding a
//! ceiling, or acknowledging bytes that were never sent, is a protocol
//! violation reported as a typed [`FlowError`] the mux uses to reset the
//! offending stream. It is never an internal assertion: malformed input from
//! the network must not take the process down.
//!
//! Connection-scoped aggregates live in [`QuicConnFlow`], shared by all
//! streams of one connection.

use amplify_derive::Display;
use spin::Mutex;
use tracing::trace;
use crate::buffer::Buffer;
use crate::error;
use crate::flags::bitset;

/// What the mux was doing when a flow-control error surfaced.
#[derive(Copy, Clone, Debug, Default, Display)]
pub enum Operation {
	#[default]
	#[display("unknown operation")]
	Unknown,
	#[display("receive stream data")]
	Receive,
	#[display("queue stream data")]
	Queue,
	#[display("mark stream data sent")]
	Send,
	#[display("acknowledge stream data")]
	Ack,
}

impl error::OperationKind for Operation {
	fn unknown() -> Self { Self::Unknown }
}

#[derive(Copy, Clone, Debug, Display)]
pub enum FlowErrorKind {
	/// A negotiated ceiling was exceeded.
	#[display("flow-control limit exceeded")]
	FlowViolation,
	/// An acknowledgment for bytes never sent, or out of order.
	#[display("invalid acknowledgment range")]
	BadAck,
	/// Data past, or a FIN contradicting, the stream's final size.
	#[display("final stream size violated")]
	FinalSize,
	#[display("{0}")]
	Other(&'static str),
}

impl error::ErrorKind for FlowErrorKind {
	fn other(message: &'static str) -> Self { Self::Other(message) }
}

pub type FlowError = error::Error<Operation, FlowErrorKind>;
pub type FlowResult<T> = Result<T, FlowError>;

fn violation(op: Operation, kind: FlowErrorKind) -> FlowError {
	FlowError::new(op, kind, None)
}

bitset! {
	/// Per-stream flow-control state flags.
	pub struct QsFlags {
		/// The receive side saw a FIN; the final size is known.
		const FIN_RECV = 0x1;
		/// Transmit blocked on the per-stream ceiling.
		const BLK_SFCTL = 0x2;
		/// The application queued its last byte; a FIN rides the tail of the
		/// stream and stays pending until the peer acknowledges it.
		const FIN_STREAM = 0x4;
		/// Transmit blocked on mux buffer room, not on flow control.
		const BLK_MROOM = 0x8;
	}
}

struct ConnInner {
	rx_bytes: u64,
	rx_max_data: u64,
	tx_offset: u64,
	tx_max_data: u64,
	/// Some stream wanted to send and the connection window stopped it.
	blocked: bool,
}

/// Connection-scoped flow-control aggregates, shared by every stream of the
/// connection.
pub struct QuicConnFlow {
	inner: Mutex<ConnInner>,
}

impl QuicConnFlow {
	pub fn new(rx_max_data: u64, tx_max_data: u64) -> Self {
		Self {
			inner: Mutex::new(ConnInner {
				rx_bytes: 0,
				rx_max_data,
				tx_offset: 0,
				tx_max_data,
				blocked: false,
			}),
		}
	}

	/// Bytes the peer may still send us, connection-wide.
	pub fn rx_window(&self) -> u64 {
		let inner = self.inner.lock();
		inner.rx_max_data - inner.rx_bytes
	}

	/// Bytes we may still queue for transmission, connection-wide.
	pub fn tx_window(&self) -> u64 {
		let inner = self.inner.lock();
		inner.tx_max_data - inner.tx_offset
	}

	/// Whether a stream was stopped by the connection window since the last
	/// ceiling raise. The mux reads this to decide whether to emit a
	/// DATA_BLOCKED notice.
	pub fn is_blocked(&self) -> bool {
		self.inner.lock().blocked
	}

	/// Extends the connection-wide receive ceiling by `add` bytes, after the
	/// application consumed that much.
	pub fn grant_rx(&self, add: u64) {
		self.inner.lock().rx_max_data += add;
	}

	/// Applies a MAX_DATA update. Returns `true` if the ceiling rose, in which
	/// case blocked streams must be re-evaluated.
	pub fn raise_tx_max(&self, max_data: u64) -> bool {
		let mut inner = self.inner.lock();
		if max_data > inner.tx_max_data {
			inner.tx_max_data = max_data;
			inner.blocked = false;
			true
		} else {
			false
		}
	}

	fn account_rx(&self, new_bytes: u64) -> FlowResult<()> {
		let mut inner = self.inner.lock();
		match inner.rx_bytes.checked_add(new_bytes) {
			Some(total) if total <= inner.rx_max_data => {
				inner.rx_bytes = total;
				Ok(())
			}
			_ => Err(violation(Operation::Receive, FlowErrorKind::FlowViolation)),
		}
	}

	/// Reserves up to `want` bytes of the connection window. The shortfall
	/// marks the connection blocked.
	fn reserve_tx(&self, want: u64) -> u64 {
		let mut inner = self.inner.lock();
		let take = want.min(inner.tx_max_data - inner.tx_offset);
		inner.tx_offset += take;
		if take < want {
			inner.blocked = true;
		}
		take
	}
}

struct RxLedger {
	/// Highest contiguous byte received.
	offset: u64,
	/// Per-stream receive ceiling.
	max_offset: u64,
	/// Final size, once a FIN fixed it.
	final_size: Option<u64>,
}

struct TxLedger {
	/// Bytes accepted from the application.
	offset: u64,
	/// Bytes handed to the transport. Never exceeds `offset`.
	sent_offset: u64,
	/// Bytes acknowledged by the peer. Never exceeds `sent_offset`.
	ack_offset: u64,
	/// Per-stream transmit ceiling (MAX_STREAM_DATA).
	msd: u64,
}

/// Flow-control record of one logical stream.
pub struct QuicStream {
	id: u64,
	flags: QsFlags,
	rx: RxLedger,
	tx: TxLedger,
}

impl QuicStream {
	pub fn new(id: u64, rx_max_offset: u64, msd: u64) -> Self {
		Self {
			id,
			flags: QsFlags::NONE,
			rx: RxLedger {
				offset: 0,
				max_offset: rx_max_offset,
				final_size: None,
			},
			tx: TxLedger {
				offset: 0,
				sent_offset: 0,
				ack_offset: 0,
				msd,
			},
		}
	}

	pub fn id(&self) -> u64 { self.id }

	pub fn flags(&self) -> QsFlags { self.flags }

	pub fn rx_offset(&self) -> u64 { self.rx.offset }

	pub fn tx_offset(&self) -> u64 { self.tx.offset }

	pub fn sent_offset(&self) -> u64 { self.tx.sent_offset }

	pub fn ack_offset(&self) -> u64 { self.tx.ack_offset }

	/// Whether the receive side is complete: FIN seen and every byte up to
	/// the final size received.
	pub fn rx_closed(&self) -> bool {
		self.rx.final_size == Some(self.rx.offset)
	}

	/// Accounts an incoming data range `[offset, offset + len)`, `fin` marking
	/// the last frame of the stream. Re-delivered prefixes are tolerated and
	/// count for nothing. Returns the number of bytes the stream advanced by.
	///
	/// Rejected as protocol violations: data past the stream or connection
	/// receive ceiling, data past an established final size, and a FIN that
	/// contradicts one.
	pub fn recv(&mut self, conn: &QuicConnFlow, offset: u64, len: u64, fin: bool) -> FlowResult<u64> {
		// The offsets are peer-controlled; a wrapping sum must be rejected,
		// not asserted, and must never slip under the ceiling check.
		let Some(end) = offset.checked_add(len) else {
			return Err(violation(Operation::Receive, FlowErrorKind::FlowViolation));
		};

		if let Some(final_size) = self.rx.final_size {
			if end > final_size || (fin && end != final_size) {
				return Err(violation(Operation::Receive, FlowErrorKind::FinalSize));
			}
		}
		if fin && end < self.rx.offset {
			// FIN behind data already received.
			return Err(violation(Operation::Receive, FlowErrorKind::FinalSize));
		}
		if end > self.rx.max_offset {
			return Err(violation(Operation::Receive, FlowErrorKind::FlowViolation));
		}

		let new_bytes = end.saturating_sub(self.rx.offset);
		conn.account_rx(new_bytes)?;

		self.rx.offset += new_bytes;
		if fin {
			self.rx.final_size = Some(end);
			self.flags.insert(QsFlags::FIN_RECV);
		}
		trace!(stream = self.id, offset, len, fin, new_bytes, "stream data received");
		Ok(new_bytes)
	}

	/// Extends this stream's receive ceiling by `add` bytes, after the
	/// application consumed that much. The mux pairs this with
	/// [`QuicConnFlow::grant_rx`] and emits the MAX_STREAM_DATA update.
	pub fn grant_rx(&mut self, add: u64) {
		self.rx.max_offset += add;
	}

	/// Bytes the application may queue right now, the tighter of the stream
	/// and connection transmit windows.
	pub fn send_window(&self, conn: &QuicConnFlow) -> u64 {
		(self.tx.msd - self.tx.offset).min(conn.tx_window())
	}

	/// Queues up to `len` bytes for transmission, truncating to the send
	/// window. A shortfall caused by the stream ceiling sets
	/// [`QsFlags::BLK_SFCTL`]; one caused by the connection window marks the
	/// connection blocked. Returns bytes actually queued.
	pub fn queue(&mut self, conn: &QuicConnFlow, len: u64) -> u64 {
		let stream_window = self.tx.msd - self.tx.offset;
		let want = len.min(stream_window);
		let take = conn.reserve_tx(want);
		self.tx.offset += take;

		if take < len && stream_window < len {
			self.flags.insert(QsFlags::BLK_SFCTL);
		}
		if take < len {
			trace!(
				stream = self.id,
				want = len,
				took = take,
				"transmit blocked on flow control",
			);
		}
		take
	}

	/// Marks `len` queued bytes as handed to the transport. Rejects an
	/// advance past what was queued.
	pub fn sent(&mut self, len: u64) -> FlowResult<()> {
		let end = self.tx.sent_offset.checked_add(len);
		match end {
			Some(end) if end <= self.tx.offset => {
				self.tx.sent_offset = end;
				Ok(())
			}
			_ => Err(violation(Operation::Send, FlowErrorKind::FlowViolation)),
		}
	}

	/// Marks the transmit side finished: the application queued its last
	/// byte and a FIN rides the tail of the stream.
	pub fn close_tx(&mut self) {
		self.flags.insert(QsFlags::FIN_STREAM);
	}

	/// Whether the transmit side is complete: FIN queued, every byte sent
	/// and acknowledged.
	pub fn tx_closed(&self) -> bool {
		self.flags.intersects(QsFlags::FIN_STREAM) && self.tx.ack_offset == self.tx.offset
	}

	/// The mux had no buffer room for this stream's data; it stays parked
	/// until [`mux_room_available`](Self::mux_room_available).
	pub fn block_mux_room(&mut self) {
		self.flags.insert(QsFlags::BLK_MROOM);
	}

	/// Room was made in the mux buffers. Returns `true` if the stream was
	/// parked on room and must be re-evaluated.
	pub fn mux_room_available(&mut self) -> bool {
		let parked = self.flags.intersects(QsFlags::BLK_MROOM);
		self.flags.remove(QsFlags::BLK_MROOM);
		parked
	}

	/// Accounts a peer acknowledgment of `[offset, offset + len)`, `fin`
	/// covering the final frame. Returns newly acknowledged bytes.
	///
	/// Rejected as protocol violations: ranges past `sent_offset`, and ranges
	/// starting beyond the contiguous acknowledged prefix (a gap the peer
	/// cannot legitimately produce for in-order stream frames).
	pub fn ack(&mut self, offset: u64, len: u64, fin: bool) -> FlowResult<u64> {
		let Some(end) = offset.checked_add(len) else {
			return Err(violation(Operation::Ack, FlowErrorKind::BadAck));
		};
		if end > self.tx.sent_offset {
			return Err(violation(Operation::Ack, FlowErrorKind::BadAck));
		}
		if offset > self.tx.ack_offset {
			return Err(violation(Operation::Ack, FlowErrorKind::BadAck));
		}
		if fin && (!self.flags.intersects(QsFlags::FIN_STREAM) || end != self.tx.offset) {
			// A FIN ack for a stream that never finished, or short of its end.
			return Err(violation(Operation::Ack, FlowErrorKind::BadAck));
		}

		let new_bytes = end.saturating_sub(self.tx.ack_offset);
		self.tx.ack_offset += new_bytes;
		Ok(new_bytes)
	}

	/// Applies a MAX_STREAM_DATA update. Returns `true` if the ceiling rose;
	/// the stream-blocked flag clears and the stream must be re-evaluated.
	pub fn max_stream_data(&mut self, msd: u64) -> bool {
		if msd > self.tx.msd {
			self.tx.msd = msd;
			self.flags.remove(QsFlags::BLK_SFCTL);
			true
		} else {
			false
		}
	}
}

/// Callbacks an application protocol (e.g. an HTTP/3 layer) registers with
/// the QUIC mux.
pub trait QuicAppOps: Send {
	/// A peer-initiated stream was opened.
	fn stream_open(&mut self, id: u64);
	/// Decodes application frames from `buf`'s pending input, `fin` marking
	/// the end of the stream. Truncating: returns bytes actually consumed.
	fn decode(&mut self, id: u64, buf: &mut Buffer, fin: bool) -> usize;
	/// Consumes up to `count` pending-output bytes from `buf` for
	/// transmission. Truncating: returns bytes actually taken.
	fn snd_buf(&mut self, id: u64, buf: &mut Buffer, count: usize) -> usize;
}
