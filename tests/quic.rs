// SPDX-License-Identifier: Apache-2.0

use pretty_assertions::assert_eq;
use quickcheck_macros::quickcheck;
use siphon::{QuicConnFlow, QuicStream};
use siphon::buffer::Buffer;
use siphon::quic::{FlowErrorKind, QsFlags, QuicAppOps};

// tx_sent_offset never decreases and never passes tx_offset, whatever the
// interleaving of queue and sent calls.
#[quickcheck]
fn sent_offset_is_monotone_and_bounded(ops: Vec<(bool, u8)>) {
	let conn = QuicConnFlow::new(u64::MAX, u64::MAX);
	let mut qs = QuicStream::new(0, u64::MAX, u64::MAX);
	let mut last_sent = 0;

	for (is_queue, amount) in ops {
		let amount = amount as u64;
		if is_queue {
			qs.queue(&conn, amount);
		} else if qs.sent(amount).is_ok() {
			assert!(qs.sent_offset() >= last_sent);
			last_sent = qs.sent_offset();
		}
		assert!(qs.sent_offset() <= qs.tx_offset());
	}
}

#[quickcheck]
fn rx_offset_never_passes_the_ceiling(ranges: Vec<(u8, u8)>) {
	let conn = QuicConnFlow::new(1 << 20, 1 << 20);
	let mut qs = QuicStream::new(0, 200, 1 << 20);

	for (offset, len) in ranges {
		let _ = qs.recv(&conn, offset as u64, len as u64, false);
		assert!(qs.rx_offset() <= 200);
	}
}

// The consume-then-grant cycle: the application drains bytes, the mux raises
// both ceilings by the drained amount, and reception resumes.
#[test]
fn receive_resumes_after_a_grant() {
	let conn = QuicConnFlow::new(16, 1 << 20);
	let mut qs = QuicStream::new(0, 16, 1 << 20);

	assert_eq!(qs.recv(&conn, 0, 16, false).unwrap(), 16);
	let err = qs.recv(&conn, 16, 1, false).unwrap_err();
	assert!(matches!(err.kind(), FlowErrorKind::FlowViolation));

	qs.grant_rx(16);
	conn.grant_rx(16);
	assert_eq!(qs.recv(&conn, 16, 16, false).unwrap(), 16);
	assert_eq!(qs.rx_offset(), 32);
}

// The stream ceiling rejects before the connection aggregate is charged, so a
// violating stream never eats the other streams' window.
#[test]
fn stream_violation_leaves_the_connection_intact() {
	let conn = QuicConnFlow::new(100, 1 << 20);
	let mut a = QuicStream::new(0, 10, 1 << 20);
	let mut b = QuicStream::new(4, 100, 1 << 20);

	assert!(a.recv(&conn, 0, 50, false).is_err());
	assert_eq!(conn.rx_window(), 100);
	assert_eq!(b.recv(&conn, 0, 100, false).unwrap(), 100);
}

#[test]
fn send_pipeline_queues_sends_and_acks() {
	let conn = QuicConnFlow::new(1 << 20, 1 << 20);
	let mut qs = QuicStream::new(0, 1 << 20, 40);

	assert_eq!(qs.send_window(&conn), 40);
	assert_eq!(qs.queue(&conn, 40), 40);
	assert_eq!(qs.send_window(&conn), 0);
	qs.close_tx();

	qs.sent(25).unwrap();
	assert_eq!(qs.ack(0, 25, false).unwrap(), 25);
	assert!(!qs.tx_closed());
	qs.sent(15).unwrap();
	// A FIN ack short of the stream's end is invalid.
	assert!(qs.ack(25, 10, true).is_err());
	assert_eq!(qs.ack(25, 15, true).unwrap(), 15);
	assert_eq!(qs.ack_offset(), 40);
	assert!(qs.tx_closed());

	// Acking does not widen the stream window; only MAX_STREAM_DATA does.
	assert_eq!(qs.send_window(&conn), 0);
	assert!(qs.max_stream_data(60));
	assert_eq!(qs.send_window(&conn), 20);
}

#[test]
fn blocked_flag_follows_the_binding_ceiling() {
	let conn = QuicConnFlow::new(1 << 20, 50);
	let mut qs = QuicStream::new(0, 1 << 20, 30);

	// Stream ceiling binds first.
	assert_eq!(qs.queue(&conn, 40), 30);
	assert!(qs.flags().intersects(QsFlags::BLK_SFCTL));
	assert!(!conn.is_blocked());

	// With the stream ceiling raised, the connection window binds.
	assert!(qs.max_stream_data(100));
	assert_eq!(qs.queue(&conn, 40), 20);
	assert!(conn.is_blocked());

	// A stale MAX_DATA changes nothing; a raising one unblocks.
	assert!(!conn.raise_tx_max(50));
	assert!(conn.is_blocked());
	assert!(conn.raise_tx_max(80));
	assert!(!conn.is_blocked());
	assert_eq!(qs.queue(&conn, 30), 30);
}

// Ranges whose end wraps past u64::MAX are malformed frames: they must come
// back as protocol errors with nothing accounted, never slip under a ceiling
// check via the wrapped sum.
#[test]
fn overflowing_offsets_are_protocol_errors() {
	let conn = QuicConnFlow::new(1 << 20, 1 << 20);
	let mut qs = QuicStream::new(0, 1 << 20, 1 << 20);

	let err = qs.recv(&conn, u64::MAX - 1, 2, false).unwrap_err();
	assert!(matches!(err.kind(), FlowErrorKind::FlowViolation));
	assert_eq!(qs.rx_offset(), 0);
	assert_eq!(conn.rx_window(), 1 << 20);

	assert_eq!(qs.queue(&conn, 10), 10);
	qs.sent(5).unwrap();
	assert!(qs.sent(u64::MAX - 2).is_err());
	assert_eq!(qs.sent_offset(), 5);

	let err = qs.ack(u64::MAX - 1, 2, false).unwrap_err();
	assert!(matches!(err.kind(), FlowErrorKind::BadAck));
	assert_eq!(qs.ack_offset(), 0);
}

#[test]
fn mux_room_parking_is_orthogonal_to_flow_control() {
	let conn = QuicConnFlow::new(1 << 20, 1 << 20);
	let mut qs = QuicStream::new(0, 1 << 20, 1 << 20);

	qs.block_mux_room();
	assert!(qs.flags().intersects(QsFlags::BLK_MROOM));
	// Flow-control windows are untouched by room parking.
	assert_eq!(qs.send_window(&conn), 1 << 20);

	assert!(qs.mux_room_available());
	assert!(!qs.mux_room_available());
	assert!(!qs.flags().intersects(QsFlags::BLK_MROOM));
}

struct Collector {
	opened: Vec<u64>,
	received: Vec<u8>,
	fin: bool,
}

impl QuicAppOps for Collector {
	fn stream_open(&mut self, id: u64) {
		self.opened.push(id);
	}

	fn decode(&mut self, _id: u64, buf: &mut Buffer, fin: bool) -> usize {
		let mut chunk = vec![0; buf.pending_input()];
		let n = buf.copy_input(&mut chunk);
		self.received.extend_from_slice(&chunk[..n]);
		self.fin = fin;
		buf.consume_input(n)
	}

	fn snd_buf(&mut self, _id: u64, buf: &mut Buffer, count: usize) -> usize {
		buf.ack_output(count)
	}
}

// The app-ops contract as a mux drives it: flow accounting first, then the
// decode callback consumes the delivered bytes from the buffer.
#[test]
fn app_ops_decode_consumes_accounted_bytes() {
	let conn = QuicConnFlow::new(1 << 20, 1 << 20);
	let mut qs = QuicStream::new(8, 1 << 20, 1 << 20);
	let mut app = Collector { opened: Vec::new(), received: Vec::new(), fin: false };

	app.stream_open(qs.id());

	let mut buf = Buffer::new(16);
	let payload = b"payload";
	assert_eq!(qs.recv(&conn, 0, payload.len() as u64, true).unwrap(), 7);
	assert_eq!(buf.put_input(payload), 7);
	assert_eq!(app.decode(qs.id(), &mut buf, qs.rx_closed()), 7);

	assert_eq!(app.opened, [8]);
	assert_eq!(app.received, payload);
	assert!(app.fin);
	assert!(buf.is_empty());
}
