// SPDX-License-Identifier: Apache-2.0

use std::collections::VecDeque;
use pretty_assertions::assert_eq;
use quickcheck_macros::quickcheck;
use siphon::Buffer;

/// Models the buffer as a plain byte queue: any sequence of puts and consumes
/// must read back the same logical stream no matter how often the cursor
/// wrapped underneath.
#[quickcheck]
fn wrap_round_trip(ops: Vec<(Vec<u8>, u8)>) {
	let mut buf = Buffer::new(32);
	let mut model = VecDeque::new();

	for (chunk, consume) in ops {
		let put = buf.put_input(&chunk);
		assert_eq!(put, chunk.len().min(32 - model.len()));
		model.extend(&chunk[..put]);

		let mut read = vec![0; model.len()];
		assert_eq!(buf.copy_input(&mut read), model.len());
		assert_eq!(read, model.iter().copied().collect::<Vec<_>>());

		let consume = consume as usize % (model.len() + 1);
		assert_eq!(buf.consume_input(consume), consume);
		model.drain(..consume);
	}
}

#[quickcheck]
fn put_truncates_without_corruption(prefill: u8, data: Vec<u8>) {
	let mut buf = Buffer::new(16);
	let prefill = prefill as usize % 17;
	assert_eq!(buf.put_input(&vec![b'x'; prefill]), prefill);

	let put = buf.put_input(&data);
	assert_eq!(put, data.len().min(16 - prefill));
	assert_eq!(buf.len(), prefill + put);
	assert!(buf.len() <= buf.capacity());

	buf.consume_input(prefill);
	let mut read = vec![0; put];
	assert_eq!(buf.copy_input(&mut read), put);
	assert_eq!(read, data[..put]);
}

#[quickcheck]
fn acked_output_space_is_reusable(data: Vec<u8>) {
	let mut buf = Buffer::new(16);
	let put = buf.put_input(&data);
	buf.flush();
	assert_eq!(buf.pending_output(), put);
	assert_eq!(buf.free_space(), 16 - put);

	assert_eq!(buf.ack_output(put), put);
	assert_eq!(buf.free_space(), 16);
	assert_eq!(buf.put_input(&[0; 16]), 16);
}

// Capacity 16, input landing at cursor 12: "HELLOWORLD" occupies 12..16 and
// wraps into 0..6, and must read back whole.
#[test]
fn wrapped_input_reads_back_whole() {
	let mut buf = Buffer::new(16);
	buf.put_input(&[0; 12]);
	buf.consume_input(12);

	assert_eq!(buf.put_input(b"HELLOWORLD"), 10);
	assert_eq!(&buf, &b"HELLOWORLD"[..]);

	let (a, b) = buf.input_slices();
	assert_eq!(a, b"HELL");
	assert_eq!(b, b"OWORLD");

	// Free space is 6..12, one unbroken span.
	assert_eq!(buf.free_space(), 6);
	assert_eq!(buf.contig_space(), 6);
}

#[test]
fn output_is_never_overwritten_across_the_wrap() {
	let mut buf = Buffer::new(8);
	buf.put_input(&[0; 6]);
	buf.consume_input(6);
	// 4 output bytes spanning the physical end: 6..8 and 0..2.
	assert_eq!(buf.put_output(b"wxyz"), 4);

	// Input may only fill the 4 bytes left; the fifth is refused.
	assert_eq!(buf.put_input(b"abcde"), 4);
	assert_eq!(buf.contig_space(), 0);
	assert_eq!(buf.put_input(b"!"), 0);

	let (a, b) = buf.output_slices();
	assert_eq!(a, b"wx");
	assert_eq!(b, b"yz");
	assert_eq!(&buf, &b"abcd"[..]);

	assert_eq!(buf.ack_output(4), 4);
	assert_eq!(buf.put_input(b"ef"), 2);
	assert_eq!(&buf, &b"abcdef"[..]);
}

// Header-rewrite style replacement on input that wraps the physical end:
// grow, shrink, and same-size rewrites all keep the logical stream intact.
#[test]
fn replace_rewrites_wrapped_input_in_place() {
	let mut buf = Buffer::new(16);
	buf.put_input(&[0; 12]);
	buf.consume_input(12);
	buf.put_input(b"HELLO WORLD");

	// "WORLD" -> "proxy!" grows the tail by one byte across the wrap.
	assert_eq!(buf.replace(6..11, b"proxy!"), Some(1));
	assert_eq!(&buf, &b"HELLO proxy!"[..]);

	assert_eq!(buf.replace(0..6, b"-"), Some(-5));
	assert_eq!(&buf, &b"-proxy!"[..]);

	assert_eq!(buf.replace(1..6, b"laden"), Some(0));
	assert_eq!(&buf, &b"-laden!"[..]);
}

#[test]
fn replace_refuses_rather_than_corrupts() {
	let mut buf = Buffer::new(8);
	buf.put_input(b"abcd");
	buf.flush();
	buf.put_input(b"in");

	// Growth beyond free space: output bytes are not room.
	assert_eq!(buf.replace(0..0, b"xxxxx"), None);
	// Range past pending input.
	assert_eq!(buf.replace(1..3, b"y"), None);
	assert_eq!(&buf, &b"in"[..]);

	// A fitting growth fills the buffer and leaves pending output untouched.
	assert_eq!(buf.replace(1..1, b"XY"), Some(2));
	assert_eq!(&buf, &b"iXYn"[..]);
	assert_eq!(buf.free_space(), 0);
	assert_eq!(buf.output_slices().0, b"abcd");
}

#[test]
fn full_buffer_reports_no_room() {
	let mut buf = Buffer::new(4);
	assert!(!buf.is_full(0));
	assert!(buf.is_full(4));
	buf.put_input(b"abc");
	assert!(!buf.is_full(0));
	assert!(buf.is_full(1));
}
