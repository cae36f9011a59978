// SPDX-License-Identifier: Apache-2.0

//! Fixed-capacity wrap-around byte buffers.
//!
//! A [`Buffer`] holds a single region of `capacity` bytes addressed through a
//! read cursor. Bytes *before* the cursor are pending output (accepted for
//! transmission, not yet delivered); bytes *from* the cursor on are pending
//! input (received, not yet consumed). Both regions wrap transparently at the
//! physical end of the region. Pending output is never overwritten: it only
//! becomes free space again through [`Buffer::ack_output`].
//!
//! A buffer with capacity zero is the *null sentinel*: it is never writable
//! and every operation on it is a no-op reporting zero progress. The
//! [`BufferSlot`] tri-state distinguishes "no buffer" from "asked the pool and
//! waiting" so that allocation failure stays a retry signal, not an error.

use std::cmp::{Ordering, min};
use std::fmt;
use std::fmt::{Debug, Formatter};
use std::ops::Range;
use all_asserts::assert_le;

/// Outcome of matching a needle against the logical pending-input stream.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PrefixMatch {
	/// Not enough pending input to decide yet.
	Insufficient,
	/// A non-matching byte was found.
	Mismatch,
	/// The needle matched; carries its length in bytes.
	Matched(usize),
}

/// A fixed-capacity byte buffer with wrap-around addressing and separate
/// pending-input / pending-output accounting.
///
/// Ownership is exclusive: buffers move by value between the pool and the
/// component currently filling or draining them, and are never duplicated.
pub struct Buffer {
	data: Box<[u8]>,
	/// Read cursor; start of pending input, end of pending output.
	head: usize,
	/// Pending-input byte count.
	input: usize,
	/// Pending-output byte count.
	output: usize,
}

impl Buffer {
	/// Creates a zero-filled buffer of `capacity` bytes.
	pub fn new(capacity: usize) -> Self {
		Self {
			data: vec![0; capacity].into_boxed_slice(),
			head: 0,
			input: 0,
			output: 0,
		}
	}

	/// Returns the capacity-0 null sentinel. Allocates nothing.
	pub fn null() -> Self {
		Self {
			data: Box::default(),
			head: 0,
			input: 0,
			output: 0,
		}
	}

	/// Returns `true` for the capacity-0 null sentinel.
	pub fn is_null(&self) -> bool { self.data.is_empty() }

	pub fn capacity(&self) -> usize { self.data.len() }

	/// Pending input plus pending output.
	pub fn len(&self) -> usize { self.input + self.output }

	pub fn is_empty(&self) -> bool { self.len() == 0 }

	/// Bytes received but not yet consumed by the next processing stage.
	pub fn pending_input(&self) -> usize { self.input }

	/// Bytes accepted for transmission but not yet delivered.
	pub fn pending_output(&self) -> usize { self.output }

	/// Total free space, wrapped or not.
	pub fn free_space(&self) -> usize { self.capacity() - self.len() }

	/// Returns `true` if the input side is considered full: pending input plus
	/// `reserve` reach the capacity. Pending output does not count as free
	/// space here (those bytes are already spoken for), and the null sentinel
	/// is never full so that callers go allocate a real buffer instead.
	pub fn is_full(&self, reserve: usize) -> bool {
		if self.is_null() {
			return false;
		}
		self.input + reserve >= self.capacity()
	}

	/// Resolves a signed offset relative to the read cursor into an absolute
	/// index, wrapping at both ends. The offset magnitude must not exceed the
	/// capacity.
	pub fn rel_index(&self, ofs: isize) -> usize {
		let cap = self.capacity() as isize;
		debug_assert!(ofs.unsigned_abs() <= self.capacity(), "offset {ofs} exceeds capacity {cap}");

		let mut idx = self.head as isize + ofs;
		if idx >= cap {
			idx -= cap;
		} else if idx < 0 {
			idx += cap;
		}
		idx as usize
	}

	/// Largest span writable at the input tail without wrapping. Bounded by the
	/// physical end of the region or by the start of unconsumed output bytes,
	/// whichever comes first.
	pub fn contig_space(&self) -> usize {
		if self.free_space() == 0 {
			return 0;
		}
		let cap = self.capacity();
		let tail = self.wrap(self.head + self.input);
		let out_start = self.wrap(self.head + cap - self.output);

		if out_start > tail {
			out_start - tail
		} else {
			cap - tail
		}
	}

	/// Copies as much of `blk` as fits into pending input, splitting into at
	/// most two segments when crossing the wrap boundary. Capacity exhaustion
	/// is truncation, not failure: returns the number of bytes copied.
	pub fn put_input(&mut self, blk: &[u8]) -> usize {
		let len = min(blk.len(), self.free_space());
		if len == 0 {
			return 0;
		}

		let tail = self.wrap(self.head + self.input);
		let first = min(len, self.contig_space());
		self.data[tail..tail + first].copy_from_slice(&blk[..first]);
		if len > first {
			// The only non-contiguous case is wrapping at the physical end.
			self.data[..len - first].copy_from_slice(&blk[first..len]);
		}
		self.input += len;
		len
	}

	/// Copies as much of `blk` as fits directly into pending output, advancing
	/// the read cursor past it. Only valid while no pending input exists, since
	/// output grows exactly where input would begin. Returns bytes copied.
	pub fn put_output(&mut self, blk: &[u8]) -> usize {
		debug_assert!(self.input == 0, "output-directed put with pending input");

		let len = min(blk.len(), self.free_space());
		if len == 0 {
			return 0;
		}

		let first = min(len, self.contig_space());
		let head = self.head;
		self.data[head..head + first].copy_from_slice(&blk[..first]);
		if len > first {
			self.data[..len - first].copy_from_slice(&blk[first..len]);
		}
		self.head = self.wrap(self.head + len);
		self.output += len;
		len
	}

	/// Single-byte variant of [`put_input`](Self::put_input).
	pub fn put_input_byte(&mut self, byte: u8) -> bool {
		self.put_input(&[byte]) == 1
	}

	/// Single-byte variant of [`put_output`](Self::put_output).
	pub fn put_output_byte(&mut self, byte: u8) -> bool {
		self.put_output(&[byte]) == 1
	}

	/// Folds all pending input into pending output. O(1): only the cursor and
	/// the two counters move, no byte is copied.
	pub fn flush(&mut self) {
		self.head = self.wrap(self.head + self.input);
		self.output += self.input;
		self.input = 0;
	}

	/// Drops up to `n` bytes of pending input, advancing the read cursor.
	/// Returns the number of bytes dropped.
	pub fn consume_input(&mut self, n: usize) -> usize {
		let n = min(n, self.input);
		self.head = self.wrap(self.head + n);
		self.input -= n;
		n
	}

	/// Marks up to `n` pending-output bytes as delivered, reclaiming them as
	/// free space. Returns the number of bytes reclaimed. This is the only way
	/// output bytes stop being protected.
	pub fn ack_output(&mut self, n: usize) -> usize {
		let n = min(n, self.output);
		self.output -= n;
		n
	}

	/// The at-most-two contiguous views of pending input, in logical order.
	pub fn input_slices(&self) -> (&[u8], &[u8]) {
		let cap = self.capacity();
		let first = min(self.input, cap - self.head);
		(
			&self.data[self.head..self.head + first],
			&self.data[..self.input - first],
		)
	}

	/// The at-most-two contiguous views of pending output, in logical order
	/// (oldest byte first).
	pub fn output_slices(&self) -> (&[u8], &[u8]) {
		if self.output <= self.head {
			(&self.data[self.head - self.output..self.head], &[])
		} else {
			let cap = self.capacity();
			let wrapped = self.output - self.head;
			(&self.data[cap - wrapped..], &self.data[..self.head])
		}
	}

	/// Copies pending input into `out` without consuming it. Returns the
	/// number of bytes copied.
	pub fn copy_input(&self, out: &mut [u8]) -> usize {
		let (a, b) = self.input_slices();
		let first = min(out.len(), a.len());
		out[..first].copy_from_slice(&a[..first]);
		let second = min(out.len() - first, b.len());
		out[first..first + second].copy_from_slice(&b[..second]);
		first + second
	}

	/// Compares `text` byte-wise against the start of pending input. Designed
	/// for short needles; matches one byte per iteration, wrapping as needed.
	/// An empty needle matches trivially.
	pub fn match_prefix(&self, text: &[u8]) -> PrefixMatch {
		if self.input < text.len() {
			return PrefixMatch::Insufficient;
		}

		let cap = self.capacity();
		let mut idx = self.head;
		for &byte in text {
			if self.data[idx] != byte {
				return PrefixMatch::Mismatch;
			}
			idx += 1;
			if idx == cap {
				idx = 0;
			}
		}
		PrefixMatch::Matched(text.len())
	}

	/// Matches `text` against pending input and, on success, consumes it.
	pub fn consume_prefix(&mut self, text: &[u8]) -> PrefixMatch {
		let res = self.match_prefix(text);
		if let PrefixMatch::Matched(n) = res {
			self.consume_input(n);
		}
		res
	}

	/// Rewrites `range` of the pending input (offsets from the read cursor)
	/// with `blk` in place, shifting the input tail to fit and wrapping as
	/// needed. The usual header-rewrite primitive.
	///
	/// Returns the signed change in pending-input length, or `None` without
	/// touching anything when the range is not within pending input or growth
	/// would not fit in free space. Pending output is never moved; its bytes
	/// don't count as room here.
	pub fn replace(&mut self, range: Range<usize>, blk: &[u8]) -> Option<isize> {
		let Range { start, end } = range;
		if start > end || end > self.input {
			return None;
		}

		let removed = end - start;
		let delta = blk.len() as isize - removed as isize;
		if delta > 0 && delta as usize > self.free_space() {
			return None;
		}

		// Shift the tail [end, input) by delta, one byte at a time so the
		// move stays correct across the wrap in either direction.
		let tail = self.input - end;
		match delta.cmp(&0) {
			Ordering::Greater => {
				let grow = delta as usize;
				for i in (0..tail).rev() {
					let src = self.wrap(self.head + end + i);
					let dst = self.wrap(self.head + end + i + grow);
					self.data[dst] = self.data[src];
				}
			}
			Ordering::Less => {
				let shrink = delta.unsigned_abs();
				for i in 0..tail {
					let src = self.wrap(self.head + end + i);
					let dst = self.wrap(self.head + end + i - shrink);
					self.data[dst] = self.data[src];
				}
			}
			Ordering::Equal => {}
		}

		for (i, &byte) in blk.iter().enumerate() {
			let at = self.wrap(self.head + start + i);
			self.data[at] = byte;
		}
		self.input = (self.input as isize + delta) as usize;
		Some(delta)
	}

	/// Clears all content and rewinds the cursor.
	pub fn reset(&mut self) {
		self.head = 0;
		self.input = 0;
		self.output = 0;
	}

	fn wrap(&self, idx: usize) -> usize {
		let cap = self.capacity();
		if cap == 0 {
			return 0;
		}
		assert_le!(idx, 2 * cap);
		if idx >= cap { idx - cap } else { idx }
	}

	#[cfg(test)]
	pub(crate) fn set_head(&mut self, head: usize) {
		assert!(self.is_empty() && head < self.capacity());
		self.head = head;
	}
}

impl Debug for Buffer {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_struct("Buffer")
			.field("capacity", &self.capacity())
			.field("head", &self.head)
			.field("input", &self.input)
			.field("output", &self.output)
			.finish()
	}
}

impl PartialEq<[u8]> for Buffer {
	/// Compares pending input with `other`.
	fn eq(&self, other: &[u8]) -> bool {
		if self.input != other.len() {
			return false;
		}
		let (a, b) = self.input_slices();
		other[..a.len()] == *a && other[a.len()..] == *b
	}
}

impl PartialEq<&[u8]> for Buffer {
	fn eq(&self, other: &&[u8]) -> bool { self == *other }
}

/// The three states a caller-held buffer slot can be in: no buffer, asked the
/// pool and waiting, or holding a ready buffer. `Wanted` is the "try again once
/// a buffer is released" marker; it is not an error.
#[derive(Debug, Default)]
pub enum BufferSlot {
	#[default]
	Null,
	Wanted,
	Ready(Buffer),
}

impl BufferSlot {
	pub fn is_ready(&self) -> bool { matches!(self, Self::Ready(_)) }

	pub fn is_wanted(&self) -> bool { matches!(self, Self::Wanted) }

	/// The held buffer, if any.
	pub fn get_mut(&mut self) -> Option<&mut Buffer> {
		match self {
			Self::Ready(buf) => Some(buf),
			_ => None,
		}
	}

	/// Takes the buffer out, leaving `Null`. Returns `None` if not ready.
	pub fn take(&mut self) -> Option<Buffer> {
		match std::mem::take(self) {
			Self::Ready(buf) => Some(buf),
			other => {
				*self = other;
				None
			}
		}
	}
}
