// SPDX-License-Identifier: Apache-2.0

//! Generic error carrier shared by the crate's fallible surfaces. Each module
//! supplies its own operation and kind enums; the carrier pairs them with an
//! optional source so that protocol violations stay cheap, typed values that
//! the caller can match on and scope to the offending stream.

use std::error::Error as StdError;
use std::fmt;
use std::fmt::{Debug, Display, Formatter};

pub type ErrorBox = Box<dyn StdError + Send + Sync>;

/// What the caller was doing when the error surfaced.
pub trait OperationKind: Copy + Debug + Display {
	fn unknown() -> Self;
}

/// What went wrong.
pub trait ErrorKind: Copy + Debug + Display {
	fn other(message: &'static str) -> Self;
}

#[derive(Debug)]
pub struct Error<O: OperationKind, K: ErrorKind> {
	op: O,
	kind: K,
	source: Option<ErrorBox>,
}

impl<O: OperationKind, K: ErrorKind> Display for Error<O, K> {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		let Self { op, kind, source } = self;
		if let Some(source) = source {
			write!(f, "{op} failed; {kind} ({source})")
		} else {
			write!(f, "{op} failed; {kind}")
		}
	}
}

impl<O: OperationKind, K: ErrorKind> StdError for Error<O, K> {
	fn source(&self) -> Option<&(dyn StdError + 'static)> {
		self.source.as_deref().map(|source| source as _)
	}
}

impl<O: OperationKind, K: ErrorKind> Error<O, K> {
	pub(crate) fn new(op: O, kind: K, source: Option<ErrorBox>) -> Self {
		Self { op, kind, source }
	}

	/// Creates a new error with a custom message.
	pub fn other(op: O, message: &'static str) -> Self {
		Self::new(op, K::other(message), None)
	}

	/// Returns the operation kind.
	pub fn operation(&self) -> O { self.op }

	/// Sets the operation kind.
	pub fn with_operation(mut self, op: O) -> Self {
		self.op = op;
		self
	}

	/// Returns the error kind.
	pub fn kind(&self) -> K { self.kind }
}
