// SPDX-License-Identifier: Apache-2.0

/// Defines a `u32` bitset newtype. Flag-combination state machines are kept as
/// plain bitsets because the receive, send and error axes evolve independently;
/// `intersects` is the any-bit test most state checks want.
macro_rules! bitset {
	(
		$(#[$meta:meta])*
		$vis:vis struct $name:ident {
			$($(#[$fmeta:meta])* const $flag:ident = $value:expr;)*
		}
	) => {
		$(#[$meta])*
		#[derive(Copy, Clone, Default, PartialEq, Eq)]
		$vis struct $name(u32);

		impl $name {
			/// The neutral baseline with no flag set.
			pub const NONE: Self = Self(0);
			$($(#[$fmeta])* pub const $flag: Self = Self($value);)*

			/// Returns `true` if any flag in `other` is set.
			pub const fn intersects(self, other: Self) -> bool {
				self.0 & other.0 != 0
			}

			/// Returns `true` if every flag in `other` is set.
			pub const fn contains(self, other: Self) -> bool {
				self.0 & other.0 == other.0
			}

			/// Sets the flags in `other`.
			pub fn insert(&mut self, other: Self) {
				self.0 |= other.0;
			}

			/// Clears the flags in `other`.
			pub fn remove(&mut self, other: Self) {
				self.0 &= !other.0;
			}

			pub const fn bits(self) -> u32 { self.0 }

			pub const fn from_bits(bits: u32) -> Self { Self(bits) }
		}

		impl std::ops::BitOr for $name {
			type Output = Self;
			fn bitor(self, rhs: Self) -> Self { Self(self.0 | rhs.0) }
		}

		impl std::fmt::Debug for $name {
			fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
				write!(f, concat!(stringify!($name), "({:#x})"), self.0)
			}
		}
	};
}

pub(crate) use bitset;
