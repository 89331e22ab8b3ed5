//! Bit-indexed flags over arbitrary-precision integers.
//!
//! A flag set is a non-negative [`BigInt`] in which bit `i` carries flag
//! `i`. Masks produced by [`unset_flag_mask`] are negative numbers
//! (two's complement, infinite leading ones), so AND-applying one clears
//! exactly its bit at any index.

use num_bigint::BigInt;

/// ORs in the bits named by `indices`. Idempotent per index; indices have
/// no upper bound.
pub fn set_flags(indices: &[u64], n: &BigInt) -> BigInt {
	let mut out = n.clone();
	for &i in indices {
		out.set_bit(i, true);
	}
	out
}

/// Returns a mask that clears bit `i` when AND-applied.
pub fn unset_flag_mask(i: u64) -> BigInt {
	!(BigInt::from(1u8) << i)
}

/// Applies a mask produced by [`unset_flag_mask`].
pub fn apply_mask(mask: &BigInt, n: &BigInt) -> BigInt {
	n & mask
}

#[cfg(test)]
mod tests {
	use super::*;

	fn zero() -> BigInt {
		BigInt::from(0u8)
	}

	#[test]
	fn set_then_unset_is_zero() {
		for i in [0u64, 1, 7, 64, 100_000, 1_000_000] {
			let set = set_flags(&[i], &zero());
			assert_eq!(apply_mask(&unset_flag_mask(i), &set), zero());
		}
	}

	#[test]
	fn setting_a_set_flag_is_a_noop() {
		let once = set_flags(&[42], &zero());
		assert_eq!(set_flags(&[42], &once), once);
	}

	#[test]
	fn unset_preserves_other_flags() {
		let set = set_flags(&[1, 2, 3], &zero());
		let cleared = apply_mask(&unset_flag_mask(1), &set);
		assert_eq!(cleared, set_flags(&[2, 3], &zero()));
	}

	#[test]
	fn flags_are_independent_bits() {
		let n = set_flags(&[0, 3], &zero());
		assert_eq!(n, BigInt::from(0b1001u8));
	}
}
