use num_bigint::BigUint;
use num_rational::BigRational;
use num_traits::cast::ToPrimitive;

/// A 128-bit VRF leadership threshold: a slot is won when `vrf_output <
/// threshold` (treating the VRF output as a big-endian u128).
pub type Threshold = u128;

/// `T_i = 2^128 * (1 - (1 - c)^(w_i / W))`.
///
/// `c` is given as a (numerator, denominator) pair so the constant itself
/// stays exact; the exponentiation with a fractional exponent has no exact
/// closed form over rationals, so we compute it in `f64` and then convert
/// the *result* into an exact `BigRational` (via its bit pattern, not a
/// decimal round-trip) before scaling by `2^128`. This keeps the rounding
/// behaviour identical across platforms, unlike casting `f64 -> u128`
/// directly, which is the failure mode this routine is built to avoid.
pub fn calculate_threshold(c: (u64, u64), total_weight: u64, authority_weight: u64) -> Threshold {
	assert!(authority_weight >= 1, "authority with zero weight has no threshold");
	assert!(total_weight >= authority_weight);

	let c = c.0 as f64 / c.1 as f64;
	let theta = authority_weight as f64 / total_weight as f64;

	// p = 1 - (1 - c)^theta, always in [0, c] for theta in (0, 1].
	let p = 1.0 - (1.0 - c).powf(theta);

	let ratio = BigRational::from_float(p).unwrap_or_else(|| BigRational::from_integer(0u32.into()));

	let numer = ratio.numer().to_biguint().unwrap_or_default();
	let denom = ratio.denom().to_biguint().unwrap_or_else(|| BigUint::from(1u32));

	if denom == BigUint::from(0u32) {
		return 0;
	}

	let scaled = (BigUint::from(u128::MAX) * numer) / denom;
	scaled.to_u128().unwrap_or(u128::MAX)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn single_authority_c_one_is_always_leader() {
		// c = 1.0 means p = 1 - 0^theta = 1, so threshold saturates to u128::MAX.
		let t = calculate_threshold((1, 1), 1, 1);
		assert_eq!(t, u128::MAX);
	}

	#[test]
	fn higher_weight_gets_higher_threshold() {
		let low = calculate_threshold((1, 4), 100, 1);
		let high = calculate_threshold((1, 4), 100, 10);
		assert!(high > low);
	}

	#[test]
	fn zero_c_never_leads() {
		let t = calculate_threshold((0, 1), 10, 5);
		assert_eq!(t, 0);
	}
}
