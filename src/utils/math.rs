//! Modular arithmetic over the JVM's wrapping integer types.
//!
//! `int` and `long` arithmetic wraps modulo 2^32 and 2^64. Every odd value is a unit in
//! these rings, so it has a multiplicative inverse; even values never do. The inverses are
//! computed with the extended Euclidean algorithm against the full modulus, carried out in
//! 128-bit arithmetic so the modulus itself is representable.

/// Extended Euclid: returns `x` with `a * x ≡ 1 (mod m)`, or `None` if `gcd(a, m) != 1`.
fn mod_inverse(a: u128, m: u128) -> Option<u128> {
    let (mut old_r, mut r) = (a as i128, m as i128);
    let (mut old_s, mut s) = (1_i128, 0_i128);

    while r != 0 {
        let q = old_r / r;
        (old_r, r) = (r, old_r - q * r);
        (old_s, s) = (s, old_s - q * s);
    }

    if old_r != 1 {
        return None;
    }

    Some(old_s.rem_euclid(m as i128) as u128)
}

/// Returns `true` if `value` has a multiplicative inverse modulo 2^32 or 2^64.
#[must_use]
pub fn is_invertible(value: i64) -> bool {
    value & 1 == 1
}

/// Multiplicative inverse of `value` modulo 2^32.
///
/// # Examples
///
/// ```rust,ignore
/// use jarscope::utils::inverse_i32;
///
/// let inv = inverse_i32(7).unwrap();
/// assert_eq!(7i32.wrapping_mul(inv), 1);
/// assert_eq!(inverse_i32(4), None);
/// ```
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn inverse_i32(value: i32) -> Option<i32> {
    mod_inverse(u128::from(value as u32), 1_u128 << 32).map(|x| x as u32 as i32)
}

/// Multiplicative inverse of `value` modulo 2^64.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn inverse_i64(value: i64) -> Option<i64> {
    mod_inverse(u128::from(value as u64), 1_u128 << 64).map(|x| x as u64 as i64)
}
