//! Integer fixed-point helpers.
//!
//! All ledger arithmetic is integer-only. Multiplications that may exceed
//! `u128` fall back to a split computation before giving up, so callers
//! only see `None` when the true result does not fit.

use integer_sqrt::IntegerSquareRoot;

/// Floor square root.
pub fn isqrt(value: u128) -> u128 {
    value.integer_sqrt()
}

/// `floor(a * b / denominator)`. Returns `None` on a zero denominator or
/// when the result does not fit in `u128`.
pub fn mul_div(a: u128, b: u128, denominator: u128) -> Option<u128> {
    if denominator == 0 {
        return None;
    }
    if let Some(product) = a.checked_mul(b) {
        return Some(product / denominator);
    }

    // a = q * d + r  =>  a * b / d = q * b + r * b / d
    let (big, small) = if a >= b { (a, b) } else { (b, a) };
    let q = big / denominator;
    let r = big % denominator;
    let whole = q.checked_mul(small)?;
    let frac = match r.checked_mul(small) {
        Some(p) => p / denominator,
        None => {
            // r < d, so r * small / d < small; split `small` the same way.
            let q2 = small / denominator;
            let r2 = small % denominator;
            r.checked_mul(q2)?.checked_add(r.checked_mul(r2)? / denominator)?
        }
    };
    whole.checked_add(frac)
}

/// `ceil(a * b / denominator)`.
pub fn mul_div_ceil(a: u128, b: u128, denominator: u128) -> Option<u128> {
    let floor = mul_div(a, b, denominator)?;
    let exact = match a.checked_mul(b) {
        Some(p) => p % denominator == 0,
        // Only reached for very large operands; treat as inexact when the
        // floor does not reproduce the product.
        None => floor
            .checked_mul(denominator)
            .map(|p| p % b == 0 && p / b == a)
            .unwrap_or(false),
    };
    if exact { Some(floor) } else { floor.checked_add(1) }
}

/// `ceil(a / b)`; `None` when `b == 0`.
pub fn div_ceil(a: u128, b: u128) -> Option<u128> {
    if b == 0 { None } else { Some(a.div_ceil(b)) }
}

/// `mul_div` that clamps to `u128::MAX` instead of failing on overflow.
/// A zero denominator yields zero.
pub fn saturating_mul_div(a: u128, b: u128, denominator: u128) -> u128 {
    if denominator == 0 {
        return 0;
    }
    mul_div(a, b, denominator).unwrap_or(u128::MAX)
}
