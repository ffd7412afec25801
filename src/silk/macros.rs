//! Fixed-point arithmetic helpers shared by the SILK signal-analysis routines.
//!
//! The helpers reproduce the reference `SigProc_FIX.h`/`macros.h` semantics
//! exactly, including the places where the reference wraps on overflow and the
//! places where it saturates. Callers must not substitute native operators:
//! Rust panics on overflow in debug builds, whereas the reference silently
//! wraps.

/// `(a16 * b16)` using the low 16 bits of each operand.
#[inline]
#[must_use]
pub fn smulbb(a: i32, b: i32) -> i32 {
    i32::from(a as i16) * i32::from(b as i16)
}

/// `acc + (a16 * b16)` with wrapping accumulation.
#[inline]
#[must_use]
pub fn smlabb(acc: i32, a: i32, b: i32) -> i32 {
    acc.wrapping_add(smulbb(a, b))
}

/// `(a32 * b16) >> 16`.
#[inline]
#[must_use]
pub fn smulwb(a: i32, b: i32) -> i32 {
    ((i64::from(a) * i64::from(b as i16)) >> 16) as i32
}

/// `acc + ((a32 * b16) >> 16)` with wrapping accumulation.
#[inline]
#[must_use]
pub fn smlawb(acc: i32, a: i32, b: i32) -> i32 {
    acc.wrapping_add(smulwb(a, b))
}

/// High half of a 32x32 product, `(a32 * b32) >> 16`, using the reference
/// decomposition into a 32x16 product plus a rounded upper-half term.
#[inline]
#[must_use]
pub fn smulww(a: i32, b: i32) -> i32 {
    smulwb(a, b).wrapping_add(a.wrapping_mul(rshift_round(b, 16)))
}

/// Multiplies two Q16 values and returns the rounded Q16 result.
#[inline]
#[must_use]
pub fn rounded_mul_high_q16(a: i32, b: i32) -> i32 {
    smulww(a, b)
}

/// Rounding arithmetic right shift; ties round towards positive infinity.
#[inline]
#[must_use]
pub fn rshift_round(value: i32, shift: u32) -> i32 {
    debug_assert!(shift > 0 && shift < 32);
    if shift == 1 {
        (value >> 1) + (value & 1)
    } else {
        ((value >> (shift - 1)) + 1) >> 1
    }
}

/// Saturates to the `i16` range.
#[inline]
#[must_use]
pub fn sat16(value: i32) -> i16 {
    value.clamp(i32::from(i16::MIN), i32::from(i16::MAX)) as i16
}

/// Adds two non-negative values, saturating to `i32::MAX` on overflow.
#[inline]
#[must_use]
pub fn add_pos_sat32(a: i32, b: i32) -> i32 {
    let sum = i64::from(a) + i64::from(b);
    sum.clamp(0, i64::from(i32::MAX)) as i32
}

/// Division that yields zero instead of trapping on a zero divisor.
#[inline]
#[must_use]
pub fn div32(a: i32, b: i32) -> i32 {
    if b == 0 { 0 } else { a / b }
}

/// Left shift for `shift > 0`, arithmetic right shift otherwise.
#[inline]
#[must_use]
pub fn safe_lshift(value: i32, shift: i32) -> i32 {
    if shift <= 0 {
        value >> (-shift).min(31)
    } else if shift >= 31 {
        0
    } else {
        value.wrapping_shl(shift as u32)
    }
}

/// Leading-zero count and the seven bits below the leading one.
#[inline]
#[must_use]
pub fn clz_frac(x: i32) -> (i32, i32) {
    let ux = x as u32;
    let lz = ux.leading_zeros() as i32;
    let rotate = ((24 - lz) & 31) as u32;
    let frac = (ux.rotate_right(rotate) & 0x7f) as i32;
    (lz, frac)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn products_use_low_halves() {
        assert_eq!(smulbb(0x0001_0003, 0x7fff_0002), 6);
        assert_eq!(smulwb(1 << 16, -2), -2);
        assert_eq!(smlawb(10, 1 << 17, 3), 16);
    }

    #[test]
    fn smulww_matches_wide_product_for_small_operands() {
        let cases = [(1 << 16, 1 << 16), (123_456, 7_890), (-99_999, 65_536), (i32::MAX, 2)];
        for (a, b) in cases {
            let wide = ((i64::from(a) * i64::from(b)) >> 16) as i32;
            let approx = smulww(a, b);
            assert!(
                (i64::from(wide) - i64::from(approx)).abs() <= 1,
                "smulww({a}, {b}) = {approx}, wide = {wide}"
            );
        }
        assert_eq!(rounded_mul_high_q16(3 << 16, 1 << 15), 3 << 15);
    }

    #[test]
    fn rshift_round_ties_upward() {
        assert_eq!(rshift_round(3, 1), 2);
        assert_eq!(rshift_round(-3, 1), -1);
        assert_eq!(rshift_round(0x8000, 16), 1);
        assert_eq!(rshift_round(0x7fff, 16), 0);
        assert_eq!(rshift_round(-0x8000, 16), 0);
    }

    #[test]
    fn saturating_helpers_clip() {
        assert_eq!(sat16(40_000), i16::MAX);
        assert_eq!(sat16(-40_000), i16::MIN);
        assert_eq!(add_pos_sat32(i32::MAX, 5), i32::MAX);
        assert_eq!(add_pos_sat32(7, 5), 12);
        assert_eq!(div32(10, 0), 0);
        assert_eq!(safe_lshift(1, 40), 0);
        assert_eq!(safe_lshift(-8, -2), -2);
    }

    #[test]
    fn clz_frac_extracts_mantissa() {
        assert_eq!(clz_frac(1), (31, 0));
        assert_eq!(clz_frac(3), (30, 64));
        assert_eq!(clz_frac(0x180), (23, 64));
    }
}
