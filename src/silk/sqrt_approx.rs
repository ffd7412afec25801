//! Integer square-root approximation.

use crate::silk::macros::{clz_frac, smlawb, smulbb};

const SQRT_COEF_Q7: i32 = 213;

/// Approximates `sqrt(x)` from a leading-zero seed plus one linear refinement
/// on the mantissa. Returns 0 for non-positive input.
#[must_use]
pub fn sqrt_approx(x: i32) -> i32 {
    if x <= 0 {
        return 0;
    }
    let (lz, frac_q7) = clz_frac(x);
    let mut y = if lz & 1 != 0 { 32_768 } else { 46_214 };
    y >>= lz >> 1;
    smlawb(y, y, smulbb(SQRT_COEF_Q7, frac_q7))
}

#[cfg(test)]
mod tests {
    use super::sqrt_approx;

    #[test]
    fn rejects_non_positive() {
        assert_eq!(sqrt_approx(0), 0);
        assert_eq!(sqrt_approx(-25), 0);
    }

    #[test]
    fn stays_close_to_true_root() {
        for x in [1, 2, 16, 100, 1_000, 65_536, 1 << 20, 123_456_789, i32::MAX] {
            let exact = libm::sqrt(f64::from(x));
            let approx = f64::from(sqrt_approx(x));
            assert!(
                (approx - exact).abs() <= exact * 0.04 + 1.0,
                "sqrt_approx({x}) = {approx}, exact {exact}"
            );
        }
    }

    #[test]
    fn exact_on_even_powers() {
        assert_eq!(sqrt_approx(1 << 16), 256);
        assert_eq!(sqrt_approx(4), 2);
    }
}
