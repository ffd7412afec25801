//! Fixed-point `128 * log2(x)` approximation.

/// Approximates `128 * log2(x)` (Q7) from the leading-zero count plus a
/// quadratic correction on the seven mantissa bits below the leading one.
///
/// Non-positive inputs return 0.
#[must_use]
pub fn lin2log(in_lin: i32) -> i32 {
    if in_lin <= 0 {
        return 0;
    }
    let (lz, frac_q7) = crate::silk::macros::clz_frac(in_lin);
    let correction = frac_q7 + ((i64::from(frac_q7 * (128 - frac_q7)) * 179) >> 16) as i32;
    ((31 - lz) << 7) + correction
}

#[cfg(test)]
mod tests {
    use super::lin2log;

    #[test]
    fn non_positive_inputs_map_to_zero() {
        assert_eq!(lin2log(0), 0);
        assert_eq!(lin2log(-1), 0);
        assert_eq!(lin2log(i32::MIN), 0);
    }

    #[test]
    fn tracks_scaled_log2() {
        let cases = [
            (1, 0),
            (2, 128),
            (3, 203),
            (8, 384),
            (129, 897),
            (1024, 1280),
            (12_345, 1739),
            (65_535, 2047),
            (123_456_789, 3441),
        ];
        for (input, expected) in cases {
            assert_eq!(lin2log(input), expected, "lin2log({input})");
        }
    }
}
