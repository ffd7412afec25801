//! Piecewise-linear logistic approximation in Q15.
//!
//! Six table segments of 32 input units each cover `(-192, 192)`; outside that
//! window the output saturates. The breakpoints and slopes are bit-exact with
//! the reference tables, so VAD probabilities match frame for frame.

const SIGM_LUT_SLOPE_Q10: [i32; 6] = [237, 153, 73, 30, 12, 7];
const SIGM_LUT_POS_Q15: [i32; 6] = [16384, 23955, 28861, 31213, 32178, 32548];
const SIGM_LUT_NEG_Q15: [i32; 6] = [16384, 8812, 3906, 1554, 589, 219];

/// Saturation point of the table, in Q5 input units.
pub const SIGM_SATURATION_Q5: i32 = 6 * 32;

/// Logistic function of a Q5 argument, returned in `[0, 32767]`.
#[must_use]
pub fn sigm_q15(input_q5: i32) -> i32 {
    if input_q5 < 0 {
        let magnitude = input_q5.saturating_neg();
        if magnitude >= SIGM_SATURATION_Q5 {
            return 0;
        }
        let index = (magnitude >> 5) as usize;
        SIGM_LUT_NEG_Q15[index] - SIGM_LUT_SLOPE_Q10[index] * (magnitude & 0x1f)
    } else if input_q5 >= SIGM_SATURATION_Q5 {
        32_767
    } else {
        let index = (input_q5 >> 5) as usize;
        SIGM_LUT_POS_Q15[index] + SIGM_LUT_SLOPE_Q10[index] * (input_q5 & 0x1f)
    }
}
