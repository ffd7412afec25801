//! Half-band analysis split used by the VAD band decomposition.
//!
//! Each call consumes sample pairs and emits one low-band and one high-band
//! sample per pair from two first-order all-pass sections. The two-element Q10
//! state carries the all-pass history from frame to frame.

use crate::silk::macros::{rshift_round, sat16, smlawb, smulwb};

const A_FB1_20: i32 = 5394 << 1;
const A_FB1_21: i32 = -24290;

/// Splits `input` into decimated low and high bands of `input.len() / 2`
/// samples each.
pub fn ana_filt_bank_1(state: &mut [i32; 2], low: &mut [i16], high: &mut [i16], input: &[i16]) {
    debug_assert!(input.len().is_multiple_of(2));
    let half = input.len() / 2;
    debug_assert!(low.len() >= half && high.len() >= half);

    for (k, pair) in input.chunks_exact(2).enumerate() {
        let even = i32::from(pair[0]) << 10;
        let y = even - state[0];
        let x = smlawb(y, y, A_FB1_21);
        let out_1 = state[0] + x;
        state[0] = even + x;

        let odd = i32::from(pair[1]) << 10;
        let y = odd - state[1];
        let x = smulwb(y, A_FB1_20);
        let out_2 = state[1] + x;
        state[1] = odd + x;

        low[k] = sat16(rshift_round(out_2 + out_1, 11));
        high[k] = sat16(rshift_round(out_2 - out_1, 11));
    }
}
