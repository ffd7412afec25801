//! Fixed-point multi-band voice activity detector.
//!
//! The detector band-splits each frame into 0-1, 1-2, 2-4 and 4-8 kHz
//! (relative to a 16 kHz input), tracks an adaptive noise floor per band and
//! maps the resulting log-domain SNR through the Q15 sigmoid into a
//! speech-activity probability. The arithmetic follows the reference
//! fixed-point routines step by step, so results are bit-exact.

use crate::silk::ana_filt_bank_1::ana_filt_bank_1;
use crate::silk::lin2log::lin2log;
use crate::silk::macros::{
    add_pos_sat32, div32, safe_lshift, sat16, smlabb, smlawb, smulwb, smulww,
};
use crate::silk::sigm_q15::sigm_q15;
use crate::silk::sqrt_approx::sqrt_approx;

/// Number of analysis bands.
pub const VAD_N_BANDS: usize = 4;

const VAD_INTERNAL_SUBFRAMES_LOG2: usize = 2;
const VAD_INTERNAL_SUBFRAMES: usize = 1 << VAD_INTERNAL_SUBFRAMES_LOG2;
const VAD_NOISE_LEVEL_SMOOTH_COEF_Q16: i32 = 1024;
const VAD_NOISE_LEVELS_BIAS: i32 = 50;
const VAD_SNR_FACTOR_Q16: i32 = 45_000;
const VAD_NEGATIVE_OFFSET_Q5: i32 = 128;
const VAD_SNR_SMOOTH_COEF_Q18: i32 = 4096;
const TILT_WEIGHTS: [i32; VAD_N_BANDS] = [30_000, 6_000, -12_000, -12_000];

/// Speech activity (Q8) at or above which a frame counts as active.
pub const SPEECH_ACTIVITY_THRESHOLD_Q8: u8 = 26;

/// Longest frame accepted in one call: 20 ms at 16 kHz.
pub const MAX_FRAME_LENGTH: usize = 320;
/// Shortest frame accepted in one call. The lowest band is decimated by 8
/// and split into four sub-frames, each of which needs a sample.
pub const MIN_FRAME_LENGTH: usize = 8 << VAD_INTERNAL_SUBFRAMES_LOG2;
const MAX_VAD_BUFFER_LENGTH: usize = MAX_FRAME_LENGTH * 5 / 4;
const MAX_HALF_FRAME_LENGTH: usize = MAX_FRAME_LENGTH / 2;

/// Adaptive state of the detector. One instance follows one audio stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VadState {
    ana_state: [i32; 2],
    ana_state1: [i32; 2],
    ana_state2: [i32; 2],
    xnrg_subfr: [i32; VAD_N_BANDS],
    nrg_ratio_smth_q8: [i32; VAD_N_BANDS],
    hp_state: i16,
    nl: [i32; VAD_N_BANDS],
    inv_nl: [i32; VAD_N_BANDS],
    noise_level_bias: [i32; VAD_N_BANDS],
    counter: i32,
    speech_activity_q8: u8,
    input_tilt_q15: i32,
    input_quality_bands_q15: [i32; VAD_N_BANDS],
}

impl Default for VadState {
    fn default() -> Self {
        Self::new()
    }
}

impl VadState {
    #[must_use]
    pub fn new() -> Self {
        let mut noise_level_bias = [0i32; VAD_N_BANDS];
        let mut nl = [0i32; VAD_N_BANDS];
        let mut inv_nl = [0i32; VAD_N_BANDS];
        for b in 0..VAD_N_BANDS {
            noise_level_bias[b] = (VAD_NOISE_LEVELS_BIAS / (b as i32 + 1)).max(1);
            nl[b] = 100 * noise_level_bias[b];
            inv_nl[b] = i32::MAX / nl[b];
        }

        Self {
            ana_state: [0; 2],
            ana_state1: [0; 2],
            ana_state2: [0; 2],
            xnrg_subfr: [0; VAD_N_BANDS],
            nrg_ratio_smth_q8: [100 * 256; VAD_N_BANDS],
            hp_state: 0,
            nl,
            inv_nl,
            noise_level_bias,
            counter: 15,
            speech_activity_q8: 0,
            input_tilt_q15: 0,
            input_quality_bands_q15: [0; VAD_N_BANDS],
        }
    }

    /// Clears all adaptive state and recomputes the noise bias table.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Last speech-activity probability, `0..=255`.
    #[must_use]
    pub fn speech_activity_q8(&self) -> u8 {
        self.speech_activity_q8
    }

    /// Last spectral tilt estimate in Q15.
    #[must_use]
    pub fn input_tilt_q15(&self) -> i32 {
        self.input_tilt_q15
    }

    /// Per-band input quality in Q15.
    #[must_use]
    pub fn input_quality_bands_q15(&self) -> &[i32; VAD_N_BANDS] {
        &self.input_quality_bands_q15
    }

    /// Analyses one frame of normalized samples (`[-1, 1]`).
    ///
    /// `frame_length` must pass [`Self::accepts_frame_length`], `fs_khz` be
    /// one of 8, 12 or 16, and `frame` must hold at least `frame_length`
    /// samples. Any other input yields `(0, false)` and leaves the state
    /// untouched.
    pub fn evaluate(&mut self, frame: &[f32], frame_length: usize, fs_khz: u32) -> (u8, bool) {
        if !Self::accepts_frame_length(frame_length)
            || frame.len() < frame_length
            || !matches!(fs_khz, 8 | 12 | 16)
        {
            return (0, false);
        }

        let mut pcm = [0i16; MAX_FRAME_LENGTH];
        for (dst, &sample) in pcm.iter_mut().zip(&frame[..frame_length]) {
            *dst = float_to_q15(sample);
        }

        let activity = self.analyse(&pcm[..frame_length], fs_khz as usize);
        (activity, activity >= SPEECH_ACTIVITY_THRESHOLD_Q8)
    }

    /// Multiples of 8 from [`MIN_FRAME_LENGTH`] to [`MAX_FRAME_LENGTH`].
    #[must_use]
    pub fn accepts_frame_length(frame_length: usize) -> bool {
        frame_length.is_multiple_of(8)
            && (MIN_FRAME_LENGTH..=MAX_FRAME_LENGTH).contains(&frame_length)
    }

    fn analyse(&mut self, input: &[i16], fs_khz: usize) -> u8 {
        let frame_length = input.len();
        let decimated1 = frame_length >> 1;
        let decimated2 = frame_length >> 2;
        let decimated = frame_length >> 3;

        let mut x = [0i16; MAX_VAD_BUFFER_LENGTH];
        let mut scratch = [0i16; MAX_HALF_FRAME_LENGTH];
        let offsets = [
            0,
            decimated + decimated2,
            decimated + decimated2 + decimated,
            decimated + decimated2 + decimated + decimated2,
        ];

        // 0-8 kHz into 0-4 and 4-8 kHz.
        {
            let (prefix, tail) = x.split_at_mut(offsets[3]);
            ana_filt_bank_1(
                &mut self.ana_state,
                &mut prefix[..decimated1],
                &mut tail[..decimated1],
                input,
            );
        }
        // 0-4 kHz into 0-2 and 2-4 kHz.
        scratch[..decimated1].copy_from_slice(&x[..decimated1]);
        {
            let (prefix, tail) = x.split_at_mut(offsets[2]);
            ana_filt_bank_1(
                &mut self.ana_state1,
                &mut prefix[..decimated2],
                &mut tail[..decimated2],
                &scratch[..decimated1],
            );
        }
        // 0-2 kHz into 0-1 and 1-2 kHz.
        scratch[..decimated2].copy_from_slice(&x[..decimated2]);
        {
            let (prefix, tail) = x.split_at_mut(offsets[1]);
            ana_filt_bank_1(
                &mut self.ana_state2,
                &mut prefix[..decimated],
                &mut tail[..decimated],
                &scratch[..decimated2],
            );
        }

        self.highpass_lowest_band(&mut x[..decimated]);

        let xnrg = self.band_energies(&x, frame_length, &offsets);
        self.update_noise_levels(&xnrg);

        let mut ratio_q8 = [0i32; VAD_N_BANDS];
        let mut sum_squared = 0i32;
        let mut input_tilt = 0i32;
        for b in 0..VAD_N_BANDS {
            let mut speech_nrg = xnrg[b] - self.nl[b];
            if speech_nrg > 0 {
                ratio_q8[b] = if (xnrg[b] as u32 & 0xFF80_0000) == 0 {
                    div32(safe_lshift(xnrg[b], 8), self.nl[b] + 1)
                } else {
                    div32(xnrg[b], (self.nl[b] >> 8) + 1)
                };

                let mut snr_q7 = lin2log(ratio_q8[b]) - 8 * 128;
                sum_squared = smlabb(sum_squared, snr_q7, snr_q7);

                if speech_nrg < (1 << 20) {
                    speech_nrg = sqrt_approx(speech_nrg);
                    snr_q7 = smulwb(safe_lshift(speech_nrg, 6), snr_q7);
                }
                input_tilt = smlawb(input_tilt, TILT_WEIGHTS[b], snr_q7);
            } else {
                ratio_q8[b] = 256;
            }
        }

        sum_squared /= VAD_N_BANDS as i32;
        let snr_db_q7 = 3 * sqrt_approx(sum_squared);
        let mut sa_q15 = sigm_q15(smulwb(VAD_SNR_FACTOR_Q16, snr_db_q7) - VAD_NEGATIVE_OFFSET_Q5);
        self.input_tilt_q15 = safe_lshift(sigm_q15(input_tilt) - 16_384, 1);

        let mut speech_nrg = 0i64;
        for (b, (&energy, &noise)) in xnrg.iter().zip(self.nl.iter()).enumerate() {
            speech_nrg += (b as i64 + 1) * i64::from((energy - noise) >> 4);
        }
        if frame_length == 20 * fs_khz {
            speech_nrg >>= 1;
        }
        if speech_nrg <= 0 {
            sa_q15 >>= 1;
        } else if speech_nrg < 16_384 {
            let scaled = sqrt_approx(safe_lshift(speech_nrg as i32, 16));
            sa_q15 = smulwb(32_768 + scaled, sa_q15);
        }
        self.speech_activity_q8 = (sa_q15 >> 7).clamp(0, i32::from(u8::MAX)) as u8;

        let mut smooth_coef_q16 = smulwb(VAD_SNR_SMOOTH_COEF_Q18, smulwb(sa_q15, sa_q15));
        if frame_length == 10 * fs_khz {
            smooth_coef_q16 >>= 1;
        }
        for b in 0..VAD_N_BANDS {
            let smth = &mut self.nrg_ratio_smth_q8[b];
            *smth = smlawb(*smth, ratio_q8[b] - *smth, smooth_coef_q16);
            let snr_q7 = 3 * (lin2log(*smth) - 8 * 128);
            self.input_quality_bands_q15[b] = sigm_q15((snr_q7 - 16 * 128) >> 4);
        }

        self.speech_activity_q8
    }

    fn highpass_lowest_band(&mut self, band: &mut [i16]) {
        let Some(last) = band.len().checked_sub(1) else {
            return;
        };
        band[last] >>= 1;
        let hp_state_next = band[last];
        for i in (1..band.len()).rev() {
            band[i - 1] >>= 1;
            band[i] = band[i].wrapping_sub(band[i - 1]);
        }
        band[0] = band[0].wrapping_sub(self.hp_state);
        self.hp_state = hp_state_next;
    }

    fn band_energies(
        &mut self,
        x: &[i16; MAX_VAD_BUFFER_LENGTH],
        frame_length: usize,
        offsets: &[usize; VAD_N_BANDS],
    ) -> [i32; VAD_N_BANDS] {
        let mut xnrg = [0i32; VAD_N_BANDS];
        for b in 0..VAD_N_BANDS {
            let shift = (VAD_N_BANDS - b).min(VAD_N_BANDS - 1);
            let decimated_length = frame_length >> shift;
            let subframe_len = decimated_length >> VAD_INTERNAL_SUBFRAMES_LOG2;
            let band = &x[offsets[b]..offsets[b] + decimated_length];

            let mut total = self.xnrg_subfr[b];
            let mut last_sum = 0i32;
            let mut pos = 0usize;
            for s in 0..VAD_INTERNAL_SUBFRAMES {
                if pos >= band.len() {
                    break;
                }
                let len = subframe_len.min(band.len() - pos);
                let mut acc = 0i32;
                for &sample in &band[pos..pos + len] {
                    let reduced = i32::from(sample) >> 3;
                    acc = smlabb(acc, reduced, reduced);
                }
                // The last sub-frame only counts half: it overlaps the next frame.
                total = if s < VAD_INTERNAL_SUBFRAMES - 1 {
                    add_pos_sat32(total, acc)
                } else {
                    add_pos_sat32(total, acc >> 1)
                };
                last_sum = acc;
                pos += len;
            }
            self.xnrg_subfr[b] = last_sum;
            xnrg[b] = total;
        }
        xnrg
    }

    fn update_noise_levels(&mut self, xnrg: &[i32; VAD_N_BANDS]) {
        let mut min_coef = 0;
        if self.counter < 1000 {
            min_coef = i32::from(i16::MAX) / ((self.counter >> 4) + 1);
            self.counter += 1;
        }

        for b in 0..VAD_N_BANDS {
            let nl = self.nl[b];
            let nrg = add_pos_sat32(xnrg[b], self.noise_level_bias[b]).max(1);
            let inv_nrg = div32(i32::MAX, nrg);

            let coef = if nrg > nl << 3 {
                VAD_NOISE_LEVEL_SMOOTH_COEF_Q16 >> 3
            } else if nrg < nl {
                VAD_NOISE_LEVEL_SMOOTH_COEF_Q16
            } else {
                smulwb(smulww(inv_nrg, nl), VAD_NOISE_LEVEL_SMOOTH_COEF_Q16 << 1)
            }
            .max(min_coef);

            self.inv_nl[b] = smlawb(self.inv_nl[b], inv_nrg - self.inv_nl[b], coef);
            let nl_new = if self.inv_nl[b] > 0 {
                div32(i32::MAX, self.inv_nl[b])
            } else {
                0
            };
            self.nl[b] = nl_new.min(0x00FF_FFFF);
        }
    }
}

fn float_to_q15(sample: f32) -> i16 {
    let scaled = libm::rintf(sample * 32_768.0);
    if scaled.is_nan() {
        0
    } else {
        sat16(scaled.clamp(-40_000.0, 40_000.0) as i32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;
    use alloc::vec::Vec;
    use core::f32::consts::PI;

    fn harmonic_frame(start: usize, len: usize, fs_hz: f32) -> Vec<f32> {
        (start..start + len)
            .map(|n| {
                let t = n as f32 / fs_hz;
                [200.0f32, 400.0, 600.0, 800.0, 1000.0]
                    .iter()
                    .enumerate()
                    .map(|(k, f)| 0.12 / (k as f32 + 1.0) * libm::sinf(2.0 * PI * f * t))
                    .sum()
            })
            .collect()
    }

    #[test]
    fn new_state_matches_reference_initialisation() {
        let vad = VadState::new();
        assert_eq!(vad.noise_level_bias, [50, 25, 16, 12]);
        assert_eq!(vad.nl, [5_000, 2_500, 1_600, 1_200]);
        assert_eq!(vad.inv_nl[0], i32::MAX / 5_000);
        assert_eq!(vad.counter, 15);
        assert_eq!(vad.nrg_ratio_smth_q8, [25_600; VAD_N_BANDS]);
    }

    #[test]
    fn zero_frame_yields_low_activity() {
        let mut vad = VadState::new();
        let frame = vec![0.0f32; 320];
        let (activity, active) = vad.evaluate(&frame, 320, 16);
        assert_eq!(activity, 2);
        assert!(!active);
        assert_eq!(vad.speech_activity_q8(), 2);
    }

    #[test]
    fn rejects_bad_arguments_without_touching_state() {
        let mut vad = VadState::new();
        let pristine = vad.clone();
        assert_eq!(vad.evaluate(&[], 0, 16), (0, false));
        assert_eq!(vad.evaluate(&[0.5; 100], 160, 16), (0, false));
        assert_eq!(vad.evaluate(&[0.5; 164], 164, 16), (0, false));
        assert_eq!(vad.evaluate(&[0.5; 480], 480, 16), (0, false));
        assert_eq!(vad.evaluate(&[0.5; 160], 160, 48), (0, false));
        assert_eq!(vad, pristine);
    }

    #[test]
    fn frames_shorter_than_four_lowest_band_subframes_are_rejected() {
        let mut vad = VadState::new();
        let pristine = vad.clone();
        for len in [8, 16, 24] {
            assert!(!VadState::accepts_frame_length(len));
            assert_eq!(vad.evaluate(&[0.5; 24], len, 16), (0, false));
        }
        assert_eq!(vad, pristine);

        assert!(VadState::accepts_frame_length(MIN_FRAME_LENGTH));
        vad.evaluate(&[0.5; 32], 32, 8);
        assert_ne!(vad, pristine);
    }

    #[test]
    fn harmonic_input_becomes_active_quickly() {
        let mut vad = VadState::new();
        let mut silence = vec![0.0f32; 320];
        for (n, s) in silence.iter_mut().enumerate() {
            *s = if n % 2 == 0 { 5.0e-5 } else { -5.0e-5 };
        }
        for _ in 0..20 {
            let (activity, active) = vad.evaluate(&silence, 320, 16);
            assert!(activity < SPEECH_ACTIVITY_THRESHOLD_Q8);
            assert!(!active);
        }

        let mut active_at = None;
        for frame_idx in 0..5 {
            let frame = harmonic_frame(frame_idx * 320, 320, 16_000.0);
            let (_, active) = vad.evaluate(&frame, 320, 16);
            if active {
                active_at = Some(frame_idx);
                break;
            }
        }
        assert!(active_at.is_some(), "speech-like input never crossed the threshold");
        assert!(vad.input_quality_bands_q15().iter().any(|&q| q > 0));
    }

    #[test]
    fn ten_ms_frames_at_eight_khz() {
        let mut vad = VadState::new();
        let frame = harmonic_frame(0, 80, 8_000.0);
        let (activity, _) = vad.evaluate(&frame, 80, 8);
        assert!(activity > 0);
    }

    #[test]
    fn reset_restores_initial_state() {
        let mut vad = VadState::new();
        let frame = harmonic_frame(0, 320, 16_000.0);
        vad.evaluate(&frame, 320, 16);
        assert_ne!(vad, VadState::new());
        vad.reset();
        assert_eq!(vad, VadState::new());
    }

    #[test]
    fn float_conversion_rounds_half_to_even_and_saturates() {
        assert_eq!(float_to_q15(0.5 / 32_768.0), 0);
        assert_eq!(float_to_q15(1.5 / 32_768.0), 2);
        assert_eq!(float_to_q15(2.0), i16::MAX);
        assert_eq!(float_to_q15(-2.0), i16::MIN);
        assert_eq!(float_to_q15(f32::NAN), 0);
    }
}
