//! Discontinuous transmission.
//!
//! Once the input has been inactive for longer than
//! [`DTX_THRESHOLD_MS_Q1`] the encoder stops sending packets. Every
//! [`DTX_MAX_MS_Q1`] of continuous suppression one frame is transmitted
//! anyway so the decoder can refresh its comfort-noise estimate.
//!
//! Activity for the DTX decision comes from digital-silence detection, the
//! content analyser and a peak-energy pseudo-SNR test. The multi-band VAD
//! runs on every frame as well; its verdict is reported alongside the
//! decision for the FEC scheduler and the speech coder.

use alloc::vec::Vec;

use crate::analysis::AnalysisInfo;
use crate::silk::vad::{MAX_FRAME_LENGTH, SPEECH_ACTIVITY_THRESHOLD_Q8, VadState};

const NB_SPEECH_FRAMES_BEFORE_DTX: u32 = 10;
const MAX_CONSECUTIVE_DTX: u32 = 20;

/// Inactive time, in half-milliseconds, before suppression starts.
pub const DTX_THRESHOLD_MS_Q1: u32 = NB_SPEECH_FRAMES_BEFORE_DTX * 20 * 2;
/// Inactive time, in half-milliseconds, after which one frame is sent.
pub const DTX_MAX_MS_Q1: u32 = (NB_SPEECH_FRAMES_BEFORE_DTX + MAX_CONSECUTIVE_DTX) * 20 * 2;

/// Analysis activity probability below which a frame may be inactive.
pub const DTX_ACTIVITY_THRESHOLD: f32 = 0.1;
/// 25 dB expressed as an energy ratio.
pub const PSEUDO_SNR_THRESHOLD: f32 = 316.23;

const PEAK_DECAY: f32 = 0.999;

/// True when no sample rises above the quantisation floor of an
/// `lsb_depth`-bit source.
#[must_use]
pub fn is_digital_silence(pcm: &[f32], lsb_depth: i32) -> bool {
    let depth = lsb_depth.clamp(8, 24);
    let threshold = 1.0 / (1u32 << depth) as f32;
    pcm.iter().all(|&s| s.abs() <= threshold)
}

/// Mean square of the interleaved frame.
#[must_use]
pub fn frame_energy(pcm: &[f32]) -> f32 {
    if pcm.is_empty() {
        return 0.0;
    }
    pcm.iter().map(|&s| s * s).sum::<f32>() / pcm.len() as f32
}

/// One frame as seen by [`DtxState::decide`].
#[derive(Debug, Clone, Copy)]
pub struct DtxFrame<'a> {
    /// Interleaved samples at `sample_rate`.
    pub pcm: &'a [f32],
    pub channels: usize,
    pub sample_rate: u32,
    /// Frame size in samples at 48 kHz.
    pub frame_size: usize,
    pub lsb_depth: i32,
    pub analysis: AnalysisInfo,
    /// Whether DTX is enabled. The VAD runs either way.
    pub enabled: bool,
    pub comfort_noise_interval_ms: Option<u32>,
}

/// Outcome of [`DtxState::decide`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DtxDecision {
    /// Skip the frame.
    pub suppress: bool,
    /// Emit a TOC-only comfort-noise packet in place of the frame.
    pub comfort_noise: bool,
    /// Speech activity reported by the VAD, in Q8.
    pub vad_activity_q8: u8,
    pub voice_active: bool,
}

#[derive(Debug, Clone)]
pub struct DtxState {
    no_activity_ms_q1: u32,
    in_dtx: bool,
    peak_signal_energy: f32,
    frame_ms_q1: u32,
    comfort_noise_elapsed_ms_q1: u32,
    vad: VadState,
    vad_input: Vec<f32>,
}

impl Default for DtxState {
    fn default() -> Self {
        Self::new()
    }
}

impl DtxState {
    #[must_use]
    pub fn new() -> Self {
        Self {
            no_activity_ms_q1: 0,
            in_dtx: false,
            peak_signal_energy: 0.0,
            frame_ms_q1: 40,
            comfort_noise_elapsed_ms_q1: 0,
            vad: VadState::new(),
            vad_input: Vec::new(),
        }
    }

    /// Clears the silence timer and the peak tracker. The VAD keeps its
    /// noise estimates.
    pub fn reset(&mut self) {
        self.no_activity_ms_q1 = 0;
        self.in_dtx = false;
        self.peak_signal_energy = 0.0;
        self.comfort_noise_elapsed_ms_q1 = 0;
    }

    #[must_use]
    pub fn in_dtx(&self) -> bool {
        self.in_dtx
    }

    /// Last VAD speech activity, `0..=255`.
    #[must_use]
    pub fn vad_activity(&self) -> u8 {
        self.vad.speech_activity_q8()
    }

    /// Inactive time accumulated so far, in half-milliseconds.
    #[must_use]
    pub fn no_activity_ms_q1(&self) -> u32 {
        self.no_activity_ms_q1
    }

    #[must_use]
    pub fn vad(&self) -> &VadState {
        &self.vad
    }

    /// Runs the VAD and then the suppression decision for one frame.
    pub fn decide(&mut self, frame: &DtxFrame<'_>) -> DtxDecision {
        let (vad_activity_q8, voice_active) =
            self.run_vad(frame.pcm, frame.channels, frame.sample_rate);
        let mut decision = DtxDecision {
            vad_activity_q8,
            voice_active,
            ..DtxDecision::default()
        };
        if !frame.enabled {
            return decision;
        }

        self.frame_ms_q1 = (frame.frame_size / 24) as u32;
        let active = self.classify(frame.pcm, frame.lsb_depth, &frame.analysis);
        let was_in_dtx = self.in_dtx;
        decision.suppress = self.advance(active);

        if decision.suppress {
            if !was_in_dtx {
                self.comfort_noise_elapsed_ms_q1 = 0;
            } else if let Some(interval) = frame.comfort_noise_interval_ms {
                self.comfort_noise_elapsed_ms_q1 += self.frame_ms_q1;
                if self.comfort_noise_elapsed_ms_q1 >= interval.saturating_mul(2) {
                    self.comfort_noise_elapsed_ms_q1 = 0;
                    decision.comfort_noise = true;
                }
            }
        }
        if decision.suppress != was_in_dtx {
            log::debug!(
                "dtx {} after {} ms of inactivity",
                if decision.suppress { "engaged" } else { "released" },
                self.no_activity_ms_q1 / 2
            );
        }
        decision
    }

    fn classify(&mut self, pcm: &[f32], lsb_depth: i32, analysis: &AnalysisInfo) -> bool {
        if is_digital_silence(pcm, lsb_depth) {
            return false;
        }

        let energy = frame_energy(pcm);
        let active = if analysis.valid {
            analysis.activity_probability >= DTX_ACTIVITY_THRESHOLD
                || self.peak_signal_energy < PSEUDO_SNR_THRESHOLD * energy
        } else {
            // Peak is boosted since it also tracks inactive frames here.
            self.peak_signal_energy < PSEUDO_SNR_THRESHOLD * 0.5 * energy
        };

        if !analysis.valid || analysis.activity_probability > DTX_ACTIVITY_THRESHOLD {
            self.peak_signal_energy = (PEAK_DECAY * self.peak_signal_energy).max(energy);
        }
        active
    }

    /// Advances the silence timer. Returns whether to suppress the frame.
    fn advance(&mut self, active: bool) -> bool {
        if active {
            self.no_activity_ms_q1 = 0;
            self.in_dtx = false;
            return false;
        }

        self.no_activity_ms_q1 += self.frame_ms_q1;
        if self.no_activity_ms_q1 > DTX_THRESHOLD_MS_Q1 {
            if self.no_activity_ms_q1 <= DTX_MAX_MS_Q1 {
                self.in_dtx = true;
                return true;
            }
            self.no_activity_ms_q1 = DTX_THRESHOLD_MS_Q1;
        }
        self.in_dtx = false;
        false
    }

    /// Mixes to mono, brings the frame to a VAD rate and evaluates it in
    /// chunks of at most 20 ms.
    fn run_vad(&mut self, pcm: &[f32], channels: usize, sample_rate: u32) -> (u8, bool) {
        let channels = channels.max(1);
        let (decimation, fs_khz) = match sample_rate {
            8_000 => (1, 8),
            12_000 => (1, 12),
            16_000 => (1, 16),
            24_000 => (2, 12),
            48_000 => (3, 16),
            _ => return self.last_vad(),
        };

        self.vad_input.clear();
        let step = channels * decimation;
        for group in pcm.chunks_exact(step) {
            let sum: f32 = group.iter().sum();
            self.vad_input.push(sum / step as f32);
        }

        let chunk_len = (fs_khz as usize * 20).min(MAX_FRAME_LENGTH);
        let mut any_active = false;
        let mut last = None;
        for chunk in self.vad_input.chunks(chunk_len) {
            if !VadState::accepts_frame_length(chunk.len()) {
                continue;
            }
            let (activity, active) = self.vad.evaluate(chunk, chunk.len(), fs_khz);
            any_active |= active;
            last = Some(activity);
        }

        match last {
            Some(activity) => (activity, any_active),
            None => self.last_vad(),
        }
    }

    fn last_vad(&self) -> (u8, bool) {
        let activity = self.vad.speech_activity_q8();
        (activity, activity >= SPEECH_ACTIVITY_THRESHOLD_Q8)
    }
}
