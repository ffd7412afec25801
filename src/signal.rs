//! Voice/music classification for the automatic mode choice.
//!
//! An explicit hint always wins. Long frames trust a valid analysis only
//! outside a dead zone around the music threshold. Short frames trust it at
//! one half. Without analysis the frame itself decides: the energy of the
//! first difference over the signal energy separates bright content from
//! voiced content.
//!
//! Two super-wideband lanes keep state so that the transform/hybrid choice
//! does not flap. 10 ms frames accumulate a transient score. 20 ms frames
//! must hold a mode for [`SWB20_MIN_HOLD_FRAMES`] frames before switching.

use crate::analysis::AnalysisInfo;
use crate::config::SignalHint;
use crate::packet::Mode;

/// Content class driving the automatic mode choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalClass {
    Voice,
    Music,
    Unknown,
}

/// Automatic super-wideband lane a frame falls in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwbLane {
    /// Not an automatic super-wideband 10 or 20 ms frame.
    None,
    TenMs,
    TwentyMs,
}

const LONG_FRAME_MUSIC_PROB: f32 = 0.65;
const LONG_FRAME_VOICE_PROB: f32 = 0.60;
const SHORT_FRAME_MUSIC_PROB: f32 = 0.5;
// Mean square of the interleaved frame below which it counts as silent,
// about -40 dBFS.
const SILENCE_MEAN_SQUARE: f64 = 1e-4;
const MUSIC_DIFF_RATIO: f32 = 0.25;

const TRANSIENT_SCORE_MAX: u32 = 100;
const TRANSIENT_SCORE_TO_HYBRID: u32 = 30;
const TRANSIENT_SCORE_TO_CELT: u32 = 10;

/// Frames a 20 ms super-wideband mode must last before it may change.
pub const SWB20_MIN_HOLD_FRAMES: u32 = 17;

/// Energy statistics of one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameEnergy {
    /// Mean square over every interleaved sample.
    pub mean_square: f32,
    /// Energy of the mono mix.
    pub mix_energy: f32,
    /// Mean square of the mono mix.
    pub mix_mean_square: f32,
    /// First-difference energy of the mix over its energy.
    pub diff_ratio: f32,
}

impl FrameEnergy {
    /// Measures an interleaved frame. Stereo is mixed as the mean of the
    /// two channels.
    #[must_use]
    pub fn measure(pcm: &[f32], channels: usize) -> Self {
        let channels = channels.max(1);
        let total: f64 = pcm.iter().map(|&s| f64::from(s) * f64::from(s)).sum();

        let mut energy = 0f64;
        let mut diff = 0f64;
        let mut prev = None;
        let mut samples = 0usize;
        for group in pcm.chunks_exact(channels) {
            let s = group.iter().map(|&v| f64::from(v)).sum::<f64>() / channels as f64;
            energy += s * s;
            if let Some(p) = prev {
                let d = s - p;
                diff += d * d;
            }
            prev = Some(s);
            samples += 1;
        }

        Self {
            mean_square: if pcm.is_empty() {
                0.0
            } else {
                (total / pcm.len() as f64) as f32
            },
            mix_energy: energy as f32,
            mix_mean_square: if samples == 0 {
                0.0
            } else {
                (energy / samples as f64) as f32
            },
            diff_ratio: (diff / (energy + 1e-12)) as f32,
        }
    }

    fn is_silent(&self) -> bool {
        f64::from(self.mean_square) < SILENCE_MEAN_SQUARE
    }
}

/// One frame as seen by the classifier.
#[derive(Debug, Clone, Copy)]
pub struct SignalFrame<'a> {
    /// Interleaved input samples.
    pub pcm: &'a [f32],
    pub channels: usize,
    /// Frame size in samples at 48 kHz.
    pub frame_size: usize,
    pub lane: SwbLane,
}

/// Per-stream classifier state.
#[derive(Debug, Clone)]
pub struct SignalClassifier {
    transient_score: u32,
    prev_swb10_mode: Mode,
    prev_swb20_mode: Mode,
    swb20_hold_frames: u32,
}

impl Default for SignalClassifier {
    fn default() -> Self {
        Self {
            transient_score: 0,
            prev_swb10_mode: Mode::Celt,
            prev_swb20_mode: Mode::Hybrid,
            swb20_hold_frames: 0,
        }
    }
}

impl SignalClassifier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn transient_score(&self) -> u32 {
        self.transient_score
    }

    /// Frames the current 20 ms super-wideband mode has lasted.
    pub fn swb20_hold_frames(&self) -> u32 {
        self.swb20_hold_frames
    }

    pub fn classify(
        &mut self,
        hint: SignalHint,
        analysis: &AnalysisInfo,
        frame: &SignalFrame<'_>,
    ) -> SignalClass {
        match hint {
            SignalHint::Voice => SignalClass::Voice,
            SignalHint::Music => SignalClass::Music,
            SignalHint::Auto => self.classify_auto(analysis, frame),
        }
    }

    fn classify_auto(&mut self, analysis: &AnalysisInfo, frame: &SignalFrame<'_>) -> SignalClass {
        if frame.frame_size > 960 && analysis.valid {
            return if analysis.music_probability >= LONG_FRAME_MUSIC_PROB {
                SignalClass::Music
            } else if analysis.music_probability <= LONG_FRAME_VOICE_PROB {
                SignalClass::Voice
            } else {
                SignalClass::Unknown
            };
        }

        let energy = FrameEnergy::measure(frame.pcm, frame.channels);
        if frame.lane == SwbLane::None {
            if analysis.valid && frame.frame_size <= 960 {
                return if analysis.music_probability >= SHORT_FRAME_MUSIC_PROB {
                    SignalClass::Music
                } else {
                    SignalClass::Voice
                };
            }
            if energy.is_silent() {
                return SignalClass::Voice;
            }
        }
        if energy.mix_energy <= 0.0 {
            return SignalClass::Voice;
        }

        let mode = match frame.lane {
            SwbLane::TenMs => self.transient_vote(&energy),
            SwbLane::TwentyMs if analysis.valid => self.hold_vote(&energy, analysis),
            _ if energy.diff_ratio > MUSIC_DIFF_RATIO => return SignalClass::Music,
            _ => return SignalClass::Voice,
        };
        if mode == Mode::Hybrid {
            SignalClass::Voice
        } else {
            SignalClass::Music
        }
    }

    /// Sparse transient frames push towards hybrid coding, anything else
    /// decays the score back towards the transform coder.
    fn transient_vote(&mut self, energy: &FrameEnergy) -> Mode {
        let ratio = energy.diff_ratio;
        let level = energy.mix_mean_square;
        if ratio >= 0.9 && level <= 0.03 {
            self.transient_score += 2;
        } else if ratio >= 0.5 && level <= 0.015 {
            self.transient_score += 1;
        } else {
            self.transient_score = self.transient_score.saturating_sub(1);
        }
        self.transient_score = self.transient_score.min(TRANSIENT_SCORE_MAX);

        if self.transient_score >= TRANSIENT_SCORE_TO_HYBRID {
            Mode::Hybrid
        } else if self.transient_score <= TRANSIENT_SCORE_TO_CELT {
            Mode::Celt
        } else {
            self.prev_swb10_mode
        }
    }

    fn hold_vote(&self, energy: &FrameEnergy, analysis: &AnalysisInfo) -> Mode {
        let ratio = energy.diff_ratio;
        let vad = analysis.activity_probability;
        let music = analysis.music_probability;
        let strong_voice = ratio >= 1.0 && vad >= 0.16;
        let strong_music = (vad <= 0.25 && ratio <= 0.05)
            || (ratio <= 0.06 && (0.42..=0.60).contains(&vad) && music <= 0.75);

        let prev = self.prev_swb20_mode;
        let desired = if self.swb20_hold_frames == 0 {
            if vad <= 0.27 && ratio <= 0.06 {
                Mode::Celt
            } else {
                Mode::Hybrid
            }
        } else if prev == Mode::Hybrid {
            if strong_music { Mode::Celt } else { Mode::Hybrid }
        } else if strong_voice {
            Mode::Hybrid
        } else {
            prev
        };

        if self.swb20_hold_frames > 0
            && desired != prev
            && self.swb20_hold_frames < SWB20_MIN_HOLD_FRAMES
        {
            prev
        } else {
            desired
        }
    }

    /// Records the mode a lane frame was finally coded in.
    pub fn record_mode(&mut self, lane: SwbLane, mode: Mode) {
        if mode == Mode::Silk {
            return;
        }
        match lane {
            SwbLane::TenMs => self.prev_swb10_mode = mode,
            SwbLane::TwentyMs => {
                if self.prev_swb20_mode == mode && self.swb20_hold_frames > 0 {
                    self.swb20_hold_frames = self.swb20_hold_frames.saturating_add(1);
                } else {
                    self.prev_swb20_mode = mode;
                    self.swb20_hold_frames = 1;
                }
            }
            SwbLane::None => {}
        }
    }
}
