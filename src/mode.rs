//! Coding mode, bandwidth and frame layout selection.
//!
//! 40 and 60 ms frames are coded either as one long speech-coder frame or
//! as two or three 20 ms frames in a code 3 packet. Only an explicit speech
//! coder request keeps the long atomic frame; every other path expands.

use crate::analysis::AnalysisInfo;
use crate::bitrate::compute_equiv_rate;
use crate::config::{BitrateMode, CodingMode, EncoderConfig, SignalHint};
use crate::error::EncodeError;
use crate::packet::{Bandwidth, FrameDuration, Mode};
use crate::signal::{SignalClass, SignalClassifier, SignalFrame, SwbLane};

/// Largest frame any coder takes as a single unit outside the speech coder.
pub const MAX_ATOMIC_FRAME_SIZE: usize = 960;

/// Frame sizes (48 kHz samples) the speech coder codes atomically.
pub const SILK_FRAME_SIZES: [usize; 4] = [480, 960, 1920, 2880];
/// Frame sizes the transform coder codes atomically.
pub const CELT_FRAME_SIZES: [usize; 4] = [120, 240, 480, 960];
/// Frame sizes a hybrid frame may have.
pub const HYBRID_FRAME_SIZES: [usize; 2] = [480, 960];

// Rates at which the long-frame super-wideband rule switches to the
// transform coder, for pure voice (mono, stereo) and pure music.
const LONG_SWB_VOICE_RATE: [i32; 2] = [64_000, 44_000];
const LONG_SWB_MUSIC_RATE: i32 = 10_000;
const LONG_SWB_HYSTERESIS_TO_CELT: i32 = 2_000;
const LONG_SWB_HYSTERESIS_TO_HYBRID: i32 = 4_000;
// Voice estimate used when neither a hint nor analysis is available.
const DEFAULT_VOICE_EST: i32 = 48;
const MAX_ANALYSED_VOICE_EST: i32 = 115;
const TONAL_CELT_THRESHOLD: f32 = 0.42;
// Valid analysis that is neither clearly music nor tonal at all also goes
// to the transform coder.
const FLAT_MUSIC_CEILING: f32 = 0.90;
const FLAT_TONALITY_CEILING: f32 = 0.12;
const HIGH_RATE_PER_CHANNEL: i32 = 48_000;

/// Whether `mode` codes `frame_size` as a single frame.
#[must_use]
pub fn is_atomic_frame_size(mode: Mode, frame_size: usize) -> bool {
    match mode {
        Mode::Silk => SILK_FRAME_SIZES.contains(&frame_size),
        Mode::Celt => CELT_FRAME_SIZES.contains(&frame_size),
        Mode::Hybrid => HYBRID_FRAME_SIZES.contains(&frame_size),
    }
}

/// Whether a caller may configure `frame_size` together with `mode`.
#[must_use]
pub fn is_valid_frame_size(mode: CodingMode, frame_size: usize) -> bool {
    match mode {
        CodingMode::Silk => SILK_FRAME_SIZES.contains(&frame_size),
        CodingMode::Celt => CELT_FRAME_SIZES.contains(&frame_size),
        CodingMode::Hybrid => {
            HYBRID_FRAME_SIZES.contains(&frame_size) || matches!(frame_size, 1920 | 2880)
        }
        CodingMode::Auto => FrameDuration::from_samples_48k(frame_size).is_some(),
    }
}

pub fn validate_frame_size(mode: CodingMode, frame_size: usize) -> Result<(), EncodeError> {
    if is_valid_frame_size(mode, frame_size) {
        Ok(())
    } else {
        Err(EncodeError::InvalidFrameSize { frame_size, mode })
    }
}

/// Reconciles a mode with a bandwidth it can code.
///
/// The speech coder stops at wideband, a hybrid packet at wideband or below
/// is plain speech coding, and the transform coder has no mediumband.
#[must_use]
pub fn fix_mode_bandwidth(mode: Mode, bandwidth: Bandwidth) -> (Mode, Bandwidth) {
    match mode {
        Mode::Silk => (Mode::Silk, bandwidth.min(Bandwidth::Wide)),
        Mode::Hybrid if bandwidth <= Bandwidth::Wide => (Mode::Silk, bandwidth),
        Mode::Hybrid => (Mode::Hybrid, bandwidth),
        Mode::Celt if bandwidth == Bandwidth::Medium => (Mode::Celt, Bandwidth::Wide),
        Mode::Celt => (Mode::Celt, bandwidth),
    }
}

/// Result of [`ModeSelector::select`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeDecision {
    pub mode: Mode,
    pub bandwidth: Bandwidth,
    /// Size of each coded frame, in 48 kHz samples.
    pub frame_size: usize,
    /// Frames in the packet.
    pub frame_count: usize,
    pub signal: SignalClass,
}

impl ModeDecision {
    #[must_use]
    pub fn duration(&self) -> Option<FrameDuration> {
        FrameDuration::from_samples_48k(self.frame_size)
    }
}

/// Chooses the mode per frame. Holds the hysteresis of the long-frame
/// super-wideband rule and the signal classifier.
#[derive(Debug, Clone, Default)]
pub struct ModeSelector {
    prev_long_swb_mode: Option<Mode>,
    classifier: SignalClassifier,
}

impl ModeSelector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.prev_long_swb_mode = None;
        self.classifier.reset();
    }

    pub fn classifier(&self) -> &SignalClassifier {
        &self.classifier
    }

    /// Picks mode, bandwidth and frame layout for one frame of interleaved
    /// input.
    ///
    /// Fails with [`EncodeError::InvalidFrameSize`] before touching any
    /// state when the frame size does not fit the configured mode.
    pub fn select(
        &mut self,
        config: &EncoderConfig,
        analysis: &AnalysisInfo,
        pcm: &[f32],
    ) -> Result<ModeDecision, EncodeError> {
        let requested = config.mode();
        let frame_size = config.frame_size();
        validate_frame_size(requested, frame_size)?;

        let lane = swb_lane(config);
        let signal = self.classifier.classify(
            config.signal(),
            analysis,
            &SignalFrame {
                pcm,
                channels: config.channels(),
                frame_size,
                lane,
            },
        );
        let (mode, bandwidth) = if config.lfe() {
            (Mode::Celt, Bandwidth::Narrow)
        } else {
            let bandwidth = config.effective_bandwidth();
            let mode = match requested {
                CodingMode::Silk => Mode::Silk,
                CodingMode::Celt => Mode::Celt,
                CodingMode::Hybrid => Mode::Hybrid,
                CodingMode::Auto if frame_size > MAX_ATOMIC_FRAME_SIZE => {
                    self.select_long(config, analysis, signal)
                }
                CodingMode::Auto => select_short(config, signal),
            };
            (mode, bandwidth)
        };
        let (mode, bandwidth) = fix_mode_bandwidth(mode, bandwidth);
        self.classifier.record_mode(lane, mode);

        let keep_long = mode == Mode::Silk && requested == CodingMode::Silk && !config.lfe();
        let (atomic, frame_count) = if frame_size > MAX_ATOMIC_FRAME_SIZE && !keep_long {
            (MAX_ATOMIC_FRAME_SIZE, frame_size / MAX_ATOMIC_FRAME_SIZE)
        } else {
            (frame_size, 1)
        };

        Ok(ModeDecision {
            mode,
            bandwidth,
            frame_size: atomic,
            frame_count,
            signal,
        })
    }

    fn select_long(
        &mut self,
        config: &EncoderConfig,
        analysis: &AnalysisInfo,
        signal: SignalClass,
    ) -> Mode {
        match config.effective_bandwidth() {
            Bandwidth::Full => Mode::Celt,
            Bandwidth::SuperWide => {
                let mode = self.select_long_swb(config, analysis, signal);
                self.prev_long_swb_mode = Some(mode);
                mode
            }
            _ => match signal {
                SignalClass::Music => Mode::Celt,
                SignalClass::Voice | SignalClass::Unknown => Mode::Silk,
            },
        }
    }

    /// Transform coder above a rate threshold interpolated between the
    /// voice and music rates by the squared voice estimate.
    fn select_long_swb(
        &self,
        config: &EncoderConfig,
        analysis: &AnalysisInfo,
        signal: SignalClass,
    ) -> Mode {
        let frame_rate = (48_000 / config.frame_size()) as i32;
        let equiv_rate = compute_equiv_rate(
            config.bitrate(),
            config.channels(),
            frame_rate,
            config.bitrate_mode() != BitrateMode::Cbr,
            None,
            config.complexity(),
            config.packet_loss_perc(),
        );

        let voice_est = if config.signal() == SignalHint::Auto && analysis.valid {
            let voice_prob = (1.0 - analysis.music_probability).clamp(0.0, 1.0);
            (libm::floorf(0.5 + voice_prob * 127.0) as i32).min(MAX_ANALYSED_VOICE_EST)
        } else {
            match signal {
                SignalClass::Voice => 127,
                SignalClass::Music => 0,
                SignalClass::Unknown => DEFAULT_VOICE_EST,
            }
        };

        let mode_voice = LONG_SWB_VOICE_RATE[usize::from(config.channels() == 2)];
        let mut threshold = LONG_SWB_MUSIC_RATE
            + voice_est * voice_est * (mode_voice - LONG_SWB_MUSIC_RATE) / 16_384;
        match self.prev_long_swb_mode {
            Some(Mode::Celt) => threshold -= LONG_SWB_HYSTERESIS_TO_CELT,
            Some(Mode::Hybrid) => threshold += LONG_SWB_HYSTERESIS_TO_HYBRID,
            _ => {}
        }

        if analysis.valid && analysis.tonality >= TONAL_CELT_THRESHOLD {
            return Mode::Celt;
        }
        if analysis.valid
            && analysis.music_probability < FLAT_MUSIC_CEILING
            && analysis.tonality < FLAT_TONALITY_CEILING
        {
            return Mode::Celt;
        }
        if equiv_rate >= threshold {
            Mode::Celt
        } else {
            Mode::Hybrid
        }
    }
}

/// Automatic super-wideband 10 and 20 ms frames get their own stateful
/// classification.
fn swb_lane(config: &EncoderConfig) -> SwbLane {
    if config.mode() != CodingMode::Auto
        || config.lfe()
        || config.effective_bandwidth() != Bandwidth::SuperWide
    {
        return SwbLane::None;
    }
    match config.frame_size() {
        480 => SwbLane::TenMs,
        960 => SwbLane::TwentyMs,
        _ => SwbLane::None,
    }
}

fn select_short(config: &EncoderConfig, signal: SignalClass) -> Mode {
    let bandwidth = config.effective_bandwidth();
    let frame_size = config.frame_size();
    let per_channel_rate = config.bitrate() / config.channels().max(1) as i32;
    let hybrid_size = HYBRID_FRAME_SIZES.contains(&frame_size);

    if per_channel_rate >= HIGH_RATE_PER_CHANNEL
        && (bandwidth == Bandwidth::Full || (bandwidth == Bandwidth::SuperWide && !hybrid_size))
    {
        return Mode::Celt;
    }

    let wide_or_less = bandwidth <= Bandwidth::Wide;
    let preferred = match signal {
        SignalClass::Voice if wide_or_less => Mode::Silk,
        SignalClass::Voice if hybrid_size => Mode::Hybrid,
        SignalClass::Voice => Mode::Silk,
        SignalClass::Music => Mode::Celt,
        SignalClass::Unknown if wide_or_less => Mode::Silk,
        SignalClass::Unknown if bandwidth == Bandwidth::SuperWide && hybrid_size => Mode::Hybrid,
        SignalClass::Unknown => Mode::Celt,
    };

    if is_atomic_frame_size(preferred, frame_size) {
        preferred
    } else if is_atomic_frame_size(Mode::Celt, frame_size) {
        Mode::Celt
    } else {
        Mode::Silk
    }
}
