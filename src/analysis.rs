//! Content analysis feeding the DTX and mode decisions.
//!
//! A full tonality analyser is outside the control plane; it plugs in
//! through [`ContentAnalyzer`]. Two implementations ship here:
//! [`NoAnalysis`], which never produces a valid result, and
//! [`EnergyAnalyzer`], a cheap level and spectral-tilt classifier.

use libm::log10f;

/// Per-frame result of content analysis.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AnalysisInfo {
    /// Whether the fields below carry a real estimate.
    pub valid: bool,
    /// Probability the frame holds any signal worth transmitting.
    pub activity_probability: f32,
    /// Probability the frame is music rather than speech.
    pub music_probability: f32,
    pub tonality: f32,
}

pub trait ContentAnalyzer {
    /// Analyses one interleaved frame.
    fn analyze(&mut self, pcm: &[f32], channels: usize, sample_rate: u32) -> AnalysisInfo;

    fn reset(&mut self);
}

/// Analyzer that never reports a valid result, leaving every decision to
/// the fallback rules.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAnalysis;

impl ContentAnalyzer for NoAnalysis {
    fn analyze(&mut self, _pcm: &[f32], _channels: usize, _sample_rate: u32) -> AnalysisInfo {
        AnalysisInfo::default()
    }

    fn reset(&mut self) {}
}

// Level in dBFS mapped linearly onto activity: -60 dB is silent, -30 dB is
// certainly active.
const ACTIVITY_FLOOR_DB: f32 = -60.0;
const ACTIVITY_RANGE_DB: f32 = 30.0;
// Difference-to-signal energy ratio above which a frame looks like
// broadband (music-like) content.
const MUSIC_DIFF_RATIO: f32 = 0.25;
const MUSIC_SMOOTHING: f32 = 0.1;

/// Energy-based classifier.
///
/// Activity comes from the mean-square level of the mono mix. The music
/// probability is a smoothed vote on how much energy sits in the sample
/// differences: speech concentrates its energy at low frequencies, so its
/// first difference is small relative to the signal.
#[derive(Debug, Clone, Default)]
pub struct EnergyAnalyzer {
    music_prob: f32,
}

impl EnergyAnalyzer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ContentAnalyzer for EnergyAnalyzer {
    fn analyze(&mut self, pcm: &[f32], channels: usize, _sample_rate: u32) -> AnalysisInfo {
        let channels = channels.max(1);
        let samples = pcm.len() / channels;
        if samples < 2 {
            return AnalysisInfo::default();
        }

        let mut energy = 0.0f32;
        let mut diff_energy = 0.0f32;
        let mut prev = 0.0f32;
        for (i, frame) in pcm.chunks_exact(channels).enumerate() {
            let s = frame.iter().sum::<f32>() / channels as f32;
            energy += s * s;
            if i > 0 {
                let d = s - prev;
                diff_energy += d * d;
            }
            prev = s;
        }

        let mean = energy / samples as f32;
        let activity_probability = if mean <= 0.0 {
            0.0
        } else {
            let level_db = 10.0 * log10f(mean);
            ((level_db - ACTIVITY_FLOOR_DB) / ACTIVITY_RANGE_DB).clamp(0.0, 1.0)
        };

        let ratio = if energy > 0.0 {
            diff_energy / energy
        } else {
            0.0
        };
        // Silent frames carry no evidence either way.
        if energy > 0.0 {
            let vote = if ratio > MUSIC_DIFF_RATIO { 1.0 } else { 0.0 };
            self.music_prob += MUSIC_SMOOTHING * (vote - self.music_prob);
        }

        AnalysisInfo {
            valid: true,
            activity_probability,
            music_probability: self.music_prob,
            tonality: (1.0 - ratio * 0.5).clamp(0.0, 1.0),
        }
    }

    fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use alloc::vec::Vec;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn sine(freq: f32, amp: f32, n: usize, fs: f32) -> Vec<f32> {
        (0..n)
            .map(|i| amp * libm::sinf(2.0 * core::f32::consts::PI * freq * i as f32 / fs))
            .collect()
    }

    #[test]
    fn no_analysis_is_never_valid() {
        let info = NoAnalysis.analyze(&[0.5; 960], 1, 48_000);
        assert!(!info.valid);
    }

    #[test]
    fn silence_is_inactive() {
        let mut a = EnergyAnalyzer::new();
        let info = a.analyze(&[0.0; 960], 1, 48_000);
        assert!(info.valid);
        assert_eq!(info.activity_probability, 0.0);
    }

    #[test]
    fn loud_low_tone_is_active_voice_like() {
        let mut a = EnergyAnalyzer::new();
        let pcm = sine(200.0, 0.3, 960, 48_000.0);
        let mut info = AnalysisInfo::default();
        for _ in 0..30 {
            info = a.analyze(&pcm, 1, 48_000);
        }
        assert_eq!(info.activity_probability, 1.0);
        assert!(info.music_probability < 0.5);
        assert!(info.tonality > 0.9);
    }

    #[test]
    fn white_noise_drifts_towards_music() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut a = EnergyAnalyzer::new();
        let mut info = AnalysisInfo::default();
        for _ in 0..30 {
            let pcm: Vec<f32> = (0..1920).map(|_| rng.gen_range(-0.3..0.3)).collect();
            info = a.analyze(&pcm, 2, 48_000);
        }
        assert!(info.music_probability > 0.5);
        a.reset();
        let info = a.analyze(&[0.0; 4], 2, 48_000);
        assert_eq!(info.music_probability, 0.0);
    }
}
