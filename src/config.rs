//! Encoder configuration.
//!
//! [`EncoderConfig`] holds every knob the control plane reads while
//! encoding. Setters clamp out-of-range values instead of failing, so a
//! config can never reach the encoder in an invalid numeric state. Frame
//! size is the one exception: it is checked against the coding mode when a
//! frame is encoded. Deserialised configs go through the same checks.

use crate::error::ConfigError;
use crate::packet::Bandwidth;

pub const MIN_BITRATE_BPS: i32 = 6_000;
pub const MAX_BITRATE_BPS: i32 = 510_000;
pub const MAX_COMPLEXITY: i32 = 10;
pub const MAX_PACKET_LOSS_PERC: i32 = 100;
pub const MIN_LSB_DEPTH: i32 = 8;
pub const MAX_LSB_DEPTH: i32 = 24;

/// Sample rates the encoder accepts.
pub const SUPPORTED_SAMPLE_RATES: [u32; 5] = [8_000, 12_000, 16_000, 24_000, 48_000];

/// Coding mode requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CodingMode {
    /// Pick per frame from bandwidth, bitrate and signal class.
    #[default]
    Auto,
    /// Speech coder only.
    Silk,
    /// Transform coder only.
    Celt,
    /// Speech coder for the low band plus transform coder above it.
    Hybrid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BitrateMode {
    /// Unconstrained variable bitrate.
    #[default]
    Vbr,
    /// Variable bitrate held within 15% of the target.
    Cvbr,
    /// Every packet is exactly the target size.
    Cbr,
}

/// Caller hint about the content being encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SignalHint {
    #[default]
    Auto,
    Voice,
    Music,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "UncheckedConfig"))]
pub struct EncoderConfig {
    sample_rate: u32,
    channels: usize,
    mode: CodingMode,
    bandwidth: Bandwidth,
    max_bandwidth: Bandwidth,
    force_channels: Option<usize>,
    frame_size: usize,
    bitrate: i32,
    bitrate_mode: BitrateMode,
    complexity: i32,
    fec: bool,
    packet_loss_perc: i32,
    dtx: bool,
    lfe: bool,
    prediction_disabled: bool,
    signal: SignalHint,
    lsb_depth: i32,
    comfort_noise_interval_ms: Option<u32>,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            channels: 1,
            mode: CodingMode::Auto,
            bandwidth: Bandwidth::Full,
            max_bandwidth: Bandwidth::Full,
            force_channels: None,
            frame_size: 960,
            bitrate: 64_000,
            bitrate_mode: BitrateMode::Vbr,
            complexity: MAX_COMPLEXITY,
            fec: false,
            packet_loss_perc: 0,
            dtx: false,
            lfe: false,
            prediction_disabled: false,
            signal: SignalHint::Auto,
            lsb_depth: MAX_LSB_DEPTH,
            comfort_noise_interval_ms: None,
        }
    }
}

impl EncoderConfig {
    /// Default configuration for the given input format.
    pub fn new(sample_rate: u32, channels: usize) -> Result<Self, ConfigError> {
        if !SUPPORTED_SAMPLE_RATES.contains(&sample_rate) {
            return Err(ConfigError::InvalidSampleRate(sample_rate));
        }
        if channels != 1 && channels != 2 {
            return Err(ConfigError::InvalidChannels(channels));
        }
        Ok(Self {
            sample_rate,
            channels,
            ..Self::default()
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn mode(&self) -> CodingMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: CodingMode) {
        self.mode = mode;
    }

    pub fn bandwidth(&self) -> Bandwidth {
        self.bandwidth
    }

    pub fn set_bandwidth(&mut self, bandwidth: Bandwidth) {
        self.bandwidth = bandwidth;
    }

    pub fn max_bandwidth(&self) -> Bandwidth {
        self.max_bandwidth
    }

    /// Upper limit on the coded bandwidth. Does not change the requested
    /// bandwidth, only what [`Self::effective_bandwidth`] reports.
    pub fn set_max_bandwidth(&mut self, bandwidth: Bandwidth) {
        self.max_bandwidth = bandwidth;
    }

    /// Bandwidth frames are coded at: narrowband for an LFE channel,
    /// otherwise the requested bandwidth capped by the maximum.
    pub fn effective_bandwidth(&self) -> Bandwidth {
        if self.lfe {
            Bandwidth::Narrow
        } else {
            self.bandwidth.min(self.max_bandwidth)
        }
    }

    pub fn force_channels(&self) -> Option<usize> {
        self.force_channels
    }

    /// Forces stereo input to be coded as a mono (`Some(1)`) or stereo
    /// (`Some(2)`) stream. `None` codes the input channel count.
    pub fn set_force_channels(&mut self, channels: Option<usize>) -> Result<(), ConfigError> {
        match channels {
            Some(n) if n != 1 && n != 2 => Err(ConfigError::InvalidChannels(n)),
            _ => {
                self.force_channels = channels;
                Ok(())
            }
        }
    }

    /// Channels in the coded stream. Forcing only applies to stereo input.
    pub fn stream_channels(&self) -> usize {
        match self.force_channels {
            Some(n) if self.channels == 2 => n,
            _ => self.channels,
        }
    }

    /// Frame size in samples at 48 kHz.
    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    pub fn set_frame_size(&mut self, frame_size: usize) {
        self.frame_size = frame_size;
    }

    pub fn bitrate(&self) -> i32 {
        self.bitrate
    }

    pub fn set_bitrate(&mut self, bitrate: i32) {
        self.bitrate = bitrate.clamp(MIN_BITRATE_BPS, MAX_BITRATE_BPS);
    }

    pub fn bitrate_mode(&self) -> BitrateMode {
        self.bitrate_mode
    }

    pub fn set_bitrate_mode(&mut self, bitrate_mode: BitrateMode) {
        self.bitrate_mode = bitrate_mode;
    }

    pub fn complexity(&self) -> i32 {
        self.complexity
    }

    pub fn set_complexity(&mut self, complexity: i32) {
        self.complexity = complexity.clamp(0, MAX_COMPLEXITY);
    }

    pub fn fec(&self) -> bool {
        self.fec
    }

    pub fn set_fec(&mut self, enabled: bool) {
        self.fec = enabled;
    }

    pub fn packet_loss_perc(&self) -> i32 {
        self.packet_loss_perc
    }

    pub fn set_packet_loss_perc(&mut self, percent: i32) {
        self.packet_loss_perc = percent.clamp(0, MAX_PACKET_LOSS_PERC);
    }

    pub fn dtx(&self) -> bool {
        self.dtx
    }

    pub fn set_dtx(&mut self, enabled: bool) {
        self.dtx = enabled;
    }

    pub fn lfe(&self) -> bool {
        self.lfe
    }

    pub fn set_lfe(&mut self, enabled: bool) {
        self.lfe = enabled;
    }

    pub fn prediction_disabled(&self) -> bool {
        self.prediction_disabled
    }

    pub fn set_prediction_disabled(&mut self, disabled: bool) {
        self.prediction_disabled = disabled;
    }

    pub fn signal(&self) -> SignalHint {
        self.signal
    }

    pub fn set_signal(&mut self, signal: SignalHint) {
        self.signal = signal;
    }

    pub fn lsb_depth(&self) -> i32 {
        self.lsb_depth
    }

    pub fn set_lsb_depth(&mut self, depth: i32) {
        self.lsb_depth = depth.clamp(MIN_LSB_DEPTH, MAX_LSB_DEPTH);
    }

    pub fn comfort_noise_interval_ms(&self) -> Option<u32> {
        self.comfort_noise_interval_ms
    }

    /// `None` or `Some(0)` disables comfort-noise packets during DTX.
    pub fn set_comfort_noise_interval_ms(&mut self, interval: Option<u32>) {
        self.comfort_noise_interval_ms = interval.filter(|&ms| ms > 0);
    }

    /// Input samples per channel for one frame at the configured rate.
    pub fn samples_per_channel(&self) -> usize {
        self.frame_size * self.sample_rate as usize / 48_000
    }

    /// Re-checks the input format and passes every numeric field through
    /// its setter. Used for configs built outside the setters.
    pub fn validated(self) -> Result<Self, ConfigError> {
        let mut cfg = Self::new(self.sample_rate, self.channels)?;
        cfg.set_mode(self.mode);
        cfg.set_bandwidth(self.bandwidth);
        cfg.set_max_bandwidth(self.max_bandwidth);
        cfg.set_force_channels(self.force_channels)?;
        cfg.set_frame_size(self.frame_size);
        cfg.set_bitrate(self.bitrate);
        cfg.set_bitrate_mode(self.bitrate_mode);
        cfg.set_complexity(self.complexity);
        cfg.set_fec(self.fec);
        cfg.set_packet_loss_perc(self.packet_loss_perc);
        cfg.set_dtx(self.dtx);
        cfg.set_lfe(self.lfe);
        cfg.set_prediction_disabled(self.prediction_disabled);
        cfg.set_signal(self.signal);
        cfg.set_lsb_depth(self.lsb_depth);
        cfg.set_comfort_noise_interval_ms(self.comfort_noise_interval_ms);
        Ok(cfg)
    }
}

/// Field-for-field image of [`EncoderConfig`] that serde fills in before
/// [`EncoderConfig::validated`] runs.
#[cfg(feature = "serde")]
#[derive(serde::Deserialize)]
struct UncheckedConfig {
    sample_rate: u32,
    channels: usize,
    mode: CodingMode,
    bandwidth: Bandwidth,
    max_bandwidth: Bandwidth,
    force_channels: Option<usize>,
    frame_size: usize,
    bitrate: i32,
    bitrate_mode: BitrateMode,
    complexity: i32,
    fec: bool,
    packet_loss_perc: i32,
    dtx: bool,
    lfe: bool,
    prediction_disabled: bool,
    signal: SignalHint,
    lsb_depth: i32,
    comfort_noise_interval_ms: Option<u32>,
}

#[cfg(feature = "serde")]
impl TryFrom<UncheckedConfig> for EncoderConfig {
    type Error = ConfigError;

    fn try_from(raw: UncheckedConfig) -> Result<Self, Self::Error> {
        Self {
            sample_rate: raw.sample_rate,
            channels: raw.channels,
            mode: raw.mode,
            bandwidth: raw.bandwidth,
            max_bandwidth: raw.max_bandwidth,
            force_channels: raw.force_channels,
            frame_size: raw.frame_size,
            bitrate: raw.bitrate,
            bitrate_mode: raw.bitrate_mode,
            complexity: raw.complexity,
            fec: raw.fec,
            packet_loss_perc: raw.packet_loss_perc,
            dtx: raw.dtx,
            lfe: raw.lfe,
            prediction_disabled: raw.prediction_disabled,
            signal: raw.signal,
            lsb_depth: raw.lsb_depth,
            comfort_noise_interval_ms: raw.comfort_noise_interval_ms,
        }
        .validated()
    }
}
