#![allow(dead_code)]

use std::f32::consts::PI;

use opus_control_plane::coder::{FrameRequest, SpeechCoder, TransformCoder};
use opus_control_plane::range::RangeEncoder;
use opus_control_plane::{Bandwidth, CoderError, Mode, OpusEncoder};

pub const MAX_PACKET: usize = 1500;

/// What a fake coder was asked to do on one call.
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub frame_size: usize,
    pub pcm_len: usize,
    pub stream_channels: usize,
    pub mode: Mode,
    pub bandwidth: Bandwidth,
    pub bitrate: i32,
    pub max_bytes: usize,
    pub vad_activity_q8: u8,
    pub voice_active: bool,
    pub lbrr_bitrate: Option<i32>,
    pub lbrr_len: Option<usize>,
    pub lbrr_was_active: Option<bool>,
}

impl From<&FrameRequest<'_>> for Call {
    fn from(request: &FrameRequest<'_>) -> Self {
        Self {
            frame_size: request.frame_size,
            pcm_len: request.pcm.len(),
            stream_channels: request.stream_channels,
            mode: request.mode,
            bandwidth: request.bandwidth,
            bitrate: request.bitrate,
            max_bytes: request.max_bytes,
            vad_activity_q8: request.vad_activity_q8,
            voice_active: request.voice_active,
            lbrr_bitrate: request.lbrr.map(|lbrr| lbrr.bitrate),
            lbrr_len: request.lbrr.map(|lbrr| lbrr.pcm.len()),
            lbrr_was_active: request.lbrr.map(|lbrr| lbrr.was_active),
        }
    }
}

/// Stand-in sub-encoder writing a fixed number of raw bytes per call,
/// capped by what is left of the budget it is given.
#[derive(Debug, Default)]
pub struct FakeCoder {
    /// Bytes per call, cycled.
    pub sizes: Vec<usize>,
    pub calls: Vec<Call>,
    pub fail: Option<CoderError>,
    /// Write every byte even past the budget.
    pub ignore_budget: bool,
    pub resets: usize,
}

impl FakeCoder {
    pub fn fixed(len: usize) -> Self {
        Self::with_sizes(vec![len])
    }

    pub fn with_sizes(sizes: Vec<usize>) -> Self {
        Self {
            sizes,
            ..Self::default()
        }
    }

    fn code(&mut self, request: &FrameRequest<'_>, enc: &mut RangeEncoder) -> Result<(), CoderError> {
        if let Some(err) = self.fail {
            return Err(err);
        }
        let len = match self.sizes.len() {
            0 => 0,
            n => self.sizes[self.calls.len() % n],
        };
        self.calls.push(Call::from(request));
        // Only raw bytes are ever written, so whole bytes used are tell / 8.
        let used = (enc.tell().max(1) as usize - 1) / 8;
        let len = if self.ignore_budget {
            len
        } else {
            len.min(request.max_bytes.saturating_sub(used))
        };
        for _ in 0..len {
            enc.enc_bits(0x5A, 8);
        }
        Ok(())
    }
}

impl SpeechCoder for FakeCoder {
    fn encode(&mut self, request: &FrameRequest<'_>, enc: &mut RangeEncoder) -> Result<(), CoderError> {
        self.code(request, enc)
    }

    fn reset(&mut self) {
        self.resets += 1;
    }
}

impl TransformCoder for FakeCoder {
    fn encode(&mut self, request: &FrameRequest<'_>, enc: &mut RangeEncoder) -> Result<(), CoderError> {
        self.code(request, enc)
    }

    fn reset(&mut self) {
        self.resets += 1;
    }
}

pub type TestEncoder = OpusEncoder<FakeCoder, FakeCoder>;

pub fn encoder(sample_rate: u32, channels: usize, len: usize) -> TestEncoder {
    OpusEncoder::new(sample_rate, channels, FakeCoder::fixed(len), FakeCoder::fixed(len))
        .expect("valid format")
}

/// Interleaved sine at 440 Hz, one value copied to every channel.
pub fn tone(enc: &TestEncoder, amplitude: f32) -> Vec<f32> {
    let samples = enc.config().samples_per_channel();
    let channels = enc.channels();
    let rate = enc.sample_rate() as f32;
    (0..samples)
        .flat_map(|n| {
            let s = amplitude * (2.0 * PI * 440.0 * n as f32 / rate).sin();
            std::iter::repeat_n(s, channels)
        })
        .collect()
}

pub fn silence(enc: &TestEncoder) -> Vec<f32> {
    vec![0.0; enc.config().samples_per_channel() * enc.channels()]
}
