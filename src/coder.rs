//! Seams to the perceptual sub-encoders.
//!
//! The control plane never looks inside a coded frame. It hands each coder a
//! [`FrameRequest`] describing the frame and its byte budget plus a
//! [`RangeEncoder`] to write into, and reads back only the byte count.

use crate::config::BitrateMode;
use crate::error::CoderError;
use crate::packet::{Bandwidth, Mode};
use crate::range::RangeEncoder;

/// Low-bitrate redundant copy of the previous frame, requested from the
/// speech coder when in-band FEC is scheduled.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LbrrRequest<'a> {
    /// Previous frame, interleaved at the input rate.
    pub pcm: &'a [f32],
    pub bitrate: i32,
    /// Whether the previous frame was voice-active.
    pub was_active: bool,
}

/// Everything a sub-encoder needs to code one atomic frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameRequest<'a> {
    /// Interleaved samples for this frame at `sample_rate`.
    pub pcm: &'a [f32],
    /// Frame size in samples at 48 kHz.
    pub frame_size: usize,
    /// Interleaved channels in `pcm`.
    pub channels: usize,
    /// Channels to code. 1 when stereo input is forced to a mono stream.
    pub stream_channels: usize,
    pub sample_rate: u32,
    /// Mode of the packet the frame belongs to. Lets the transform coder
    /// skip the low band in hybrid packets.
    pub mode: Mode,
    /// Bitrate share for this coder, in bits per second.
    pub bitrate: i32,
    pub bandwidth: Bandwidth,
    /// Bytes the frame may occupy in the range encoder.
    pub max_bytes: usize,
    pub complexity: i32,
    pub bitrate_mode: BitrateMode,
    pub prediction_disabled: bool,
    /// VAD speech activity in Q8.
    pub vad_activity_q8: u8,
    pub voice_active: bool,
    pub lbrr: Option<LbrrRequest<'a>>,
}

/// Linear-prediction speech coder.
pub trait SpeechCoder {
    fn encode(
        &mut self,
        request: &FrameRequest<'_>,
        enc: &mut RangeEncoder,
    ) -> Result<(), CoderError>;

    fn reset(&mut self);
}

/// MDCT transform coder.
pub trait TransformCoder {
    fn encode(
        &mut self,
        request: &FrameRequest<'_>,
        enc: &mut RangeEncoder,
    ) -> Result<(), CoderError>;

    fn reset(&mut self);
}

impl<T: SpeechCoder + ?Sized> SpeechCoder for &mut T {
    fn encode(
        &mut self,
        request: &FrameRequest<'_>,
        enc: &mut RangeEncoder,
    ) -> Result<(), CoderError> {
        (**self).encode(request, enc)
    }

    fn reset(&mut self) {
        (**self).reset();
    }
}

impl<T: TransformCoder + ?Sized> TransformCoder for &mut T {
    fn encode(
        &mut self,
        request: &FrameRequest<'_>,
        enc: &mut RangeEncoder,
    ) -> Result<(), CoderError> {
        (**self).encode(request, enc)
    }

    fn reset(&mut self) {
        (**self).reset();
    }
}
