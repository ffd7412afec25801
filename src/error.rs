//! Error types returned by the encoder control plane.

use thiserror::Error;

use crate::config::CodingMode;
use crate::packet::PacketError;
use crate::repacketizer::RepacketizerError;

/// Which sub-encoder reported a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoderKind {
    Speech,
    Transform,
}

/// Failure reported by a sub-encoder. It is passed to the caller unchanged
/// inside [`EncodeError::SubEncoderFailure`].
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("{kind:?} coder failed with code {code}: {reason}")]
pub struct CoderError {
    pub kind: CoderKind,
    pub code: i32,
    pub reason: &'static str,
}

impl CoderError {
    #[must_use]
    pub const fn new(kind: CoderKind, code: i32, reason: &'static str) -> Self {
        Self { kind, code, reason }
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unsupported sample rate {0} Hz")]
    InvalidSampleRate(u32),
    #[error("unsupported channel count {0}")]
    InvalidChannels(usize),
}

impl ConfigError {
    #[inline]
    pub const fn code(self) -> i32 {
        -1
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EncodeError {
    #[error("frame size {frame_size} is not valid for {mode:?} mode")]
    InvalidFrameSize { frame_size: usize, mode: CodingMode },
    #[error("expected {expected} input samples, got {actual}")]
    InvalidInputLength { expected: usize, actual: usize },
    #[error("sub-encoder failure: {0}")]
    SubEncoderFailure(CoderError),
    #[error("output buffer too small: need {needed} bytes, have {available}")]
    BufferTooSmall { needed: usize, available: usize },
    #[error("constant-bitrate packet of {produced} bytes exceeds target {target}")]
    CbrOverflow { produced: usize, target: usize },
    #[error(transparent)]
    Packet(#[from] PacketError),
    #[error(transparent)]
    Repacketizer(#[from] RepacketizerError),
}

impl EncodeError {
    #[inline]
    pub const fn code(&self) -> i32 {
        match self {
            Self::InvalidFrameSize { .. } | Self::InvalidInputLength { .. } => -1,
            Self::BufferTooSmall { .. } => -2,
            Self::SubEncoderFailure(_) | Self::CbrOverflow { .. } => -3,
            Self::Packet(err) => err.code(),
            Self::Repacketizer(err) => err.code(),
        }
    }
}

impl From<CoderError> for EncodeError {
    #[inline]
    fn from(value: CoderError) -> Self {
        Self::SubEncoderFailure(value)
    }
}
