#![no_std]

extern crate alloc;

pub mod analysis;
pub mod bitrate;
pub mod coder;
pub mod config;
pub mod dtx;
pub mod error;
pub mod fec;
pub mod mode;
pub mod opus_encoder;
pub mod packet;
pub mod range;
pub mod repacketizer;
pub mod signal;
pub mod silk;

pub use config::{BitrateMode, CodingMode, EncoderConfig, SignalHint};
pub use error::{CoderError, CoderKind, ConfigError, EncodeError};
pub use opus_encoder::OpusEncoder;
pub use packet::{Bandwidth, Mode};
