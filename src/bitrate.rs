//! Bitrate targets and packet-size conformance.
//!
//! The sub-encoders are given a byte budget derived from the configured
//! bitrate. Once a packet is assembled, [`conform`] enforces the bitrate
//! mode on its final size by padding through the repacketizer.

use crate::config::BitrateMode;
use crate::error::EncodeError;
use crate::packet::{Bandwidth, MAX_FRAME_BYTES, Mode};
use crate::repacketizer::pad_packet;

/// CVBR lower bound, percent of target.
pub const CVBR_LOWER_PERCENT: usize = 85;
/// CVBR upper bound, percent of target.
pub const CVBR_UPPER_PERCENT: usize = 115;

const SILK_RATE_TABLE: [[i32; 5]; 7] = [
    [0, 0, 0, 0, 0],
    [12_000, 10_000, 10_000, 11_000, 11_000],
    [16_000, 13_500, 13_500, 15_000, 15_000],
    [20_000, 16_000, 16_000, 18_000, 18_000],
    [24_000, 18_000, 18_000, 21_000, 21_000],
    [32_000, 22_000, 22_000, 28_000, 28_000],
    [64_000, 38_000, 38_000, 50_000, 50_000],
];

/// Packet size in bytes for `bitrate` over a frame of whole milliseconds.
#[inline]
#[must_use]
pub fn target_bytes(bitrate: i32, frame_duration_ms: u32) -> usize {
    (i64::from(bitrate.max(0)) * i64::from(frame_duration_ms) / 8_000) as usize
}

/// Packet size in bytes for `bitrate` over `frame_size` samples at 48 kHz.
/// Exact for 2.5 ms frames, where [`target_bytes`] cannot be used.
#[inline]
#[must_use]
pub fn target_bytes_for_frame(bitrate: i32, frame_size: usize) -> usize {
    (i64::from(bitrate.max(0)) * frame_size as i64 / (8 * 48_000)) as usize
}

/// `(lower, upper)` sizes a CVBR packet should land within.
#[inline]
#[must_use]
pub fn cvbr_bounds(target: usize) -> (usize, usize) {
    (
        target * CVBR_LOWER_PERCENT / 100,
        (target * CVBR_UPPER_PERCENT).div_ceil(100),
    )
}

/// Pads the `len`-byte packet at the start of `buf` to exactly `target`
/// bytes and returns the new length.
///
/// The packet comes back unchanged when it is already at least `target`
/// bytes, or when it cannot be re-framed to that size.
pub fn pad_to_size(buf: &mut [u8], len: usize, target: usize) -> usize {
    if len == 0 || len >= target || target > buf.len() {
        return len;
    }
    match pad_packet(buf, len, target) {
        Ok(()) => target,
        Err(err) => {
            log::trace!("cannot pad {len} byte packet to {target}: {err}");
            len
        }
    }
}

/// Applies `mode` to the `len`-byte packet in `buf`. Returns the final size.
pub fn conform(
    mode: BitrateMode,
    buf: &mut [u8],
    len: usize,
    target: usize,
) -> Result<usize, EncodeError> {
    match mode {
        BitrateMode::Vbr => Ok(len),
        BitrateMode::Cbr => {
            if len > target {
                return Err(EncodeError::CbrOverflow {
                    produced: len,
                    target,
                });
            }
            if target > buf.len() {
                return Err(EncodeError::BufferTooSmall {
                    needed: target,
                    available: buf.len(),
                });
            }
            let padded = pad_to_size(buf, len, target);
            if padded != target {
                return Err(EncodeError::CbrOverflow {
                    produced: padded,
                    target,
                });
            }
            Ok(padded)
        }
        BitrateMode::Cvbr => {
            let (lower, _) = cvbr_bounds(target);
            if len < lower {
                Ok(pad_to_size(buf, len, lower.min(buf.len())))
            } else {
                Ok(len)
            }
        }
    }
}

/// Bytes a sub-encoder may spend on each of `frames` frames in a packet
/// with `header` bytes of framing overhead.
#[must_use]
pub fn sub_encoder_budget(
    mode: BitrateMode,
    target: usize,
    out_len: usize,
    header: usize,
    frames: usize,
) -> usize {
    let total = match mode {
        BitrateMode::Cbr => target,
        BitrateMode::Cvbr => cvbr_bounds(target).1,
        BitrateMode::Vbr => out_len,
    };
    let frames = frames.max(1);
    (total.min(out_len).saturating_sub(header) / frames).min(MAX_FRAME_BYTES)
}

/// Drops trailing zero bytes from a speech-coder payload, keeping at least
/// two bytes.
#[must_use]
pub fn strip_trailing_zeros(payload: &[u8]) -> &[u8] {
    let mut len = payload.len();
    while len > 2 && payload[len - 1] == 0 {
        len -= 1;
    }
    &payload[..len]
}

/// Bitrate adjusted for framing overhead, VBR, complexity and loss, as used
/// by the mode thresholds. `mode` is `None` before a mode is known.
#[must_use]
pub fn compute_equiv_rate(
    bitrate: i32,
    channels: usize,
    frame_rate: i32,
    vbr: bool,
    mode: Option<Mode>,
    complexity: i32,
    loss: i32,
) -> i32 {
    let channels = channels as i32;
    let mut equiv = i64::from(bitrate);
    if frame_rate > 50 {
        equiv -= i64::from((40 * channels + 20) * (frame_rate - 50));
    }
    if !vbr {
        equiv -= equiv / 12;
    }
    equiv = equiv * i64::from(90 + complexity) / 100;
    match mode {
        Some(Mode::Silk | Mode::Hybrid) => {
            if complexity < 2 {
                equiv = equiv * 4 / 5;
            }
            equiv -= equiv * i64::from(loss) / i64::from(6 * loss + 10);
        }
        Some(Mode::Celt) => {
            if complexity < 5 {
                equiv = equiv * 9 / 10;
            }
        }
        None => {
            equiv -= equiv * i64::from(loss) / i64::from(12 * loss + 20);
        }
    }
    equiv.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
}

/// Share of a hybrid packet's bitrate given to the speech coder.
#[must_use]
pub fn compute_silk_rate_for_hybrid(
    rate: i32,
    bandwidth: Bandwidth,
    frame_20ms: bool,
    vbr: bool,
    fec: bool,
    channels: usize,
) -> i32 {
    let channels = channels.max(1) as i32;
    let rate = rate / channels;
    let entry = 1 + usize::from(frame_20ms) + 2 * usize::from(fec);

    let mut idx = 1;
    while idx < SILK_RATE_TABLE.len() && SILK_RATE_TABLE[idx][0] <= rate {
        idx += 1;
    }

    let mut silk_rate = if idx == SILK_RATE_TABLE.len() {
        let base = SILK_RATE_TABLE[idx - 1][entry];
        base + (rate - SILK_RATE_TABLE[idx - 1][0]) / 2
    } else {
        let lo = SILK_RATE_TABLE[idx - 1][entry];
        let hi = SILK_RATE_TABLE[idx][entry];
        let x0 = SILK_RATE_TABLE[idx - 1][0];
        let x1 = SILK_RATE_TABLE[idx][0];
        let num = i64::from(lo) * i64::from(x1 - rate) + i64::from(hi) * i64::from(rate - x0);
        (num / i64::from(x1 - x0)) as i32
    };

    if !vbr {
        silk_rate += 100;
    }
    if bandwidth == Bandwidth::SuperWide {
        silk_rate += 300;
    }
    silk_rate *= channels;
    if channels == 2 && rate >= 12_000 {
        silk_rate -= 1_000;
    }
    silk_rate
}
