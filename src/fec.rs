//! In-band forward error correction scheduling.
//!
//! The speech coder can append a low-bitrate redundant (LBRR) copy of the
//! previous frame to the current packet. [`FecState`] retains the previous
//! frame and answers whether that copy should be coded. [`decide_fec`] is
//! the rate gate: LBRR is only worth its bits above a per-bandwidth rate.

use alloc::vec::Vec;

use crate::packet::{Bandwidth, Mode};

/// Floor of the bitrate given to the redundant copy.
pub const MIN_REDUNDANCY_BITRATE: i32 = 6_000;

// Rate threshold and hysteresis per bandwidth, narrowband first.
const FEC_THRESHOLDS: [i32; 10] = [
    12_000, 1_000, 14_000, 1_000, 16_000, 1_000, 20_000, 1_000, 22_000, 1_000,
];
// 0.01 in Q16.
const FEC_RATE_SCALE_Q16: i32 = 655;

#[derive(Debug, Clone, Default)]
pub struct FecState {
    prev_frame: Option<Vec<f32>>,
    prev_voice_active: bool,
    frame_count: u64,
}

impl FecState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.prev_frame = None;
        self.prev_voice_active = false;
    }

    /// Whether an LBRR copy of the retained frame should go into the next
    /// packet.
    #[must_use]
    pub fn should_encode_redundancy(&self, enabled: bool, packet_loss_perc: i32) -> bool {
        enabled && self.prev_frame.is_some() && packet_loss_perc >= 1
    }

    /// Retains `samples` as the frame a future LBRR copy will describe.
    pub fn record_frame(&mut self, samples: &[f32], was_active: bool) {
        match &mut self.prev_frame {
            Some(buf) if buf.len() == samples.len() => buf.copy_from_slice(samples),
            slot => *slot = Some(samples.to_vec()),
        }
        self.prev_voice_active = was_active;
        self.frame_count += 1;
    }

    #[must_use]
    pub fn previous_frame(&self) -> Option<&[f32]> {
        self.prev_frame.as_deref()
    }

    #[must_use]
    pub fn previous_voice_active(&self) -> bool {
        self.prev_voice_active
    }

    /// Frames recorded since construction.
    #[must_use]
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }
}

/// Bitrate of the redundant copy for a given primary bitrate.
#[inline]
#[must_use]
pub fn redundancy_bitrate(primary: i32) -> i32 {
    (primary * 3 / 5).max(MIN_REDUNDANCY_BITRATE)
}

fn threshold_index(bandwidth: Bandwidth) -> usize {
    match bandwidth {
        Bandwidth::Narrow => 0,
        Bandwidth::Medium => 2,
        Bandwidth::Wide => 4,
        Bandwidth::SuperWide => 6,
        Bandwidth::Full => 8,
    }
}

/// Decides whether LBRR is affordable at `rate`.
///
/// Above 5% loss the bandwidth is narrowed step by step until the threshold
/// is met. When no bandwidth qualifies the original is restored. Transform
/// coder packets never carry LBRR.
pub fn decide_fec(
    enabled: bool,
    packet_loss_perc: i32,
    last_fec: bool,
    mode: Mode,
    bandwidth: &mut Bandwidth,
    rate: i32,
) -> bool {
    if !enabled || packet_loss_perc == 0 || mode == Mode::Celt {
        return false;
    }

    let orig_bandwidth = *bandwidth;
    loop {
        let idx = threshold_index(*bandwidth);
        let hysteresis = FEC_THRESHOLDS[idx + 1];
        let mut threshold = FEC_THRESHOLDS[idx];
        if last_fec {
            threshold -= hysteresis;
        } else {
            threshold += hysteresis;
        }

        let loss_scale = 125 - packet_loss_perc.min(25);
        let scaled =
            (i64::from(threshold) * i64::from(loss_scale) * i64::from(FEC_RATE_SCALE_Q16)) >> 16;
        let threshold = scaled.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32;

        if rate > threshold {
            return true;
        }
        if packet_loss_perc <= 5 {
            return false;
        }
        if *bandwidth > Bandwidth::Narrow {
            *bandwidth = bandwidth.narrower();
        } else {
            break;
        }
    }

    *bandwidth = orig_bandwidth;
    false
}
