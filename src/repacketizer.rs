//! Re-framing of packets: merging frames from several packets, padding a
//! packet up to an exact size and stripping padding again.

use alloc::vec::Vec;

use thiserror::Error;

use crate::packet::{
    Code3Flags, FrameCountCode, MAX_FRAMES_PER_PACKET, MAX_PACKET_SAMPLES_48K, PacketError,
    encode_frame_length, frame_length_bytes, packet_frame_count, parse_packet, samples_per_frame,
};

/// Errors surfaced by the repacketizer helpers, mirroring the reference codes.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RepacketizerError {
    #[error("bad argument")]
    BadArgument,
    #[error("output buffer too small")]
    BufferTooSmall,
    #[error("internal error")]
    InternalError,
    #[error("invalid packet")]
    InvalidPacket,
}

impl RepacketizerError {
    #[inline]
    pub const fn code(self) -> i32 {
        match self {
            RepacketizerError::BadArgument => -1,
            RepacketizerError::BufferTooSmall => -2,
            RepacketizerError::InternalError => -3,
            RepacketizerError::InvalidPacket => -4,
        }
    }
}

impl From<PacketError> for RepacketizerError {
    #[inline]
    fn from(_: PacketError) -> Self {
        RepacketizerError::InvalidPacket
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct Frame {
    start: usize,
    len: usize,
}

/// Collects frames sharing one TOC configuration and writes them back out as
/// a single packet.
#[derive(Debug, Clone)]
pub struct Repacketizer {
    toc: u8,
    nb_frames: usize,
    frames: [Frame; MAX_FRAMES_PER_PACKET],
    framesize: usize,
    buffer: Vec<u8>,
}

impl Default for Repacketizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Repacketizer {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Repacketizer {
            toc: 0,
            nb_frames: 0,
            frames: [Frame::default(); MAX_FRAMES_PER_PACKET],
            framesize: 0,
            buffer: Vec::new(),
        }
    }

    /// Drops every collected frame.
    pub fn clear(&mut self) {
        self.nb_frames = 0;
        self.framesize = 0;
        self.buffer.clear();
    }

    #[inline]
    #[must_use]
    pub fn frame_count(&self) -> usize {
        self.nb_frames
    }

    /// Appends the frames of `data`. The packet must share the TOC
    /// configuration and stereo flag of the packets already collected, and
    /// the total duration may not exceed 120 ms. Padding is discarded.
    pub fn push(&mut self, data: &[u8]) -> Result<(), RepacketizerError> {
        let Some(&toc) = data.first() else {
            return Err(RepacketizerError::InvalidPacket);
        };
        let framesize = if self.nb_frames == 0 {
            samples_per_frame(toc, 48_000) as usize
        } else if (self.toc & 0xFC) != (toc & 0xFC) {
            return Err(RepacketizerError::InvalidPacket);
        } else {
            self.framesize
        };

        let incoming = packet_frame_count(data)?;
        if (incoming + self.nb_frames) * framesize > MAX_PACKET_SAMPLES_48K {
            return Err(RepacketizerError::InvalidPacket);
        }

        let parsed = parse_packet(data)?;
        if self.nb_frames == 0 {
            self.toc = toc;
            self.framesize = framesize;
        }
        let base = self.buffer.len();
        self.buffer.extend_from_slice(&data[..parsed.packet_len]);
        for index in 0..parsed.frame_count {
            self.frames[self.nb_frames + index] = Frame {
                start: base + parsed.frame_offsets[index],
                len: usize::from(parsed.frame_sizes[index]),
            };
        }
        self.nb_frames += parsed.frame_count;
        Ok(())
    }

    /// Writes every collected frame to `data`, using at most `maxlen` bytes.
    pub fn emit(&self, data: &mut [u8], maxlen: usize) -> Result<usize, RepacketizerError> {
        self.emit_range_impl(0, self.nb_frames, data, maxlen, false)
    }

    /// Writes frames `begin..end` to `data`, using at most `maxlen` bytes.
    pub fn emit_range(
        &self,
        begin: usize,
        end: usize,
        data: &mut [u8],
        maxlen: usize,
    ) -> Result<usize, RepacketizerError> {
        self.emit_range_impl(begin, end, data, maxlen, false)
    }

    fn emit_range_impl(
        &self,
        begin: usize,
        end: usize,
        data: &mut [u8],
        maxlen: usize,
        pad: bool,
    ) -> Result<usize, RepacketizerError> {
        if begin >= end || end > self.nb_frames {
            return Err(RepacketizerError::BadArgument);
        }
        let maxlen = maxlen.min(data.len());

        let count = end - begin;
        let frames = &self.frames[begin..end];
        let first_len = frames[0].len;
        let last_len = frames[count - 1].len;

        let mut ptr = 0usize;
        let mut tot_size;

        if count == 1 {
            tot_size = first_len + 1;
            if tot_size > maxlen {
                return Err(RepacketizerError::BufferTooSmall);
            }
            data[ptr] = self.toc & 0xFC;
            ptr += 1;
        } else if count == 2 {
            let second_len = frames[1].len;
            if second_len == first_len {
                tot_size = 2 * first_len + 1;
                if tot_size > maxlen {
                    return Err(RepacketizerError::BufferTooSmall);
                }
                data[ptr] = (self.toc & 0xFC) | FrameCountCode::DoubleEqual as u8;
                ptr += 1;
            } else {
                tot_size = first_len + second_len + 1 + frame_length_bytes(first_len);
                if tot_size > maxlen {
                    return Err(RepacketizerError::BufferTooSmall);
                }
                data[ptr] = (self.toc & 0xFC) | FrameCountCode::DoubleDifferent as u8;
                ptr += 1;
                ptr += encode_frame_length(first_len, &mut data[ptr..]);
            }
        } else {
            tot_size = 0;
        }

        if count > 2 || (pad && tot_size < maxlen) {
            // Code 3, possibly padded; restart the header.
            ptr = 0;
            let vbr = frames.iter().skip(1).any(|frame| frame.len != first_len);

            let mut flags = Code3Flags::empty();
            if vbr {
                flags |= Code3Flags::VBR;
                tot_size = 2 + last_len;
                for frame in &frames[..count - 1] {
                    tot_size += frame_length_bytes(frame.len) + frame.len;
                }
            } else {
                tot_size = count * first_len + 2;
            }
            if tot_size > maxlen {
                return Err(RepacketizerError::BufferTooSmall);
            }

            let pad_amount = if pad { maxlen - tot_size } else { 0 };
            if pad_amount != 0 {
                flags |= Code3Flags::PADDING;
            }
            data[ptr] = (self.toc & 0xFC) | FrameCountCode::Arbitrary as u8;
            data[ptr + 1] = count as u8 | flags.bits();
            ptr += 2;

            if pad_amount != 0 {
                // Each 255 byte stands for 254 padding bytes plus itself.
                let nb_255s = (pad_amount - 1) / 255;
                data[ptr..ptr + nb_255s].fill(255);
                ptr += nb_255s;
                data[ptr] = (pad_amount - 255 * nb_255s - 1) as u8;
                ptr += 1;
                tot_size += pad_amount;
            }

            if vbr {
                for frame in &frames[..count - 1] {
                    ptr += encode_frame_length(frame.len, &mut data[ptr..]);
                }
            }
        }

        for frame in frames {
            let src = self
                .buffer
                .get(frame.start..frame.start + frame.len)
                .ok_or(RepacketizerError::InternalError)?;
            data[ptr..ptr + frame.len].copy_from_slice(src);
            ptr += frame.len;
        }

        if pad {
            data[ptr..tot_size].fill(0);
        }

        Ok(tot_size)
    }
}

/// Pads the `len`-byte packet at the start of `data` to exactly `new_len`
/// bytes by re-framing it as a padded code 3 packet.
pub fn pad_packet(data: &mut [u8], len: usize, new_len: usize) -> Result<(), RepacketizerError> {
    if len < 1 || len > data.len() {
        return Err(RepacketizerError::BadArgument);
    }
    if len == new_len {
        return Ok(());
    }
    if len > new_len || new_len > data.len() {
        return Err(RepacketizerError::BadArgument);
    }

    let mut rp = Repacketizer::new();
    rp.push(&data[..len])?;
    let written = rp.emit_range_impl(0, rp.nb_frames, data, new_len, true)?;
    if written == new_len {
        Ok(())
    } else {
        Err(RepacketizerError::InternalError)
    }
}

/// Removes all padding from the `len`-byte packet at the start of `data`,
/// returning the new length.
pub fn unpad_packet(data: &mut [u8], len: usize) -> Result<usize, RepacketizerError> {
    if len < 1 || len > data.len() {
        return Err(RepacketizerError::BadArgument);
    }
    let mut rp = Repacketizer::new();
    rp.push(&data[..len])?;
    let written = rp.emit_range_impl(0, rp.nb_frames, data, len, false)?;
    debug_assert!(written <= len);
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn single_frame_round_trips() {
        let mut rp = Repacketizer::new();
        let packet = [0x08u8, 0xAA, 0xBB];
        rp.push(&packet).expect("push");
        let mut out = [0u8; 8];
        let written = rp.emit(&mut out, 8).expect("emit");
        assert_eq!(&out[..written], &packet);
    }

    #[test]
    fn merges_equal_and_unequal_frames() {
        let mut rp = Repacketizer::new();
        rp.push(&[0x08, 1, 2]).expect("first");
        rp.push(&[0x08, 3, 4]).expect("second");
        let mut out = [0u8; 16];
        let written = rp.emit(&mut out, 16).expect("emit");
        assert_eq!(&out[..written], &[0x09, 1, 2, 3, 4]);

        rp.push(&[0x08, 5]).expect("third");
        let written = rp.emit(&mut out, 16).expect("emit");
        assert_eq!(&out[..written], &[0x0B, 0x83, 2, 2, 1, 2, 3, 4, 5]);

        let written = rp.emit_range(1, 3, &mut out, 16).expect("range");
        assert_eq!(&out[..written], &[0x0A, 2, 3, 4, 5]);
    }

    #[test]
    fn rejects_mismatched_configuration_and_overlong_packets() {
        let mut rp = Repacketizer::new();
        assert_eq!(rp.push(&[]), Err(RepacketizerError::InvalidPacket));
        rp.push(&[0x08, 1]).expect("first");
        assert_eq!(rp.push(&[0x0C, 1]), Err(RepacketizerError::InvalidPacket));

        // 60 ms SILK frames: a third packet would reach 180 ms.
        let mut rp = Repacketizer::new();
        rp.push(&[0x18, 1]).expect("60 ms");
        rp.push(&[0x18, 2]).expect("120 ms");
        assert_eq!(rp.push(&[0x18, 3]), Err(RepacketizerError::InvalidPacket));
    }

    #[test]
    fn emit_reports_small_buffers() {
        let mut rp = Repacketizer::new();
        rp.push(&[0x08, 1, 2, 3]).expect("push");
        let mut out = [0u8; 3];
        assert_eq!(rp.emit(&mut out, 3), Err(RepacketizerError::BufferTooSmall));
        assert_eq!(rp.emit_range(0, 2, &mut out, 3), Err(RepacketizerError::BadArgument));
    }

    #[test]
    fn pad_then_unpad_restores_frames() {
        let mut data = vec![0u8; 600];
        data[..4].copy_from_slice(&[0x08, 7, 8, 9]);
        pad_packet(&mut data, 4, 600).expect("pad");
        let parsed = parse_packet(&data).expect("padded packet parses");
        assert_eq!(parsed.packet_len, 600);
        assert_eq!(parsed.frame(&data, 0), &[7, 8, 9]);
        // 600 - 5 = 595 padding units: two 255 bytes, then 595 - 510 - 1.
        assert_eq!(&data[..5], &[0x0B, 0x41, 255, 255, 84]);

        let len = unpad_packet(&mut data, 600).expect("unpad");
        assert_eq!(&data[..len], &[0x08, 7, 8, 9]);
    }

    #[test]
    fn pad_by_one_drops_the_padding_flag() {
        let mut data = [0x08u8, 1, 2, 3, 0];
        pad_packet(&mut data, 4, 5).expect("pad");
        assert_eq!(data, [0x0B, 0x01, 1, 2, 3]);
    }

    #[test]
    fn pad_rejects_shrinking() {
        let mut data = [0x08u8, 1, 2, 3];
        assert_eq!(pad_packet(&mut data, 4, 3), Err(RepacketizerError::BadArgument));
        assert_eq!(pad_packet(&mut data, 4, 4), Ok(()));
        assert_eq!(pad_packet(&mut data, 4, 9), Err(RepacketizerError::BadArgument));
    }
}
