//! RFC 6716 packet framing: the TOC byte, frame-length fields and packet
//! parsing.
//!
//! See [section-3](https://datatracker.ietf.org/doc/html/rfc6716#section-3)

use bitflags::bitflags;
use thiserror::Error;

/// Largest compressed frame the framing can describe.
pub const MAX_FRAME_BYTES: usize = 1275;

/// Upper bound on frames per packet (120 ms of 2.5 ms frames).
pub const MAX_FRAMES_PER_PACKET: usize = 48;

/// Longest audio duration a single packet may carry, in samples at 48 kHz.
pub const MAX_PACKET_SAMPLES_48K: usize = 5760;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PacketError {
    #[error("bad argument")]
    BadArgument,
    #[error("invalid packet")]
    InvalidPacket,
}

impl PacketError {
    #[inline]
    pub const fn code(self) -> i32 {
        match self {
            PacketError::BadArgument => -1,
            PacketError::InvalidPacket => -4,
        }
    }
}

/// The remaining two bits of the `TOC` byte, labeled `c`, code the number
/// of frames per packet (codes 0 to 3) as follows
///
/// See [section-3.1](https://datatracker.ietf.org/doc/html/rfc6716#section-3.1)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameCountCode {
    /// 1 frame in the packet
    Single = 0,
    /// 2 frames in the packet, each with equal compressed size
    DoubleEqual = 1,
    /// 2 frames in the packet, with different compressed sizes
    DoubleDifferent = 2,
    /// an arbitrary number of frames in the packet
    // invariant: max_count = 48
    // see https://datatracker.ietf.org/doc/html/rfc6716#section-3.2.5
    Arbitrary = 3,
}

impl FrameCountCode {
    #[inline]
    #[must_use]
    pub const fn from_toc(toc: u8) -> Self {
        match toc & 0x3 {
            0 => FrameCountCode::Single,
            1 => FrameCountCode::DoubleEqual,
            2 => FrameCountCode::DoubleDifferent,
            _ => FrameCountCode::Arbitrary,
        }
    }
}

bitflags! {
    /// Flags in the frame-count byte that follows a code 3 TOC.
    ///
    /// See [section-3.2.5](https://datatracker.ietf.org/doc/html/rfc6716#section-3.2.5)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Code3Flags: u8 {
        /// Frames carry explicit lengths.
        const VBR = 0x80;
        /// Padding-length bytes follow the count byte.
        const PADDING = 0x40;
    }
}

/// Mask of the frame count in a code 3 count byte.
pub const CODE3_COUNT_MASK: u8 = 0x3F;

/// See [section-3.1](https://datatracker.ietf.org/doc/html/rfc6716#section-3.1)
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Mode {
    /// Linear-prediction speech coder.
    Silk,
    /// Speech coder below 8 kHz plus transform coder above it.
    Hybrid,
    /// MDCT transform coder.
    Celt,
}

/// Bandwidth
///
/// See [section-2](https://datatracker.ietf.org/doc/html/rfc6716#section-2)
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Bandwidth {
    Narrow,
    Medium,
    Wide,
    SuperWide,
    Full,
}

impl Bandwidth {
    #[inline]
    pub fn audio_band_width(&self) -> u16 {
        match self {
            Bandwidth::Narrow => 4000,
            Bandwidth::Medium => 6000,
            Bandwidth::Wide => 8000,
            Bandwidth::SuperWide => 12000,
            Bandwidth::Full => 20000,
        }
    }

    #[inline]
    pub fn sample_rate(&self) -> u32 {
        match self {
            Bandwidth::Narrow => 8000,
            Bandwidth::Medium => 12000,
            Bandwidth::Wide => 16000,
            Bandwidth::SuperWide => 24000,
            Bandwidth::Full => 48000,
        }
    }

    /// One step narrower, saturating at narrowband.
    #[inline]
    #[must_use]
    pub fn narrower(self) -> Self {
        match self {
            Bandwidth::Narrow | Bandwidth::Medium => Bandwidth::Narrow,
            Bandwidth::Wide => Bandwidth::Medium,
            Bandwidth::SuperWide => Bandwidth::Wide,
            Bandwidth::Full => Bandwidth::SuperWide,
        }
    }
}

/// See [section-2.1.4](https://datatracker.ietf.org/doc/html/rfc6716#section-2.1.4)
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameDuration {
    /// 2.5 ms
    Ms2_5,
    /// 5 ms
    Ms5,
    /// 10 ms
    Ms10,
    /// 20 ms
    Ms20,
    /// 40 ms
    Ms40,
    /// 60 ms
    Ms60,
}

impl FrameDuration {
    /// Maps a frame size in samples at 48 kHz to its duration.
    #[must_use]
    pub const fn from_samples_48k(samples: usize) -> Option<Self> {
        match samples {
            120 => Some(FrameDuration::Ms2_5),
            240 => Some(FrameDuration::Ms5),
            480 => Some(FrameDuration::Ms10),
            960 => Some(FrameDuration::Ms20),
            1920 => Some(FrameDuration::Ms40),
            2880 => Some(FrameDuration::Ms60),
            _ => None,
        }
    }

    #[must_use]
    pub const fn samples_48k(self) -> usize {
        match self {
            FrameDuration::Ms2_5 => 120,
            FrameDuration::Ms5 => 240,
            FrameDuration::Ms10 => 480,
            FrameDuration::Ms20 => 960,
            FrameDuration::Ms40 => 1920,
            FrameDuration::Ms60 => 2880,
        }
    }

    /// Duration in half-millisecond units.
    #[must_use]
    pub const fn ms_q1(self) -> u32 {
        (self.samples_48k() / 24) as u32
    }
}

impl core::fmt::Debug for FrameDuration {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            FrameDuration::Ms2_5 => write!(f, "2.5 ms"),
            FrameDuration::Ms5 => write!(f, "5 ms"),
            FrameDuration::Ms10 => write!(f, "10 ms"),
            FrameDuration::Ms20 => write!(f, "20 ms"),
            FrameDuration::Ms40 => write!(f, "40 ms"),
            FrameDuration::Ms60 => write!(f, "60 ms"),
        }
    }
}

/// Decoded table-of-contents byte.
///
/// See [section-3.1](https://datatracker.ietf.org/doc/html/rfc6716#section-3.1)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Toc {
    config: u8,
    stereo: bool,
    code: FrameCountCode,
}

impl Toc {
    /// Builds a TOC for the given configuration, or `None` when the mode
    /// cannot carry that bandwidth and duration in one frame.
    #[must_use]
    pub fn new(
        mode: Mode,
        bandwidth: Bandwidth,
        duration: FrameDuration,
        stereo: bool,
        code: FrameCountCode,
    ) -> Option<Self> {
        config_index(mode, bandwidth, duration).map(|config| Toc {
            config,
            stereo,
            code,
        })
    }

    #[must_use]
    pub const fn from_byte(toc: u8) -> Self {
        Toc {
            config: toc >> 3,
            stereo: toc & 0x4 != 0,
            code: FrameCountCode::from_toc(toc),
        }
    }

    #[must_use]
    pub const fn to_byte(self) -> u8 {
        (self.config << 3) | ((self.stereo as u8) << 2) | self.code as u8
    }

    #[must_use]
    pub const fn config(self) -> u8 {
        self.config
    }

    #[must_use]
    pub const fn is_stereo(self) -> bool {
        self.stereo
    }

    #[must_use]
    pub const fn frame_count_code(self) -> FrameCountCode {
        self.code
    }

    #[must_use]
    pub const fn mode(self) -> Mode {
        match self.config {
            0..=11 => Mode::Silk,
            12..=15 => Mode::Hybrid,
            _ => Mode::Celt,
        }
    }

    #[must_use]
    pub const fn bandwidth(self) -> Bandwidth {
        match self.config {
            0..=3 => Bandwidth::Narrow,
            4..=7 => Bandwidth::Medium,
            8..=11 => Bandwidth::Wide,
            12 | 13 => Bandwidth::SuperWide,
            14 | 15 => Bandwidth::Full,
            16..=19 => Bandwidth::Narrow,
            20..=23 => Bandwidth::Wide,
            24..=27 => Bandwidth::SuperWide,
            _ => Bandwidth::Full,
        }
    }

    #[must_use]
    pub const fn duration(self) -> FrameDuration {
        match self.mode() {
            Mode::Silk => match self.config & 0x3 {
                0 => FrameDuration::Ms10,
                1 => FrameDuration::Ms20,
                2 => FrameDuration::Ms40,
                _ => FrameDuration::Ms60,
            },
            Mode::Hybrid => {
                if self.config & 0x1 == 0 {
                    FrameDuration::Ms10
                } else {
                    FrameDuration::Ms20
                }
            }
            Mode::Celt => match self.config & 0x3 {
                0 => FrameDuration::Ms2_5,
                1 => FrameDuration::Ms5,
                2 => FrameDuration::Ms10,
                _ => FrameDuration::Ms20,
            },
        }
    }
}

/// Index into the 32-entry configuration table.
///
/// See [section-3.1, table 2](https://datatracker.ietf.org/doc/html/rfc6716#section-3.1)
#[must_use]
pub fn config_index(mode: Mode, bandwidth: Bandwidth, duration: FrameDuration) -> Option<u8> {
    match mode {
        Mode::Silk => {
            let bw = match bandwidth {
                Bandwidth::Narrow => 0,
                Bandwidth::Medium => 1,
                Bandwidth::Wide => 2,
                _ => return None,
            };
            let period = match duration {
                FrameDuration::Ms10 => 0,
                FrameDuration::Ms20 => 1,
                FrameDuration::Ms40 => 2,
                FrameDuration::Ms60 => 3,
                _ => return None,
            };
            Some((bw << 2) | period)
        }
        Mode::Hybrid => {
            let bw = match bandwidth {
                Bandwidth::SuperWide => 0,
                Bandwidth::Full => 1,
                _ => return None,
            };
            let period = match duration {
                FrameDuration::Ms10 => 0,
                FrameDuration::Ms20 => 1,
                _ => return None,
            };
            Some(12 | (bw << 1) | period)
        }
        Mode::Celt => {
            let bw = match bandwidth {
                Bandwidth::Narrow => 0,
                Bandwidth::Wide => 1,
                Bandwidth::SuperWide => 2,
                Bandwidth::Full => 3,
                Bandwidth::Medium => return None,
            };
            let period = match duration {
                FrameDuration::Ms2_5 => 0,
                FrameDuration::Ms5 => 1,
                FrameDuration::Ms10 => 2,
                FrameDuration::Ms20 => 3,
                _ => return None,
            };
            Some(16 | (bw << 2) | period)
        }
    }
}

/// Samples per frame for a TOC byte at sample rate `fs`.
#[must_use]
pub fn samples_per_frame(toc: u8, fs: u32) -> u32 {
    if toc & 0x80 != 0 {
        let audiosize = u32::from((toc >> 3) & 0x3);
        (fs << audiosize) / 400
    } else if (toc & 0x60) == 0x60 {
        if toc & 0x08 != 0 { fs / 50 } else { fs / 100 }
    } else {
        let audiosize = u32::from((toc >> 3) & 0x3);
        if audiosize == 3 {
            fs * 60 / 1000
        } else {
            (fs << audiosize) / 100
        }
    }
}

/// Number of bytes [`encode_frame_length`] writes for `size`.
#[inline]
#[must_use]
pub const fn frame_length_bytes(size: usize) -> usize {
    if size < 252 { 1 } else { 2 }
}

/// Writes an RFC 6716 frame length and returns the bytes written.
///
/// See [section-3.1](https://datatracker.ietf.org/doc/html/rfc6716#section-3.1)
pub fn encode_frame_length(size: usize, data: &mut [u8]) -> usize {
    debug_assert!(size <= MAX_FRAME_BYTES);
    if size < 252 {
        data[0] = size as u8;
        1
    } else {
        data[0] = 252 + (size & 0x3) as u8;
        data[1] = ((size - usize::from(data[0])) >> 2) as u8;
        2
    }
}

/// Reads an RFC 6716 frame length, returning `(size, bytes consumed)`.
#[must_use]
pub fn parse_frame_length(data: &[u8]) -> Option<(usize, usize)> {
    match data {
        [] => None,
        [first, ..] if *first < 252 => Some((usize::from(*first), 1)),
        [_] => None,
        [first, second, ..] => Some((4 * usize::from(*second) + usize::from(*first), 2)),
    }
}

/// Frame layout of a parsed packet. Offsets index into the parsed slice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedPacket {
    pub toc: u8,
    pub frame_count: usize,
    pub frame_offsets: [usize; MAX_FRAMES_PER_PACKET],
    pub frame_sizes: [u16; MAX_FRAMES_PER_PACKET],
    pub payload_offset: usize,
    pub padding_len: usize,
    /// Offset of the first padding byte, valid when `padding_len > 0`.
    pub padding_offset: usize,
    /// Total bytes the packet occupies, padding included.
    pub packet_len: usize,
}

impl ParsedPacket {
    /// Payload of frame `index` within `data`, the slice that was parsed.
    #[must_use]
    pub fn frame<'a>(&self, data: &'a [u8], index: usize) -> &'a [u8] {
        let start = self.frame_offsets[index];
        &data[start..start + usize::from(self.frame_sizes[index])]
    }
}

/// Parses an undelimited packet.
///
/// See [section-3.2](https://datatracker.ietf.org/doc/html/rfc6716#section-3.2)
pub fn parse_packet(data: &[u8]) -> Result<ParsedPacket, PacketError> {
    let Some((&toc, _)) = data.split_first() else {
        return Err(PacketError::BadArgument);
    };
    let framesize = samples_per_frame(toc, 48_000) as usize;

    let mut pos = 1usize;
    let mut len = data.len() as isize - 1;
    let mut sizes = [0u16; MAX_FRAMES_PER_PACKET];
    let mut padding_len = 0usize;
    let count;
    let last_size: isize;

    match FrameCountCode::from_toc(toc) {
        FrameCountCode::Single => {
            count = 1;
            last_size = len;
        }
        FrameCountCode::DoubleEqual => {
            count = 2;
            if len & 1 != 0 {
                return Err(PacketError::InvalidPacket);
            }
            last_size = len / 2;
            sizes[0] = last_size as u16;
        }
        FrameCountCode::DoubleDifferent => {
            count = 2;
            let (size, bytes) =
                parse_frame_length(&data[pos..]).ok_or(PacketError::InvalidPacket)?;
            len -= bytes as isize;
            if size as isize > len {
                return Err(PacketError::InvalidPacket);
            }
            pos += bytes;
            sizes[0] = size as u16;
            last_size = len - size as isize;
        }
        FrameCountCode::Arbitrary => {
            if len < 1 {
                return Err(PacketError::InvalidPacket);
            }
            let ch = data[pos];
            pos += 1;
            len -= 1;
            count = usize::from(ch & CODE3_COUNT_MASK);
            if count == 0 || framesize * count > MAX_PACKET_SAMPLES_48K {
                return Err(PacketError::InvalidPacket);
            }
            let flags = Code3Flags::from_bits_truncate(ch);
            if flags.contains(Code3Flags::PADDING) {
                loop {
                    if len <= 0 {
                        return Err(PacketError::InvalidPacket);
                    }
                    let p = data[pos];
                    pos += 1;
                    len -= 1;
                    let tmp = if p == 255 { 254 } else { usize::from(p) };
                    len -= tmp as isize;
                    padding_len += tmp;
                    if p != 255 {
                        break;
                    }
                }
            }
            if len < 0 {
                return Err(PacketError::InvalidPacket);
            }
            if flags.contains(Code3Flags::VBR) {
                let mut remaining = len;
                for size_slot in sizes.iter_mut().take(count - 1) {
                    let (size, bytes) = parse_frame_length(&data[pos..(pos + len as usize)])
                        .ok_or(PacketError::InvalidPacket)?;
                    len -= bytes as isize;
                    if size as isize > len {
                        return Err(PacketError::InvalidPacket);
                    }
                    pos += bytes;
                    *size_slot = size as u16;
                    remaining -= (bytes + size) as isize;
                }
                if remaining < 0 {
                    return Err(PacketError::InvalidPacket);
                }
                last_size = remaining;
            } else {
                let size = len / count as isize;
                if size * count as isize != len {
                    return Err(PacketError::InvalidPacket);
                }
                for size_slot in sizes.iter_mut().take(count - 1) {
                    *size_slot = size as u16;
                }
                last_size = size;
            }
        }
    }

    if last_size < 0 || last_size as usize > MAX_FRAME_BYTES {
        return Err(PacketError::InvalidPacket);
    }
    sizes[count - 1] = last_size as u16;

    let payload_offset = pos;
    let mut offsets = [0usize; MAX_FRAMES_PER_PACKET];
    let mut cursor = payload_offset;
    for (offset, &size) in offsets.iter_mut().zip(sizes.iter()).take(count) {
        *offset = cursor;
        cursor += usize::from(size);
    }
    if cursor + padding_len > data.len() {
        return Err(PacketError::InvalidPacket);
    }

    Ok(ParsedPacket {
        toc,
        frame_count: count,
        frame_offsets: offsets,
        frame_sizes: sizes,
        payload_offset,
        padding_len,
        padding_offset: cursor,
        packet_len: cursor + padding_len,
    })
}

/// Frames in a packet, from the TOC and (for code 3) the count byte.
pub fn packet_frame_count(data: &[u8]) -> Result<usize, PacketError> {
    match data {
        [] => Err(PacketError::BadArgument),
        [toc, rest @ ..] => match FrameCountCode::from_toc(*toc) {
            FrameCountCode::Single => Ok(1),
            FrameCountCode::DoubleEqual | FrameCountCode::DoubleDifferent => Ok(2),
            FrameCountCode::Arbitrary => rest
                .first()
                .map(|count| usize::from(count & CODE3_COUNT_MASK))
                .ok_or(PacketError::InvalidPacket),
        },
    }
}

/// Writes a code 3 packet holding `frames`, without padding.
///
/// The VBR flag and explicit lengths are only emitted when frame sizes
/// differ. Returns the bytes written.
pub fn write_code3(toc: u8, frames: &[&[u8]], out: &mut [u8]) -> Result<usize, PacketError> {
    let count = frames.len();
    if count == 0 || count > MAX_FRAMES_PER_PACKET {
        return Err(PacketError::BadArgument);
    }
    if frames.iter().any(|frame| frame.len() > MAX_FRAME_BYTES) {
        return Err(PacketError::BadArgument);
    }
    let vbr = frames.iter().any(|frame| frame.len() != frames[0].len());

    let header = 2 + if vbr {
        frames[..count - 1]
            .iter()
            .map(|frame| frame_length_bytes(frame.len()))
            .sum::<usize>()
    } else {
        0
    };
    let total = header + frames.iter().map(|frame| frame.len()).sum::<usize>();
    if total > out.len() {
        return Err(PacketError::BadArgument);
    }

    let mut flags = Code3Flags::empty();
    flags.set(Code3Flags::VBR, vbr);
    out[0] = (toc & 0xFC) | FrameCountCode::Arbitrary as u8;
    out[1] = count as u8 | flags.bits();
    let mut ptr = 2;
    if vbr {
        for frame in &frames[..count - 1] {
            ptr += encode_frame_length(frame.len(), &mut out[ptr..]);
        }
    }
    for frame in frames {
        out[ptr..ptr + frame.len()].copy_from_slice(frame);
        ptr += frame.len();
    }
    debug_assert_eq!(ptr, total);
    Ok(total)
}
