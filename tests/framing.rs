mod common;

use common::{FakeCoder, MAX_PACKET, encoder, tone};
use opus_control_plane::packet::{Code3Flags, parse_packet};
use opus_control_plane::{Bandwidth, CodingMode, Mode, OpusEncoder};

#[test]
fn single_frame_uses_code_zero() {
    let mut enc = encoder(48_000, 1, 30);
    let pcm = tone(&enc, 0.3);
    let mut out = [0u8; MAX_PACKET];
    assert_eq!(enc.encode(&pcm, &mut out).unwrap(), 31);
    assert_eq!(out[0], 0xF8);
    assert!(out[1..31].iter().all(|&b| b == 0x5A));
}

#[test]
fn equal_frames_share_one_length() {
    let mut enc = encoder(48_000, 1, 30);
    enc.set_frame_size(1920);
    let pcm = tone(&enc, 0.3);
    let mut out = [0u8; MAX_PACKET];

    let len = enc.encode(&pcm, &mut out).unwrap();
    assert_eq!(len, 62);
    assert_eq!(out[0], 0xFB);
    assert_eq!(out[1], 0x02);
    assert_eq!(enc.last_mode(), Some(Mode::Celt));
}

#[test]
fn unequal_frames_set_the_vbr_flag() {
    let mut enc = OpusEncoder::new(
        48_000,
        1,
        FakeCoder::fixed(10),
        FakeCoder::with_sizes(vec![30, 20, 25]),
    )
    .unwrap();
    enc.set_frame_size(2880);
    let pcm = vec![0.25f32; 2880];
    let mut out = [0u8; MAX_PACKET];

    let len = enc.encode(&pcm, &mut out).unwrap();
    assert_eq!(out[0], 0xFB);
    assert_eq!(out[1], 0x83);
    assert_eq!(out[1] & Code3Flags::VBR.bits(), Code3Flags::VBR.bits());
    assert_eq!(&out[2..4], &[30, 20]);
    assert_eq!(len, 4 + 75);

    let parsed = parse_packet(&out[..len]).unwrap();
    assert_eq!(&parsed.frame_sizes[..3], &[30, 20, 25]);
}

#[test]
fn hybrid_stereo_long_frame_splits_into_20ms_frames() {
    let mut enc = encoder(48_000, 2, 10);
    enc.set_mode(CodingMode::Hybrid);
    enc.set_bandwidth(Bandwidth::SuperWide);
    enc.set_frame_size(1920);
    let pcm = tone(&enc, 0.3);
    assert_eq!(pcm.len(), 3840);
    let mut out = [0u8; MAX_PACKET];

    let len = enc.encode(&pcm, &mut out).unwrap();
    assert_eq!(out[0], 0x6F);
    assert_eq!(out[1], 0x02);
    assert_eq!(len, 2 + 40);
    let speech = &enc.speech_coder().calls;
    assert_eq!(speech.len(), 2);
    assert!(speech.iter().all(|call| call.frame_size == 960 && call.pcm_len == 1920));
}

#[test]
fn explicit_speech_mode_keeps_long_frames() {
    let mut enc = encoder(16_000, 1, 30);
    enc.set_mode(CodingMode::Silk);
    enc.set_frame_size(1920);
    let pcm = tone(&enc, 0.3);
    let mut out = [0u8; MAX_PACKET];

    assert_eq!(enc.encode(&pcm, &mut out).unwrap(), 31);
    // Wideband 40 ms, code 0.
    assert_eq!(out[0], 0x50);
    let calls = &enc.speech_coder().calls;
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].frame_size, 1920);
    assert_eq!(calls[0].bandwidth, Bandwidth::Wide);
    assert_eq!(enc.last_bandwidth(), Some(Bandwidth::Wide));
}

#[test]
fn shortest_frames_go_to_the_transform_coder() {
    let mut enc = encoder(48_000, 1, 8);
    enc.set_frame_size(120);
    let pcm = tone(&enc, 0.3);
    let mut out = [0u8; MAX_PACKET];
    assert_eq!(enc.encode(&pcm, &mut out).unwrap(), 9);
    assert_eq!(out[0], 0xE0);
}

#[test]
fn lfe_forces_narrowband_transform_coding() {
    let mut enc = encoder(48_000, 1, 8);
    enc.set_lfe(true);
    let pcm = tone(&enc, 0.3);
    let mut out = [0u8; MAX_PACKET];
    enc.encode(&pcm, &mut out).unwrap();
    assert_eq!(enc.last_mode(), Some(Mode::Celt));
    assert_eq!(enc.last_bandwidth(), Some(Bandwidth::Narrow));
    // Narrowband 20 ms transform frame.
    assert_eq!(out[0], 0x98);
}

#[test]
fn final_range_is_reported() {
    let mut enc = encoder(48_000, 1, 8);
    let pcm = tone(&enc, 0.3);
    let mut out = [0u8; MAX_PACKET];
    enc.encode(&pcm, &mut out).unwrap();
    assert_eq!(enc.final_range(), 1 << 31);
}

#[test]
fn forced_mono_stream_clears_the_stereo_bit() {
    let mut enc = encoder(48_000, 2, 20);
    enc.set_mode(CodingMode::Celt);
    let pcm = tone(&enc, 0.3);
    let mut out = [0u8; MAX_PACKET];

    enc.encode(&pcm, &mut out).unwrap();
    assert_eq!(out[0], 0xFC);
    enc.set_force_channels(Some(1)).unwrap();
    enc.encode(&pcm, &mut out).unwrap();
    assert_eq!(out[0], 0xF8);

    let calls = &enc.transform_coder().calls;
    assert_eq!((calls[0].stream_channels, calls[1].stream_channels), (2, 1));
    // The coder still receives the interleaved stereo input.
    assert_eq!(calls[1].pcm_len, 1920);
    assert!(enc.set_force_channels(Some(3)).is_err());
    assert_eq!(enc.force_channels(), Some(1));
}

#[test]
fn max_bandwidth_limits_the_coded_bandwidth() {
    let mut enc = encoder(48_000, 1, 20);
    enc.set_mode(CodingMode::Celt);
    enc.set_max_bandwidth(Bandwidth::Wide);
    let pcm = tone(&enc, 0.3);
    let mut out = [0u8; MAX_PACKET];

    enc.encode(&pcm, &mut out).unwrap();
    // Wideband 20 ms transform frame.
    assert_eq!(out[0], 0xB8);
    assert_eq!(enc.bandwidth(), Bandwidth::Full);
    assert_eq!(enc.last_bandwidth(), Some(Bandwidth::Wide));
    assert_eq!(enc.transform_coder().calls[0].bandwidth, Bandwidth::Wide);
}
