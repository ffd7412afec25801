mod common;

use common::{MAX_PACKET, TestEncoder, encoder, tone};
use opus_control_plane::{Bandwidth, CodingMode};

fn speech_encoder(bitrate: i32) -> TestEncoder {
    let mut enc = encoder(16_000, 1, 20);
    enc.set_mode(CodingMode::Silk);
    enc.set_bandwidth(Bandwidth::Wide);
    enc.set_bitrate(bitrate);
    enc.set_fec(true);
    enc.set_packet_loss_perc(20);
    enc
}

#[test]
fn redundancy_describes_the_previous_frame() {
    let mut enc = speech_encoder(32_000);
    let pcm = tone(&enc, 0.3);
    let mut out = [0u8; MAX_PACKET];
    enc.encode(&pcm, &mut out).unwrap();
    enc.encode(&pcm, &mut out).unwrap();

    let calls = &enc.speech_coder().calls;
    assert_eq!(calls[0].lbrr_bitrate, None);
    assert_eq!(calls[1].lbrr_bitrate, Some(19_200));
    assert_eq!(calls[1].lbrr_len, Some(320));
    assert_eq!(calls[1].lbrr_was_active, Some(calls[0].voice_active));
    assert_eq!(calls[1].bandwidth, Bandwidth::Wide);
}

#[test]
fn no_redundancy_without_loss_or_fec() {
    let mut enc = speech_encoder(32_000);
    enc.set_packet_loss_perc(0);
    let pcm = tone(&enc, 0.3);
    let mut out = [0u8; MAX_PACKET];
    for _ in 0..3 {
        enc.encode(&pcm, &mut out).unwrap();
    }
    enc.set_packet_loss_perc(20);
    enc.set_fec(false);
    for _ in 0..3 {
        enc.encode(&pcm, &mut out).unwrap();
    }
    assert!(enc.speech_coder().calls.iter().all(|call| call.lbrr_bitrate.is_none()));
}

#[test]
fn frames_coded_with_fec_off_are_never_sent_as_redundancy() {
    let mut enc = speech_encoder(32_000);
    enc.set_fec(false);
    let pcm = tone(&enc, 0.3);
    let mut out = [0u8; MAX_PACKET];
    enc.encode(&pcm, &mut out).unwrap();
    enc.set_fec(true);
    enc.encode(&pcm, &mut out).unwrap();
    enc.encode(&pcm, &mut out).unwrap();

    let calls = &enc.speech_coder().calls;
    assert_eq!(calls[1].lbrr_bitrate, None);
    assert_eq!(calls[2].lbrr_bitrate, Some(19_200));
}

#[test]
fn turning_fec_off_drops_the_retained_frame() {
    let mut enc = speech_encoder(32_000);
    let pcm = tone(&enc, 0.3);
    let mut out = [0u8; MAX_PACKET];
    enc.encode(&pcm, &mut out).unwrap();
    enc.set_fec(false);
    enc.set_fec(true);
    enc.encode(&pcm, &mut out).unwrap();
    assert_eq!(enc.speech_coder().calls[1].lbrr_bitrate, None);
}

#[test]
fn heavy_loss_narrows_the_bandwidth_for_redundancy() {
    let mut enc = speech_encoder(17_000);
    let pcm = tone(&enc, 0.3);
    let mut out = [0u8; MAX_PACKET];

    enc.encode(&pcm, &mut out).unwrap();
    assert_eq!(out[0], 0x08);
    assert_eq!(enc.last_bandwidth(), Some(Bandwidth::Narrow));

    // Hysteresis lowers the thresholds once FEC is on.
    enc.encode(&pcm, &mut out).unwrap();
    assert_eq!(out[0], 0x28);
    assert_eq!(enc.last_bandwidth(), Some(Bandwidth::Medium));

    let calls = &enc.speech_coder().calls;
    assert_eq!(calls[0].bandwidth, Bandwidth::Narrow);
    assert_eq!(calls[1].bandwidth, Bandwidth::Medium);
    assert_eq!(calls[1].lbrr_bitrate, Some(10_200));
}

#[test]
fn unaffordable_redundancy_keeps_the_bandwidth() {
    let mut enc = speech_encoder(12_000);
    let pcm = tone(&enc, 0.3);
    let mut out = [0u8; MAX_PACKET];
    enc.encode(&pcm, &mut out).unwrap();
    enc.encode(&pcm, &mut out).unwrap();
    assert_eq!(enc.last_bandwidth(), Some(Bandwidth::Wide));
    assert!(enc.speech_coder().calls.iter().all(|call| call.lbrr_bitrate.is_none()));
}

#[test]
fn transform_frames_never_carry_redundancy() {
    let mut enc = encoder(48_000, 1, 20);
    enc.set_fec(true);
    enc.set_packet_loss_perc(30);
    let pcm = tone(&enc, 0.3);
    let mut out = [0u8; MAX_PACKET];
    for _ in 0..3 {
        enc.encode(&pcm, &mut out).unwrap();
    }
    assert!(enc.speech_coder().calls.is_empty());
    assert!(enc.transform_coder().calls.iter().all(|call| call.lbrr_bitrate.is_none()));
}

#[test]
fn hybrid_redundancy_goes_to_the_speech_layer_only() {
    let mut enc = encoder(48_000, 1, 10);
    enc.set_mode(CodingMode::Hybrid);
    enc.set_bandwidth(Bandwidth::SuperWide);
    enc.set_fec(true);
    enc.set_packet_loss_perc(20);
    let pcm = tone(&enc, 0.3);
    let mut out = [0u8; MAX_PACKET];
    enc.encode(&pcm, &mut out).unwrap();
    enc.encode(&pcm, &mut out).unwrap();

    let speech = &enc.speech_coder().calls;
    assert_eq!(speech[1].lbrr_bitrate, Some(38_400));
    assert_eq!(speech[1].lbrr_len, Some(960));
    assert!(enc.transform_coder().calls.iter().all(|call| call.lbrr_bitrate.is_none()));
}

#[test]
fn multi_frame_packets_carry_one_redundant_copy() {
    let mut enc = encoder(48_000, 1, 10);
    enc.set_mode(CodingMode::Hybrid);
    enc.set_bandwidth(Bandwidth::SuperWide);
    enc.set_frame_size(1920);
    enc.set_fec(true);
    enc.set_packet_loss_perc(20);
    let pcm = tone(&enc, 0.3);
    let mut out = [0u8; MAX_PACKET];
    enc.encode(&pcm, &mut out).unwrap();
    enc.encode(&pcm, &mut out).unwrap();

    let speech = &enc.speech_coder().calls;
    assert_eq!(speech.len(), 4);
    assert_eq!(speech[2].lbrr_len, Some(1920));
    assert_eq!(speech[3].lbrr_bitrate, None);
}
