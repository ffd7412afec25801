mod common;

use common::{MAX_PACKET, encoder, tone};

#[test]
fn activity_reaches_the_coders_at_every_rate() {
    for rate in [8_000, 12_000, 16_000, 24_000, 48_000] {
        let mut enc = encoder(rate, 1, 20);
        let pcm = tone(&enc, 0.3);
        let mut out = [0u8; MAX_PACKET];
        for _ in 0..5 {
            enc.encode(&pcm, &mut out).unwrap();
        }
        let activity = enc.vad_activity();
        assert!(activity > 0, "{rate} Hz");
        let last = enc.transform_coder().calls.last().unwrap();
        assert_eq!(last.vad_activity_q8, activity, "{rate} Hz");
    }
}

#[test]
fn stereo_input_is_mixed_for_the_vad() {
    let mut enc = encoder(24_000, 2, 20);
    let pcm = tone(&enc, 0.3);
    let mut out = [0u8; MAX_PACKET];
    for _ in 0..5 {
        enc.encode(&pcm, &mut out).unwrap();
    }
    assert!(enc.vad_activity() > 0);
}

#[test]
fn too_short_chunks_reuse_the_last_activity() {
    let mut enc = encoder(8_000, 1, 20);
    let pcm = tone(&enc, 0.3);
    let mut out = [0u8; MAX_PACKET];
    for _ in 0..5 {
        enc.encode(&pcm, &mut out).unwrap();
    }
    let activity = enc.vad_activity();

    enc.set_frame_size(120);
    let short = tone(&enc, 0.0);
    assert_eq!(short.len(), 20);
    enc.encode(&short, &mut out).unwrap();
    assert_eq!(enc.vad_activity(), activity);
    let last = enc.transform_coder().calls.last().unwrap();
    assert_eq!(last.vad_activity_q8, activity);
}
