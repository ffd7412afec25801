//! Top-level Opus encoder front-end.
//!
//! [`OpusEncoder`] owns every piece of control state: the mode selector,
//! the DTX state machine (and the VAD inside it), the FEC scheduler and the
//! range encoder. Per frame it picks a mode, decides suppression, asks the
//! sub-encoders for payloads within a byte budget, frames the packet and
//! makes it conform to the bitrate mode.

use alloc::vec::Vec;

use crate::analysis::{ContentAnalyzer, NoAnalysis};
use crate::bitrate::{
    compute_equiv_rate, compute_silk_rate_for_hybrid, conform, strip_trailing_zeros,
    sub_encoder_budget, target_bytes_for_frame,
};
use crate::coder::{FrameRequest, LbrrRequest, SpeechCoder, TransformCoder};
use crate::config::{BitrateMode, CodingMode, EncoderConfig, SignalHint};
use crate::dtx::{DtxFrame, DtxState};
use crate::error::{CoderError, CoderKind, ConfigError, EncodeError};
use crate::fec::{FecState, decide_fec, redundancy_bitrate};
use crate::mode::{ModeDecision, ModeSelector, fix_mode_bandwidth, validate_frame_size};
use crate::packet::{Bandwidth, FrameCountCode, Mode, PacketError, Toc, write_code3};
use crate::range::RangeEncoder;

/// Most frames a packet built here can hold (60 ms of 20 ms frames).
const MAX_FRAMES: usize = 3;
/// Internal-error code reported when a sub-encoder overruns its budget.
const BUDGET_OVERRUN_CODE: i32 = -3;

pub struct OpusEncoder<S, T, A = NoAnalysis> {
    config: EncoderConfig,
    speech: S,
    transform: T,
    analyzer: A,
    selector: ModeSelector,
    dtx: DtxState,
    fec: FecState,
    range: RangeEncoder,
    payloads: Vec<u8>,
    pcm_scratch: Vec<f32>,
    last_mode: Option<Mode>,
    last_bandwidth: Option<Bandwidth>,
    last_fec: bool,
    final_range: u32,
}

impl<S: SpeechCoder, T: TransformCoder> OpusEncoder<S, T, NoAnalysis> {
    /// Creates an encoder with the default configuration and no content
    /// analysis.
    pub fn new(
        sample_rate: u32,
        channels: usize,
        speech: S,
        transform: T,
    ) -> Result<Self, ConfigError> {
        let config = EncoderConfig::new(sample_rate, channels)?;
        Ok(Self::from_config(config, speech, transform))
    }

    #[must_use]
    pub fn from_config(config: EncoderConfig, speech: S, transform: T) -> Self {
        Self {
            config,
            speech,
            transform,
            analyzer: NoAnalysis,
            selector: ModeSelector::new(),
            dtx: DtxState::new(),
            fec: FecState::new(),
            range: RangeEncoder::new(0),
            payloads: Vec::new(),
            pcm_scratch: Vec::new(),
            last_mode: None,
            last_bandwidth: None,
            last_fec: false,
            final_range: 0,
        }
    }
}

impl<S: SpeechCoder, T: TransformCoder, A: ContentAnalyzer> OpusEncoder<S, T, A> {
    /// Replaces the content analyser.
    #[must_use]
    pub fn with_analyzer<B: ContentAnalyzer>(self, analyzer: B) -> OpusEncoder<S, T, B> {
        OpusEncoder {
            config: self.config,
            speech: self.speech,
            transform: self.transform,
            analyzer,
            selector: self.selector,
            dtx: self.dtx,
            fec: self.fec,
            range: self.range,
            payloads: self.payloads,
            pcm_scratch: self.pcm_scratch,
            last_mode: self.last_mode,
            last_bandwidth: self.last_bandwidth,
            last_fec: self.last_fec,
            final_range: self.final_range,
        }
    }

    pub fn config(&self) -> &EncoderConfig {
        &self.config
    }

    pub fn speech_coder(&self) -> &S {
        &self.speech
    }

    pub fn transform_coder(&self) -> &T {
        &self.transform
    }

    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate()
    }

    pub fn channels(&self) -> usize {
        self.config.channels()
    }

    pub fn mode(&self) -> CodingMode {
        self.config.mode()
    }

    pub fn set_mode(&mut self, mode: CodingMode) {
        self.config.set_mode(mode);
    }

    pub fn bandwidth(&self) -> Bandwidth {
        self.config.bandwidth()
    }

    pub fn set_bandwidth(&mut self, bandwidth: Bandwidth) {
        self.config.set_bandwidth(bandwidth);
    }

    pub fn max_bandwidth(&self) -> Bandwidth {
        self.config.max_bandwidth()
    }

    pub fn set_max_bandwidth(&mut self, bandwidth: Bandwidth) {
        self.config.set_max_bandwidth(bandwidth);
    }

    pub fn force_channels(&self) -> Option<usize> {
        self.config.force_channels()
    }

    pub fn set_force_channels(&mut self, channels: Option<usize>) -> Result<(), ConfigError> {
        self.config.set_force_channels(channels)
    }

    pub fn frame_size(&self) -> usize {
        self.config.frame_size()
    }

    /// Sets the frame size in samples at 48 kHz. Checked against the mode
    /// on the next [`Self::encode`].
    pub fn set_frame_size(&mut self, frame_size: usize) {
        self.config.set_frame_size(frame_size);
    }

    pub fn bitrate(&self) -> i32 {
        self.config.bitrate()
    }

    pub fn set_bitrate(&mut self, bitrate: i32) {
        self.config.set_bitrate(bitrate);
    }

    pub fn bitrate_mode(&self) -> BitrateMode {
        self.config.bitrate_mode()
    }

    pub fn set_bitrate_mode(&mut self, mode: BitrateMode) {
        self.config.set_bitrate_mode(mode);
    }

    pub fn complexity(&self) -> i32 {
        self.config.complexity()
    }

    pub fn set_complexity(&mut self, complexity: i32) {
        self.config.set_complexity(complexity);
    }

    pub fn fec(&self) -> bool {
        self.config.fec()
    }

    /// Turning FEC off drops the retained frame, so redundancy restarts
    /// from the first frame coded after it is turned back on.
    pub fn set_fec(&mut self, enabled: bool) {
        self.config.set_fec(enabled);
        if !enabled {
            self.fec.reset();
        }
    }

    pub fn packet_loss_perc(&self) -> i32 {
        self.config.packet_loss_perc()
    }

    pub fn set_packet_loss_perc(&mut self, percent: i32) {
        self.config.set_packet_loss_perc(percent);
    }

    pub fn dtx(&self) -> bool {
        self.config.dtx()
    }

    pub fn set_dtx(&mut self, enabled: bool) {
        self.config.set_dtx(enabled);
    }

    pub fn lfe(&self) -> bool {
        self.config.lfe()
    }

    pub fn set_lfe(&mut self, enabled: bool) {
        self.config.set_lfe(enabled);
    }

    pub fn prediction_disabled(&self) -> bool {
        self.config.prediction_disabled()
    }

    pub fn set_prediction_disabled(&mut self, disabled: bool) {
        self.config.set_prediction_disabled(disabled);
    }

    pub fn signal(&self) -> SignalHint {
        self.config.signal()
    }

    pub fn set_signal(&mut self, signal: SignalHint) {
        self.config.set_signal(signal);
    }

    pub fn lsb_depth(&self) -> i32 {
        self.config.lsb_depth()
    }

    pub fn set_lsb_depth(&mut self, depth: i32) {
        self.config.set_lsb_depth(depth);
    }

    pub fn comfort_noise_interval_ms(&self) -> Option<u32> {
        self.config.comfort_noise_interval_ms()
    }

    pub fn set_comfort_noise_interval_ms(&mut self, interval: Option<u32>) {
        self.config.set_comfort_noise_interval_ms(interval);
    }

    /// Whether the last frame was suppressed by DTX.
    pub fn in_dtx(&self) -> bool {
        self.dtx.in_dtx()
    }

    /// Last VAD speech activity, `0..=255`.
    pub fn vad_activity(&self) -> u8 {
        self.dtx.vad_activity()
    }

    /// Mode of the last transmitted packet.
    pub fn last_mode(&self) -> Option<Mode> {
        self.last_mode
    }

    pub fn last_bandwidth(&self) -> Option<Bandwidth> {
        self.last_bandwidth
    }

    /// Final range-coder state of the last coded frame.
    pub fn final_range(&self) -> u32 {
        self.final_range
    }

    /// Returns the encoder to its freshly constructed state, keeping the
    /// configuration and the VAD noise estimates.
    pub fn reset(&mut self) {
        self.selector.reset();
        self.dtx.reset();
        self.fec.reset();
        self.speech.reset();
        self.transform.reset();
        self.analyzer.reset();
        self.last_mode = None;
        self.last_bandwidth = None;
        self.last_fec = false;
        self.final_range = 0;
    }

    /// Encodes 16-bit PCM. See [`Self::encode`].
    pub fn encode_i16(&mut self, pcm: &[i16], out: &mut [u8]) -> Result<usize, EncodeError> {
        let mut scratch = core::mem::take(&mut self.pcm_scratch);
        scratch.clear();
        scratch.extend(pcm.iter().map(|&s| f32::from(s) / 32_768.0));
        let result = self.encode(&scratch, out);
        self.pcm_scratch = scratch;
        result
    }

    /// Encodes one frame of interleaved samples in `[-1, 1]` into `out`.
    ///
    /// Returns the packet length. A frame suppressed by DTX returns 0, or 1
    /// when a comfort-noise packet is due.
    pub fn encode(&mut self, pcm: &[f32], out: &mut [u8]) -> Result<usize, EncodeError> {
        validate_frame_size(self.config.mode(), self.config.frame_size())?;
        let channels = self.config.channels();
        let expected = self.config.samples_per_channel() * channels;
        if pcm.len() != expected {
            return Err(EncodeError::InvalidInputLength {
                expected,
                actual: pcm.len(),
            });
        }
        if out.is_empty() {
            return Err(EncodeError::BufferTooSmall {
                needed: 1,
                available: 0,
            });
        }

        let sample_rate = self.config.sample_rate();
        let analysis = self.analyzer.analyze(pcm, channels, sample_rate);
        let decision = self.selector.select(&self.config, &analysis, pcm)?;

        let dtx = self.dtx.decide(&DtxFrame {
            pcm,
            channels,
            sample_rate,
            frame_size: self.config.frame_size(),
            lsb_depth: self.config.lsb_depth(),
            analysis,
            enabled: self.config.dtx(),
            comfort_noise_interval_ms: self.config.comfort_noise_interval_ms(),
        });
        if dtx.suppress {
            return self.emit_suppressed(&decision, dtx.comfort_noise, out);
        }

        let bitrate = self.config.bitrate();
        let bitrate_mode = self.config.bitrate_mode();
        let loss = self.config.packet_loss_perc();
        let vbr = bitrate_mode != BitrateMode::Cbr;
        let stream_channels = self.config.stream_channels();
        let frame_rate = (48_000 / self.config.frame_size()) as i32;
        let equiv_rate = compute_equiv_rate(
            bitrate,
            stream_channels,
            frame_rate,
            vbr,
            Some(decision.mode),
            self.config.complexity(),
            loss,
        );
        let mut bandwidth = decision.bandwidth;
        let use_fec = decide_fec(
            self.config.fec(),
            loss,
            self.last_fec,
            decision.mode,
            &mut bandwidth,
            equiv_rate,
        );
        let (mode, bandwidth) = fix_mode_bandwidth(decision.mode, bandwidth);
        self.last_fec = use_fec;

        if self.last_mode != Some(mode) || self.last_bandwidth != Some(bandwidth) {
            log::debug!(
                "mode {:?}/{:?} -> {:?}/{:?} ({} x {} samples, {:?} signal)",
                self.last_mode,
                self.last_bandwidth,
                mode,
                bandwidth,
                decision.frame_count,
                decision.frame_size,
                decision.signal
            );
        }

        let frame_count = decision.frame_count;
        let header = if frame_count == 1 {
            1
        } else {
            2 + (frame_count - 1) * 2
        };
        if out.len() <= header {
            return Err(EncodeError::BufferTooSmall {
                needed: header + 1,
                available: out.len(),
            });
        }
        let target = target_bytes_for_frame(bitrate, self.config.frame_size());
        let max_bytes = sub_encoder_budget(bitrate_mode, target, out.len(), header, frame_count);

        let lbrr = if use_fec
            && mode != Mode::Celt
            && self.fec.should_encode_redundancy(self.config.fec(), loss)
        {
            self.fec.previous_frame().map(|prev| LbrrRequest {
                pcm: prev,
                bitrate: redundancy_bitrate(bitrate),
                was_active: self.fec.previous_voice_active(),
            })
        } else {
            None
        };
        let silk_rate = (mode == Mode::Hybrid).then(|| {
            compute_silk_rate_for_hybrid(
                bitrate,
                bandwidth,
                decision.frame_size == 960,
                vbr,
                use_fec,
                stream_channels,
            )
        });

        let base = FrameRequest {
            pcm: &[],
            frame_size: decision.frame_size,
            channels,
            stream_channels,
            sample_rate,
            mode,
            bitrate,
            bandwidth,
            max_bytes,
            complexity: self.config.complexity(),
            bitrate_mode,
            prediction_disabled: self.config.prediction_disabled(),
            vad_activity_q8: dtx.vad_activity_q8,
            voice_active: dtx.voice_active,
            lbrr: None,
        };
        let frame_samples = decision.frame_size * sample_rate as usize / 48_000 * channels;

        self.payloads.clear();
        let mut lengths = [0usize; MAX_FRAMES];
        for (i, frame_pcm) in pcm.chunks_exact(frame_samples).enumerate() {
            let request = FrameRequest {
                pcm: frame_pcm,
                lbrr: if i == 0 { lbrr } else { None },
                ..base
            };
            self.range.reset(max_bytes);
            code_frame(
                &mut self.speech,
                &mut self.transform,
                &mut self.range,
                &request,
                silk_rate,
            )?;
            self.range.done();
            if self.range.error() {
                log::warn!("sub-encoder overran its {max_bytes} byte budget");
                return Err(budget_overrun(mode, bitrate_mode, &self.range, header, target));
            }
            self.final_range = self.range.range_final();
            let coded = self.range.finish();
            let payload = if mode == Mode::Silk {
                strip_trailing_zeros(coded)
            } else {
                coded
            };
            lengths[i] = payload.len();
            self.payloads.extend_from_slice(payload);
        }

        let duration = decision
            .duration()
            .ok_or(EncodeError::Packet(PacketError::BadArgument))?;
        let code = if frame_count == 1 {
            FrameCountCode::Single
        } else {
            FrameCountCode::Arbitrary
        };
        let toc = Toc::new(mode, bandwidth, duration, stream_channels == 2, code)
            .ok_or(EncodeError::Packet(PacketError::BadArgument))?
            .to_byte();

        let len = if frame_count == 1 {
            let needed = 1 + lengths[0];
            if needed > out.len() {
                return Err(EncodeError::BufferTooSmall {
                    needed,
                    available: out.len(),
                });
            }
            out[0] = toc;
            out[1..needed].copy_from_slice(&self.payloads);
            needed
        } else {
            let available = out.len();
            let mut frames: [&[u8]; MAX_FRAMES] = [&[]; MAX_FRAMES];
            let mut start = 0;
            for (slot, &len) in frames.iter_mut().zip(&lengths[..frame_count]) {
                *slot = &self.payloads[start..start + len];
                start += len;
            }
            write_code3(toc, &frames[..frame_count], out).map_err(|err| match err {
                PacketError::BadArgument => EncodeError::BufferTooSmall {
                    needed: header + self.payloads.len(),
                    available,
                },
                other => other.into(),
            })?
        };

        let len = conform(bitrate_mode, out, len, target)?;
        log::trace!(
            "{len} byte packet, {frame_count} frame(s), target {target} ({bitrate_mode:?})"
        );

        if self.config.fec() {
            self.fec.record_frame(pcm, dtx.voice_active);
        } else {
            self.fec.reset();
        }
        self.last_mode = Some(mode);
        self.last_bandwidth = Some(bandwidth);
        Ok(len)
    }

    fn emit_suppressed(
        &mut self,
        decision: &ModeDecision,
        comfort_noise: bool,
        out: &mut [u8],
    ) -> Result<usize, EncodeError> {
        if !comfort_noise {
            log::trace!("frame suppressed");
            return Ok(0);
        }
        let duration = decision
            .duration()
            .ok_or(EncodeError::Packet(PacketError::BadArgument))?;
        let count = decision.frame_count;
        let code = if count == 1 {
            FrameCountCode::Single
        } else {
            FrameCountCode::Arbitrary
        };
        let toc = Toc::new(
            decision.mode,
            decision.bandwidth,
            duration,
            self.config.stream_channels() == 2,
            code,
        )
        .ok_or(EncodeError::Packet(PacketError::BadArgument))?
        .to_byte();

        // Expanded 40 and 60 ms frames keep their duration as a code 3
        // packet of empty frames.
        let len = if count == 1 {
            out[0] = toc;
            1
        } else {
            let available = out.len();
            let empty: [&[u8]; MAX_FRAMES] = [&[]; MAX_FRAMES];
            write_code3(toc, &empty[..count], out).map_err(|err| match err {
                PacketError::BadArgument => EncodeError::BufferTooSmall {
                    needed: 2,
                    available,
                },
                other => other.into(),
            })?
        };
        log::trace!("comfort-noise packet, {count} frame(s)");
        Ok(len)
    }
}

/// Error for a frame whose sub-encoder wrote past `max_bytes`. Under CBR
/// the packet can no longer meet its target. Otherwise the coder broke its
/// budget contract.
fn budget_overrun(
    mode: Mode,
    bitrate_mode: BitrateMode,
    range: &RangeEncoder,
    header: usize,
    target: usize,
) -> EncodeError {
    if bitrate_mode == BitrateMode::Cbr {
        return EncodeError::CbrOverflow {
            produced: header + (range.tell().max(0) as usize).div_ceil(8),
            target,
        };
    }
    let kind = if mode == Mode::Silk {
        CoderKind::Speech
    } else {
        CoderKind::Transform
    };
    EncodeError::SubEncoderFailure(CoderError::new(
        kind,
        BUDGET_OVERRUN_CODE,
        "payload exceeded the byte budget",
    ))
}

/// Runs the sub-encoder(s) for one frame. In hybrid mode both write into
/// the same range encoder, speech coder first.
fn code_frame<S: SpeechCoder, T: TransformCoder>(
    speech: &mut S,
    transform: &mut T,
    range: &mut RangeEncoder,
    request: &FrameRequest<'_>,
    silk_rate: Option<i32>,
) -> Result<(), EncodeError> {
    let result = match request.mode {
        Mode::Silk => speech.encode(request, range),
        Mode::Celt => transform.encode(
            &FrameRequest {
                lbrr: None,
                ..*request
            },
            range,
        ),
        Mode::Hybrid => {
            let silk_rate = silk_rate.unwrap_or(request.bitrate / 2);
            match speech.encode(
                &FrameRequest {
                    bitrate: silk_rate,
                    ..*request
                },
                range,
            ) {
                Ok(()) => {
                    log::trace!("speech layer used {} bits", range.tell());
                    transform.encode(
                        &FrameRequest {
                            bitrate: request.bitrate - silk_rate,
                            lbrr: None,
                            ..*request
                        },
                        range,
                    )
                }
                Err(err) => Err(err),
            }
        }
    };
    result.map_err(|err| {
        log::warn!("sub-encoder failure: {err}");
        EncodeError::from(err)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[derive(Default)]
    struct Fixed {
        len: usize,
        calls: usize,
        fail: bool,
    }

    impl Fixed {
        fn write(&mut self, request: &FrameRequest<'_>, enc: &mut RangeEncoder) -> Result<(), CoderError> {
            self.calls += 1;
            if self.fail {
                return Err(CoderError::new(CoderKind::Speech, -3, "forced"));
            }
            for _ in 0..self.len.min(request.max_bytes) {
                enc.enc_bits(0xA5, 8);
            }
            Ok(())
        }
    }

    impl SpeechCoder for Fixed {
        fn encode(&mut self, request: &FrameRequest<'_>, enc: &mut RangeEncoder) -> Result<(), CoderError> {
            self.write(request, enc)
        }

        fn reset(&mut self) {}
    }

    impl TransformCoder for Fixed {
        fn encode(&mut self, request: &FrameRequest<'_>, enc: &mut RangeEncoder) -> Result<(), CoderError> {
            self.write(request, enc)
        }

        fn reset(&mut self) {}
    }

    fn encoder(len: usize) -> OpusEncoder<Fixed, Fixed> {
        let speech = Fixed {
            len,
            ..Fixed::default()
        };
        let transform = Fixed {
            len,
            ..Fixed::default()
        };
        OpusEncoder::new(48_000, 1, speech, transform).unwrap()
    }

    #[test]
    fn single_frame_packet() {
        let mut enc = encoder(10);
        let mut out = vec![0u8; 1500];
        let len = enc.encode(&[0.1; 960], &mut out).unwrap();
        assert_eq!(len, 11);
        assert_eq!(out[0], 0xF8);
        assert_eq!(enc.last_mode(), Some(Mode::Celt));
        assert_eq!(enc.last_bandwidth(), Some(Bandwidth::Full));
        assert_eq!(enc.transform_coder().calls, 1);
        assert_eq!(enc.speech_coder().calls, 0);
    }

    #[test]
    fn rejects_wrong_input_length() {
        let mut enc = encoder(10);
        let mut out = vec![0u8; 1500];
        assert_eq!(
            enc.encode(&[0.0; 480], &mut out),
            Err(EncodeError::InvalidInputLength {
                expected: 960,
                actual: 480
            })
        );
        assert_eq!(
            enc.encode(&[0.0; 960], &mut []),
            Err(EncodeError::BufferTooSmall {
                needed: 1,
                available: 0
            })
        );
    }

    #[test]
    fn sub_encoder_failure_propagates() {
        let mut enc = encoder(10);
        enc.set_mode(CodingMode::Silk);
        enc.set_bandwidth(Bandwidth::Wide);
        let mut out = vec![0u8; 1500];
        enc.speech.fail = true;
        let err = enc.encode(&[0.1; 960], &mut out).unwrap_err();
        assert_eq!(
            err,
            EncodeError::SubEncoderFailure(CoderError::new(CoderKind::Speech, -3, "forced"))
        );
        assert_eq!(enc.last_mode(), None);
    }

    #[test]
    fn hybrid_runs_both_coders_into_one_payload() {
        let mut enc = encoder(4);
        enc.set_mode(CodingMode::Hybrid);
        enc.set_bandwidth(Bandwidth::SuperWide);
        let mut out = vec![0u8; 1500];
        let len = enc.encode(&[0.1; 960], &mut out).unwrap();
        assert_eq!(out[0], 0x68);
        assert_eq!(len, 9);
        assert_eq!(enc.speech_coder().calls, 1);
        assert_eq!(enc.transform_coder().calls, 1);
    }

    #[test]
    fn i16_input_matches_float_path() {
        let mut enc = encoder(6);
        let mut out = vec![0u8; 1500];
        let len = enc.encode_i16(&[1000; 960], &mut out).unwrap();
        assert_eq!(len, 7);
    }
}
