use crate::audio::{ AudioDecoder, AudioReassembler };
use crate::endpoint::Side;
use crate::protocol::{ InboundFrame, TouchKind };
use crate::session::SessionEvent;
use crate::stats::Stats;
use std::sync::Arc;
use tracing::{ debug, info, warn };

/// What one inbound frame produced: host events plus reassembled audio
/// frames still waiting for the decoder.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Routed {
    pub events: Vec<SessionEvent>,
    pub audio: Vec<Vec<u8>>,
}

/// Classifies inbound frames and feeds audio fragments through reassembly.
///
/// Decoding is left to [`decode_audio`] so callers can run it outside
/// whatever lock guards the router.
pub struct Router {
    reassembler: AudioReassembler,
    stats: Arc<Stats>,
}

impl Router {
    pub fn new(stats: Arc<Stats>) -> Self {
        Router { reassembler: AudioReassembler::default(), stats }
    }

    /// Handle one raw frame from `side`.
    pub fn handle_frame(&mut self, side: Side, raw: &[u8]) -> Routed {
        self.stats.record_recv(raw.len());

        let frame = match InboundFrame::parse(raw) {
            Ok(f) => f,
            Err(e) => {
                self.stats.record_decode_error();
                debug!(side = %side, error = %e, len = raw.len(), "inbound frame dropped");
                return Routed::default();
            }
        };

        match frame {
            InboundFrame::Touch(kind) => {
                info!(side = %side, touch = %kind, "👆 touch event");
                if kind == TouchKind::AiStart {
                    self.reset_audio();
                }
                Routed { events: vec![SessionEvent::Touch { side, kind }], audio: Vec::new() }
            }

            InboundFrame::MicAck { success, enabled } => {
                if success {
                    info!(side = %side, enabled, "🎙️ mic ack");
                } else {
                    warn!(side = %side, enabled, "🎙️ mic command rejected");
                }
                Routed { events: vec![SessionEvent::MicAck { success, enabled }], audio: Vec::new() }
            }

            InboundFrame::Audio { seq, payload } => {
                let out = self.reassembler.push(seq, &payload);
                if let Some(gap) = out.gap {
                    self.stats.record_sequence_gap();
                    warn!(side = %side, expected = gap.expected, received = gap.received, "audio sequence gap");
                }
                Routed { events: Vec::new(), audio: out.frames }
            }
        }
    }

    pub fn reset_audio(&mut self) {
        self.reassembler.reset();
    }

    pub fn buffered_audio(&self) -> usize {
        self.reassembler.buffered()
    }
}

/// Decode reassembled frames into `AudioFrameReady` events. Frames the
/// decoder rejects are counted and skipped.
pub fn decode_audio(
    decoder: &mut dyn AudioDecoder,
    frames: Vec<Vec<u8>>,
    stats: &Stats
) -> Vec<SessionEvent> {
    let mut events = Vec::with_capacity(frames.len());
    for frame in frames {
        match decoder.decode(&frame) {
            Ok(pcm) => {
                stats.record_audio_frame();
                events.push(SessionEvent::AudioFrameReady(pcm));
            }
            Err(e) => {
                stats.record_decode_error();
                warn!(error = %e, "audio decode failed");
            }
        }
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::PassthroughDecoder;
    use std::sync::atomic::Ordering;

    fn router() -> (Router, Arc<Stats>) {
        let stats = Stats::new();
        (Router::new(stats.clone()), stats)
    }

    fn audio(seq: u8, len: usize) -> Vec<u8> {
        let mut f = vec![0xf1, seq];
        f.extend(std::iter::repeat(0xab).take(len));
        f
    }

    struct Rejecting;

    impl AudioDecoder for Rejecting {
        fn decode(&mut self, _frame: &[u8]) -> anyhow::Result<Vec<u8>> {
            anyhow::bail!("bad frame")
        }
    }

    #[test]
    fn test_two_fragments_buffer_without_flush() {
        let (mut r, stats) = router();
        assert_eq!(r.handle_frame(Side::Left, &audio(0x05, 64)), Routed::default());
        assert_eq!(r.handle_frame(Side::Left, &audio(0x06, 64)), Routed::default());
        assert_eq!(r.buffered_audio(), 128);
        assert_eq!(stats.sequence_gaps.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_full_frame_handed_to_decoder() {
        let (mut r, stats) = router();
        r.handle_frame(Side::Right, &audio(0, 200));
        let routed = r.handle_frame(Side::Right, &audio(1, 200));
        assert!(routed.events.is_empty());
        assert_eq!(routed.audio.len(), 1);
        assert_eq!(r.buffered_audio(), 160);

        let events = decode_audio(&mut PassthroughDecoder, routed.audio, &stats);
        assert!(matches!(&events[..], [SessionEvent::AudioFrameReady(pcm)] if pcm.len() == 240));
        assert_eq!(stats.audio_frames.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_decoder_failure_counted() {
        let stats = Stats::new();
        let events = decode_audio(&mut Rejecting, vec![vec![0u8; 240]], &stats);
        assert!(events.is_empty());
        assert_eq!(stats.decode_errors.load(Ordering::Relaxed), 1);
        assert_eq!(stats.audio_frames.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_gap_counted_not_dropped() {
        let (mut r, stats) = router();
        r.handle_frame(Side::Left, &audio(1, 10));
        r.handle_frame(Side::Left, &audio(9, 10));
        assert_eq!(stats.sequence_gaps.load(Ordering::Relaxed), 1);
        assert_eq!(r.buffered_audio(), 20);
    }

    #[test]
    fn test_ai_start_resets_audio() {
        let (mut r, _) = router();
        r.handle_frame(Side::Left, &audio(1, 10));
        let routed = r.handle_frame(Side::Left, &[0xf5, 0x17]);
        assert_eq!(routed.events, vec![SessionEvent::Touch { side: Side::Left, kind: TouchKind::AiStart }]);
        assert_eq!(r.buffered_audio(), 0);
    }

    #[test]
    fn test_mic_ack_event() {
        let (mut r, _) = router();
        let routed = r.handle_frame(Side::Right, &[0x0e, 0xc9, 0x01]);
        assert_eq!(routed.events, vec![SessionEvent::MicAck { success: true, enabled: true }]);
    }

    #[test]
    fn test_unknown_frame_dropped() {
        let (mut r, stats) = router();
        assert_eq!(r.handle_frame(Side::Left, &[0x77, 0x01]), Routed::default());
        assert_eq!(r.handle_frame(Side::Left, &[]), Routed::default());
        assert_eq!(stats.decode_errors.load(Ordering::Relaxed), 2);
        assert_eq!(stats.frames_received.load(Ordering::Relaxed), 2);
    }
}
