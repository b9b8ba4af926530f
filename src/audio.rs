use crate::error::SequenceGap;
use crate::protocol::AUDIO_FRAME_SIZE;
use std::path::PathBuf;

// ═══════════════════════════════════════════════════════════════════════
//  Reassembly
// ═══════════════════════════════════════════════════════════════════════

/// Accumulates audio fragments into fixed-size decoder frames.
///
/// Sequence bytes wrap mod 256. A gap is reported but never drops data:
/// the protocol has no retransmission.
#[derive(Debug)]
pub struct AudioReassembler {
    buffer: Vec<u8>,
    last_seq: Option<u8>,
    frame_size: usize,
}

/// What one pushed fragment produced.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Reassembled {
    pub gap: Option<SequenceGap>,
    pub frames: Vec<Vec<u8>>,
}

impl Default for AudioReassembler {
    fn default() -> Self {
        Self::new(AUDIO_FRAME_SIZE)
    }
}

impl AudioReassembler {
    pub fn new(frame_size: usize) -> Self {
        AudioReassembler {
            buffer: Vec::with_capacity(frame_size * 2),
            last_seq: None,
            frame_size: frame_size.max(1),
        }
    }

    /// Append a fragment and split off every complete frame.
    ///
    /// A fragment larger than one frame yields several frames at once, so
    /// the buffer never holds more than `frame_size - 1` bytes after a push.
    pub fn push(&mut self, seq: u8, payload: &[u8]) -> Reassembled {
        let gap = match self.last_seq {
            Some(last) if seq != last.wrapping_add(1) => {
                Some(SequenceGap { expected: last.wrapping_add(1), received: seq })
            }
            _ => None,
        };
        self.last_seq = Some(seq);
        self.buffer.extend_from_slice(payload);

        let mut frames = Vec::new();
        while self.buffer.len() >= self.frame_size {
            let rest = self.buffer.split_off(self.frame_size);
            frames.push(std::mem::replace(&mut self.buffer, rest));
        }
        Reassembled { gap, frames }
    }

    /// Forget sequence history and buffered bytes (new audio session).
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.last_seq = None;
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn last_seq(&self) -> Option<u8> {
        self.last_seq
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Decoder boundary
// ═══════════════════════════════════════════════════════════════════════

/// Turns one encoded audio frame into PCM.
pub trait AudioDecoder: Send {
    fn decode(&mut self, frame: &[u8]) -> anyhow::Result<Vec<u8>>;
}

/// Hands encoded frames through unchanged (no codec linked in).
#[derive(Debug, Default)]
pub struct PassthroughDecoder;

impl AudioDecoder for PassthroughDecoder {
    fn decode(&mut self, frame: &[u8]) -> anyhow::Result<Vec<u8>> {
        Ok(frame.to_vec())
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Session recording → WAV
// ═══════════════════════════════════════════════════════════════════════

pub const PCM_SAMPLE_RATE: u32 = 16_000;

/// PCM collected between AI start and AI stop.
#[derive(Debug, Default)]
pub struct Recording {
    pcm: Vec<u8>,
    frames: u64,
}

impl Recording {
    pub fn new() -> Self {
        Recording {
            // ~30 s of 16 kHz/16-bit/mono
            pcm: Vec::with_capacity((PCM_SAMPLE_RATE as usize) * 2 * 30),
            frames: 0,
        }
    }

    pub fn push(&mut self, pcm: &[u8]) {
        self.pcm.extend_from_slice(pcm);
        self.frames += 1;
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn is_empty(&self) -> bool {
        self.pcm.is_empty()
    }

    /// Estimated duration assuming 16 kHz, 16-bit, mono.
    pub fn duration_secs(&self) -> f64 {
        (self.pcm.len() as f64) / ((PCM_SAMPLE_RATE as f64) * 2.0)
    }

    pub fn take(&mut self) -> Vec<u8> {
        self.frames = 0;
        std::mem::take(&mut self.pcm)
    }
}

/// Build a RIFF/WAVE container around 16 kHz, 16-bit, mono PCM.
pub fn wav_bytes(pcm_data: &[u8]) -> Vec<u8> {
    let data_len = pcm_data.len() as u32;
    let sample_rate: u32 = PCM_SAMPLE_RATE;
    let bits_per_sample: u16 = 16;
    let channels: u16 = 1;
    let byte_rate = sample_rate * ((bits_per_sample as u32) / 8) * (channels as u32);
    let block_align = channels * (bits_per_sample / 8);

    let mut wav = Vec::with_capacity(44 + pcm_data.len());
    // RIFF header
    wav.extend_from_slice(b"RIFF");
    wav.extend_from_slice(&(36 + data_len).to_le_bytes());
    wav.extend_from_slice(b"WAVE");
    // fmt sub-chunk
    wav.extend_from_slice(b"fmt ");
    wav.extend_from_slice(&(16u32).to_le_bytes());
    wav.extend_from_slice(&(1u16).to_le_bytes()); // PCM
    wav.extend_from_slice(&channels.to_le_bytes());
    wav.extend_from_slice(&sample_rate.to_le_bytes());
    wav.extend_from_slice(&byte_rate.to_le_bytes());
    wav.extend_from_slice(&block_align.to_le_bytes());
    wav.extend_from_slice(&bits_per_sample.to_le_bytes());
    // data sub-chunk
    wav.extend_from_slice(b"data");
    wav.extend_from_slice(&data_len.to_le_bytes());
    wav.extend_from_slice(pcm_data);
    wav
}

/// Write a recording to `<dir>/g1_<device>_<epoch>.wav`.
pub async fn save_session_wav(dir: &str, device: &str, pcm_data: &[u8]) -> anyhow::Result<PathBuf> {
    if pcm_data.is_empty() {
        anyhow::bail!("no audio data to save");
    }

    tokio::fs::create_dir_all(dir).await?;

    let epoch_secs = std::time::SystemTime
        ::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    let safe_device: String = device
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    let path = PathBuf::from(dir).join(format!("g1_{}_{}.wav", safe_device, epoch_secs));

    tokio::fs::write(&path, wav_bytes(pcm_data)).await?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_consecutive_fragments_no_gap() {
        let mut r = AudioReassembler::default();
        let a = r.push(0x05, &[1u8; 64]);
        let b = r.push(0x06, &[2u8; 64]);
        assert_eq!(a, Reassembled::default());
        assert_eq!(b, Reassembled::default());
        assert_eq!(r.buffered(), 128);
    }

    #[test]
    fn test_first_fragment_never_gaps() {
        let mut r = AudioReassembler::default();
        assert!(r.push(0x90, &[0u8; 4]).gap.is_none());
    }

    #[test]
    fn test_seq_wraps_at_256() {
        let mut r = AudioReassembler::default();
        r.push(0xff, &[0u8; 4]);
        assert!(r.push(0x00, &[0u8; 4]).gap.is_none());
    }

    #[test]
    fn test_gap_keeps_bytes() {
        let mut r = AudioReassembler::default();
        r.push(1, &[0u8; 10]);
        let out = r.push(5, &[0u8; 10]);
        assert_eq!(out.gap, Some(SequenceGap { expected: 2, received: 5 }));
        assert_eq!(r.buffered(), 20);
    }

    #[test]
    fn test_frame_split_keeps_remainder() {
        let mut r = AudioReassembler::default();
        let payload: Vec<u8> = (0..250u32).map(|i| i as u8).collect();
        let out = r.push(0, &payload);
        assert_eq!(out.frames.len(), 1);
        assert_eq!(out.frames[0], payload[..240].to_vec());
        assert_eq!(r.buffered(), 10);
    }

    #[test]
    fn test_large_fragment_yields_multiple_frames() {
        let mut r = AudioReassembler::default();
        let out = r.push(0, &[7u8; 500]);
        assert_eq!(out.frames.len(), 2);
        assert_eq!(r.buffered(), 20);
    }

    #[test]
    fn test_reset_clears_history() {
        let mut r = AudioReassembler::default();
        r.push(3, &[0u8; 10]);
        r.reset();
        assert_eq!(r.buffered(), 0);
        assert_eq!(r.last_seq(), None);
        assert!(r.push(9, &[0u8; 1]).gap.is_none());
    }

    #[test]
    fn test_wav_header() {
        let wav = wav_bytes(&[0u8; 100]);
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(u32::from_le_bytes([wav[4], wav[5], wav[6], wav[7]]), 136);
        assert_eq!(&wav[36..40], b"data");
        assert_eq!(wav.len(), 144);
    }

    #[test]
    fn test_recording_duration() {
        let mut rec = Recording::new();
        rec.push(&[0u8; 32_000]);
        assert_eq!(rec.frames(), 1);
        assert!((rec.duration_secs() - 1.0).abs() < f64::EPSILON);
        assert_eq!(rec.take().len(), 32_000);
        assert!(rec.is_empty());
    }

    proptest! {
        #[test]
        fn prop_gap_iff_not_successor(last in any::<u8>(), next in any::<u8>(), len in 1usize..64) {
            let mut r = AudioReassembler::default();
            r.push(last, &vec![0u8; len]);
            let out = r.push(next, &vec![0u8; len]);
            prop_assert_eq!(out.gap.is_some(), next != last.wrapping_add(1));
            prop_assert_eq!(r.buffered(), 2 * len);
        }
    }
}
