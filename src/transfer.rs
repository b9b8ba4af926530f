use crate::protocol::{ Command, IMAGE_CHUNK_SIZE, MAX_IMAGE_CHUNKS };
use bytes::Bytes;
use std::time::Duration;
use tokio::sync::watch;
use tracing::warn;

// ═══════════════════════════════════════════════════════════════════════
//  Chunked image transfer
// ═══════════════════════════════════════════════════════════════════════

/// One image upload, yielding its chunk frames in order.
///
/// Lives for a single send. A failed write anywhere fails the whole
/// transfer; the caller restarts from chunk 0.
#[derive(Debug, Clone)]
pub struct ImageTransfer {
    payload: Bytes,
    chunk_size: usize,
    total_chunks: usize,
    current_index: usize,
}

impl ImageTransfer {
    pub fn new(payload: Bytes, chunk_size: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        let total_chunks = payload.len().div_ceil(chunk_size);
        if total_chunks > MAX_IMAGE_CHUNKS {
            warn!(
                bytes = payload.len(),
                chunks = total_chunks,
                "⚠️ image exceeds {} chunks, chunk index will wrap",
                MAX_IMAGE_CHUNKS
            );
        }
        ImageTransfer { payload, chunk_size, total_chunks, current_index: 0 }
    }

    pub fn total_chunks(&self) -> usize {
        self.total_chunks
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    /// Chunks, then the end marker, then the checksum marker.
    pub fn into_frames(self) -> Vec<Command> {
        let mut frames: Vec<Command> = self.collect();
        frames.push(Command::ImageEnd);
        frames.push(Command::ImageCrc);
        frames
    }
}

impl Iterator for ImageTransfer {
    type Item = Command;

    fn next(&mut self) -> Option<Command> {
        if self.current_index >= self.total_chunks {
            return None;
        }
        let start = self.current_index * self.chunk_size;
        let end = (start + self.chunk_size).min(self.payload.len());
        let cmd = Command::ImageChunk {
            index: self.current_index,
            data: self.payload.slice(start..end),
        };
        self.current_index += 1;
        Some(cmd)
    }
}

/// Frames for uploading `payload` with the protocol chunk size.
pub fn image_frames(payload: Bytes) -> Vec<Command> {
    ImageTransfer::new(payload, IMAGE_CHUNK_SIZE).into_frames()
}

// ═══════════════════════════════════════════════════════════════════════
//  Abortable pacing
// ═══════════════════════════════════════════════════════════════════════

/// Ties a transfer to the link epoch it started in.
///
/// The session bumps the epoch whenever a link drops or a disconnect
/// starts; any guard created before that point reports the transfer as
/// dead and wakes from `pace` immediately.
pub struct TransferGuard {
    epoch: watch::Receiver<u64>,
    start: u64,
}

impl TransferGuard {
    pub fn new(epoch: watch::Receiver<u64>) -> Self {
        let start = *epoch.borrow();
        TransferGuard { epoch, start }
    }

    pub fn is_live(&self) -> bool {
        *self.epoch.borrow() == self.start
    }

    /// Wait `delay`, returning `false` if the link epoch moved meanwhile.
    pub async fn pace(&mut self, delay: Duration) -> bool {
        if !self.is_live() {
            return false;
        }
        if delay.is_zero() {
            return true;
        }
        let start = self.start;
        let aborted = tokio::select! {
            _ = tokio::time::sleep(delay) => false,
            _ = self.epoch.wait_for(|e| *e != start) => true,
        };
        !aborted && self.is_live()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn chunk_data(cmd: &Command) -> &[u8] {
        match cmd {
            Command::ImageChunk { data, .. } => data,
            other => panic!("not a chunk: {other}"),
        }
    }

    #[test]
    fn test_500_bytes_makes_five_frames() {
        let payload: Vec<u8> = (0..500u32).map(|i| i as u8).collect();
        let frames = image_frames(Bytes::from(payload));
        assert_eq!(frames.len(), 5);

        let sizes: Vec<usize> = frames[..3]
            .iter()
            .map(|f| chunk_data(f).len())
            .collect();
        assert_eq!(sizes, vec![194, 194, 112]);
        for (i, f) in frames[..3].iter().enumerate() {
            assert!(matches!(f, Command::ImageChunk { index, .. } if *index == i));
        }
        assert_eq!(frames[3], Command::ImageEnd);
        assert_eq!(frames[4], Command::ImageCrc);
    }

    #[test]
    fn test_first_chunk_carries_storage_address() {
        let frames = image_frames(Bytes::from(vec![0xffu8; 200]));
        assert_eq!(&frames[0].encode()[..6], &[0x15, 0x00, 0x00, 0x1c, 0x00, 0x00]);
        assert_eq!(&frames[1].encode()[..3], &[0x15, 0x01, 0xff]);
    }

    #[test]
    fn test_empty_payload_sends_only_markers() {
        let frames = image_frames(Bytes::new());
        assert_eq!(frames, vec![Command::ImageEnd, Command::ImageCrc]);
    }

    #[test]
    fn test_iterator_tracks_index() {
        let mut t = ImageTransfer::new(Bytes::from(vec![0u8; 10]), 4);
        assert_eq!(t.total_chunks(), 3);
        t.next();
        assert_eq!(t.current_index(), 1);
    }

    #[test]
    fn test_oversized_payload_wraps_index() {
        let frames = image_frames(Bytes::from(vec![0u8; IMAGE_CHUNK_SIZE * 257]));
        let encoded = frames[256].encode();
        assert_eq!(encoded[1], 0x00);
        assert_eq!(frames.len(), 257 + 2);
    }

    proptest! {
        #[test]
        fn prop_chunks_reassemble(payload in proptest::collection::vec(any::<u8>(), 0..=MAX_IMAGE_CHUNKS * IMAGE_CHUNK_SIZE)) {
            let frames = image_frames(Bytes::from(payload.clone()));
            let mut rebuilt = Vec::with_capacity(payload.len());
            let mut chunks = 0usize;
            for f in &frames {
                if let Command::ImageChunk { index, data } = f {
                    prop_assert_eq!(*index, chunks);
                    prop_assert!(data.len() <= IMAGE_CHUNK_SIZE);
                    rebuilt.extend_from_slice(data);
                    chunks += 1;
                }
            }
            prop_assert_eq!(chunks, payload.len().div_ceil(IMAGE_CHUNK_SIZE));
            prop_assert_eq!(rebuilt, payload);
        }
    }

    // ── Pacing ───────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn test_pace_completes_when_epoch_stable() {
        let (_tx, rx) = watch::channel(0u64);
        let mut guard = TransferGuard::new(rx);
        assert!(guard.pace(Duration::from_millis(10)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pace_aborts_on_epoch_bump() {
        let (tx, rx) = watch::channel(0u64);
        let mut guard = TransferGuard::new(rx);
        let bump = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            tx.send_modify(|e| {
                *e += 1;
            });
            tx
        });
        let started = tokio::time::Instant::now();
        assert!(!guard.pace(Duration::from_secs(10)).await);
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(!guard.is_live());
        drop(bump.await.unwrap());
    }
}
