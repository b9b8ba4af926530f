use std::sync::atomic::{ AtomicU64, Ordering };
use std::sync::Arc;
use std::time::{ Duration, Instant };

/// Lock-free link and protocol counters
#[derive(Debug, Default)]
pub struct Stats {
    pub frames_sent: AtomicU64,
    pub bytes_sent: AtomicU64,
    pub send_errors: AtomicU64,
    pub frames_received: AtomicU64,
    pub bytes_received: AtomicU64,
    pub decode_errors: AtomicU64,
    pub sequence_gaps: AtomicU64,
    pub audio_frames: AtomicU64,
    pub event_drops: AtomicU64,
}

impl Stats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    #[inline(always)]
    pub fn record_send(&self, bytes: usize) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn record_send_error(&self) {
        self.send_errors.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn record_recv(&self, bytes: usize) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn record_decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn record_sequence_gap(&self) {
        self.sequence_gaps.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn record_audio_frame(&self) {
        self.audio_frames.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn record_event_drop(&self) {
        self.event_drops.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot and reset counters, return rates
    pub fn snapshot_and_reset(&self, elapsed: Duration) -> StatsSnapshot {
        let secs = elapsed.as_secs_f64().max(0.001);

        let tx_frames = self.frames_sent.swap(0, Ordering::Relaxed);
        let tx_bytes = self.bytes_sent.swap(0, Ordering::Relaxed);
        let rx_frames = self.frames_received.swap(0, Ordering::Relaxed);
        let rx_bytes = self.bytes_received.swap(0, Ordering::Relaxed);

        StatsSnapshot {
            tx_fps: (tx_frames as f64) / secs,
            tx_kbps: ((tx_bytes as f64) * 8.0) / (secs * 1_000.0),
            rx_fps: (rx_frames as f64) / secs,
            rx_kbps: ((rx_bytes as f64) * 8.0) / (secs * 1_000.0),
            send_errors: self.send_errors.swap(0, Ordering::Relaxed),
            decode_errors: self.decode_errors.swap(0, Ordering::Relaxed),
            sequence_gaps: self.sequence_gaps.swap(0, Ordering::Relaxed),
            audio_frames: self.audio_frames.swap(0, Ordering::Relaxed),
            event_drops: self.event_drops.swap(0, Ordering::Relaxed),
        }
    }
}

#[derive(Debug)]
pub struct StatsSnapshot {
    pub tx_fps: f64,
    pub tx_kbps: f64,
    pub rx_fps: f64,
    pub rx_kbps: f64,
    pub send_errors: u64,
    pub decode_errors: u64,
    pub sequence_gaps: u64,
    pub audio_frames: u64,
    pub event_drops: u64,
}

/// Background stats reporter task
pub async fn stats_reporter(stats: Arc<Stats>, interval_secs: u64) {
    if interval_secs == 0 {
        // Stats disabled, park forever
        std::future::pending::<()>().await;
        return;
    }

    let interval = Duration::from_secs(interval_secs);
    let mut last = Instant::now();

    loop {
        tokio::time::sleep(interval).await;
        let now = Instant::now();
        let elapsed = now - last;
        last = now;

        let snap = stats.snapshot_and_reset(elapsed);
        println!(
            "[STATS] TX: {:.1} fps, {:.2} kbps | RX: {:.1} fps, {:.2} kbps | audio: {} frames, gaps={} | errors: send={} decode={} drops={}",
            snap.tx_fps,
            snap.tx_kbps,
            snap.rx_fps,
            snap.rx_kbps,
            snap.audio_frames,
            snap.sequence_gaps,
            snap.send_errors,
            snap.decode_errors,
            snap.event_drops
        );
    }
}
