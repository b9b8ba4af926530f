use crate::pagination::DisplayGeometry;
use clap::Parser;
use std::time::Duration;

/// Bridge between a host and Even G1 smart glasses: pairs the left and
/// right units, drives text/image/settings commands, and collects touch
/// and microphone audio events.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about)]
pub struct Config {
    /// Glasses unit reachable over UDP, as NAME@HOST:PORT (repeat for each side)
    #[arg(long = "peer", value_name = "NAME@ADDR")]
    pub peers: Vec<String>,

    /// Pair key to connect to (default: last connected, then first complete pair)
    #[arg(long)]
    pub device: Option<String>,

    /// Advertised-name fragments identifying glasses units
    #[arg(long = "name-pattern", default_values_t = ["Even".to_string(), "G1".to_string()])]
    pub name_patterns: Vec<String>,

    /// Local address UDP links bind to
    #[arg(long, default_value = "0.0.0.0")]
    pub bind_host: String,

    /// UDP receive buffer size (SO_RCVBUF)
    #[arg(long, default_value_t = 256 * 1024)]
    pub recv_buf_size: usize,

    /// Treat a silent peer as disconnected after this many seconds (0 = never)
    #[arg(long, default_value_t = 0)]
    pub link_timeout_secs: u64,

    // ── Protocol pacing ────────────────────────────────────────────────

    /// Image chunk payload size in bytes
    #[arg(long, default_value_t = crate::protocol::IMAGE_CHUNK_SIZE)]
    pub chunk_size: usize,

    /// Delay between image chunks (ms)
    #[arg(long, default_value_t = 10)]
    pub chunk_delay_ms: u64,

    /// Delay between the left and right write of a frame (ms)
    #[arg(long, default_value_t = 50)]
    pub side_delay_ms: u64,

    /// Delay between text screens (ms)
    #[arg(long, default_value_t = 500)]
    pub screen_delay_ms: u64,

    /// Delay between settings commands (ms)
    #[arg(long, default_value_t = 100)]
    pub setting_delay_ms: u64,

    /// Delay before reconnecting a dropped side (ms)
    #[arg(long, default_value_t = 2000)]
    pub reconnect_delay_ms: u64,

    /// Heartbeat interval in seconds (0 = disabled)
    #[arg(long, default_value_t = 0)]
    pub heartbeat_interval_secs: u64,

    // ── Display ────────────────────────────────────────────────────────

    /// Usable text width in pixels
    #[arg(long, default_value_t = 488)]
    pub max_text_width: usize,

    /// Font size used for width estimation
    #[arg(long, default_value_t = 21)]
    pub font_size: usize,

    /// Lines per text screen
    #[arg(long, default_value_t = 5)]
    pub lines_per_screen: usize,

    /// JSON display settings pushed after every connect
    #[arg(long)]
    pub settings: Option<String>,

    // ── Runtime ────────────────────────────────────────────────────────

    /// Size of the session event channel
    #[arg(long, default_value_t = 1024)]
    pub event_capacity: usize,

    /// Stats logging interval in seconds (0 = disabled)
    #[arg(long, default_value_t = 5)]
    pub stats_interval_secs: u64,

    /// File remembering the last connected pair
    #[arg(long, env = "G1_DEVICE_STORE", default_value = "g1-bridge.json")]
    pub device_store: String,

    /// Do not connect automatically at startup
    #[arg(long, default_value_t = false)]
    pub no_auto_connect: bool,

    /// Directory for microphone session recordings
    #[arg(long, default_value = "./g1_audio")]
    pub audio_save_dir: String,

    /// Save microphone audio between AI start and AI stop as WAV
    #[arg(long, default_value_t = false)]
    pub save_audio: bool,
}

impl Config {
    pub fn geometry(&self) -> DisplayGeometry {
        DisplayGeometry {
            max_width: self.max_text_width,
            font_size: self.font_size,
            lines_per_screen: self.lines_per_screen,
        }
    }

    pub fn timing(&self) -> Timing {
        Timing {
            chunk_size: self.chunk_size,
            chunk_delay: Duration::from_millis(self.chunk_delay_ms),
            side_delay: Duration::from_millis(self.side_delay_ms),
            screen_delay: Duration::from_millis(self.screen_delay_ms),
            setting_delay: Duration::from_millis(self.setting_delay_ms),
            reconnect_delay: Duration::from_millis(self.reconnect_delay_ms),
        }
    }

    pub fn link_timeout(&self) -> Option<Duration> {
        (self.link_timeout_secs > 0).then(|| Duration::from_secs(self.link_timeout_secs))
    }
}

/// Pacing used by the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    pub chunk_size: usize,
    pub chunk_delay: Duration,
    pub side_delay: Duration,
    pub screen_delay: Duration,
    pub setting_delay: Duration,
    pub reconnect_delay: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Timing {
            chunk_size: crate::protocol::IMAGE_CHUNK_SIZE,
            chunk_delay: Duration::from_millis(10),
            side_delay: Duration::from_millis(50),
            screen_delay: Duration::from_millis(500),
            setting_delay: Duration::from_millis(100),
            reconnect_delay: Duration::from_secs(2),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_protocol_timing() {
        let config = Config::parse_from(["g1-bridge"]);
        assert_eq!(config.timing(), Timing::default());
        assert_eq!(config.geometry(), DisplayGeometry::default());
        assert_eq!(config.name_patterns, vec!["Even", "G1"]);
        assert_eq!(config.link_timeout(), None);
    }

    #[test]
    fn test_repeated_peers() {
        let config = Config::parse_from([
            "g1-bridge",
            "--peer",
            "Even_L_07@127.0.0.1:7001",
            "--peer",
            "Even_R_07@127.0.0.1:7002",
            "--link-timeout-secs",
            "3",
        ]);
        assert_eq!(config.peers.len(), 2);
        assert_eq!(config.link_timeout(), Some(Duration::from_secs(3)));
    }
}
