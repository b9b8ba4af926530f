//! Even G1 glasses command protocol.
//!
//! Every frame starts with a one-byte command, followed by command-specific
//! fields. Outbound frames have a destination (left unit, right unit, or
//! both). Frames addressed to both are encoded once and written left first,
//! then right after a short gap.
//!
//! ```text
//! ┌──────────┬──────────────────────────────────────────────┐
//! │ Byte 0   │ Byte 1..N                                    │
//! │ Command  │ Command-specific fields                      │
//! └──────────┴──────────────────────────────────────────────┘
//! ```

use crate::error::DecodeError;
use crate::settings::Setting;
use bytes::{ BufMut, Bytes, BytesMut };
use std::fmt;

// ═══════════════════════════════════════════════════════════════════════
//  Constants
// ═══════════════════════════════════════════════════════════════════════

// ── Command bytes ──────────────────────────────────────────────────────

/// Microphone on/off (host → right unit) and its acknowledgement.
pub const CMD_MICROPHONE: u8 = 0x0e;
/// Image data chunk.
pub const CMD_IMAGE_CHUNK: u8 = 0x15;
/// Image checksum marker.
pub const CMD_IMAGE_CRC: u8 = 0x16;
/// Leave the current dashboard feature.
pub const CMD_EXIT_FEATURE: u8 = 0x18;
/// Image transfer end marker.
pub const CMD_IMAGE_END: u8 = 0x20;
/// Keep-alive.
pub const CMD_HEARTBEAT: u8 = 0x25;
/// Text page.
pub const CMD_TEXT: u8 = 0x4e;
/// Audio stream fragment (unit → host).
pub const CMD_AUDIO: u8 = 0xf1;
/// Touch events inbound, display settings outbound.
pub const CMD_TOUCH_OR_SETTING: u8 = 0xf5;

// ── Touch subcodes (byte 1 of an inbound 0xF5 frame) ───────────────────

pub const TOUCH_EXIT: u8 = 0x00;
pub const TOUCH_PAGE_NAV: u8 = 0x01;
pub const TOUCH_SILENT_MODE: u8 = 0x04;
pub const TOUCH_AI_START: u8 = 0x17;
pub const TOUCH_AI_STOP: u8 = 0x24;

// ── Mic acknowledgement status ─────────────────────────────────────────

pub const MIC_ACK_SUCCESS: u8 = 0xc9;
pub const MIC_ACK_FAILURE: u8 = 0xca;

// ── Image transfer ─────────────────────────────────────────────────────

/// Maximum data bytes carried by one image chunk.
pub const IMAGE_CHUNK_SIZE: usize = 194;
/// Storage address prefixed to the data of the first chunk only.
pub const IMAGE_STORAGE_ADDRESS: [u8; 4] = [0x00, 0x1c, 0x00, 0x00];
/// Payload of the end marker after the command byte.
pub const IMAGE_END_PAYLOAD: [u8; 2] = [0x0d, 0x0e];
/// Chunk indices are a single byte; larger payloads wrap.
pub const MAX_IMAGE_CHUNKS: usize = 256;

// ── Audio ──────────────────────────────────────────────────────────────

/// Bytes per encoded audio frame handed to the decoder.
pub const AUDIO_FRAME_SIZE: usize = 240;

// ── Display ────────────────────────────────────────────────────────────

pub const DISPLAY_WIDTH: u32 = 576;
pub const DISPLAY_HEIGHT: u32 = 136;

// ═══════════════════════════════════════════════════════════════════════
//  Screen status
// ═══════════════════════════════════════════════════════════════════════

/// Status byte of a text page, telling the unit how to present it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScreenStatus {
    NewContent,
    AiDisplaying,
    AiComplete,
    ManualPaging,
    NetworkError,
    TextShow,
    /// `NewContent | AiDisplaying`
    NewContentAiDisplaying,
    /// `NewContent | TextShow`, the default for plain text.
    NewContentTextShow,
    Raw(u8),
}

impl ScreenStatus {
    pub fn to_byte(self) -> u8 {
        match self {
            ScreenStatus::NewContent => 0x01,
            ScreenStatus::AiDisplaying => 0x30,
            ScreenStatus::AiComplete => 0x40,
            ScreenStatus::ManualPaging => 0x50,
            ScreenStatus::NetworkError => 0x60,
            ScreenStatus::TextShow => 0x70,
            ScreenStatus::NewContentAiDisplaying => 0x31,
            ScreenStatus::NewContentTextShow => 0x71,
            ScreenStatus::Raw(b) => b,
        }
    }
}

impl Default for ScreenStatus {
    fn default() -> Self {
        ScreenStatus::NewContentTextShow
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Outbound commands
// ═══════════════════════════════════════════════════════════════════════

/// Where an outbound frame is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    Left,
    Right,
    Both,
}

/// One page of text as it goes on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextPage {
    pub status: ScreenStatus,
    /// 0-based screen index.
    pub page: u8,
    /// Total number of screens.
    pub max_page: u8,
    pub text: String,
}

/// Every frame the host can send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Microphone(bool),
    Text(TextPage),
    ImageChunk {
        index: usize,
        data: Bytes,
    },
    ImageEnd,
    ImageCrc,
    Heartbeat,
    Setting(Setting),
    ExitFeature,
}

impl Command {
    pub fn destination(&self) -> Destination {
        match self {
            // The microphone lives in the right unit.
            Command::Microphone(_) => Destination::Right,
            _ => Destination::Both,
        }
    }

    /// Encode to wire bytes. Field ranges are the caller's responsibility.
    pub fn encode(&self) -> Bytes {
        match self {
            Command::Microphone(enabled) => {
                Bytes::copy_from_slice(&[CMD_MICROPHONE, u8::from(*enabled)])
            }
            Command::Text(page) => encode_text_page(page),
            Command::ImageChunk { index, data } => encode_image_chunk(*index, data),
            Command::ImageEnd => {
                Bytes::copy_from_slice(&[CMD_IMAGE_END, IMAGE_END_PAYLOAD[0], IMAGE_END_PAYLOAD[1]])
            }
            Command::ImageCrc => Bytes::copy_from_slice(&[CMD_IMAGE_CRC, 0x00]),
            Command::Heartbeat => Bytes::copy_from_slice(&[CMD_HEARTBEAT]),
            Command::Setting(s) => Bytes::copy_from_slice(&[CMD_TOUCH_OR_SETTING, s.opcode(), s.value()]),
            Command::ExitFeature => Bytes::copy_from_slice(&[CMD_EXIT_FEATURE]),
        }
    }

    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Microphone(_) => "microphone",
            Command::Text(_) => "text",
            Command::ImageChunk { .. } => "image-chunk",
            Command::ImageEnd => "image-end",
            Command::ImageCrc => "image-crc",
            Command::Heartbeat => "heartbeat",
            Command::Setting(_) => "setting",
            Command::ExitFeature => "exit-feature",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn encode_text_page(page: &TextPage) -> Bytes {
    let text = page.text.as_bytes();
    let mut buf = BytesMut::with_capacity(9 + text.len());
    buf.put_u8(CMD_TEXT);
    buf.put_u8(page.page); // seq
    buf.put_u8(1); // total packets
    buf.put_u8(0); // current packet
    buf.put_u8(page.status.to_byte());
    buf.put_u8(0); // char pos hi
    buf.put_u8(0); // char pos lo
    buf.put_u8(page.page);
    buf.put_u8(page.max_page);
    buf.put_slice(text);
    buf.freeze()
}

fn encode_image_chunk(index: usize, data: &[u8]) -> Bytes {
    let first = index == 0;
    let mut buf = BytesMut::with_capacity(2 + 4 + data.len());
    buf.put_u8(CMD_IMAGE_CHUNK);
    buf.put_u8((index & 0xff) as u8);
    if first {
        buf.put_slice(&IMAGE_STORAGE_ADDRESS);
    }
    buf.put_slice(data);
    buf.freeze()
}

// ═══════════════════════════════════════════════════════════════════════
//  Inbound frames
// ═══════════════════════════════════════════════════════════════════════

/// Touch-bar / dashboard gesture reported by a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TouchKind {
    AiStart,
    AiStop,
    PageNav,
    Exit,
    SilentModeToggle,
}

impl TouchKind {
    pub fn from_subcode(code: u8) -> Option<Self> {
        match code {
            TOUCH_AI_START => Some(TouchKind::AiStart),
            TOUCH_AI_STOP => Some(TouchKind::AiStop),
            TOUCH_PAGE_NAV => Some(TouchKind::PageNav),
            TOUCH_EXIT => Some(TouchKind::Exit),
            TOUCH_SILENT_MODE => Some(TouchKind::SilentModeToggle),
            _ => None,
        }
    }
}

impl fmt::Display for TouchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TouchKind::AiStart => write!(f, "ai-start"),
            TouchKind::AiStop => write!(f, "ai-stop"),
            TouchKind::PageNav => write!(f, "page-nav"),
            TouchKind::Exit => write!(f, "exit"),
            TouchKind::SilentModeToggle => write!(f, "silent-mode"),
        }
    }
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    Touch(TouchKind),
    Audio {
        seq: u8,
        payload: Bytes,
    },
    MicAck {
        success: bool,
        enabled: bool,
    },
}

impl InboundFrame {
    /// Decode a frame by its leading byte.
    pub fn parse(buf: &[u8]) -> Result<Self, DecodeError> {
        let (&command, _) = buf.split_first().ok_or(DecodeError::Empty)?;
        match command {
            CMD_TOUCH_OR_SETTING => {
                require(command, buf, 2)?;
                TouchKind::from_subcode(buf[1])
                    .map(InboundFrame::Touch)
                    .ok_or(DecodeError::UnknownTouch(buf[1]))
            }
            CMD_AUDIO => {
                require(command, buf, 3)?;
                Ok(InboundFrame::Audio {
                    seq: buf[1],
                    payload: Bytes::copy_from_slice(&buf[2..]),
                })
            }
            CMD_MICROPHONE => {
                require(command, buf, 3)?;
                let success = match buf[1] {
                    MIC_ACK_SUCCESS => true,
                    MIC_ACK_FAILURE => false,
                    other => {
                        return Err(DecodeError::UnknownMicStatus(other));
                    }
                };
                Ok(InboundFrame::MicAck { success, enabled: buf[2] == 1 })
            }
            other => Err(DecodeError::UnknownCommand(other)),
        }
    }
}

#[inline]
fn require(command: u8, buf: &[u8], need: usize) -> Result<(), DecodeError> {
    if buf.len() < need {
        return Err(DecodeError::Truncated { command, len: buf.len(), need });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── Outbound ─────────────────────────────────────────────────────

    #[test]
    fn test_microphone_frames() {
        assert_eq!(&Command::Microphone(true).encode()[..], &[0x0e, 0x01]);
        assert_eq!(&Command::Microphone(false).encode()[..], &[0x0e, 0x00]);
        assert_eq!(Command::Microphone(true).destination(), Destination::Right);
    }

    #[test]
    fn test_text_page_layout() {
        let cmd = Command::Text(TextPage {
            status: ScreenStatus::NewContentTextShow,
            page: 2,
            max_page: 3,
            text: "hi\nyo".into(),
        });
        let bytes = cmd.encode();
        assert_eq!(&bytes[..9], &[0x4e, 0x02, 0x01, 0x00, 0x71, 0x00, 0x00, 0x02, 0x03]);
        assert_eq!(&bytes[9..], b"hi\nyo");
        assert_eq!(cmd.destination(), Destination::Both);
    }

    #[test]
    fn test_image_chunk_address_only_on_first() {
        let first = Command::ImageChunk { index: 0, data: Bytes::from_static(&[0xaa, 0xbb]) };
        assert_eq!(&first.encode()[..], &[0x15, 0x00, 0x00, 0x1c, 0x00, 0x00, 0xaa, 0xbb]);

        let second = Command::ImageChunk { index: 1, data: Bytes::from_static(&[0xcc]) };
        assert_eq!(&second.encode()[..], &[0x15, 0x01, 0xcc]);
    }

    #[test]
    fn test_image_chunk_index_wraps() {
        let cmd = Command::ImageChunk { index: 257, data: Bytes::from_static(&[0x01]) };
        assert_eq!(&cmd.encode()[..], &[0x15, 0x01, 0x01]);
    }

    #[test]
    fn test_fixed_frames() {
        assert_eq!(&Command::ImageEnd.encode()[..], &[0x20, 0x0d, 0x0e]);
        assert_eq!(&Command::ImageCrc.encode()[..], &[0x16, 0x00]);
        assert_eq!(&Command::Heartbeat.encode()[..], &[0x25]);
        assert_eq!(&Command::ExitFeature.encode()[..], &[0x18]);
    }

    #[test]
    fn test_setting_frame() {
        let cmd = Command::Setting(Setting::Brightness(42));
        assert_eq!(&cmd.encode()[..], &[0xf5, 0x10, 42]);
    }

    // ── Inbound ──────────────────────────────────────────────────────

    #[test]
    fn test_parse_touch_subcodes() {
        let cases = [
            (0x17, TouchKind::AiStart),
            (0x24, TouchKind::AiStop),
            (0x01, TouchKind::PageNav),
            (0x00, TouchKind::Exit),
            (0x04, TouchKind::SilentModeToggle),
        ];
        for (code, kind) in cases {
            assert_eq!(InboundFrame::parse(&[0xf5, code]).unwrap(), InboundFrame::Touch(kind));
        }
        assert_eq!(InboundFrame::parse(&[0xf5, 0x99]), Err(DecodeError::UnknownTouch(0x99)));
    }

    #[test]
    fn test_parse_audio() {
        let frame = InboundFrame::parse(&[0xf1, 0x07, 1, 2, 3]).unwrap();
        assert_eq!(frame, InboundFrame::Audio { seq: 7, payload: Bytes::from_static(&[1, 2, 3]) });
    }

    #[test]
    fn test_parse_audio_needs_payload() {
        assert_eq!(
            InboundFrame::parse(&[0xf1, 0x07]),
            Err(DecodeError::Truncated { command: 0xf1, len: 2, need: 3 })
        );
    }

    #[test]
    fn test_parse_mic_ack() {
        assert_eq!(
            InboundFrame::parse(&[0x0e, 0xc9, 0x01]).unwrap(),
            InboundFrame::MicAck { success: true, enabled: true }
        );
        assert_eq!(
            InboundFrame::parse(&[0x0e, 0xca, 0x00]).unwrap(),
            InboundFrame::MicAck { success: false, enabled: false }
        );
        assert_eq!(InboundFrame::parse(&[0x0e, 0x01, 0x00]), Err(DecodeError::UnknownMicStatus(0x01)));
    }

    #[test]
    fn test_parse_rejects_unknown_and_empty() {
        assert_eq!(InboundFrame::parse(&[]), Err(DecodeError::Empty));
        assert_eq!(InboundFrame::parse(&[0x42, 0x00]), Err(DecodeError::UnknownCommand(0x42)));
        assert!(matches!(InboundFrame::parse(&[0xf5]), Err(DecodeError::Truncated { .. })));
    }

    #[test]
    fn test_screen_status_bytes() {
        assert_eq!(ScreenStatus::default().to_byte(), 0x71);
        assert_eq!(ScreenStatus::NewContentAiDisplaying.to_byte(), 0x31);
        assert_eq!(ScreenStatus::Raw(0x42).to_byte(), 0x42);
    }
}
