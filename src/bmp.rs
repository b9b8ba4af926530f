//! 1-bit BMP container for the glasses display.
//!
//! ```text
//! ┌──────────────┬──────────────┬─────────────┬──────────────────────────┐
//! │ File header  │ Info header  │ Palette     │ Rows, bottom-up          │
//! │ 14 B         │ 40 B         │ 8 B (B, W)  │ ceil(w/8) B each         │
//! └──────────────┴──────────────┴─────────────┴──────────────────────────┘
//! ```
//!
//! Rows are padded to a byte boundary only (not the usual 4 bytes); this
//! is what the firmware expects.

use crate::protocol::{ DISPLAY_HEIGHT, DISPLAY_WIDTH };

const FILE_HEADER_SIZE: usize = 14;
const INFO_HEADER_SIZE: usize = 40;
const PALETTE_SIZE: usize = 8;
pub const PIXEL_OFFSET: usize = FILE_HEADER_SIZE + INFO_HEADER_SIZE + PALETTE_SIZE;
const PIXELS_PER_METER: u32 = 2835;

/// Already-thresholded monochrome image, rows top-down, MSB = leftmost pixel,
/// set bit = white.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonoBitmap {
    width: u32,
    height: u32,
    rows: Vec<u8>,
}

impl MonoBitmap {
    #[inline]
    pub fn row_bytes(width: u32) -> usize {
        (width as usize).div_ceil(8)
    }

    /// Wrap packed rows. Short input is zero-filled (black).
    pub fn from_packed(width: u32, height: u32, mut rows: Vec<u8>) -> Self {
        rows.resize(Self::row_bytes(width) * (height as usize), 0);
        MonoBitmap { width, height, rows }
    }

    /// All black.
    pub fn blank(width: u32, height: u32) -> Self {
        Self::from_packed(width, height, Vec::new())
    }

    /// Full-screen blank canvas.
    pub fn display() -> Self {
        Self::blank(DISPLAY_WIDTH, DISPLAY_HEIGHT)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn set(&mut self, x: u32, y: u32, white: bool) {
        if x >= self.width || y >= self.height {
            return;
        }
        let idx = (y as usize) * Self::row_bytes(self.width) + (x as usize) / 8;
        let mask = 0x80u8 >> (x % 8);
        if white {
            self.rows[idx] |= mask;
        } else {
            self.rows[idx] &= !mask;
        }
    }

    pub fn get(&self, x: u32, y: u32) -> bool {
        if x >= self.width || y >= self.height {
            return false;
        }
        let idx = (y as usize) * Self::row_bytes(self.width) + (x as usize) / 8;
        self.rows[idx] & (0x80u8 >> (x % 8)) != 0
    }

    /// Serialize as a BMP file.
    pub fn encode(&self) -> Vec<u8> {
        let row_bytes = Self::row_bytes(self.width);
        let image_size = row_bytes * (self.height as usize);
        let file_size = PIXEL_OFFSET + image_size;

        let mut out = Vec::with_capacity(file_size);
        // File header
        out.extend_from_slice(b"BM");
        out.extend_from_slice(&(file_size as u32).to_le_bytes());
        out.extend_from_slice(&[0u8; 4]);
        out.extend_from_slice(&(PIXEL_OFFSET as u32).to_le_bytes());
        // Info header
        out.extend_from_slice(&(INFO_HEADER_SIZE as u32).to_le_bytes());
        out.extend_from_slice(&self.width.to_le_bytes());
        out.extend_from_slice(&self.height.to_le_bytes());
        out.extend_from_slice(&(1u16).to_le_bytes()); // planes
        out.extend_from_slice(&(1u16).to_le_bytes()); // bpp
        out.extend_from_slice(&(0u32).to_le_bytes()); // no compression
        out.extend_from_slice(&(image_size as u32).to_le_bytes());
        out.extend_from_slice(&PIXELS_PER_METER.to_le_bytes());
        out.extend_from_slice(&PIXELS_PER_METER.to_le_bytes());
        out.extend_from_slice(&(2u32).to_le_bytes()); // palette entries
        out.extend_from_slice(&(0u32).to_le_bytes());
        // Palette: black, white
        out.extend_from_slice(&[0x00, 0x00, 0x00, 0x00]);
        out.extend_from_slice(&[0xff, 0xff, 0xff, 0x00]);
        // Pixels
        for row in self.rows.chunks(row_bytes.max(1)).rev() {
            out.extend_from_slice(row);
        }
        out
    }
}

/// Header fields of a BMP blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BmpInfo {
    pub width: u32,
    pub height: u32,
    pub bits_per_pixel: u16,
    pub pixel_offset: u32,
    pub file_size: u32,
}

/// Read the headers of a BMP blob.
pub fn inspect(data: &[u8]) -> anyhow::Result<BmpInfo> {
    if data.len() < FILE_HEADER_SIZE + INFO_HEADER_SIZE {
        anyhow::bail!("bitmap too short: {} bytes", data.len());
    }
    if &data[0..2] != b"BM" {
        anyhow::bail!("missing BM signature");
    }
    let u32_at = |o: usize| u32::from_le_bytes([data[o], data[o + 1], data[o + 2], data[o + 3]]);
    Ok(BmpInfo {
        file_size: u32_at(2),
        pixel_offset: u32_at(10),
        width: u32_at(18),
        height: u32_at(22),
        bits_per_pixel: u16::from_le_bytes([data[28], data[29]]),
    })
}
