use serde::{ Deserialize, Serialize };

// ─────────────────────────────────────────────────────────────────────
//  Display settings (`F5 <opcode> <value>` frames, sent to both units)
// ─────────────────────────────────────────────────────────────────────
//
//  0x10 brightness        0..=100
//  0x11 auto brightness   0/1
//  0x12 contrast          0..=100
//  0x13 color mode        0 standard, 1 high contrast, 2 night
//  0x14 HUD height        0..=100
//  0x15 HUD transparency  0..=100
//  0x16 text size         0..=100
//  0x18 power saving      0/1
//  0x19 auto-off          minutes, 0 = never
//  0x1A touch sensitivity 1..=3
//  0x1B orientation       0 normal, 1 flipped, 2 mirrored
//
//  0x17 is unused by the firmware.

/// One display setting as a typed value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Setting {
    Brightness(u8),
    AutoBrightness(bool),
    Contrast(u8),
    ColorMode(ColorMode),
    HudHeight(u8),
    HudTransparency(u8),
    TextSize(u8),
    PowerSaving(bool),
    AutoOffMinutes(u8),
    TouchSensitivity(u8),
    Orientation(Orientation),
}

impl Setting {
    pub fn opcode(&self) -> u8 {
        match self {
            Setting::Brightness(_) => 0x10,
            Setting::AutoBrightness(_) => 0x11,
            Setting::Contrast(_) => 0x12,
            Setting::ColorMode(_) => 0x13,
            Setting::HudHeight(_) => 0x14,
            Setting::HudTransparency(_) => 0x15,
            Setting::TextSize(_) => 0x16,
            Setting::PowerSaving(_) => 0x18,
            Setting::AutoOffMinutes(_) => 0x19,
            Setting::TouchSensitivity(_) => 0x1a,
            Setting::Orientation(_) => 0x1b,
        }
    }

    pub fn value(&self) -> u8 {
        match *self {
            | Setting::Brightness(v)
            | Setting::Contrast(v)
            | Setting::HudHeight(v)
            | Setting::HudTransparency(v)
            | Setting::TextSize(v) => v.min(100),
            Setting::AutoBrightness(on) | Setting::PowerSaving(on) => u8::from(on),
            Setting::ColorMode(m) => m as u8,
            Setting::AutoOffMinutes(m) => m,
            Setting::TouchSensitivity(s) => s.clamp(1, 3),
            Setting::Orientation(o) => o as u8,
        }
    }

    /// Build a setting from a raw opcode/value pair (console input).
    pub fn from_raw(opcode: u8, value: u8) -> Option<Self> {
        let setting = match opcode {
            0x10 => Setting::Brightness(value),
            0x11 => Setting::AutoBrightness(value != 0),
            0x12 => Setting::Contrast(value),
            0x13 => Setting::ColorMode(ColorMode::from_byte(value)?),
            0x14 => Setting::HudHeight(value),
            0x15 => Setting::HudTransparency(value),
            0x16 => Setting::TextSize(value),
            0x18 => Setting::PowerSaving(value != 0),
            0x19 => Setting::AutoOffMinutes(value),
            0x1a => Setting::TouchSensitivity(value),
            0x1b => Setting::Orientation(Orientation::from_byte(value)?),
            _ => {
                return None;
            }
        };
        Some(setting)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorMode {
    #[default]
    Standard = 0,
    HighContrast = 1,
    Night = 2,
}

impl ColorMode {
    fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(ColorMode::Standard),
            1 => Some(ColorMode::HighContrast),
            2 => Some(ColorMode::Night),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Orientation {
    #[default]
    Normal = 0,
    Flipped = 1,
    Mirrored = 2,
}

impl Orientation {
    fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Orientation::Normal),
            1 => Some(Orientation::Flipped),
            2 => Some(Orientation::Mirrored),
            _ => None,
        }
    }
}

/// Full settings profile pushed to the glasses after connecting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplaySettings {
    pub brightness: u8,
    pub auto_brightness: bool,
    pub contrast: u8,
    pub color_mode: ColorMode,
    pub hud_height: u8,
    pub hud_transparency: u8,
    pub text_size: u8,
    pub power_saving: bool,
    pub auto_off_minutes: u8,
    pub touch_sensitivity: u8,
    pub orientation: Orientation,
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self {
            brightness: 50,
            auto_brightness: true,
            contrast: 50,
            color_mode: ColorMode::Standard,
            hud_height: 50,
            hud_transparency: 20,
            text_size: 50,
            power_saving: false,
            auto_off_minutes: 5,
            touch_sensitivity: 2,
            orientation: Orientation::Normal,
        }
    }
}

impl DisplaySettings {
    /// Load a profile from a JSON file. Missing fields keep their defaults.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Every setting, in opcode order.
    pub fn commands(&self) -> Vec<Setting> {
        vec![
            Setting::Brightness(self.brightness),
            Setting::AutoBrightness(self.auto_brightness),
            Setting::Contrast(self.contrast),
            Setting::ColorMode(self.color_mode),
            Setting::HudHeight(self.hud_height),
            Setting::HudTransparency(self.hud_transparency),
            Setting::TextSize(self.text_size),
            Setting::PowerSaving(self.power_saving),
            Setting::AutoOffMinutes(self.auto_off_minutes),
            Setting::TouchSensitivity(self.touch_sensitivity),
            Setting::Orientation(self.orientation)
        ]
    }
}
