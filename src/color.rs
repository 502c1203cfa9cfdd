use eframe::egui;
use serde::{Deserialize, Serialize};

/// Accent used for box outlines, labels and 3D wireframes.
pub const ACCENT: Color4 = Color4::rgb(0x3B, 0x68, 0xFF);

/// Colours offered in draw mode.
pub const STROKE_PALETTE: [Color4; 6] = [
    Color4::rgb(0xE6, 0x19, 0x4B),
    Color4::rgb(0x3C, 0xB4, 0x4B),
    Color4::rgb(0xFF, 0xE1, 0x19),
    Color4::rgb(0x3C, 0x89, 0xD0),
    Color4::rgb(0xF5, 0x82, 0x31),
    Color4::rgb(0xFF, 0xFF, 0xFF),
];

/// Segmentation overlays cycle through this list by mask index.
pub const SEGMENTATION_PALETTE: [[u8; 3]; 10] = [
    [0xE6, 0x19, 0x4B],
    [0x3C, 0x89, 0xD0],
    [0x3C, 0xB4, 0x4B],
    [0xFF, 0xE1, 0x19],
    [0x91, 0x1E, 0xB4],
    [0x42, 0xD4, 0xF4],
    [0xF5, 0x82, 0x31],
    [0xF0, 0x32, 0xE6],
    [0xBF, 0xEF, 0x45],
    [0x46, 0x99, 0x90],
];

pub fn segmentation_color(index: usize) -> [u8; 3] {
    SEGMENTATION_PALETTE[index % SEGMENTATION_PALETTE.len()]
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Color4 {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color4 {
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    pub fn to_hex(&self) -> String {
        format!("#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }

    pub fn to_egui(&self) -> egui::Color32 {
        egui::Color32::from_rgba_unmultiplied(self.r, self.g, self.b, self.a)
    }
}

impl Default for Color4 {
    fn default() -> Self {
        STROKE_PALETTE[0]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_and_egui_conversions() {
        assert_eq!(ACCENT.to_hex(), "#3B68FF");
        let translucent = Color4 { a: 128, ..ACCENT };
        assert_eq!(
            translucent.to_egui(),
            egui::Color32::from_rgba_unmultiplied(0x3B, 0x68, 0xFF, 128)
        );
    }

    #[test]
    fn segmentation_palette_cycles() {
        assert_eq!(segmentation_color(0), segmentation_color(10));
        assert_eq!(segmentation_color(3), SEGMENTATION_PALETTE[3]);
    }
}
