//! Segmentation mask decoding and recolouring.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use image::{Rgba, RgbaImage};

use crate::color::segmentation_color;
use crate::error::{AppError, Result};

/// Opacity applied to the recoloured mask when it is drawn over the media.
pub const MASK_OPACITY: f32 = 0.5;

/// Decodes a base64 PNG, with or without a `data:image/...;base64,` prefix.
pub fn decode_mask(payload: &str) -> Result<RgbaImage> {
    let data = match payload.strip_prefix("data:image") {
        Some(rest) => rest
            .split_once(',')
            .map(|(_, b64)| b64)
            .ok_or_else(|| AppError::MaskDecode("data URL without payload".into()))?,
        None => payload,
    };
    let bytes = STANDARD
        .decode(data.trim())
        .map_err(|e| AppError::MaskDecode(format!("invalid base64: {e}")))?;
    let img = image::load_from_memory(&bytes)
        .map_err(|e| AppError::MaskDecode(format!("invalid image: {e}")))?;
    Ok(img.to_rgba8())
}

/// Paints every pixel with the palette colour for `index`, taking alpha
/// from the source red channel.
pub fn recolor_mask(mask: &RgbaImage, index: usize) -> RgbaImage {
    let [r, g, b] = segmentation_color(index);
    let mut out = RgbaImage::new(mask.width(), mask.height());
    for (src, dst) in mask.pixels().zip(out.pixels_mut()) {
        *dst = Rgba([r, g, b, src.0[0]]);
    }
    out
}

/// Decode and recolour in one step. Failures are reported to the caller,
/// which renders the mask blank.
pub fn render_mask(payload: &str, index: usize) -> Result<RgbaImage> {
    decode_mask(payload).map(|mask| recolor_mask(&mask, index))
}
