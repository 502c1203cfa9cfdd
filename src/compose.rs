//! Builds the image sent to the model: the active frame, downscaled, with
//! the user's strokes baked in.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use glam::DVec2;
use image::imageops::{self, FilterType};
use image::{ImageFormat, Rgba, RgbaImage};
use std::io::Cursor;
use tiny_skia::{ColorU8, FillRule, Paint, Path, PathBuilder, Pixmap, Transform};
use tracing::{debug, warn};

use crate::error::{AppError, Result};
use crate::stroke::{outline_stroke, Stroke, StrokeOptions};

/// Longest side of the outgoing image.
pub const MAX_REQUEST_SIDE: u32 = 640;
/// Canvas used when there are strokes but no media.
const BLANK_CANVAS: (u32, u32) = (640, 360);

/// Scale factor that fits `(w, h)` inside the request limit without upscaling.
pub fn request_scale(width: u32, height: u32) -> f64 {
    let max = MAX_REQUEST_SIDE as f64;
    (max / width as f64).min(max / height as f64).min(1.0)
}

pub fn compose_request_image(
    frame: Option<&RgbaImage>,
    strokes: &[Stroke],
    options: &StrokeOptions,
) -> Result<RgbaImage> {
    let mut canvas = match frame {
        Some(frame) => {
            let (w, h) = frame.dimensions();
            if w == 0 || h == 0 {
                return Err(AppError::MediaNotReady(format!("frame is {w}x{h}")));
            }
            let scale = request_scale(w, h);
            let (sw, sh) = (
                ((w as f64 * scale).round() as u32).max(1),
                ((h as f64 * scale).round() as u32).max(1),
            );
            if (sw, sh) == (w, h) {
                frame.clone()
            } else {
                imageops::resize(frame, sw, sh, FilterType::Triangle)
            }
        }
        None if strokes.is_empty() => return Err(AppError::InputUnavailable),
        None => {
            warn!("drawing without a base image, using a blank canvas");
            RgbaImage::new(BLANK_CANVAS.0, BLANK_CANVAS.1)
        }
    };

    bake_strokes(&mut canvas, strokes, options)?;
    debug!(
        width = canvas.width(),
        height = canvas.height(),
        strokes = strokes.len(),
        "composed request image"
    );
    Ok(canvas)
}

/// Fills each stroke outline over the canvas with the nonzero rule, in draw
/// order.
fn bake_strokes(canvas: &mut RgbaImage, strokes: &[Stroke], options: &StrokeOptions) -> Result<()> {
    if strokes.is_empty() {
        return Ok(());
    }
    let (w, h) = canvas.dimensions();
    let mut pixmap = Pixmap::new(w, h)
        .ok_or_else(|| AppError::MediaNotReady(format!("cannot paint on a {w}x{h} canvas")))?;
    for (dst, src) in pixmap.pixels_mut().iter_mut().zip(canvas.pixels()) {
        let [r, g, b, a] = src.0;
        *dst = ColorU8::from_rgba(r, g, b, a).premultiply();
    }

    let target = DVec2::new(w as f64, h as f64);
    for stroke in strokes {
        let outline = outline_stroke(stroke, target, options);
        let Some(path) = outline_path(&outline.polygon) else {
            continue;
        };
        let mut paint = Paint::default();
        let c = stroke.color;
        paint.set_color_rgba8(c.r, c.g, c.b, c.a);
        paint.anti_alias = true;
        pixmap.fill_path(&path, &paint, FillRule::Winding, Transform::identity(), None);
    }

    for (dst, src) in canvas.pixels_mut().zip(pixmap.pixels()) {
        let c = src.demultiply();
        *dst = Rgba([c.red(), c.green(), c.blue(), c.alpha()]);
    }
    Ok(())
}

fn outline_path(polygon: &[DVec2]) -> Option<Path> {
    let (first, rest) = polygon.split_first()?;
    let mut builder = PathBuilder::new();
    builder.move_to(first.x as f32, first.y as f32);
    for p in rest {
        builder.line_to(p.x as f32, p.y as f32);
    }
    builder.close();
    builder.finish()
}

pub fn encode_png_base64(img: &RgbaImage) -> Result<String> {
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
    Ok(STANDARD.encode(bytes))
}
