//! Letterbox fitting of the active media inside the canvas area.

use glam::DVec2;

/// The on-screen rectangle occupied by the media, in pixels.
///
/// A zero-sized viewport means "nothing to overlay yet".
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Viewport {
    pub width: f64,
    pub height: f64,
}

impl Viewport {
    pub const EMPTY: Viewport = Viewport {
        width: 0.0,
        height: 0.0,
    };

    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }

    pub fn size(&self) -> DVec2 {
        DVec2::new(self.width, self.height)
    }

    /// Maps a pixel offset relative to the viewport's top-left corner into
    /// `[0,1]²`. Offsets outside the viewport are clamped onto its edge.
    pub fn normalize(&self, offset: DVec2) -> Option<DVec2> {
        if self.is_empty() {
            return None;
        }
        Some((offset / self.size()).clamp(DVec2::ZERO, DVec2::ONE))
    }

    /// Whether a pixel offset from the top-left corner lies on the viewport.
    pub fn contains(&self, offset: DVec2) -> bool {
        !self.is_empty()
            && (0.0..=self.width).contains(&offset.x)
            && (0.0..=self.height).contains(&offset.y)
    }

    pub fn denormalize(&self, point: DVec2) -> DVec2 {
        point * self.size()
    }
}

/// Largest rectangle with the media's aspect ratio that fits inside the
/// container. Any non-positive dimension yields [`Viewport::EMPTY`].
pub fn fit_viewport(container: DVec2, media: DVec2) -> Viewport {
    if media.x <= 0.0 || media.y <= 0.0 || container.x <= 0.0 || container.y <= 0.0 {
        return Viewport::EMPTY;
    }
    let media_aspect = media.x / media.y;
    let container_aspect = container.x / container.y;
    if media_aspect < container_aspect {
        Viewport::new(container.y * media_aspect, container.y)
    } else {
        Viewport::new(container.x, container.x / media_aspect)
    }
}
