//! Screen placement of normalized detections and hover hit-testing.

use glam::DVec2;

use crate::detection::{NormBox, PointMarker};
use crate::viewport::Viewport;

/// Axis-aligned rectangle in viewport pixels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScreenRect {
    pub min: DVec2,
    pub size: DVec2,
}

impl ScreenRect {
    pub fn max(&self) -> DVec2 {
        self.min + self.size
    }

    pub fn area(&self) -> f64 {
        self.size.x * self.size.y
    }

    /// Strict containment: a pointer on the border is outside.
    pub fn contains(&self, p: DVec2) -> bool {
        let max = self.max();
        p.x > self.min.x && p.x < max.x && p.y > self.min.y && p.y < max.y
    }
}

pub fn box_rect(b: &NormBox, viewport: Viewport) -> ScreenRect {
    ScreenRect {
        min: viewport.denormalize(DVec2::new(b.x, b.y)),
        size: viewport.denormalize(DVec2::new(b.width, b.height)),
    }
}

pub fn point_position(p: &PointMarker, viewport: Viewport) -> DVec2 {
    viewport.denormalize(DVec2::new(p.x, p.y))
}

/// Index of the smallest box whose bounds contain `pointer` (viewport pixels).
/// Equal areas resolve to the earlier box.
pub fn hovered_box<'a>(
    boxes: impl IntoIterator<Item = &'a NormBox>,
    viewport: Viewport,
    pointer: DVec2,
) -> Option<usize> {
    boxes
        .into_iter()
        .map(|b| box_rect(b, viewport))
        .enumerate()
        .filter(|(_, rect)| rect.contains(pointer))
        .min_by(|(ia, a), (ib, b)| a.area().total_cmp(&b.area()).then(ia.cmp(ib)))
        .map(|(i, _)| i)
}
