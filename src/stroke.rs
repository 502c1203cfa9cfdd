//! Freehand stroke capture and outline generation.
//!
//! Points are stored normalized to the viewport so a stroke survives window
//! resizes. At render time they are scaled to the target surface and turned
//! into a filled outline: a ribbon offset on both sides of the smoothed
//! centre line, closed with round caps.

use std::f64::consts::PI;

use glam::DVec2;
use serde::{Deserialize, Serialize};

use crate::color::Color4;
use crate::viewport::Viewport;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Stroke {
    pub points: Vec<DVec2>,
    pub color: Color4,
}

/// Collects strokes from pointer events.
///
/// The stroke being dragged lives in `current` and only joins `finished`
/// on pointer-up.
#[derive(Clone, Debug, Default)]
pub struct StrokeCapture {
    finished: Vec<Stroke>,
    current: Option<Stroke>,
}

impl StrokeCapture {
    /// Starts a stroke at `offset`, a pixel position relative to the
    /// viewport's top-left corner. Presses off the viewport are ignored;
    /// later points may leave it and are clamped onto its edge.
    pub fn begin(&mut self, offset: DVec2, viewport: Viewport, color: Color4) -> bool {
        if !viewport.contains(offset) {
            return false;
        }
        let Some(point) = viewport.normalize(offset) else {
            return false;
        };
        if let Some(unfinished) = self.current.take() {
            self.finished.push(unfinished);
        }
        self.current = Some(Stroke {
            points: vec![point],
            color,
        });
        true
    }

    pub fn extend(&mut self, offset: DVec2, viewport: Viewport) -> bool {
        let (Some(stroke), Some(point)) = (self.current.as_mut(), viewport.normalize(offset)) else {
            return false;
        };
        stroke.points.push(point);
        true
    }

    pub fn end(&mut self) {
        if let Some(stroke) = self.current.take() {
            self.finished.push(stroke);
        }
    }

    pub fn clear(&mut self) {
        self.finished.clear();
        self.current = None;
    }

    pub fn is_drawing(&self) -> bool {
        self.current.is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.finished.is_empty() && self.current.is_none()
    }

    pub fn finished(&self) -> &[Stroke] {
        &self.finished
    }

    /// Finished strokes followed by the in-progress one, in draw order.
    pub fn iter(&self) -> impl Iterator<Item = &Stroke> {
        self.finished.iter().chain(self.current.iter())
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StrokeOptions {
    /// Diameter at the nominal pressure, in target pixels.
    pub size: f64,
    /// How much pressure narrows the line, 0 for constant width.
    pub thinning: f64,
    /// 0 follows the pointer exactly, values towards 1 lag and smooth.
    pub streamline: f64,
    /// Mouse and touch input have no real pressure.
    pub pressure: f64,
}

pub const DEFAULT_STROKE_OPTIONS: StrokeOptions = StrokeOptions {
    size: 8.0,
    thinning: 0.0,
    streamline: 0.5,
    pressure: 0.5,
};

const CAP_STEPS: usize = 8;
const MIN_SPACING: f64 = 0.5;

/// Filled shape of a stroke, as a closed polygon plus a triangulation of
/// the same area for GPU painters that only fill convex primitives.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StrokeOutline {
    pub polygon: Vec<DVec2>,
    pub triangles: Vec<[DVec2; 3]>,
}

impl StrokeOptions {
    fn radius(&self) -> f64 {
        self.size * (0.5 - self.thinning * (0.5 - self.pressure))
    }
}

/// Scales normalized points to a `target`-sized surface and outlines them.
pub fn outline_stroke(stroke: &Stroke, target: DVec2, options: &StrokeOptions) -> StrokeOutline {
    let scaled: Vec<DVec2> = stroke.points.iter().map(|p| *p * target).collect();
    outline(&scaled, options)
}

/// Outlines a polyline given in target pixels.
pub fn outline(points: &[DVec2], options: &StrokeOptions) -> StrokeOutline {
    let radius = options.radius();
    let centre = streamline(points, options.streamline);
    match centre.as_slice() {
        [] => StrokeOutline::default(),
        [p] => dot(*p, radius),
        _ => ribbon(&centre, radius),
    }
}

fn streamline(points: &[DVec2], amount: f64) -> Vec<DVec2> {
    let t = 0.15 + (1.0 - amount.clamp(0.0, 1.0)) * 0.85;
    let Some((&first, rest)) = points.split_first() else {
        return Vec::new();
    };
    let mut out = vec![first];
    let mut last = first;
    for &p in rest {
        let next = last.lerp(p, t);
        if last.distance(next) >= MIN_SPACING {
            out.push(next);
            last = next;
        }
    }
    // the tail always ends on the final pointer position
    if let Some(&tail) = rest.last() {
        if tail != last {
            if out.len() > 1 && last.distance(tail) < MIN_SPACING {
                out.pop();
            }
            out.push(tail);
        }
    }
    out
}

fn dot(centre: DVec2, radius: f64) -> StrokeOutline {
    let steps = CAP_STEPS * 2;
    let polygon: Vec<DVec2> = (0..steps)
        .map(|i| {
            let a = 2.0 * PI * i as f64 / steps as f64;
            centre + DVec2::new(a.cos(), a.sin()) * radius
        })
        .collect();
    let triangles = (0..steps)
        .map(|i| [centre, polygon[i], polygon[(i + 1) % steps]])
        .collect();
    StrokeOutline { polygon, triangles }
}

fn ribbon(centre: &[DVec2], radius: f64) -> StrokeOutline {
    let n = centre.len();
    let mut normals = Vec::with_capacity(n);
    let mut last_dir = (centre[n - 1] - centre[0]).normalize_or(DVec2::X);
    for i in 0..n {
        let prev = centre[i.saturating_sub(1)];
        let next = centre[(i + 1).min(n - 1)];
        let dir = (next - prev).normalize_or(last_dir);
        last_dir = dir;
        normals.push(dir.perp());
    }
    let left: Vec<DVec2> = centre.iter().zip(&normals).map(|(p, n)| *p + *n * radius).collect();
    let right: Vec<DVec2> = centre.iter().zip(&normals).map(|(p, n)| *p - *n * radius).collect();

    let forward_end = -normals[n - 1].perp();
    let forward_start = -normals[0].perp();
    let end_cap = cap(centre[n - 1], normals[n - 1], forward_end, radius);
    let start_cap = cap(centre[0], -normals[0], -forward_start, radius);

    let mut polygon = Vec::with_capacity(2 * n + 2 * (CAP_STEPS - 1));
    polygon.extend_from_slice(&left);
    polygon.extend_from_slice(&end_cap);
    polygon.extend(right.iter().rev());
    polygon.extend_from_slice(&start_cap);

    let mut triangles = Vec::with_capacity(2 * (n - 1) + 2 * CAP_STEPS);
    for i in 0..n - 1 {
        triangles.push([left[i], right[i], left[i + 1]]);
        triangles.push([right[i], right[i + 1], left[i + 1]]);
    }
    fan(&mut triangles, centre[n - 1], left[n - 1], &end_cap, right[n - 1]);
    fan(&mut triangles, centre[0], right[0], &start_cap, left[0]);

    StrokeOutline { polygon, triangles }
}

/// Interior points of a half circle from `centre + from * r` to
/// `centre - from * r`, bulging towards `bulge`.
fn cap(centre: DVec2, from: DVec2, bulge: DVec2, radius: f64) -> Vec<DVec2> {
    (1..CAP_STEPS)
        .map(|i| {
            let a = PI * i as f64 / CAP_STEPS as f64;
            centre + (from * a.cos() + bulge * a.sin()) * radius
        })
        .collect()
}

fn fan(out: &mut Vec<[DVec2; 3]>, centre: DVec2, first: DVec2, arc: &[DVec2], last: DVec2) {
    let mut prev = first;
    for &p in arc.iter().chain(std::iter::once(&last)) {
        out.push([centre, prev, p]);
        prev = p;
    }
}
