//! Projection of oriented 3D boxes into viewport line segments.
//!
//! The model reports boxes in a Z-up world frame. The virtual camera sits at
//! the origin, tilted 90° about X, with a pinhole whose horizontal field of
//! view is user-controlled.

use glam::{DMat3, DQuat, DVec2, DVec3};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::viewport::Viewport;

pub const MIN_FOV_DEG: f64 = 30.0;
pub const MAX_FOV_DEG: f64 = 120.0;
pub const DEFAULT_FOV_DEG: f64 = 60.0;

const CAMERA_TILT_DEG: f64 = 90.0;
const LABEL_LIFT: f64 = 0.1;
/// Points closer than this to the image plane are treated as behind the camera.
const MIN_DEPTH: f64 = 1e-6;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrientedBox {
    pub center: DVec3,
    pub size: DVec3,
    /// Roll, pitch, yaw in radians.
    pub rpy: DVec3,
    pub label: String,
}

/// A screen-space line with its length and angle precomputed.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Segment {
    pub start: DVec2,
    pub end: DVec2,
    pub length: f64,
    pub angle: f64,
}

impl Segment {
    pub fn new(start: DVec2, end: DVec2) -> Self {
        let d = end - start;
        Self {
            start,
            end,
            length: d.length(),
            angle: d.y.atan2(d.x),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ProjectedBox {
    pub top: [DVec2; 4],
    pub bottom: [DVec2; 4],
    /// Four top edges, four bottom edges and four verticals, interleaved per ring index.
    pub segments: Vec<Segment>,
    pub label: String,
    pub label_pos: DVec2,
}

/// Pinhole camera derived from the viewport and field of view.
#[derive(Clone, Copy, Debug)]
pub struct Camera {
    focal: f64,
    principal: DVec2,
    view: DMat3,
}

impl Camera {
    pub fn new(fov_deg: f64, viewport: Viewport) -> Self {
        let focal = viewport.width / (2.0 * (fov_deg.to_radians() / 2.0).tan());
        Self {
            focal,
            principal: viewport.size() / 2.0,
            view: DMat3::from_rotation_x(CAMERA_TILT_DEG.to_radians()),
        }
    }

    /// Projects a world point, or `None` when it lies behind the camera.
    pub fn project(&self, world: DVec3) -> Option<DVec2> {
        let p = self.view * world;
        if p.z <= MIN_DEPTH {
            return None;
        }
        Some(DVec2::new(
            (self.focal * p.x + self.principal.x * p.z) / p.z,
            (self.focal * p.y + self.principal.y * p.z) / p.z,
        ))
    }
}

/// Rotation quaternion for roll (X), pitch (Y), yaw (Z) in radians.
pub fn rpy_to_quat(rpy: DVec3) -> DQuat {
    let (sr, cr) = (rpy.x / 2.0).sin_cos();
    let (sp, cp) = (rpy.y / 2.0).sin_cos();
    let (sy, cy) = (rpy.z / 2.0).sin_cos();
    DQuat::from_xyzw(
        sr * cp * cy - cr * sp * sy,
        cr * sp * cy + sr * cp * sy,
        cr * cp * sy - sr * sp * cy,
        cr * cp * cy + sr * sp * sy,
    )
}

/// World-space corners: the `+z` ring followed by the `-z` ring, each wound
/// so that `i` and `(i + 1) % 4` share an edge.
pub fn box_corners(b: &OrientedBox) -> [DVec3; 8] {
    let h = b.size / 2.0;
    let ring = [
        DVec3::new(-h.x, -h.y, 0.0),
        DVec3::new(-h.x, h.y, 0.0),
        DVec3::new(h.x, h.y, 0.0),
        DVec3::new(h.x, -h.y, 0.0),
    ];
    let rotation = DMat3::from_quat(rpy_to_quat(b.rpy));
    let mut corners = [DVec3::ZERO; 8];
    for (i, c) in ring.iter().enumerate() {
        corners[i] = rotation * DVec3::new(c.x, c.y, h.z) + b.center;
        corners[i + 4] = rotation * DVec3::new(c.x, c.y, -h.z) + b.center;
    }
    corners
}

/// Projects one box. Returns `None` if any vertex or the label anchor is
/// behind the camera.
pub fn project_box(b: &OrientedBox, camera: &Camera) -> Option<ProjectedBox> {
    let corners = box_corners(b);
    let mut screen = [DVec2::ZERO; 8];
    for (out, corner) in screen.iter_mut().zip(corners.iter()) {
        *out = camera.project(*corner)?;
    }
    let top = [screen[0], screen[1], screen[2], screen[3]];
    let bottom = [screen[4], screen[5], screen[6], screen[7]];

    let mut segments = Vec::with_capacity(12);
    for i in 0..4 {
        let j = (i + 1) % 4;
        segments.push(Segment::new(top[i], top[j]));
        segments.push(Segment::new(bottom[i], bottom[j]));
        segments.push(Segment::new(top[i], bottom[i]));
    }

    let mut anchor = corners.iter().copied().sum::<DVec3>() / 8.0;
    anchor.z += LABEL_LIFT;
    let label_pos = camera.project(anchor)?;

    Some(ProjectedBox {
        top,
        bottom,
        segments,
        label: b.label.clone(),
        label_pos,
    })
}

/// Projects every box that lies fully in front of the camera.
pub fn project_boxes(boxes: &[OrientedBox], fov_deg: f64, viewport: Viewport) -> Vec<ProjectedBox> {
    if viewport.is_empty() {
        return Vec::new();
    }
    let camera = Camera::new(fov_deg, viewport);
    boxes
        .iter()
        .filter_map(|b| {
            let projected = project_box(b, &camera);
            if projected.is_none() {
                debug!(label = %b.label, "skipping 3D box behind the camera");
            }
            projected
        })
        .collect()
}

/// Keeps the last projection until the boxes, FOV or viewport change.
#[derive(Debug, Default)]
pub struct ProjectionCache {
    key: Option<(u64, u64, u64, u64)>,
    value: Vec<ProjectedBox>,
}

impl ProjectionCache {
    /// `generation` must change whenever the box list is replaced.
    pub fn get(
        &mut self,
        generation: u64,
        boxes: &[OrientedBox],
        fov_deg: f64,
        viewport: Viewport,
    ) -> &[ProjectedBox] {
        let key = (
            generation,
            fov_deg.to_bits(),
            viewport.width.to_bits(),
            viewport.height.to_bits(),
        );
        if self.key != Some(key) {
            self.value = project_boxes(boxes, fov_deg, viewport);
            self.key = Some(key);
        }
        &self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cube(center: DVec3, size: DVec3, rpy: DVec3) -> OrientedBox {
        OrientedBox {
            center,
            size,
            rpy,
            label: "box".into(),
        }
    }

    #[test]
    fn zero_rotation_is_identity_quaternion() {
        let q = rpy_to_quat(DVec3::ZERO);
        assert_eq!(q, DQuat::IDENTITY);
    }

    #[test]
    fn yaw_quaternion_matches_axis_angle() {
        let q = rpy_to_quat(DVec3::new(0.0, 0.0, 0.7));
        let expected = DQuat::from_rotation_z(0.7);
        assert!(q.abs_diff_eq(expected, 1e-12));
    }

    #[test]
    fn corners_follow_ring_winding() {
        let b = cube(DVec3::ZERO, DVec3::new(2.0, 4.0, 6.0), DVec3::ZERO);
        let c = box_corners(&b);
        assert_eq!(c[0], DVec3::new(-1.0, -2.0, 3.0));
        assert_eq!(c[2], DVec3::new(1.0, 2.0, 3.0));
        assert_eq!(c[4], DVec3::new(-1.0, -2.0, -3.0));
        for i in 0..4 {
            let edge = c[(i + 1) % 4] - c[i];
            // adjacent ring vertices differ along exactly one axis
            assert_eq!(edge.to_array().iter().filter(|v| **v != 0.0).count(), 1);
        }
    }

    #[test]
    fn segments_are_consistent_with_endpoints() {
        let s = Segment::new(DVec2::new(1.0, 1.0), DVec2::new(4.0, 5.0));
        assert_eq!(s.length, 5.0);
        assert!((s.angle - (4.0f64).atan2(3.0)).abs() < 1e-12);
    }

    #[test]
    fn box_in_front_projects_to_axis_aligned_rectangle() {
        // With the 90° tilt the camera looks along world +Y and world Z maps to screen up.
        let viewport = Viewport::new(800.0, 600.0);
        let b = cube(DVec3::new(0.0, 5.0, 0.0), DVec3::new(2.0, 0.0, 1.0), DVec3::ZERO);
        let projected = project_boxes(&[b], 60.0, viewport);
        assert_eq!(projected.len(), 1);
        let p = &projected[0];
        assert_eq!(p.segments.len(), 12);

        let xs: Vec<f64> = p.top.iter().chain(p.bottom.iter()).map(|v| v.x).collect();
        let ys: Vec<f64> = p.top.iter().chain(p.bottom.iter()).map(|v| v.y).collect();
        let width = xs.iter().cloned().fold(f64::MIN, f64::max) - xs.iter().cloned().fold(f64::MAX, f64::min);
        let height = ys.iter().cloned().fold(f64::MIN, f64::max) - ys.iter().cloned().fold(f64::MAX, f64::min);
        assert!((width / height - 2.0).abs() < 1e-9);

        // centred on the principal point
        let mid = p.top.iter().chain(p.bottom.iter()).copied().sum::<DVec2>() / 8.0;
        assert!(mid.abs_diff_eq(DVec2::new(400.0, 300.0), 1e-9));
    }

    #[test]
    fn focal_length_follows_fov() {
        let viewport = Viewport::new(1000.0, 500.0);
        let camera = Camera::new(90.0, viewport);
        // 45° off-axis lands on the viewport edge at 90° FOV
        let p = camera.project(DVec3::new(1.0, 1.0, 0.0)).unwrap();
        assert!((p.x - 1000.0).abs() < 1e-9);
        assert!((p.y - 250.0).abs() < 1e-9);
    }

    #[test]
    fn projection_is_deterministic() {
        let viewport = Viewport::new(640.0, 480.0);
        let boxes = vec![cube(
            DVec3::new(0.3, 3.0, -0.4),
            DVec3::new(0.5, 0.7, 0.9),
            DVec3::new(0.1, -0.2, 0.3),
        )];
        let a = project_boxes(&boxes, 75.0, viewport);
        let b = project_boxes(&boxes, 75.0, viewport);
        assert_eq!(a, b);
    }

    #[test]
    fn boxes_behind_camera_are_skipped() {
        let viewport = Viewport::new(640.0, 480.0);
        let boxes = vec![
            cube(DVec3::new(0.0, -3.0, 0.0), DVec3::ONE, DVec3::ZERO),
            cube(DVec3::new(0.0, 0.2, 0.0), DVec3::ONE, DVec3::ZERO),
            cube(DVec3::new(0.0, 4.0, 0.0), DVec3::ONE, DVec3::ZERO),
        ];
        let projected = project_boxes(&boxes, 60.0, viewport);
        assert_eq!(projected.len(), 1);
        for s in &projected[0].segments {
            assert!(s.start.is_finite() && s.end.is_finite() && s.length.is_finite());
        }
    }

    #[test]
    fn label_sits_above_the_box_centre() {
        let viewport = Viewport::new(640.0, 480.0);
        let b = cube(DVec3::new(0.0, 4.0, 0.0), DVec3::ONE, DVec3::ZERO);
        let p = &project_boxes(&[b], 60.0, viewport)[0];
        assert!((p.label_pos.x - 320.0).abs() < 1e-9);
        // world +Z maps to screen up after the tilt
        assert!(p.label_pos.y < 240.0);
        let focal = 640.0 / (2.0 * 30f64.to_radians().tan());
        assert!((p.label_pos.y - (240.0 - focal * 0.1 / 4.0)).abs() < 1e-9);
        assert_eq!(p.label, "box");
    }

    #[test]
    fn empty_viewport_projects_nothing() {
        let b = cube(DVec3::new(0.0, 4.0, 0.0), DVec3::ONE, DVec3::ZERO);
        assert!(project_boxes(&[b], 60.0, Viewport::EMPTY).is_empty());
    }

    #[test]
    fn cache_recomputes_only_on_input_change() {
        let mut cache = ProjectionCache::default();
        let boxes = vec![cube(DVec3::new(0.0, 4.0, 0.0), DVec3::ONE, DVec3::ZERO)];
        let viewport = Viewport::new(640.0, 480.0);
        let first = cache.get(1, &boxes, 60.0, viewport).to_vec();
        // same generation: stale box list is not re-read
        assert_eq!(cache.get(1, &[], 60.0, viewport), first.as_slice());
        assert!(cache.get(2, &[], 60.0, viewport).is_empty());
        assert_eq!(cache.get(3, &boxes, 90.0, viewport).len(), 1);
        assert_ne!(cache.get(3, &boxes, 90.0, viewport), first.as_slice());
    }
}
