//! Detection modes: prompt construction and model-output parsing.
//!
//! Each mode owns its prompt template and output schema. The model answers
//! in one text blob, either raw JSON or JSON inside a fenced code block.

use glam::DVec3;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{AppError, Result};
use crate::projection::OrientedBox;

/// Coordinates in model output are on a 0..1000 grid.
const MODEL_SCALE: f64 = 1000.0;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DetectMode {
    #[default]
    Boxes2d,
    Masks,
    Points,
    Boxes3d,
}

impl DetectMode {
    pub const ALL: [DetectMode; 4] = [
        DetectMode::Boxes2d,
        DetectMode::Masks,
        DetectMode::Points,
        DetectMode::Boxes3d,
    ];

    pub fn title(self) -> &'static str {
        match self {
            DetectMode::Boxes2d => "2D bounding boxes",
            DetectMode::Masks => "Segmentation masks",
            DetectMode::Points => "Points",
            DetectMode::Boxes3d => "3D bounding boxes",
        }
    }

    /// Mask generation is slow with extended reasoning enabled.
    pub fn disables_thinking(self) -> bool {
        self == DetectMode::Masks
    }

    pub fn parse(self, text: &str) -> Result<Detections> {
        let json = unwrap_fenced(text);
        let detections = match self {
            DetectMode::Boxes2d => {
                let raw: Vec<RawBox2d> = parse_json(json)?;
                Detections::Boxes2d(raw.into_iter().map(RawBox2d::normalize).collect())
            }
            DetectMode::Points => {
                let raw: Vec<RawPoint> = parse_json(json)?;
                Detections::Points(raw.into_iter().map(RawPoint::normalize).collect())
            }
            DetectMode::Masks => {
                let raw: Vec<RawMask> = parse_json(json)?;
                let mut masks: Vec<MaskBox> = raw.into_iter().map(RawMask::normalize).collect();
                // large masks first so small ones paint on top
                masks.sort_by(|a, b| b.bounds.area().total_cmp(&a.bounds.area()));
                Detections::Masks(masks)
            }
            DetectMode::Boxes3d => {
                let raw: Vec<RawBox3d> = parse_json(json)?;
                Detections::Boxes3d(raw.into_iter().map(RawBox3d::into_oriented).collect())
            }
        };
        debug!(mode = self.title(), count = detections.len(), "parsed model output");
        Ok(detections)
    }
}

/// A box in normalized `[0,1]` media coordinates.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NormBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub label: String,
}

impl NormBox {
    pub fn area(&self) -> f64 {
        self.width * self.height
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PointMarker {
    pub x: f64,
    pub y: f64,
    pub label: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MaskBox {
    pub bounds: NormBox,
    /// Base64 PNG, intensity in the red channel.
    pub mask: String,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Detections {
    Boxes2d(Vec<NormBox>),
    Points(Vec<PointMarker>),
    Masks(Vec<MaskBox>),
    Boxes3d(Vec<OrientedBox>),
}

impl Detections {
    pub fn mode(&self) -> DetectMode {
        match self {
            Detections::Boxes2d(_) => DetectMode::Boxes2d,
            Detections::Points(_) => DetectMode::Points,
            Detections::Masks(_) => DetectMode::Masks,
            Detections::Boxes3d(_) => DetectMode::Boxes3d,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Detections::Boxes2d(v) => v.len(),
            Detections::Points(v) => v.len(),
            Detections::Masks(v) => v.len(),
            Detections::Boxes3d(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Deserialize)]
struct RawBox2d {
    box_2d: [f64; 4],
    #[serde(default)]
    label: String,
}

impl RawBox2d {
    fn normalize(self) -> NormBox {
        norm_box(self.box_2d, self.label)
    }
}

fn norm_box([ymin, xmin, ymax, xmax]: [f64; 4], label: String) -> NormBox {
    NormBox {
        x: xmin / MODEL_SCALE,
        y: ymin / MODEL_SCALE,
        width: (xmax - xmin) / MODEL_SCALE,
        height: (ymax - ymin) / MODEL_SCALE,
        label,
    }
}

#[derive(Deserialize)]
struct RawPoint {
    point: [f64; 2],
    #[serde(default)]
    label: String,
}

impl RawPoint {
    fn normalize(self) -> PointMarker {
        let [y, x] = self.point;
        PointMarker {
            x: x / MODEL_SCALE,
            y: y / MODEL_SCALE,
            label: self.label,
        }
    }
}

#[derive(Deserialize)]
struct RawMask {
    box_2d: [f64; 4],
    #[serde(default)]
    label: String,
    mask: String,
}

impl RawMask {
    fn normalize(self) -> MaskBox {
        MaskBox {
            bounds: norm_box(self.box_2d, self.label),
            mask: self.mask,
        }
    }
}

#[derive(Deserialize)]
struct RawBox3d {
    box_3d: [f64; 9],
    #[serde(default)]
    label: String,
}

impl RawBox3d {
    fn into_oriented(self) -> OrientedBox {
        let b = self.box_3d;
        OrientedBox {
            center: DVec3::new(b[0], b[1], b[2]),
            size: DVec3::new(b[3], b[4], b[5]),
            rpy: DVec3::new(b[6].to_radians(), b[7].to_radians(), b[8].to_radians()),
            label: self.label,
        }
    }
}

fn parse_json<T: serde::de::DeserializeOwned>(json: &str) -> Result<T> {
    serde_json::from_str(json).map_err(|e| {
        AppError::ResponseMalformed(format!(
            "{e} (raw: {})",
            json.chars().take(200).collect::<String>()
        ))
    })
}

/// Strips a surrounding Markdown code fence (optionally tagged `json`).
pub fn unwrap_fenced(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(inner) = trimmed
        .strip_prefix("```")
        .and_then(|rest| rest.strip_suffix("```"))
    else {
        return trimmed;
    };
    inner.strip_prefix("json").unwrap_or(inner).trim()
}

/// Editable pieces of the prompt for every mode.
#[derive(Clone, Debug, PartialEq)]
pub struct PromptParts {
    /// 2D mode: what to detect.
    pub target_2d: String,
    /// 2D mode: how to label, empty for the default.
    pub label_2d: String,
    masks: [String; 3],
    points: [String; 3],
    boxes_3d: [String; 3],
}

impl Default for PromptParts {
    fn default() -> Self {
        Self {
            target_2d: "items".into(),
            label_2d: String::new(),
            masks: [
                "Give the segmentation masks for".into(),
                "all objects".into(),
                ". Output a JSON list of segmentation masks where each entry contains the 2D bounding box in the key \"box_2d\", the segmentation mask in key \"mask\", and the text label in the key \"label\". Use descriptive labels.".into(),
            ],
            points: [
                "Point to the".into(),
                "items".into(),
                " with no more than 10 items. The answer should follow the json format: [{\"point\": <point>, \"label\": <label1>}, ...]. The points are in [y, x] format normalized to 0-1000.".into(),
            ],
            boxes_3d: [
                "Detect the 3D bounding boxes of".into(),
                "items".into(),
                ", output no more than 10 items. Output a json list where each entry contains the object name in \"label\" and its 3D bounding box in \"box_3d\".".into(),
            ],
        }
    }
}

impl PromptParts {
    /// Lead-in shown above the target field.
    pub fn lead(&self, mode: DetectMode) -> &str {
        match mode {
            DetectMode::Boxes2d => "Detect",
            DetectMode::Masks => &self.masks[0],
            DetectMode::Points => &self.points[0],
            DetectMode::Boxes3d => &self.boxes_3d[0],
        }
    }

    /// The user-editable target for `mode`.
    pub fn target_mut(&mut self, mode: DetectMode) -> &mut String {
        match mode {
            DetectMode::Boxes2d => &mut self.target_2d,
            DetectMode::Masks => &mut self.masks[1],
            DetectMode::Points => &mut self.points[1],
            DetectMode::Boxes3d => &mut self.boxes_3d[1],
        }
    }

    pub fn build(&self, mode: DetectMode) -> String {
        let parts = match mode {
            DetectMode::Boxes2d => {
                let label = if self.label_2d.trim().is_empty() {
                    "a text label"
                } else {
                    self.label_2d.as_str()
                };
                return format!(
                    "Detect {}, with no more than 20 items. Output a json list where each entry contains the 2D bounding box in \"box_2d\" and {} in \"label\".",
                    self.target_2d, label
                );
            }
            DetectMode::Masks => &self.masks,
            DetectMode::Points => &self.points,
            DetectMode::Boxes3d => &self.boxes_3d,
        };
        parts.join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn box_2d_scenario() {
        let out = DetectMode::Boxes2d
            .parse(r#"[{"box_2d":[100,200,400,600],"label":"cat"}]"#)
            .unwrap();
        let Detections::Boxes2d(boxes) = out else {
            panic!("wrong variant");
        };
        let b = &boxes[0];
        assert!((b.x - 0.2).abs() < 1e-12);
        assert!((b.y - 0.1).abs() < 1e-12);
        assert!((b.width - 0.4).abs() < 1e-12);
        assert!((b.height - 0.3).abs() < 1e-12);
        assert_eq!(b.label, "cat");
    }

    #[test]
    fn fenced_output_is_unwrapped() {
        let text = "```json\n[{\"point\":[500,250],\"label\":\"cup\"}]\n```";
        let out = DetectMode::Points.parse(text).unwrap();
        assert_eq!(
            out,
            Detections::Points(vec![PointMarker {
                x: 0.25,
                y: 0.5,
                label: "cup".into()
            }])
        );
        assert_eq!(unwrap_fenced("```\n[]\n```"), "[]");
        assert_eq!(unwrap_fenced("  []  "), "[]");
    }

    #[test]
    fn malformed_output_is_rejected() {
        assert_matches!(
            DetectMode::Boxes2d.parse("not json"),
            Err(AppError::ResponseMalformed(_))
        );
        // right JSON, wrong schema for the mode
        assert_matches!(
            DetectMode::Boxes3d.parse(r#"[{"box_2d":[1,2,3,4],"label":"x"}]"#),
            Err(AppError::ResponseMalformed(_))
        );
    }

    #[test]
    fn missing_labels_default_to_empty() {
        let out = DetectMode::Boxes2d
            .parse(r#"[{"box_2d":[0,0,10,10],"label":"a"},{"box_2d":[0,0,20,20]}]"#)
            .unwrap();
        let Detections::Boxes2d(boxes) = out else {
            panic!("wrong variant");
        };
        assert_eq!(boxes.len(), 2);
        assert_eq!(boxes[1].label, "");

        let points = DetectMode::Points.parse(r#"[{"point":[1,2]}]"#).unwrap();
        assert_eq!(points.len(), 1);
        let cubes = DetectMode::Boxes3d
            .parse(r#"[{"box_3d":[0,2,0,1,1,1,0,0,0]}]"#)
            .unwrap();
        assert_eq!(cubes.len(), 1);
    }

    #[test]
    fn masks_sorted_largest_first() {
        let text = r#"[
            {"box_2d":[0,0,100,100],"label":"small","mask":"AAAA"},
            {"box_2d":[0,0,900,900],"label":"big","mask":"BBBB"}
        ]"#;
        let Detections::Masks(masks) = DetectMode::Masks.parse(text).unwrap() else {
            panic!("wrong variant");
        };
        assert_eq!(masks[0].bounds.label, "big");
        assert_eq!(masks[1].mask, "AAAA");
    }

    #[test]
    fn box_3d_angles_become_radians() {
        let text = r#"[{"box_3d":[0.1,2.0,-0.3,1,1,1,0,90,180],"label":"chair"}]"#;
        let Detections::Boxes3d(boxes) = DetectMode::Boxes3d.parse(text).unwrap() else {
            panic!("wrong variant");
        };
        let b = &boxes[0];
        assert_eq!(b.center, DVec3::new(0.1, 2.0, -0.3));
        assert!((b.rpy.y - std::f64::consts::FRAC_PI_2).abs() < 1e-12);
        assert!((b.rpy.z - std::f64::consts::PI).abs() < 1e-12);
    }

    #[test]
    fn prompt_2d_uses_target_and_label() {
        let mut parts = PromptParts::default();
        assert!(parts
            .build(DetectMode::Boxes2d)
            .ends_with("\"box_2d\" and a text label in \"label\"."));
        *parts.target_mut(DetectMode::Boxes2d) = "dogs".into();
        parts.label_2d = "their breed".into();
        let prompt = parts.build(DetectMode::Boxes2d);
        assert!(prompt.starts_with("Detect dogs, with no more than 20 items."));
        assert!(prompt.contains("their breed in \"label\""));
    }

    #[test]
    fn schema_prompts_embed_editable_target() {
        let mut parts = PromptParts::default();
        *parts.target_mut(DetectMode::Points) = "red apples".into();
        let prompt = parts.build(DetectMode::Points);
        assert!(prompt.starts_with("Point to the red apples"));
        assert!(parts.build(DetectMode::Masks).contains("\"mask\""));
        assert!(parts.build(DetectMode::Boxes3d).contains("\"box_3d\""));
    }
}
