//! Application state and the operations that mutate it.
//!
//! Views read slices of [`AppState`] and change it only through the methods
//! here, so overlays, strokes and media always move together.

use glam::DVec2;
use image::RgbaImage;
use std::path::PathBuf;
use tracing::{debug, info};

use crate::color::Color4;
use crate::compose::{compose_request_image, encode_png_base64};
use crate::detection::{DetectMode, Detections, MaskBox, NormBox, PointMarker, PromptParts};
use crate::error::{AppError, Result};
use crate::inference::InferenceRequest;
use crate::media::{ActiveMedia, FrameStream, StreamKind};
use crate::overlay::hovered_box;
use crate::projection::{
    OrientedBox, ProjectedBox, ProjectionCache, DEFAULT_FOV_DEG, MAX_FOV_DEG, MIN_FOV_DEG,
};
use crate::stroke::{StrokeCapture, DEFAULT_STROKE_OPTIONS};
use crate::viewport::Viewport;

pub const DEFAULT_TEMPERATURE: f32 = 0.5;

pub struct AppState {
    media: ActiveMedia,
    media_epoch: u64,

    pub mode: DetectMode,
    pub prompts: PromptParts,
    pub temperature: f32,
    fov_deg: f64,

    boxes_2d: Vec<NormBox>,
    points: Vec<PointMarker>,
    masks: Vec<MaskBox>,
    boxes_3d: Vec<OrientedBox>,
    /// Bumped whenever any overlay list is replaced or cleared.
    overlay_generation: u64,
    projection: ProjectionCache,

    strokes: StrokeCapture,
    draw_mode: bool,
    pub active_color: Color4,

    pub reveal_on_hover: bool,
    hover_entered: bool,

    loading: bool,
    image_sent: bool,
    session: u64,
}

impl Default for AppState {
    fn default() -> Self {
        Self {
            media: ActiveMedia::None,
            media_epoch: 0,
            mode: DetectMode::default(),
            prompts: PromptParts::default(),
            temperature: DEFAULT_TEMPERATURE,
            fov_deg: DEFAULT_FOV_DEG,
            boxes_2d: Vec::new(),
            points: Vec::new(),
            masks: Vec::new(),
            boxes_3d: Vec::new(),
            overlay_generation: 0,
            projection: ProjectionCache::default(),
            strokes: StrokeCapture::default(),
            draw_mode: false,
            active_color: Color4::default(),
            reveal_on_hover: false,
            hover_entered: false,
            loading: false,
            image_sent: false,
            session: 0,
        }
    }
}

impl AppState {
    // ── media ──────────────────────────────────────────────────────────

    pub fn media(&self) -> &ActiveMedia {
        &self.media
    }

    /// Changes whenever the active media is replaced.
    pub fn media_epoch(&self) -> u64 {
        self.media_epoch
    }

    pub fn refresh_media(&mut self) -> bool {
        self.media.refresh()
    }

    pub fn open_image(&mut self, path: PathBuf, image: RgbaImage) {
        self.reset();
        self.replace_media(ActiveMedia::Image { path, image });
    }

    pub fn start_stream(&mut self, stream: Box<dyn FrameStream>) {
        self.reset();
        if stream.kind() == StreamKind::Camera {
            self.mode = DetectMode::Boxes2d;
        }
        self.replace_media(ActiveMedia::Stream(stream));
    }

    /// Stops the live stream and clears the overlays computed from it.
    pub fn stop_stream(&mut self) {
        if self.media.stream_kind().is_some() {
            self.replace_media(ActiveMedia::None);
        }
        self.clear_overlays();
    }

    fn replace_media(&mut self, media: ActiveMedia) {
        self.media.shutdown();
        self.media = media;
        self.media_epoch += 1;
        self.image_sent = false;
    }

    /// Clears overlays and strokes, stops any stream. An opened image stays.
    pub fn reset(&mut self) {
        self.image_sent = false;
        self.clear_overlays();
        self.strokes.clear();
        if self.media.stream_kind().is_some() {
            self.replace_media(ActiveMedia::None);
        }
        self.session += 1;
        info!(session = self.session, "session reset");
    }

    pub fn session(&self) -> u64 {
        self.session
    }

    // ── overlays ───────────────────────────────────────────────────────

    pub fn clear_overlays(&mut self) {
        self.boxes_2d.clear();
        self.points.clear();
        self.masks.clear();
        self.boxes_3d.clear();
        self.hover_entered = false;
        self.overlay_generation += 1;
    }

    pub fn apply_detections(&mut self, detections: Detections) {
        debug!(mode = detections.mode().title(), count = detections.len(), "applying detections");
        match detections {
            Detections::Boxes2d(v) => self.boxes_2d = v,
            Detections::Points(v) => self.points = v,
            Detections::Masks(v) => self.masks = v,
            Detections::Boxes3d(v) => self.boxes_3d = v,
        }
        self.hover_entered = false;
        self.overlay_generation += 1;
    }

    pub fn overlay_generation(&self) -> u64 {
        self.overlay_generation
    }

    pub fn boxes_2d(&self) -> &[NormBox] {
        &self.boxes_2d
    }

    pub fn points(&self) -> &[PointMarker] {
        &self.points
    }

    pub fn masks(&self) -> &[MaskBox] {
        &self.masks
    }

    pub fn boxes_3d(&self) -> &[OrientedBox] {
        &self.boxes_3d
    }

    /// Boxes that take part in hover reveal for the current mode.
    pub fn hover_boxes(&self) -> Vec<&NormBox> {
        match self.mode {
            DetectMode::Boxes2d => self.boxes_2d.iter().collect(),
            DetectMode::Masks => self.masks.iter().map(|m| &m.bounds).collect(),
            DetectMode::Points | DetectMode::Boxes3d => Vec::new(),
        }
    }

    /// Tracks the pointer for hover reveal. `pointer` is relative to the
    /// viewport's top-left corner; positions off the viewport count as
    /// having left it. Returns the box to reveal.
    pub fn update_hover(&mut self, pointer: Option<DVec2>, viewport: Viewport) -> Option<usize> {
        let pointer = pointer.filter(|p| viewport.contains(*p));
        self.hover_entered = self.reveal_on_hover && !self.draw_mode && pointer.is_some();
        if !self.hover_entered {
            return None;
        }
        hovered_box(self.hover_boxes(), viewport, pointer?)
    }

    /// Whether overlay `index` is drawn: hover reveal hides all but the
    /// hovered box once the pointer is on the viewport.
    pub fn overlay_visible(&self, index: usize, hovered: Option<usize>) -> bool {
        !(self.reveal_on_hover && self.hover_entered) || hovered == Some(index)
    }

    pub fn fov_deg(&self) -> f64 {
        self.fov_deg
    }

    pub fn set_fov(&mut self, fov_deg: f64) {
        self.fov_deg = fov_deg.clamp(MIN_FOV_DEG, MAX_FOV_DEG);
    }

    /// 3D wireframes for the viewport, recomputed only when inputs change.
    pub fn projected_boxes(&mut self, viewport: Viewport) -> &[ProjectedBox] {
        self.projection
            .get(self.overlay_generation, &self.boxes_3d, self.fov_deg, viewport)
    }

    // ── drawing ────────────────────────────────────────────────────────

    pub fn strokes(&self) -> &StrokeCapture {
        &self.strokes
    }

    pub fn draw_mode(&self) -> bool {
        self.draw_mode
    }

    /// Leaving draw mode commits a stroke still under the pointer, so what is
    /// on screen is what gets sent.
    pub fn set_draw_mode(&mut self, on: bool) {
        if !on {
            self.strokes.end();
        }
        self.draw_mode = on;
    }

    /// `offset` is relative to the viewport's top-left corner.
    pub fn begin_stroke(&mut self, offset: DVec2, viewport: Viewport) -> bool {
        if !self.draw_mode {
            return false;
        }
        let started = self.strokes.begin(offset, viewport, self.active_color);
        if started {
            self.image_sent = false;
        }
        started
    }

    pub fn extend_stroke(&mut self, offset: DVec2, viewport: Viewport) -> bool {
        self.draw_mode && self.strokes.extend(offset, viewport)
    }

    pub fn end_stroke(&mut self) {
        self.strokes.end();
    }

    pub fn clear_strokes(&mut self) {
        self.strokes.clear();
    }

    // ── requests ───────────────────────────────────────────────────────

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn image_sent(&self) -> bool {
        self.image_sent
    }

    /// Builds the outgoing request and marks one as in flight.
    /// Nothing changes when this fails.
    pub fn begin_request(&mut self) -> Result<InferenceRequest> {
        if self.loading {
            return Err(AppError::Busy);
        }
        let frame = match &self.media {
            ActiveMedia::None => None,
            ActiveMedia::Stream(stream) => Some(stream.frame().ok_or_else(|| {
                AppError::MediaNotReady("stream has not delivered a frame yet".into())
            })?),
            media => media.frame(),
        };
        let image = compose_request_image(frame, self.strokes.finished(), &DEFAULT_STROKE_OPTIONS)?;
        let request = InferenceRequest {
            image_png_base64: encode_png_base64(&image)?,
            prompt: self.prompts.build(self.mode),
            temperature: self.temperature,
            disable_thinking: self.mode.disables_thinking(),
        };
        self.loading = true;
        self.hover_entered = false;
        Ok(request)
    }

    /// Completes the in-flight request. On error the overlays are untouched
    /// and the error is handed back for display.
    pub fn finish_request(&mut self, mode: DetectMode, outcome: Result<String>) -> Result<()> {
        self.loading = false;
        let detections = outcome.and_then(|text| mode.parse(&text))?;
        self.apply_detections(detections);
        self.image_sent = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::testing::FakeStream;
    use assert_matches::assert_matches;
    use image::Rgba;

    fn with_image() -> AppState {
        let mut state = AppState::default();
        state.open_image(
            PathBuf::from("x.png"),
            RgbaImage::from_pixel(64, 32, Rgba([1, 2, 3, 255])),
        );
        state
    }

    const BOXES: &str = r#"[{"box_2d":[100,200,400,600],"label":"cat"}]"#;

    #[test]
    fn strokes_only_captured_in_draw_mode() {
        let mut state = with_image();
        let v = Viewport::new(64.0, 32.0);
        assert!(!state.begin_stroke(DVec2::new(10.0, 10.0), v));
        assert!(!state.extend_stroke(DVec2::new(12.0, 10.0), v));
        assert!(state.strokes().is_empty());

        state.set_draw_mode(true);
        assert!(state.begin_stroke(DVec2::new(10.0, 10.0), v));
        assert!(state.extend_stroke(DVec2::new(20.0, 10.0), v));
        state.set_draw_mode(false);
        assert!(!state.extend_stroke(DVec2::new(30.0, 10.0), v));
        assert_eq!(state.strokes().finished()[0].points.len(), 2);
    }

    #[test]
    fn leaving_draw_mode_mid_stroke_still_sends_the_stroke() {
        let mut state = AppState::default();
        state.open_image(
            PathBuf::from("black.png"),
            RgbaImage::from_pixel(100, 100, Rgba([0, 0, 0, 255])),
        );
        let v = Viewport::new(100.0, 100.0);
        state.set_draw_mode(true);
        state.active_color = Color4::rgb(255, 0, 0);
        state.begin_stroke(DVec2::new(10.0, 50.0), v);
        state.extend_stroke(DVec2::new(90.0, 50.0), v);

        state.set_draw_mode(false);
        assert!(!state.strokes().is_drawing());
        assert_eq!(state.strokes().finished().len(), 1);

        let request = state.begin_request().unwrap();
        let bytes = base64::Engine::decode(
            &base64::engine::general_purpose::STANDARD,
            request.image_png_base64,
        )
        .unwrap();
        let sent = image::load_from_memory(&bytes).unwrap().to_rgba8();
        assert_eq!(sent.get_pixel(50, 50).0, [255, 0, 0, 255]);
    }

    #[test]
    fn successful_request_replaces_overlays() {
        let mut state = with_image();
        let request = state.begin_request().unwrap();
        assert!(state.is_loading());
        assert!(request.prompt.starts_with("Detect items"));
        assert!(!request.disable_thinking);

        state
            .finish_request(DetectMode::Boxes2d, Ok(BOXES.to_string()))
            .unwrap();
        assert!(!state.is_loading());
        assert!(state.image_sent());
        assert_eq!(state.boxes_2d()[0].label, "cat");
    }

    #[test]
    fn second_send_while_loading_is_refused() {
        let mut state = with_image();
        state.begin_request().unwrap();
        assert_matches!(state.begin_request(), Err(AppError::Busy));
    }

    #[test]
    fn malformed_response_keeps_previous_overlays() {
        let mut state = with_image();
        state.begin_request().unwrap();
        state
            .finish_request(DetectMode::Boxes2d, Ok(BOXES.to_string()))
            .unwrap();
        let generation = state.overlay_generation();

        state.begin_request().unwrap();
        let err = state
            .finish_request(DetectMode::Boxes2d, Ok("not json".into()))
            .unwrap_err();
        assert_matches!(err, AppError::ResponseMalformed(_));
        assert!(!state.is_loading());
        assert_eq!(state.boxes_2d().len(), 1);
        assert_eq!(state.overlay_generation(), generation);

        state.begin_request().unwrap();
        let err = state
            .finish_request(DetectMode::Boxes2d, Err(AppError::Network("down".into())))
            .unwrap_err();
        assert_matches!(err, AppError::Network(_));
        assert_eq!(state.boxes_2d().len(), 1);
    }

    #[test]
    fn nothing_to_send_without_media_or_strokes() {
        let mut state = AppState::default();
        assert_matches!(state.begin_request(), Err(AppError::InputUnavailable));
        assert!(!state.is_loading());
    }

    #[test]
    fn stream_without_frame_is_not_ready() {
        let mut state = AppState::default();
        let (stream, _) = FakeStream::new(StreamKind::Screen, None);
        state.start_stream(Box::new(stream));
        assert_matches!(state.begin_request(), Err(AppError::MediaNotReady(_)));
        assert!(!state.is_loading());
    }

    #[test]
    fn switching_media_stops_previous_stream() {
        let mut state = AppState::default();
        let (first, first_stopped) = FakeStream::new(StreamKind::Screen, None);
        state.start_stream(Box::new(first));
        let epoch = state.media_epoch();

        let (second, second_stopped) = FakeStream::new(StreamKind::Camera, None);
        state.mode = DetectMode::Points;
        state.start_stream(Box::new(second));
        assert!(first_stopped.get());
        assert!(!second_stopped.get());
        assert_eq!(state.mode, DetectMode::Boxes2d);
        assert!(state.media_epoch() > epoch);

        state.open_image(PathBuf::from("y.png"), RgbaImage::new(2, 2));
        assert!(second_stopped.get());
        assert_eq!(state.media().stream_kind(), None);
    }

    #[tokio::test]
    async fn live_camera_forces_2d_and_frames_are_sendable() {
        use crate::media::testing::FakeDevice;
        use crate::media::{spawn_capture, CAMERA_INTERVAL};
        use std::sync::atomic::Ordering;

        let (device, closed) = FakeDevice::new(StreamKind::Camera);
        let stream = spawn_capture(&tokio::runtime::Handle::current(), CAMERA_INTERVAL, move || {
            Ok(device)
        })
        .await
        .unwrap()
        .unwrap();

        let mut state = AppState::default();
        state.mode = DetectMode::Boxes3d;
        state.start_stream(Box::new(stream));
        assert_eq!(state.mode, DetectMode::Boxes2d);
        assert_eq!(state.media().stream_kind(), Some(StreamKind::Camera));
        assert_eq!(state.media().size(), DVec2::new(8.0, 6.0));
        assert!(state.begin_request().is_ok());

        state.stop_stream();
        assert!(!state.media().is_some());
        for _ in 0..400 {
            if closed.load(Ordering::Acquire) {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert!(closed.load(Ordering::Acquire));
    }

    #[test]
    fn reset_clears_everything_but_the_image() {
        let mut state = with_image();
        state.set_draw_mode(true);
        state.begin_stroke(DVec2::ZERO, Viewport::new(64.0, 32.0));
        state.end_stroke();
        state.begin_request().unwrap();
        state
            .finish_request(DetectMode::Boxes2d, Ok(BOXES.to_string()))
            .unwrap();
        let session = state.session();

        state.reset();
        assert!(state.boxes_2d().is_empty());
        assert!(state.strokes().is_empty());
        assert!(!state.image_sent());
        assert!(state.media().is_some());
        assert_eq!(state.session(), session + 1);
    }

    #[test]
    fn stop_stream_clears_overlays_and_stops_device() {
        let mut state = AppState::default();
        let (stream, stopped) = FakeStream::new(StreamKind::Screen, Some(RgbaImage::new(8, 8)));
        state.start_stream(Box::new(stream));
        state.begin_request().unwrap();
        state
            .finish_request(DetectMode::Boxes2d, Ok(BOXES.to_string()))
            .unwrap();
        state.stop_stream();
        assert!(stopped.get());
        assert!(state.boxes_2d().is_empty());
        assert!(!state.media().is_some());
    }

    #[test]
    fn hover_reveal_only_inside_the_viewport() {
        let mut state = with_image();
        state.reveal_on_hover = true;
        state.begin_request().unwrap();
        state
            .finish_request(DetectMode::Boxes2d, Ok(BOXES.to_string()))
            .unwrap();
        let v = Viewport::new(64.0, 32.0);

        // letterbox bar: nothing hidden
        assert_eq!(state.update_hover(Some(DVec2::new(-5.0, 10.0)), v), None);
        assert!(state.overlay_visible(0, None));

        // on the viewport but off every box: all hidden
        assert_eq!(state.update_hover(Some(DVec2::new(1.0, 1.0)), v), None);
        assert!(!state.overlay_visible(0, None));

        // over the box (x 0.2..0.6, y 0.1..0.4)
        let hovered = state.update_hover(Some(DVec2::new(25.0, 8.0)), v);
        assert_eq!(hovered, Some(0));
        assert!(state.overlay_visible(0, hovered));

        assert_eq!(state.update_hover(None, v), None);
        assert!(state.overlay_visible(0, None));
    }

    #[test]
    fn mask_mode_disables_thinking_and_hover_uses_mask_bounds() {
        let mut state = with_image();
        state.mode = DetectMode::Masks;
        let request = state.begin_request().unwrap();
        assert!(request.disable_thinking);
        state
            .finish_request(
                DetectMode::Masks,
                Ok(r#"[{"box_2d":[0,0,500,500],"label":"m","mask":"AAAA"}]"#.into()),
            )
            .unwrap();
        assert_eq!(state.hover_boxes().len(), 1);
        state.mode = DetectMode::Points;
        assert!(state.hover_boxes().is_empty());
    }

    #[test]
    fn fov_is_clamped_and_projection_follows_new_boxes() {
        let mut state = with_image();
        state.set_fov(10.0);
        assert_eq!(state.fov_deg(), MIN_FOV_DEG);
        state.set_fov(500.0);
        assert_eq!(state.fov_deg(), MAX_FOV_DEG);

        let v = Viewport::new(64.0, 32.0);
        assert!(state.projected_boxes(v).is_empty());
        state.apply_detections(Detections::Boxes3d(vec![OrientedBox {
            center: glam::DVec3::new(0.0, 4.0, 0.0),
            size: glam::DVec3::ONE,
            rpy: glam::DVec3::ZERO,
            label: "crate".into(),
        }]));
        assert_eq!(state.projected_boxes(v).len(), 1);
    }
}
