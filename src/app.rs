use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use eframe::egui;
use glam::DVec2;
use tokio::sync::oneshot;
use tracing::{error, info, warn};

use crate::color::{ACCENT, STROKE_PALETTE};
use crate::detection::DetectMode;
use crate::error::{AppError, Result};
use crate::inference::VisionModel;
use crate::mask::{render_mask, MASK_OPACITY};
use crate::media::{
    load_image, spawn_capture, CameraDevice, PendingStream, ScreenDevice, StreamKind,
    CAMERA_INTERVAL, IMAGE_EXTENSIONS, SCREEN_INTERVAL,
};
use crate::overlay::{box_rect, point_position, ScreenRect};
use crate::projection::{MAX_FOV_DEG, MIN_FOV_DEG};
use crate::state::AppState;
use crate::stroke::{outline_stroke, DEFAULT_STROKE_OPTIONS};
use crate::viewport::{fit_viewport, Viewport};

type Pending = oneshot::Receiver<(DetectMode, Result<String>)>;

pub struct AnnotateApp {
    state: AppState,
    model: Option<Arc<dyn VisionModel>>,
    model_error: Option<String>,
    runtime: tokio::runtime::Runtime,
    pending: Option<Pending>,
    pending_stream: Option<(StreamKind, PendingStream)>,

    media_texture: Option<egui::TextureHandle>,
    media_texture_key: Option<(u64, u64)>,
    /// Recoloured masks by index, `None` when decoding failed.
    mask_textures: HashMap<usize, Option<egui::TextureHandle>>,
    mask_generation: u64,

    show_raw_prompt: bool,
    alert: Option<String>,
}

impl AnnotateApp {
    pub fn new(
        runtime: tokio::runtime::Runtime,
        model: Result<Arc<dyn VisionModel>>,
        initial_image: Option<PathBuf>,
    ) -> Self {
        let (model, model_error) = match model {
            Ok(model) => (Some(model), None),
            Err(e) => {
                warn!(error = %e, "inference disabled");
                (None, Some(e.to_string()))
            }
        };
        let mut app = Self {
            state: AppState::default(),
            model,
            model_error,
            runtime,
            pending: None,
            pending_stream: None,
            media_texture: None,
            media_texture_key: None,
            mask_textures: HashMap::new(),
            mask_generation: 0,
            show_raw_prompt: false,
            alert: None,
        };
        if let Some(path) = initial_image {
            app.open_path(path);
        }
        app
    }

    fn report(&mut self, err: AppError) {
        error!(error = %err, "action failed");
        self.alert = Some(err.to_string());
    }

    fn open_path(&mut self, path: PathBuf) {
        match load_image(&path) {
            Ok(image) => self.state.open_image(path, image),
            Err(e) => self.report(e),
        }
    }

    fn pick_image(&mut self) {
        if let Some(path) = rfd::FileDialog::new()
            .add_filter("Images", &IMAGE_EXTENSIONS)
            .pick_file()
        {
            self.open_path(path);
        }
    }

    /// Acquires a device off the UI thread; the stream replaces the active
    /// media once its first frame arrives.
    fn start_capture(&mut self, kind: StreamKind) {
        let handle = self.runtime.handle();
        let pending = match kind {
            StreamKind::Screen => spawn_capture(handle, SCREEN_INTERVAL, ScreenDevice::open),
            StreamKind::Camera => spawn_capture(handle, CAMERA_INTERVAL, || CameraDevice::open(0)),
        };
        info!(?kind, "acquiring stream");
        self.pending_stream = Some((kind, pending));
    }

    fn poll_stream(&mut self) {
        let Some((kind, rx)) = self.pending_stream.as_mut() else {
            return;
        };
        let kind = *kind;
        let outcome = match rx.try_recv() {
            Ok(outcome) => outcome,
            Err(oneshot::error::TryRecvError::Empty) => return,
            Err(oneshot::error::TryRecvError::Closed) => Err(AppError::DeviceAccess {
                device: format!("{kind:?}").to_lowercase(),
                reason: "capture worker ended".into(),
            }),
        };
        self.pending_stream = None;
        match outcome {
            Ok(stream) => self.state.start_stream(Box::new(stream)),
            Err(e) => self.report(e),
        }
    }

    fn send(&mut self) {
        let Some(model) = self.model.clone() else {
            let reason = self
                .model_error
                .clone()
                .unwrap_or_else(|| "no inference endpoint configured".into());
            self.report(AppError::Config(reason));
            return;
        };
        let request = match self.state.begin_request() {
            Ok(request) => request,
            Err(e) => {
                self.report(e);
                return;
            }
        };
        let mode = self.state.mode;
        info!(mode = mode.title(), model = model.model_name(), "sending request");

        let (tx, rx) = oneshot::channel();
        self.runtime.spawn(async move {
            let outcome = model.generate(&request).await;
            let _ = tx.send((mode, outcome));
        });
        self.pending = Some(rx);
    }

    fn poll_pending(&mut self) {
        let Some(rx) = self.pending.as_mut() else {
            return;
        };
        let (mode, outcome) = match rx.try_recv() {
            Ok(result) => result,
            Err(oneshot::error::TryRecvError::Empty) => return,
            Err(oneshot::error::TryRecvError::Closed) => {
                (self.state.mode, Err(AppError::Network("request task ended".into())))
            }
        };
        self.pending = None;
        if let Err(e) = self.state.finish_request(mode, outcome) {
            self.report(e);
        }
    }

    fn sync_media_texture(&mut self, ctx: &egui::Context) {
        let key = (self.state.media_epoch(), self.state.media().frame_seq());
        if self.media_texture_key == Some(key) {
            return;
        }
        self.media_texture_key = Some(key);
        let Some(frame) = self.state.media().frame() else {
            self.media_texture = None;
            return;
        };
        let size = [frame.width() as usize, frame.height() as usize];
        let image = egui::ColorImage::from_rgba_unmultiplied(size, frame.as_raw());
        match self.media_texture.as_mut() {
            Some(tex) => tex.set(image, egui::TextureOptions::LINEAR),
            None => {
                self.media_texture =
                    Some(ctx.load_texture("media", image, egui::TextureOptions::LINEAR))
            }
        }
    }

    fn mask_texture(&mut self, ctx: &egui::Context, index: usize) -> Option<egui::TextureHandle> {
        if self.mask_generation != self.state.overlay_generation() {
            self.mask_textures.clear();
            self.mask_generation = self.state.overlay_generation();
        }
        let masks = self.state.masks();
        self.mask_textures
            .entry(index)
            .or_insert_with(|| match render_mask(&masks[index].mask, index) {
                Ok(img) => {
                    let size = [img.width() as usize, img.height() as usize];
                    let image = egui::ColorImage::from_rgba_unmultiplied(size, img.as_raw());
                    Some(ctx.load_texture(
                        format!("mask-{index}"),
                        image,
                        egui::TextureOptions::NEAREST,
                    ))
                }
                Err(e) => {
                    error!(index, error = %e, "mask left blank");
                    None
                }
            })
            .clone()
    }

    // ── panels ─────────────────────────────────────────────────────────

    fn side_panel(&mut self, ui: &mut egui::Ui) {
        ui.heading("Source");
        if ui.button("Upload an image").clicked() {
            self.pick_image();
        }
        ui.add_enabled_ui(self.pending_stream.is_none(), |ui| {
            if ui.button("Live Camera").clicked() {
                self.start_capture(StreamKind::Camera);
            }
            if ui.button("Screenshare").clicked() {
                self.start_capture(StreamKind::Screen);
            }
        });
        if self.pending_stream.is_some() {
            ui.horizontal(|ui| {
                ui.spinner();
                ui.label("Waiting for the device...");
            });
        }
        let drawing = self.state.draw_mode();
        if ui.selectable_label(drawing, "Draw on image").clicked() {
            self.state.set_draw_mode(!drawing);
        }
        if ui.button("Reset session").clicked() {
            self.state.reset();
        }

        ui.separator();
        ui.heading("Mode");
        for mode in DetectMode::ALL {
            ui.selectable_value(&mut self.state.mode, mode, mode.title());
        }
        ui.checkbox(&mut self.state.reveal_on_hover, "Reveal on hover");
    }

    fn extra_controls(&mut self, ui: &mut egui::Ui) {
        if self.state.mode == DetectMode::Boxes3d {
            ui.colored_label(
                egui::Color32::from_rgb(255, 180, 0),
                "3D bounding boxes is a preliminary model capability. Use 2D bounding boxes for higher accuracy.",
            );
        }
        ui.horizontal(|ui| {
            if self.state.draw_mode() {
                for color in STROKE_PALETTE {
                    let selected = self.state.active_color == color;
                    let button = egui::Button::new("    ")
                        .fill(color.to_egui())
                        .stroke(if selected {
                            egui::Stroke::new(2.0, egui::Color32::WHITE)
                        } else {
                            egui::Stroke::NONE
                        });
                    if ui.add(button).on_hover_text(color.to_hex()).clicked() {
                        self.state.active_color = color;
                    }
                }
                ui.separator();
                if ui.button("Clear").clicked() {
                    self.state.clear_strokes();
                }
                if ui.button("Done").clicked() {
                    self.state.set_draw_mode(false);
                }
                return;
            }
            match self.state.media().stream_kind() {
                Some(StreamKind::Camera) => {
                    if ui.button("Stop camera").clicked() {
                        self.state.stop_stream();
                    }
                }
                Some(StreamKind::Screen) => {
                    if ui.button("Stop screenshare").clicked() {
                        self.state.stop_stream();
                    }
                }
                None => {}
            }
            if self.state.mode == DetectMode::Boxes3d {
                ui.label("FOV:");
                let mut fov = self.state.fov_deg();
                if ui
                    .add(egui::Slider::new(&mut fov, MIN_FOV_DEG..=MAX_FOV_DEG).step_by(1.0))
                    .changed()
                {
                    self.state.set_fov(fov);
                }
            }
        });
    }

    fn prompt_panel(&mut self, ui: &mut egui::Ui) {
        let loading = self.state.is_loading();
        let mode = self.state.mode;
        let mut submit = false;

        ui.horizontal(|ui| {
            let model = self
                .model
                .as_ref()
                .map(|m| m.model_name().to_string())
                .unwrap_or_else(|| "no model".into());
            if mode.disables_thinking() {
                ui.label(format!("PROMPT ({model} - thinking disabled)"));
            } else {
                ui.label(format!("PROMPT ({model})"));
            }
            ui.checkbox(&mut self.show_raw_prompt, "show raw prompt");
        });

        ui.add_enabled_ui(!loading, |ui| {
            if self.show_raw_prompt {
                ui.label(self.state.prompts.build(mode));
            } else {
                ui.label(format!("{}:", self.state.prompts.lead(mode)));
                let target = ui.add(
                    egui::TextEdit::singleline(self.state.prompts.target_mut(mode))
                        .hint_text("What kind of things do you want to detect?"),
                );
                submit |= target.lost_focus() && ui.input(|i| i.key_pressed(egui::Key::Enter));
                if mode == DetectMode::Boxes2d {
                    ui.label("Label each one with: (optional)");
                    let label = ui.add(
                        egui::TextEdit::singleline(&mut self.state.prompts.label_2d)
                            .hint_text("How do you want to label the things?"),
                    );
                    submit |= label.lost_focus() && ui.input(|i| i.key_pressed(egui::Key::Enter));
                }
            }

            ui.horizontal(|ui| {
                let text = if loading { "Sending..." } else { "Send" };
                if ui.add_enabled(!loading, egui::Button::new(text)).clicked() {
                    submit = true;
                }
                if loading {
                    ui.spinner();
                }
                ui.label("Temperature:");
                ui.add(egui::Slider::new(&mut self.state.temperature, 0.0..=2.0).step_by(0.05));
            });
        });

        if submit && !loading {
            self.send();
        }
    }

    // ── canvas ─────────────────────────────────────────────────────────

    fn canvas(&mut self, ui: &mut egui::Ui, ctx: &egui::Context) {
        let (response, painter) =
            ui.allocate_painter(ui.available_size(), egui::Sense::click_and_drag());
        let canvas_rect = response.rect;
        painter.rect_filled(canvas_rect, 0.0, egui::Color32::from_gray(40));

        if !self.state.media().is_some() && self.state.strokes().is_empty() && !self.state.draw_mode() {
            painter.text(
                canvas_rect.center(),
                egui::Align2::CENTER_CENTER,
                "Please upload an image, start the camera or share your screen.",
                egui::FontId::proportional(18.0),
                egui::Color32::GRAY,
            );
            return;
        }

        let container = DVec2::new(canvas_rect.width() as f64, canvas_rect.height() as f64);
        let media_size = if self.state.media().is_some() {
            self.state.media().size()
        } else {
            // blank drawing surface matching the outgoing canvas
            DVec2::new(640.0, 360.0)
        };
        let viewport = fit_viewport(container, media_size);
        if viewport.is_empty() {
            return;
        }
        let view_rect = egui::Rect::from_center_size(
            canvas_rect.center(),
            egui::vec2(viewport.width as f32, viewport.height as f32),
        );

        if let Some(tex) = &self.media_texture {
            painter.image(
                tex.id(),
                view_rect,
                egui::Rect::from_min_max(egui::pos2(0.0, 0.0), egui::pos2(1.0, 1.0)),
                egui::Color32::WHITE,
            );
        }

        self.handle_pointer(ctx, &response, view_rect, viewport);
        let pointer = response
            .hover_pos()
            .map(|p| DVec2::new((p.x - view_rect.min.x) as f64, (p.y - view_rect.min.y) as f64));
        let hovered = self.state.update_hover(pointer, viewport);

        self.draw_strokes(&painter, view_rect, viewport);
        match self.state.mode {
            DetectMode::Boxes2d => self.draw_boxes_2d(&painter, view_rect, viewport, hovered),
            DetectMode::Masks => self.draw_masks(ctx, &painter, view_rect, viewport, hovered),
            DetectMode::Points => self.draw_points(&painter, view_rect, viewport),
            DetectMode::Boxes3d => self.draw_boxes_3d(&painter, view_rect, viewport),
        }
    }

    fn handle_pointer(
        &mut self,
        ctx: &egui::Context,
        response: &egui::Response,
        view_rect: egui::Rect,
        viewport: Viewport,
    ) {
        if !self.state.draw_mode() {
            return;
        }
        let offset = |p: egui::Pos2| {
            DVec2::new((p.x - view_rect.min.x) as f64, (p.y - view_rect.min.y) as f64)
        };
        let (pressed, origin, down, moving, released, latest) = ctx.input(|i| {
            (
                i.pointer.primary_pressed(),
                i.pointer.press_origin(),
                i.pointer.primary_down(),
                i.pointer.is_moving(),
                i.pointer.primary_released(),
                i.pointer.latest_pos(),
            )
        });

        // a press on the media starts a stroke at once, a click leaves a dot
        if pressed && response.contains_pointer() {
            if let Some(origin) = origin {
                self.state.begin_stroke(offset(origin), viewport);
            }
        } else if down && moving && self.state.strokes().is_drawing() {
            // strokes follow the pointer even after it leaves the canvas
            if let Some(p) = latest {
                self.state.extend_stroke(offset(p), viewport);
            }
        }
        if self.state.strokes().is_drawing() && (released || !down) {
            self.state.end_stroke();
        }
    }

    fn draw_strokes(&self, painter: &egui::Painter, view_rect: egui::Rect, viewport: Viewport) {
        let origin = view_rect.min;
        for stroke in self.state.strokes().iter() {
            let outline = outline_stroke(stroke, viewport.size(), &DEFAULT_STROKE_OPTIONS);
            let color = stroke.color.to_egui();
            let mut mesh = egui::Mesh::default();
            for tri in &outline.triangles {
                let base = mesh.vertices.len() as u32;
                for v in tri {
                    mesh.colored_vertex(origin + egui::vec2(v.x as f32, v.y as f32), color);
                }
                mesh.add_triangle(base, base + 1, base + 2);
            }
            painter.add(egui::Shape::mesh(mesh));
        }
    }

    fn draw_label(painter: &egui::Painter, anchor: egui::Pos2, align: egui::Align2, text: &str) {
        let galley = painter.layout_no_wrap(
            text.to_string(),
            egui::FontId::proportional(13.0),
            egui::Color32::WHITE,
        );
        let rect = align.anchor_size(anchor, galley.size() + egui::vec2(6.0, 0.0));
        painter.rect_filled(rect, 0.0, ACCENT.to_egui());
        painter.galley(rect.min + egui::vec2(3.0, 0.0), galley, egui::Color32::WHITE);
    }

    fn to_egui_rect(view_rect: egui::Rect, r: ScreenRect) -> egui::Rect {
        egui::Rect::from_min_size(
            view_rect.min + egui::vec2(r.min.x as f32, r.min.y as f32),
            egui::vec2(r.size.x as f32, r.size.y as f32),
        )
    }

    fn draw_boxes_2d(&self, painter: &egui::Painter, view_rect: egui::Rect, viewport: Viewport, hovered: Option<usize>) {
        for (i, b) in self.state.boxes_2d().iter().enumerate() {
            if !self.state.overlay_visible(i, hovered) {
                continue;
            }
            let rect = Self::to_egui_rect(view_rect, box_rect(b, viewport));
            painter.rect_stroke(rect, 0.0, egui::Stroke::new(2.0, ACCENT.to_egui()), egui::StrokeKind::Middle);
            Self::draw_label(painter, rect.left_top(), egui::Align2::LEFT_TOP, &b.label);
        }
    }

    fn draw_masks(
        &mut self,
        ctx: &egui::Context,
        painter: &egui::Painter,
        view_rect: egui::Rect,
        viewport: Viewport,
        hovered: Option<usize>,
    ) {
        for i in 0..self.state.masks().len() {
            if !self.state.overlay_visible(i, hovered) {
                continue;
            }
            let bounds = box_rect(&self.state.masks()[i].bounds, viewport);
            let rect = Self::to_egui_rect(view_rect, bounds);
            if let Some(tex) = self.mask_texture(ctx, i) {
                painter.image(
                    tex.id(),
                    rect,
                    egui::Rect::from_min_max(egui::pos2(0.0, 0.0), egui::pos2(1.0, 1.0)),
                    egui::Color32::WHITE.gamma_multiply(MASK_OPACITY),
                );
            }
            painter.rect_stroke(rect, 0.0, egui::Stroke::new(2.0, ACCENT.to_egui()), egui::StrokeKind::Middle);
            Self::draw_label(painter, rect.left_top(), egui::Align2::LEFT_BOTTOM, &self.state.masks()[i].bounds.label);
        }
    }

    fn draw_points(&self, painter: &egui::Painter, view_rect: egui::Rect, viewport: Viewport) {
        for p in self.state.points() {
            let pos = point_position(p, viewport);
            let center = view_rect.min + egui::vec2(pos.x as f32, pos.y as f32);
            painter.circle(center, 8.0, ACCENT.to_egui(), egui::Stroke::new(2.0, egui::Color32::WHITE));
            Self::draw_label(painter, center - egui::vec2(0.0, 12.0), egui::Align2::CENTER_BOTTOM, &p.label);
        }
    }

    fn draw_boxes_3d(&mut self, painter: &egui::Painter, view_rect: egui::Rect, viewport: Viewport) {
        let origin = view_rect.min;
        let at = |v: DVec2| origin + egui::vec2(v.x as f32, v.y as f32);
        let stroke = egui::Stroke::new(2.0, ACCENT.to_egui());
        for projected in self.state.projected_boxes(viewport) {
            for segment in &projected.segments {
                painter.line_segment([at(segment.start), at(segment.end)], stroke);
            }
            Self::draw_label(painter, at(projected.label_pos), egui::Align2::CENTER_CENTER, &projected.label);
        }
    }

    fn alert_window(&mut self, ctx: &egui::Context) {
        let Some(message) = self.alert.clone() else {
            return;
        };
        let mut open = true;
        egui::Window::new("Error")
            .collapsible(false)
            .resizable(false)
            .anchor(egui::Align2::CENTER_CENTER, egui::vec2(0.0, 0.0))
            .open(&mut open)
            .show(ctx, |ui| {
                ui.label(&message);
                if ui.button("OK").clicked() {
                    self.alert = None;
                }
            });
        if !open {
            self.alert = None;
        }
    }
}

// ── eframe App impl ────────────────────────────────────────────────────────

impl eframe::App for AnnotateApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.poll_pending();
        self.poll_stream();
        self.state.refresh_media();
        self.sync_media_texture(ctx);

        if ctx.input(|i| i.key_pressed(egui::Key::Escape)) {
            self.state.set_draw_mode(false);
        }

        egui::SidePanel::left("controls")
            .resizable(false)
            .show(ctx, |ui| self.side_panel(ui));

        egui::TopBottomPanel::bottom("prompt").show(ctx, |ui| {
            self.extra_controls(ui);
            ui.separator();
            self.prompt_panel(ui);
        });

        egui::CentralPanel::default().show(ctx, |ui| self.canvas(ui, ctx));

        self.alert_window(ctx);

        if self.pending.is_some()
            || self.pending_stream.is_some()
            || self.state.media().stream_kind().is_some()
        {
            ctx.request_repaint_after(Duration::from_millis(100));
        }
    }
}

impl Drop for AnnotateApp {
    fn drop(&mut self) {
        self.state.stop_stream();
    }
}

