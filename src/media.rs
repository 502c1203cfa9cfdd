//! The active media: an opened image or a live frame stream.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use glam::DVec2;
use image::{DynamicImage, RgbImage, RgbaImage};
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{CameraIndex, RequestedFormat, RequestedFormatType};
use nokhwa::Camera;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use xcap::Monitor;

use crate::error::{AppError, Result};

/// File extensions offered by the open dialog.
pub const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "webp"];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamKind {
    Camera,
    Screen,
}

/// A live source of frames. The stream owns its device until [`stop`] is
/// called; callers must stop it before dropping or replacing it.
///
/// [`stop`]: FrameStream::stop
pub trait FrameStream {
    fn kind(&self) -> StreamKind;

    /// Takes any frames delivered since the last call. Returns whether the
    /// frame changed.
    fn refresh(&mut self) -> Result<bool>;

    fn frame(&self) -> Option<&RgbaImage>;

    /// Bumped each time [`refresh`](FrameStream::refresh) delivers a frame.
    fn frame_seq(&self) -> u64;

    fn stop(&mut self);
}

/// A device polled from a blocking worker thread. It is opened on that
/// thread and never leaves it.
pub trait CaptureDevice {
    fn kind(&self) -> StreamKind;

    fn capture(&mut self) -> Result<RgbaImage>;

    /// Releases the device. Called once when the worker exits.
    fn close(&mut self);
}

pub const SCREEN_INTERVAL: Duration = Duration::from_millis(500);
pub const CAMERA_INTERVAL: Duration = Duration::from_millis(33);

fn device_error(device: &str, reason: String) -> AppError {
    AppError::DeviceAccess {
        device: device.into(),
        reason,
    }
}

/// The primary monitor.
pub struct ScreenDevice {
    monitor: Monitor,
}

impl ScreenDevice {
    pub fn open() -> Result<Self> {
        let monitors =
            Monitor::all().map_err(|e| device_error("screen", format!("listing monitors: {e}")))?;
        let mut fallback = None;
        for monitor in monitors {
            if monitor.is_primary().unwrap_or(false) {
                return Ok(Self { monitor });
            }
            fallback.get_or_insert(monitor);
        }
        fallback
            .map(|monitor| Self { monitor })
            .ok_or_else(|| device_error("screen", "no monitor found".into()))
    }
}

impl CaptureDevice for ScreenDevice {
    fn kind(&self) -> StreamKind {
        StreamKind::Screen
    }

    fn capture(&mut self) -> Result<RgbaImage> {
        let image = self
            .monitor
            .capture_image()
            .map_err(|e| device_error("screen", format!("capture failed: {e}")))?;
        debug!(width = image.width(), height = image.height(), "captured screen frame");
        Ok(image)
    }

    fn close(&mut self) {}
}

pub struct CameraDevice {
    camera: Camera,
}

impl CameraDevice {
    pub fn open(index: u32) -> Result<Self> {
        let format =
            RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestFrameRate);
        let mut camera = Camera::new(CameraIndex::Index(index), format)
            .map_err(|e| device_error("camera", format!("opening camera {index}: {e}")))?;
        camera
            .open_stream()
            .map_err(|e| device_error("camera", format!("starting camera {index}: {e}")))?;
        info!(index, "camera opened");
        Ok(Self { camera })
    }
}

impl CaptureDevice for CameraDevice {
    fn kind(&self) -> StreamKind {
        StreamKind::Camera
    }

    fn capture(&mut self) -> Result<RgbaImage> {
        let buffer = self
            .camera
            .frame()
            .map_err(|e| device_error("camera", format!("reading frame: {e}")))?;
        let decoded = buffer
            .decode_image::<RgbFormat>()
            .map_err(|e| device_error("camera", format!("decoding frame: {e}")))?;
        let (width, height) = (decoded.width(), decoded.height());
        let rgb = RgbImage::from_raw(width, height, decoded.into_raw())
            .ok_or_else(|| device_error("camera", "frame buffer size mismatch".into()))?;
        Ok(DynamicImage::ImageRgb8(rgb).to_rgba8())
    }

    fn close(&mut self) {
        if let Err(e) = self.camera.stop_stream() {
            warn!(error = %e, "failed to stop camera");
        }
    }
}

/// Frames captured on a worker thread that owns the device.
#[derive(Debug)]
pub struct CaptureStream {
    kind: StreamKind,
    frames: mpsc::Receiver<Result<RgbaImage>>,
    frame: Option<RgbaImage>,
    seq: u64,
    stop: Arc<AtomicBool>,
}

/// Resolves once the device delivered its first frame or failed to.
pub type PendingStream = oneshot::Receiver<Result<CaptureStream>>;

/// Opens a device on the blocking pool and keeps capturing every `interval`
/// until the stream is stopped or dropped.
pub fn spawn_capture<D, F>(handle: &Handle, interval: Duration, open: F) -> PendingStream
where
    D: CaptureDevice + 'static,
    F: FnOnce() -> Result<D> + Send + 'static,
{
    let (ready_tx, ready_rx) = oneshot::channel();
    handle.spawn_blocking(move || {
        let mut device = match open() {
            Ok(device) => device,
            Err(e) => {
                let _ = ready_tx.send(Err(e));
                return;
            }
        };
        // a first frame proves the permission to capture
        let first = match device.capture() {
            Ok(frame) => frame,
            Err(e) => {
                device.close();
                let _ = ready_tx.send(Err(e));
                return;
            }
        };
        let kind = device.kind();
        let (frame_tx, frame_rx) = mpsc::channel(1);
        let stop = Arc::new(AtomicBool::new(false));
        let stream = CaptureStream {
            kind,
            frames: frame_rx,
            frame: Some(first),
            seq: 1,
            stop: stop.clone(),
        };
        if ready_tx.send(Ok(stream)).is_ok() {
            info!(?kind, "capture started");
            capture_loop(&mut device, interval, &frame_tx, &stop);
        }
        device.close();
        debug!(?kind, "capture worker exited");
    });
    ready_rx
}

fn capture_loop<D: CaptureDevice>(
    device: &mut D,
    interval: Duration,
    frames: &mpsc::Sender<Result<RgbaImage>>,
    stop: &AtomicBool,
) {
    while !stop.load(Ordering::Acquire) {
        let started = Instant::now();
        let frame = device.capture();
        if frames.blocking_send(frame).is_err() {
            break;
        }
        if let Some(rest) = interval.checked_sub(started.elapsed()) {
            std::thread::sleep(rest);
        }
    }
}

impl FrameStream for CaptureStream {
    fn kind(&self) -> StreamKind {
        self.kind
    }

    fn refresh(&mut self) -> Result<bool> {
        let mut changed = false;
        loop {
            match self.frames.try_recv() {
                Ok(Ok(frame)) => {
                    self.frame = Some(frame);
                    self.seq += 1;
                    changed = true;
                }
                Ok(Err(e)) => return Err(e),
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => return Ok(changed),
            }
        }
    }

    fn frame(&self) -> Option<&RgbaImage> {
        self.frame.as_ref()
    }

    fn frame_seq(&self) -> u64 {
        self.seq
    }

    fn stop(&mut self) {
        if !self.stop.swap(true, Ordering::AcqRel) {
            info!(kind = ?self.kind, "capture stopped");
        }
    }
}

#[derive(Default)]
pub enum ActiveMedia {
    #[default]
    None,
    Image {
        path: PathBuf,
        image: RgbaImage,
    },
    Stream(Box<dyn FrameStream>),
}

impl ActiveMedia {
    pub fn frame(&self) -> Option<&RgbaImage> {
        match self {
            ActiveMedia::None => None,
            ActiveMedia::Image { image, .. } => Some(image),
            ActiveMedia::Stream(stream) => stream.frame(),
        }
    }

    /// Intrinsic pixel size, zero until a frame is available.
    pub fn size(&self) -> DVec2 {
        self.frame()
            .map(|f| DVec2::new(f.width() as f64, f.height() as f64))
            .unwrap_or(DVec2::ZERO)
    }

    pub fn is_some(&self) -> bool {
        !matches!(self, ActiveMedia::None)
    }

    pub fn stream_kind(&self) -> Option<StreamKind> {
        match self {
            ActiveMedia::Stream(stream) => Some(stream.kind()),
            _ => None,
        }
    }

    pub fn frame_seq(&self) -> u64 {
        match self {
            ActiveMedia::Stream(stream) => stream.frame_seq(),
            _ => 0,
        }
    }

    /// Pulls a new frame from a live stream. Capture errors keep the last frame.
    pub fn refresh(&mut self) -> bool {
        let ActiveMedia::Stream(stream) = self else {
            return false;
        };
        match stream.refresh() {
            Ok(changed) => changed,
            Err(e) => {
                warn!(error = %e, "frame refresh failed");
                false
            }
        }
    }

    /// Stops any live stream and leaves no media behind.
    pub fn shutdown(&mut self) {
        if let ActiveMedia::Stream(stream) = self {
            stream.stop();
        }
        *self = ActiveMedia::None;
    }
}

pub fn load_image(path: &Path) -> Result<RgbaImage> {
    let image = image::open(path)?.to_rgba8();
    info!(path = %path.display(), width = image.width(), height = image.height(), "opened image");
    Ok(image)
}
