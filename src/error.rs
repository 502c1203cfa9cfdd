//! Error taxonomy for the annotation tool.
//!
//! Every variant is recovered at the boundary where it occurs: the app shows
//! the message to the user (or logs it, for mask decode failures) and leaves
//! the overlay state untouched.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    /// Nothing to send: no media and no strokes.
    #[error("please provide an image, stream, or draw something to analyze")]
    InputUnavailable,

    /// Screen capture or camera could not be acquired.
    #[error("could not access {device}: {reason}")]
    DeviceAccess { device: String, reason: String },

    /// The active frame has zero dimensions.
    #[error("media is not ready: {0}")]
    MediaNotReady(String),

    /// Model output was not the expected JSON shape.
    #[error("unexpected response from the model: {0}")]
    ResponseMalformed(String),

    /// A segmentation mask payload could not be decoded into pixels.
    #[error("failed to decode segmentation mask: {0}")]
    MaskDecode(String),

    /// A request is already in flight.
    #[error("a request is already in progress")]
    Busy,

    #[error("network error: {0}")]
    Network(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
}

pub type Result<T> = std::result::Result<T, AppError>;
