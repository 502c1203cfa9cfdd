pub mod app;
pub mod color;
pub mod compose;
pub mod config;
pub mod detection;
pub mod error;
pub mod inference;
pub mod mask;
pub mod media;
pub mod overlay;
pub mod projection;
pub mod state;
pub mod stroke;
pub mod viewport;

pub use error::{AppError, Result};
