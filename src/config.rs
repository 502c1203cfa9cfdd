use std::path::PathBuf;

use clap::Parser;

pub const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

/// Detect objects, points, masks and 3D boxes in images with a hosted
/// vision-language model.
#[derive(Debug, Parser)]
#[command(name = "spatial-annotate", version)]
pub struct Args {
    /// Image to open at startup.
    pub image: Option<PathBuf>,

    /// API key for the inference endpoint.
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    #[arg(long, default_value = DEFAULT_MODEL)]
    pub model: String,

    /// Base URL of the generative language API.
    #[arg(long, default_value = DEFAULT_ENDPOINT)]
    pub endpoint: String,

    /// Request timeout in seconds.
    #[arg(long, default_value_t = 60)]
    pub timeout_secs: u64,

    /// Log level used when RUST_LOG is not set.
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct InferenceSettings {
    pub endpoint: String,
    pub api_key: String,
    pub model: String,
    pub timeout_secs: u64,
}

impl Args {
    pub fn inference_settings(&self) -> InferenceSettings {
        InferenceSettings {
            endpoint: self.endpoint.clone(),
            api_key: self.api_key.clone().unwrap_or_default(),
            model: self.model.clone(),
            timeout_secs: self.timeout_secs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply() {
        let args = Args::try_parse_from(["spatial-annotate", "--api-key", "k"]).unwrap();
        let settings = args.inference_settings();
        assert_eq!(settings.model, DEFAULT_MODEL);
        assert_eq!(settings.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(settings.timeout_secs, 60);
        assert_eq!(settings.api_key, "k");
        assert!(args.image.is_none());
    }

    #[test]
    fn positional_image_and_overrides() {
        let args = Args::try_parse_from([
            "spatial-annotate",
            "photo.png",
            "--api-key",
            "k",
            "--model",
            "other",
            "--timeout-secs",
            "5",
        ])
        .unwrap();
        assert_eq!(args.image, Some(PathBuf::from("photo.png")));
        assert_eq!(args.model, "other");
        assert_eq!(args.timeout_secs, 5);
    }
}
