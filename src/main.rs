use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use eframe::egui;
use tracing::info;
use tracing_subscriber::EnvFilter;

use spatial_annotate::app::AnnotateApp;
use spatial_annotate::config::Args;
use spatial_annotate::inference::{GeminiClient, VisionModel};

fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("spatial_annotate={default_level},warn")));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level);

    if let Some(path) = &args.image {
        anyhow::ensure!(path.exists(), "file not found: {}", path.display());
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .context("failed to start async runtime")?;

    let settings = args.inference_settings();
    let model = GeminiClient::new(&settings).map(|c| Arc::new(c) as Arc<dyn VisionModel>);
    info!(model = %settings.model, "starting");

    let title = match &args.image {
        Some(path) => format!(
            "spatial-annotate - {}",
            path.file_name().unwrap_or_default().to_string_lossy()
        ),
        None => "spatial-annotate".to_string(),
    };

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1200.0, 800.0])
            .with_title(&title),
        ..Default::default()
    };

    let image = args.image.clone();
    eframe::run_native(
        &title,
        options,
        Box::new(move |_cc| Ok(Box::new(AnnotateApp::new(runtime, model, image)))),
    )
    .map_err(|e| anyhow::anyhow!("failed to run eframe: {e}"))
}
