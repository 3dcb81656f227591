//! Turns configuration plus command-line overrides into a wired pipeline.

use std::path::Path;
use std::time::Duration;

use facegate_config::{load_resolved_config, ConfigError, ResolvedConfig};
use facegate_core::capture::{CaptureConfig, DeviceLocator, V4lCamera};
use facegate_core::display::{FrameDisplay, NullDisplay, SnapshotDisplay};
use facegate_core::gallery::FilesystemGalleryStore;
use facegate_core::provider::{LazyDlibProvider, ModelPathConfig};
use facegate_core::registry::JsonRegistry;
use facegate_core::{Pipeline, PipelineConfig};
use tracing::debug;

use crate::cli::{CaptureArgs, ModelArgs, StoreArgs};
use crate::errors::{AppError, AppResult};

pub type SystemPipeline = Pipeline<LazyDlibProvider, FilesystemGalleryStore, JsonRegistry, V4lCamera>;

pub fn config_error(err: ConfigError) -> AppError {
    match err {
        ConfigError::Read { path, source } => AppError::ConfigRead { path, source },
        ConfigError::Parse { path, message } => AppError::ConfigParse { path, message },
    }
}

/// Loads the configuration file and applies store overrides.
pub fn load_settings(stores: &StoreArgs) -> AppResult<ResolvedConfig> {
    let loaded = load_resolved_config(stores.config.as_deref()).map_err(config_error)?;
    match &loaded.source {
        Some(path) => debug!(path = %path.display(), "loaded configuration"),
        None => debug!("no configuration file found; using defaults"),
    }
    let mut settings = loaded.resolved;
    if let Some(gallery) = &stores.gallery {
        settings.gallery_path = gallery.clone();
    }
    if let Some(registry) = &stores.registry {
        settings.registry_path = registry.clone();
    }
    Ok(settings)
}

pub fn apply_capture_overrides(settings: &mut ResolvedConfig, capture: &CaptureArgs) {
    if let Some(device) = &capture.device {
        settings.video_device = device.clone();
    }
    if let Some(format) = &capture.pixel_format {
        settings.pixel_format = format.clone();
    }
    if let Some(frames) = capture.warmup_frames {
        settings.warmup_frames = frames;
    }
    if let Some(secs) = capture.window_secs {
        settings.capture_window = Duration::from_secs(secs.max(1));
    }
    if let Some(dir) = &capture.snapshot_dir {
        settings.snapshot_dir = Some(dir.clone());
    }
}

pub fn apply_model_overrides(settings: &mut ResolvedConfig, models: &ModelArgs) {
    if let Some(path) = &models.landmark_model {
        settings.landmark_model = Some(path.clone());
    }
    if let Some(path) = &models.encoder_model {
        settings.encoder_model = Some(path.clone());
    }
    if let Some(jitters) = models.jitters {
        settings.jitters = jitters;
    }
}

pub fn validate_threshold(threshold: f64) -> AppResult<f64> {
    if threshold.is_finite() && threshold > 0.0 {
        Ok(threshold)
    } else {
        Err(AppError::Validation {
            field: "threshold",
            message: format!("must be a positive number, got {threshold}"),
        })
    }
}

pub fn build_pipeline(settings: &ResolvedConfig) -> SystemPipeline {
    let provider = LazyDlibProvider::new(
        ModelPathConfig {
            landmark_model: settings.landmark_model.clone(),
            encoder_model: settings.encoder_model.clone(),
        },
        settings.jitters,
    );
    let camera = V4lCamera::new(CaptureConfig {
        device: DeviceLocator::from_option(Some(settings.video_device.clone())),
        pixel_format: settings.pixel_format.clone(),
        width: None,
        height: None,
        warmup_frames: settings.warmup_frames,
        lock_dir: None,
    });

    Pipeline::new(
        provider,
        FilesystemGalleryStore::new(&settings.gallery_path),
        JsonRegistry::new(&settings.registry_path),
        camera,
        PipelineConfig {
            capture_window: settings.capture_window,
            result_dwell: settings.result_dwell,
            match_threshold: settings.match_threshold,
        },
    )
}

pub fn build_display(snapshot_dir: Option<&Path>) -> Box<dyn FrameDisplay> {
    match snapshot_dir {
        Some(dir) => Box::new(SnapshotDisplay::new(dir)),
        None => Box::new(NullDisplay),
    }
}
