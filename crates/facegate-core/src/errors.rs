use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use image::ImageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("invalid {field}: {message}")]
    Validation {
        field: &'static str,
        message: String,
    },

    #[error("no face detected: {reason}")]
    NoFaceDetected { reason: String },

    #[error("gallery {path} is corrupt: {message}")]
    CorruptGallery { path: PathBuf, message: String },

    #[error("failed to read gallery {path}: {source}")]
    GalleryRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write gallery {path}: {source}")]
    GalleryWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("no authorized person named '{name}'")]
    NotFound { name: String },

    #[error("an authorized person named '{name}' already exists")]
    PersonExists { name: String },

    #[error("camera is in use by another capture")]
    DeviceBusy,

    #[error("embedding dimension mismatch: gallery holds {expected} values, probe has {found}")]
    EmbeddingMismatch { expected: usize, found: usize },

    #[error("page {page} is out of range (page size {page_size}, {count} entries)")]
    InvalidPage {
        page: usize,
        page_size: usize,
        count: usize,
    },

    #[error("failed to read registry {path}: {source}")]
    RegistryRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write registry {path}: {source}")]
    RegistryWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("registry {path} is corrupt: {message}")]
    CorruptRegistry { path: PathBuf, message: String },

    #[error("failed to open video device {device}: {source}")]
    DeviceOpen {
        device: String,
        #[source]
        source: io::Error,
    },

    #[error("device capability error: {0}")]
    Capability(String),

    #[error("unsupported pixel format '{0}' for selected device")]
    UnsupportedFormat(String),

    #[error("failed processing frame data: {0}")]
    FrameProcessing(String),

    #[error("input file not found or unreadable: {path}")]
    MissingInput { path: PathBuf },

    #[error("failed to decode image {path}: {source}")]
    ImageDecode {
        path: PathBuf,
        #[source]
        source: ImageError,
    },

    #[error("missing {kind} model; provide {flag} or set ${env}")]
    MissingModel {
        kind: &'static str,
        flag: &'static str,
        env: &'static str,
    },

    #[error("failed to load model {path}: {message}")]
    ModelLoad { path: PathBuf, message: String },

    #[error("failed to read configuration file {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid configuration file {path}: {message}")]
    ConfigParse { path: PathBuf, message: String },

    #[error("failed to lock {path}: {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AppError {
    pub fn exit_code(&self) -> ExitCode {
        ExitCode::from(self.exit_status())
    }

    /// Numeric process status for this failure.
    pub fn exit_status(&self) -> u8 {
        match self {
            AppError::Validation { .. }
            | AppError::PersonExists { .. }
            | AppError::InvalidPage { .. }
            | AppError::MissingInput { .. }
            | AppError::ImageDecode { .. }
            | AppError::MissingModel { .. }
            | AppError::ModelLoad { .. }
            | AppError::UnsupportedFormat(_)
            | AppError::ConfigRead { .. }
            | AppError::ConfigParse { .. } => 2,
            AppError::NoFaceDetected { .. }
            | AppError::EmbeddingMismatch { .. }
            | AppError::Capability(_) => 3,
            AppError::NotFound { .. } | AppError::DeviceOpen { .. } => 4,
            AppError::CorruptGallery { .. } | AppError::CorruptRegistry { .. } => 5,
            AppError::DeviceBusy => 6,
            _ => 1,
        }
    }

    pub fn human_message(&self) -> String {
        self.to_string()
    }

    /// True for failures the operator can fix by retrying or correcting input.
    pub fn is_user_correctable(&self) -> bool {
        matches!(
            self,
            AppError::Validation { .. }
                | AppError::NoFaceDetected { .. }
                | AppError::NotFound { .. }
                | AppError::PersonExists { .. }
                | AppError::DeviceBusy
                | AppError::InvalidPage { .. }
        )
    }
}

pub type AppResult<T> = Result<T, AppError>;
