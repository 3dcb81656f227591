use std::env;
use std::path::PathBuf;
use std::sync::OnceLock;

use dlib_face_recognition::{
    FaceDetector, FaceDetectorTrait, FaceEncoderNetwork, FaceEncoderTrait, ImageMatrix,
    LandmarkPredictor, LandmarkPredictorTrait, Rectangle,
};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::{AppError, AppResult};

const LANDMARK_ENV: &str = "DLIB_LANDMARK_MODEL";
const ENCODER_ENV: &str = "DLIB_ENCODER_MODEL";

/// Fixed-length face descriptor produced by an [`EmbeddingProvider`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding(Vec<f64>);

impl Embedding {
    pub fn new(values: Vec<f64>) -> Self {
        Self(values)
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn is_finite(&self) -> bool {
        self.0.iter().all(|value| value.is_finite())
    }

    /// Raw little-endian bytes, the form handed to the person registry.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        self.0.iter().flat_map(|value| value.to_le_bytes()).collect()
    }

    pub fn from_le_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() % 8 != 0 {
            return None;
        }
        let values = bytes
            .chunks_exact(8)
            .map(|chunk| {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(chunk);
                f64::from_le_bytes(raw)
            })
            .collect();
        Some(Self(values))
    }

    pub fn into_inner(self) -> Vec<f64> {
        self.0
    }
}

impl From<Vec<f64>> for Embedding {
    fn from(values: Vec<f64>) -> Self {
        Self(values)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct FaceRegion {
    pub left: i64,
    pub top: i64,
    pub right: i64,
    pub bottom: i64,
}

impl FaceRegion {
    pub fn new(left: i64, top: i64, right: i64, bottom: i64) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn width(&self) -> i64 {
        (self.right - self.left).max(0)
    }

    pub fn height(&self) -> i64 {
        (self.bottom - self.top).max(0)
    }

    pub fn area(&self) -> i64 {
        self.width() * self.height()
    }

    /// Intersects the region with a `width`x`height` frame. Returns `None` when
    /// nothing of the region lies inside the frame.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<FaceRegion> {
        let clamped = FaceRegion {
            left: self.left.clamp(0, width as i64),
            top: self.top.clamp(0, height as i64),
            right: self.right.clamp(0, width as i64),
            bottom: self.bottom.clamp(0, height as i64),
        };
        if clamped.area() == 0 {
            None
        } else {
            Some(clamped)
        }
    }
}

/// Face detector plus encoder. Implementations must return embeddings in the
/// same order as the regions they were given.
pub trait EmbeddingProvider {
    fn detect_faces(&self, image: &RgbImage) -> AppResult<Vec<FaceRegion>>;
    fn encode(&self, image: &RgbImage, regions: &[FaceRegion]) -> AppResult<Vec<Embedding>>;
}

impl<P: EmbeddingProvider + ?Sized> EmbeddingProvider for &P {
    fn detect_faces(&self, image: &RgbImage) -> AppResult<Vec<FaceRegion>> {
        (**self).detect_faces(image)
    }

    fn encode(&self, image: &RgbImage, regions: &[FaceRegion]) -> AppResult<Vec<Embedding>> {
        (**self).encode(image, regions)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ModelPathConfig {
    pub landmark_model: Option<PathBuf>,
    pub encoder_model: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct FaceModelPaths {
    pub landmark: PathBuf,
    pub encoder: PathBuf,
}

pub trait ModelPathResolver {
    fn resolve(&self, config: &ModelPathConfig) -> AppResult<FaceModelPaths>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EnvModelPathResolver;

impl ModelPathResolver for EnvModelPathResolver {
    fn resolve(&self, config: &ModelPathConfig) -> AppResult<FaceModelPaths> {
        let landmark = config
            .landmark_model
            .clone()
            .or_else(|| env::var(LANDMARK_ENV).ok().map(PathBuf::from))
            .ok_or(AppError::MissingModel {
                kind: "landmark predictor",
                flag: "--landmark-model",
                env: LANDMARK_ENV,
            })?;

        let encoder = config
            .encoder_model
            .clone()
            .or_else(|| env::var(ENCODER_ENV).ok().map(PathBuf::from))
            .ok_or(AppError::MissingModel {
                kind: "face encoding network",
                flag: "--encoder-model",
                env: ENCODER_ENV,
            })?;

        Ok(FaceModelPaths { landmark, encoder })
    }
}

pub struct DlibProvider {
    detector: FaceDetector,
    predictor: LandmarkPredictor,
    encoder: FaceEncoderNetwork,
    jitters: u32,
}

impl DlibProvider {
    pub fn new(models: &FaceModelPaths, jitters: u32) -> AppResult<Self> {
        debug!(path = %models.landmark.display(), "loading landmark model");
        let predictor =
            LandmarkPredictor::open(&models.landmark).map_err(|message| AppError::ModelLoad {
                path: models.landmark.clone(),
                message,
            })?;
        debug!(path = %models.encoder.display(), "loading encoder model");
        let encoder =
            FaceEncoderNetwork::open(&models.encoder).map_err(|message| AppError::ModelLoad {
                path: models.encoder.clone(),
                message,
            })?;

        Ok(Self {
            detector: FaceDetector::new(),
            predictor,
            encoder,
            jitters,
        })
    }

    pub fn from_config(config: &ModelPathConfig, jitters: u32) -> AppResult<Self> {
        let models = EnvModelPathResolver.resolve(config)?;
        Self::new(&models, jitters)
    }
}

impl EmbeddingProvider for DlibProvider {
    fn detect_faces(&self, image: &RgbImage) -> AppResult<Vec<FaceRegion>> {
        let matrix = ImageMatrix::from_image(image);
        let locations = self.detector.face_locations(&matrix);
        Ok(locations
            .iter()
            .map(|rect| FaceRegion::new(rect.left, rect.top, rect.right, rect.bottom))
            .collect())
    }

    fn encode(&self, image: &RgbImage, regions: &[FaceRegion]) -> AppResult<Vec<Embedding>> {
        let matrix = ImageMatrix::from_image(image);
        let landmarks: Vec<_> = regions
            .iter()
            .map(|region| {
                let rect = Rectangle {
                    left: region.left,
                    top: region.top,
                    right: region.right,
                    bottom: region.bottom,
                };
                self.predictor.face_landmarks(&matrix, &rect)
            })
            .collect();

        let encodings = self
            .encoder
            .get_face_encodings(&matrix, &landmarks, self.jitters);
        Ok(encodings
            .iter()
            .map(|encoding| Embedding::new(encoding.as_ref().to_vec()))
            .collect())
    }
}

/// Defers model loading until the first detection or encoding, so flows that
/// never look at a face (delete, log listing) run without the model files.
pub struct LazyDlibProvider {
    models: ModelPathConfig,
    jitters: u32,
    loaded: OnceLock<DlibProvider>,
}

impl LazyDlibProvider {
    pub fn new(models: ModelPathConfig, jitters: u32) -> Self {
        Self {
            models,
            jitters,
            loaded: OnceLock::new(),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.get().is_some()
    }

    fn provider(&self) -> AppResult<&DlibProvider> {
        if let Some(provider) = self.loaded.get() {
            return Ok(provider);
        }
        let provider = DlibProvider::from_config(&self.models, self.jitters)?;
        Ok(self.loaded.get_or_init(|| provider))
    }
}

impl EmbeddingProvider for LazyDlibProvider {
    fn detect_faces(&self, image: &RgbImage) -> AppResult<Vec<FaceRegion>> {
        self.provider()?.detect_faces(image)
    }

    fn encode(&self, image: &RgbImage, regions: &[FaceRegion]) -> AppResult<Vec<Embedding>> {
        self.provider()?.encode(image, regions)
    }
}
