//! The three top-level flows: authenticate, enroll, delete.
//!
//! A [`Pipeline`] owns its collaborators. The camera is claimed with a mutex
//! for threads of this process and a per-device lock file for other
//! processes. Both are only ever tried, never waited on, so a second capture
//! fails fast with [`AppError::DeviceBusy`] instead of queueing behind the
//! first.

use std::path::Path;
use std::sync::{Mutex, MutexGuard, TryLockError};
use std::thread;
use std::time::Duration;

use image::RgbImage;
use tracing::{info, warn};

use crate::capture::{blank_frame, Camera};
use crate::dataset::{build_gallery, DatasetReport};
use crate::display::FrameDisplay;
use crate::errors::{AppError, AppResult};
use crate::gallery::{Gallery, GalleryStore, LockedGallery};
use crate::lock::FileLock;
use crate::matcher::{MatchEngine, MatchResult, DEFAULT_MATCH_THRESHOLD};
use crate::provider::{Embedding, EmbeddingProvider, FaceRegion};
use crate::registry::{AuditLog, AuthLogPage, AuthorizedPerson, PersonRegistry};
use crate::selector::{
    BestFrameSelector, CancelToken, CaptureReport, SelectionPolicy, DEFAULT_CAPTURE_WINDOW,
};

pub const MAX_NAME_LEN: usize = 100;
pub const DEFAULT_RESULT_DWELL: Duration = Duration::from_secs(15);
const RESULT_FRAME_SIZE: (u32, u32) = (640, 480);

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub capture_window: Duration,
    pub result_dwell: Duration,
    pub match_threshold: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            capture_window: DEFAULT_CAPTURE_WINDOW,
            result_dwell: DEFAULT_RESULT_DWELL,
            match_threshold: DEFAULT_MATCH_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuthDecision {
    pub authenticated: bool,
    pub name: Option<String>,
    pub distance: Option<f64>,
    pub probe_image: Option<RgbImage>,
    pub frames_captured: usize,
}

#[derive(Debug, Clone)]
pub struct EnrollmentOutcome {
    pub name: String,
    pub person_id: u64,
    pub gallery_size: usize,
    pub frames_captured: usize,
    pub region: Option<FaceRegion>,
}

#[derive(Debug, Clone)]
pub struct DeletionOutcome {
    pub name: String,
    pub person_id: u64,
    pub gallery_entry_removed: bool,
    pub gallery_size: usize,
}

/// Held for the whole of a capture flow.
struct CameraClaim<'a> {
    _thread: MutexGuard<'a, ()>,
    _process: Option<FileLock>,
}

pub struct Pipeline<P, S, R, C> {
    provider: P,
    gallery: LockedGallery<S>,
    registry: R,
    camera: C,
    camera_lock: Mutex<()>,
    config: PipelineConfig,
}

impl<P, S, R, C> Pipeline<P, S, R, C>
where
    P: EmbeddingProvider,
    S: GalleryStore,
    R: PersonRegistry + AuditLog,
    C: Camera,
{
    pub fn new(provider: P, store: S, registry: R, camera: C, config: PipelineConfig) -> Self {
        Self {
            provider,
            gallery: LockedGallery::new(store),
            registry,
            camera,
            camera_lock: Mutex::new(()),
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn gallery(&self) -> &LockedGallery<S> {
        &self.gallery
    }

    pub fn registry(&self) -> &R {
        &self.registry
    }

    fn engine(&self) -> MatchEngine<&P> {
        MatchEngine::new(&self.provider, self.config.match_threshold)
    }

    fn acquire_camera(&self) -> AppResult<CameraClaim<'_>> {
        let thread = match self.camera_lock.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return Err(AppError::DeviceBusy),
        };
        let process = match self.camera.lock_path() {
            Some(path) => Some(FileLock::try_exclusive(&path)?.ok_or(AppError::DeviceBusy)?),
            None => None,
        };
        Ok(CameraClaim {
            _thread: thread,
            _process: process,
        })
    }

    fn capture(
        &self,
        policy: SelectionPolicy,
        display: &mut dyn FrameDisplay,
        cancel: &CancelToken,
    ) -> AppResult<CaptureReport> {
        let mut source = self.camera.open()?;
        let selector = BestFrameSelector::new(&self.provider, policy, self.config.capture_window);
        Ok(selector.run(&mut *source, display, cancel))
    }

    /// Captures, matches and records exactly one audit entry. Once the camera
    /// is claimed, every failure (including the device refusing to open) is
    /// recorded as a rejected attempt before it is returned.
    ///
    /// `cancel` only ends the capture window early; the verdict is still shown
    /// for the full dwell time.
    pub fn authenticate(
        &self,
        display: &mut dyn FrameDisplay,
        cancel: &CancelToken,
    ) -> AppResult<AuthDecision> {
        let _camera = self.acquire_camera()?;
        let decided = self
            .capture(SelectionPolicy::MostFaces, display, cancel)
            .and_then(|report| self.decide(report));
        let authenticated = matches!(&decided, Ok(decision) if decision.authenticated);

        match decided {
            Ok(decision) => {
                let probe = decision
                    .probe_image
                    .clone()
                    .unwrap_or_else(|| blank_frame(RESULT_FRAME_SIZE.0, RESULT_FRAME_SIZE.1));
                display.show_result(&probe, authenticated);
                self.dwell();
                self.registry.record(authenticated)?;
                info!(
                    authenticated,
                    name = decision.name.as_deref().unwrap_or("-"),
                    frames = decision.frames_captured,
                    "authentication finished"
                );
                Ok(decision)
            }
            Err(err) => {
                if let Err(audit_err) = self.registry.record(false) {
                    warn!("failed to record rejected attempt: {audit_err}");
                }
                warn!("authentication aborted: {err}");
                Err(err)
            }
        }
    }

    fn decide(&self, report: CaptureReport) -> AppResult<AuthDecision> {
        let frames_captured = report.frames_captured;
        let Some(selection) = report.selection else {
            info!(frames = frames_captured, "no face captured");
            return Ok(AuthDecision {
                authenticated: false,
                name: None,
                distance: None,
                probe_image: None,
                frames_captured,
            });
        };

        let engine = self.engine();
        let result = match engine.embed(&selection.image)? {
            Some(probe) => {
                let gallery = self.gallery.snapshot()?;
                engine.check_dimension(&probe, &gallery)?;
                engine.find_match(&probe, &gallery)
            }
            None => MatchResult::NoMatch,
        };

        let (name, distance) = match result {
            MatchResult::Match { name, distance } => (Some(name), Some(distance)),
            MatchResult::NoMatch => (None, None),
        };
        Ok(AuthDecision {
            authenticated: name.is_some(),
            name,
            distance,
            probe_image: Some(selection.image),
            frames_captured,
        })
    }

    fn dwell(&self) {
        if !self.config.result_dwell.is_zero() {
            thread::sleep(self.config.result_dwell);
        }
    }

    pub fn enroll(
        &self,
        name: &str,
        display: &mut dyn FrameDisplay,
        cancel: &CancelToken,
    ) -> AppResult<EnrollmentOutcome> {
        let name = validate_name(name)?;
        let _camera = self.acquire_camera()?;
        let report = self.capture(SelectionPolicy::LargestFace, display, cancel)?;

        let selection = report.selection.ok_or_else(|| AppError::NoFaceDetected {
            reason: "no face was seen during the capture window".into(),
        })?;
        let embedding = self
            .engine()
            .embed(&selection.image)?
            .ok_or_else(|| AppError::NoFaceDetected {
                reason: "the captured face could not be encoded".into(),
            })?;

        let (person, gallery_size) = self.register(&name, embedding)?;
        info!(name = %name, id = person.id, gallery_size, "enrolled from camera");
        Ok(EnrollmentOutcome {
            name,
            person_id: person.id,
            gallery_size,
            frames_captured: report.frames_captured,
            region: Some(selection.region),
        })
    }

    /// Enrolls from a still picture instead of the camera. The first detected
    /// face is used.
    pub fn enroll_from_image(&self, name: &str, image: &RgbImage) -> AppResult<EnrollmentOutcome> {
        let name = validate_name(name)?;
        let embedding = self
            .engine()
            .embed(image)?
            .ok_or_else(|| AppError::NoFaceDetected {
                reason: "no face found in the supplied image".into(),
            })?;

        let (person, gallery_size) = self.register(&name, embedding)?;
        info!(name = %name, id = person.id, gallery_size, "enrolled from image");
        Ok(EnrollmentOutcome {
            name,
            person_id: person.id,
            gallery_size,
            frames_captured: 0,
            region: None,
        })
    }

    /// Relational record first, gallery second. A failed gallery write rolls
    /// the record back so a retry is not blocked by a stale row.
    fn register(&self, name: &str, embedding: Embedding) -> AppResult<(AuthorizedPerson, usize)> {
        // JSON has no encoding for NaN or infinity; one such value would
        // make the saved gallery unreadable.
        if !embedding.is_finite() {
            return Err(AppError::Validation {
                field: "embedding",
                message: "face encoder produced non-finite values".into(),
            });
        }
        let engine = self.engine();
        engine.check_dimension(&embedding, &self.gallery.snapshot()?)?;

        let person = self.registry.create(name, &embedding.to_le_bytes())?;
        let updated = self.gallery.update(|gallery| {
            engine.check_dimension(&embedding, &gallery)?;
            Ok(Some(gallery.append(name, embedding)))
        });

        match updated {
            Ok(gallery) => Ok((person, gallery.map(|g| g.len()).unwrap_or_default())),
            Err(err) => {
                if let Err(cleanup) = self.registry.delete(&person) {
                    warn!(name, id = person.id, "failed to roll back registry record: {cleanup}");
                }
                Err(err)
            }
        }
    }

    /// The relational delete decides the outcome. Removing the gallery entry
    /// afterwards is best effort: a gallery that cannot be read or written is
    /// logged and reported as `gallery_entry_removed: false`.
    pub fn delete(&self, name: &str) -> AppResult<DeletionOutcome> {
        let name = validate_name(name)?;
        let person = self.registry.get(&name)?;
        self.registry.delete(&person)?;

        let mut removed = false;
        let mut gallery_size = 0;
        let updated = self.gallery.update(|gallery| {
            gallery_size = gallery.len();
            if gallery.contains(&name) {
                let next = gallery.remove(&name);
                Ok(Some(next))
            } else {
                Ok(None)
            }
        });
        match updated {
            Ok(Some(next)) => {
                removed = true;
                gallery_size = next.len();
            }
            Ok(None) => {}
            Err(err) => warn!(
                name = %name,
                id = person.id,
                "authorized person deleted but gallery entry was not removed: {err}"
            ),
        }

        info!(name = %name, id = person.id, removed, gallery_size, "deleted authorized person");
        Ok(DeletionOutcome {
            name,
            person_id: person.id,
            gallery_entry_removed: removed,
            gallery_size,
        })
    }

    pub fn audit_log(&self, page: usize, page_size: usize) -> AppResult<AuthLogPage> {
        self.registry.list(page, page_size)
    }

    /// Replaces the whole gallery with one built from a labelled dataset.
    pub fn rebuild_gallery(&self, dataset: &Path) -> AppResult<(Gallery, DatasetReport)> {
        let (gallery, report) = build_gallery(&self.provider, dataset)?;
        self.gallery.replace(&gallery)?;
        info!(
            processed = report.processed,
            skipped = report.skipped,
            encoded = report.encoded,
            "gallery rebuilt from dataset"
        );
        Ok((gallery, report))
    }
}

/// Trims `name` and checks it fits the registry's name column.
pub fn validate_name(name: &str) -> AppResult<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(AppError::Validation {
            field: "name",
            message: "name cannot be empty".into(),
        });
    }
    if trimmed.chars().count() > MAX_NAME_LEN {
        return Err(AppError::Validation {
            field: "name",
            message: format!("name must be at most {MAX_NAME_LEN} characters"),
        });
    }
    Ok(trimmed.to_string())
}
