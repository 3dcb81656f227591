//! Command bodies: resolve settings, wire a pipeline, run one flow.

use std::path::PathBuf;

use facegate_core::dataset::DatasetReport;
use facegate_core::registry::AuthLogPage;
use facegate_core::{AuthDecision, DeletionOutcome, EnrollmentOutcome};
use serde::Serialize;
use tracing::info;

use crate::cancel::quit_on_keypress;
use crate::cli::{
    AuthenticateArgs, BuildGalleryArgs, DeleteArgs, EnrollArgs, ImportArgs, LogsArgs, StoreArgs,
};
use crate::context::{
    apply_capture_overrides, apply_model_overrides, build_display, build_pipeline, load_settings,
    validate_threshold,
};
use crate::errors::{AppError, AppResult};

#[derive(Debug, Clone, Serialize)]
pub struct BuildGalleryOutcome {
    pub gallery_path: PathBuf,
    pub entries: usize,
    pub people: usize,
    #[serde(flatten)]
    pub report: DatasetReport,
}

pub fn run_authenticate(args: &AuthenticateArgs, stores: &StoreArgs) -> AppResult<AuthDecision> {
    let mut settings = load_settings(stores)?;
    apply_capture_overrides(&mut settings, &args.capture);
    apply_model_overrides(&mut settings, &args.models);
    if let Some(threshold) = args.threshold {
        settings.match_threshold = validate_threshold(threshold)?;
    }
    if let Some(secs) = args.dwell_secs {
        settings.result_dwell = std::time::Duration::from_secs(secs);
    }

    let pipeline = build_pipeline(&settings);
    let mut display = build_display(settings.snapshot_dir.as_deref());
    let cancel = quit_on_keypress();
    pipeline.authenticate(display.as_mut(), &cancel)
}

pub fn run_enroll(args: &EnrollArgs, stores: &StoreArgs) -> AppResult<EnrollmentOutcome> {
    let mut settings = load_settings(stores)?;
    apply_capture_overrides(&mut settings, &args.capture);
    apply_model_overrides(&mut settings, &args.models);

    let pipeline = build_pipeline(&settings);
    let mut display = build_display(settings.snapshot_dir.as_deref());
    let cancel = quit_on_keypress();
    pipeline.enroll(&args.name, display.as_mut(), &cancel)
}

pub fn run_delete(args: &DeleteArgs, stores: &StoreArgs) -> AppResult<DeletionOutcome> {
    let settings = load_settings(stores)?;
    build_pipeline(&settings).delete(&args.name)
}

pub fn run_import(args: &ImportArgs, stores: &StoreArgs) -> AppResult<EnrollmentOutcome> {
    let mut settings = load_settings(stores)?;
    apply_model_overrides(&mut settings, &args.models);

    if !args.image.is_file() {
        return Err(AppError::MissingInput {
            path: args.image.clone(),
        });
    }
    let image = image::open(&args.image)
        .map_err(|source| AppError::ImageDecode {
            path: args.image.clone(),
            source,
        })?
        .to_rgb8();
    info!(path = %args.image.display(), "importing face from image");

    build_pipeline(&settings).enroll_from_image(&args.name, &image)
}

pub fn run_build_gallery(
    args: &BuildGalleryArgs,
    stores: &StoreArgs,
) -> AppResult<BuildGalleryOutcome> {
    let mut settings = load_settings(stores)?;
    apply_model_overrides(&mut settings, &args.models);
    if let Some(output) = &args.output {
        settings.gallery_path = output.clone();
    }

    let pipeline = build_pipeline(&settings);
    let (gallery, report) = pipeline.rebuild_gallery(&args.dataset)?;
    let mut people: Vec<&str> = gallery.entries().iter().map(|e| e.name.as_str()).collect();
    people.sort_unstable();
    people.dedup();

    Ok(BuildGalleryOutcome {
        gallery_path: settings.gallery_path.clone(),
        entries: gallery.len(),
        people: people.len(),
        report,
    })
}

pub fn run_logs(args: &LogsArgs, stores: &StoreArgs) -> AppResult<AuthLogPage> {
    let settings = load_settings(stores)?;
    build_pipeline(&settings).audit_log(args.page, args.page_size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use facegate_core::registry::{JsonRegistry, PersonRegistry};
    use tempfile::TempDir;

    fn stores(tmp: &TempDir) -> StoreArgs {
        let config = tmp.path().join("config.toml");
        std::fs::write(&config, "").unwrap();
        StoreArgs {
            config: Some(config),
            gallery: Some(tmp.path().join("gallery.json")),
            registry: Some(tmp.path().join("registry.json")),
        }
    }

    #[test]
    fn delete_of_unknown_name_reports_not_found() {
        let tmp = TempDir::new().unwrap();
        let err = run_delete(&DeleteArgs { name: "Bob".into() }, &stores(&tmp)).unwrap_err();
        assert!(matches!(err, AppError::NotFound { .. }));
    }

    #[test]
    fn delete_works_without_face_models() {
        let tmp = TempDir::new().unwrap();
        JsonRegistry::new(tmp.path().join("registry.json"))
            .create("Alice", &[0; 8])
            .unwrap();

        let outcome = run_delete(&DeleteArgs { name: "Alice".into() }, &stores(&tmp)).unwrap();
        assert_eq!(outcome.name, "Alice");
        assert!(!outcome.gallery_entry_removed);
    }

    #[test]
    fn logs_on_a_fresh_install_are_empty() {
        let tmp = TempDir::new().unwrap();
        let page = run_logs(
            &LogsArgs {
                page: 1,
                page_size: 10,
            },
            &stores(&tmp),
        )
        .unwrap();
        assert_eq!(page.count, 0);
        assert!(page.results.is_empty());
    }

    #[test]
    fn import_of_a_missing_picture_is_an_input_error() {
        let tmp = TempDir::new().unwrap();
        let err = run_import(
            &ImportArgs {
                name: "Alice".into(),
                image: tmp.path().join("missing.png"),
                models: Default::default(),
            },
            &stores(&tmp),
        )
        .unwrap_err();
        assert!(matches!(err, AppError::MissingInput { .. }));
    }
}
