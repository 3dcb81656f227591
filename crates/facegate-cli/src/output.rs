use std::error::Error;
use std::io::{self, Write};

use facegate_core::registry::AuthLogPage;
use facegate_core::{AuthDecision, DeletionOutcome, EnrollmentOutcome};
use serde_json::{json, Value};

use crate::cli::OutputMode;
use crate::errors::{AppError, AppResult};
use crate::flows::BuildGalleryOutcome;

fn write_json(payload: &Value) -> AppResult<()> {
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    let payload = serde_json::to_string(payload)?;
    handle.write_all(payload.as_bytes())?;
    handle.write_all(b"\n")?;
    Ok(())
}

pub fn render_authenticate(decision: &AuthDecision, mode: OutputMode, verbose: bool) -> AppResult<()> {
    match mode {
        OutputMode::Human => {
            match (&decision.name, decision.distance) {
                (Some(name), Some(distance)) => {
                    println!("Authenticated as {name} (distance {distance:.4})")
                }
                _ => println!("Authentication rejected"),
            }
            if verbose {
                tracing::info!("frames captured: {}", decision.frames_captured);
            }
        }
        OutputMode::Json => write_json(&authenticate_json_payload(decision))?,
    }
    Ok(())
}

fn authenticate_json_payload(decision: &AuthDecision) -> Value {
    json!({
        "authenticated": decision.authenticated,
        "name": decision.name,
        "distance": decision.distance,
        "face_captured": decision.probe_image.is_some(),
        "frames_captured": decision.frames_captured,
    })
}

pub fn render_enroll(outcome: &EnrollmentOutcome, mode: OutputMode, verbose: bool) -> AppResult<()> {
    match mode {
        OutputMode::Human => {
            println!(
                "Enrollment successful: {} (id {}); gallery now holds {} entr{}",
                outcome.name,
                outcome.person_id,
                outcome.gallery_size,
                if outcome.gallery_size == 1 { "y" } else { "ies" }
            );
            if verbose {
                if let Some(region) = outcome.region {
                    tracing::info!(
                        "face region {}x{} at ({}, {}) from {} frame(s)",
                        region.width(),
                        region.height(),
                        region.left,
                        region.top,
                        outcome.frames_captured
                    );
                }
            }
        }
        OutputMode::Json => write_json(&enroll_json_payload(outcome))?,
    }
    Ok(())
}

fn enroll_json_payload(outcome: &EnrollmentOutcome) -> Value {
    json!({
        "name": outcome.name,
        "id": outcome.person_id,
        "gallery_size": outcome.gallery_size,
        "frames_captured": outcome.frames_captured,
        "region": outcome.region,
    })
}

pub fn render_delete(outcome: &DeletionOutcome, mode: OutputMode, _verbose: bool) -> AppResult<()> {
    match mode {
        OutputMode::Human => {
            println!("Deleted {} (id {})", outcome.name, outcome.person_id);
            if !outcome.gallery_entry_removed {
                println!("No gallery entry was stored under that name");
            }
        }
        OutputMode::Json => write_json(&json!({
            "name": outcome.name,
            "id": outcome.person_id,
            "gallery_entry_removed": outcome.gallery_entry_removed,
            "gallery_size": outcome.gallery_size,
        }))?,
    }
    Ok(())
}

pub fn render_build_gallery(
    outcome: &BuildGalleryOutcome,
    mode: OutputMode,
    _verbose: bool,
) -> AppResult<()> {
    match mode {
        OutputMode::Human => {
            println!(
                "Gallery written to {}: {} face(s) for {} person(s)",
                outcome.gallery_path.display(),
                outcome.entries,
                outcome.people
            );
            println!(
                "Images processed: {}, skipped: {}",
                outcome.report.processed, outcome.report.skipped
            );
        }
        OutputMode::Json => write_json(&serde_json::to_value(outcome)?)?,
    }
    Ok(())
}

pub fn render_logs(page: &AuthLogPage, mode: OutputMode, _verbose: bool) -> AppResult<()> {
    match mode {
        OutputMode::Human => {
            if page.results.is_empty() {
                println!("No authentication attempts recorded");
                return Ok(());
            }
            for entry in &page.results {
                let verdict = if entry.authenticated {
                    "granted"
                } else {
                    "denied"
                };
                println!("{:>6}  {}  {verdict}", entry.id, entry.timestamp);
            }
            println!(
                "Page {} ({} per page, {} attempt(s) recorded)",
                page.page, page.page_size, page.count
            );
        }
        OutputMode::Json => write_json(&serde_json::to_value(page)?)?,
    }
    Ok(())
}

pub fn render_error(err: &AppError, mode: OutputMode) {
    match mode {
        OutputMode::Human => {
            eprintln!("error: {}", err.human_message());
            if let Some(source) = err.source() {
                eprintln!("cause: {source}");
            }
        }
        OutputMode::Json => {
            let payload = json!({
                "success": false,
                "error": err.human_message(),
                "exit_code": err.exit_status(),
            });
            if let Ok(json) = serde_json::to_string(&payload) {
                println!("{json}");
            }
            if let Some(source) = err.source() {
                eprintln!("cause: {source}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use facegate_core::provider::FaceRegion;
    use image::RgbImage;

    #[test]
    fn authenticate_json_reports_the_verdict() {
        let decision = AuthDecision {
            authenticated: true,
            name: Some("alice".into()),
            distance: Some(0.25),
            probe_image: Some(RgbImage::new(2, 2)),
            frames_captured: 12,
        };
        let payload = authenticate_json_payload(&decision);
        assert_eq!(payload["authenticated"], true);
        assert_eq!(payload["name"], "alice");
        assert_eq!(payload["distance"], 0.25);
        assert_eq!(payload["face_captured"], true);
        assert_eq!(payload["frames_captured"], 12);
    }

    #[test]
    fn rejected_json_has_null_name() {
        let decision = AuthDecision {
            authenticated: false,
            name: None,
            distance: None,
            probe_image: None,
            frames_captured: 0,
        };
        let payload = authenticate_json_payload(&decision);
        assert_eq!(payload["authenticated"], false);
        assert!(payload["name"].is_null());
    }

    #[test]
    fn enroll_json_includes_region_when_captured() {
        let outcome = EnrollmentOutcome {
            name: "bob".into(),
            person_id: 3,
            gallery_size: 2,
            frames_captured: 30,
            region: Some(FaceRegion::new(1, 2, 11, 22)),
        };
        let payload = enroll_json_payload(&outcome);
        assert_eq!(payload["id"], 3);
        assert_eq!(payload["region"]["right"], 11);
        assert_eq!(payload["gallery_size"], 2);
    }
}
