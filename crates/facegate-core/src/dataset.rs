use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, warn};

use crate::errors::{AppError, AppResult};
use crate::gallery::Gallery;
use crate::provider::EmbeddingProvider;

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp"];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DatasetReport {
    pub processed: usize,
    pub skipped: usize,
    pub encoded: usize,
}

/// Builds a gallery from `root/<person>/<image>`. Every face found in an image
/// is labelled with the image's directory name.
pub fn build_gallery<P: EmbeddingProvider>(
    provider: &P,
    root: &Path,
) -> AppResult<(Gallery, DatasetReport)> {
    if !root.is_dir() {
        return Err(AppError::MissingInput {
            path: root.to_path_buf(),
        });
    }

    let mut gallery = Gallery::new();
    let mut report = DatasetReport::default();

    for person_dir in sorted_entries(root)? {
        if !person_dir.is_dir() {
            continue;
        }
        let Some(label) = person_dir.file_name().and_then(|n| n.to_str()) else {
            warn!(path = %person_dir.display(), "skipping directory with a non UTF-8 name");
            continue;
        };
        let label = label.to_string();

        for image_path in sorted_entries(&person_dir)? {
            if !is_image(&image_path) {
                continue;
            }
            report.processed += 1;

            let image = match image::open(&image_path) {
                Ok(image) => image.to_rgb8(),
                Err(err) => {
                    warn!(path = %image_path.display(), "skipping unreadable image: {err}");
                    report.skipped += 1;
                    continue;
                }
            };

            let regions = provider.detect_faces(&image)?;
            let embeddings = provider.encode(&image, &regions)?;
            debug!(
                path = %image_path.display(),
                label = %label,
                faces = embeddings.len(),
                "encoded dataset image"
            );
            for embedding in embeddings {
                if !embedding.is_finite() {
                    warn!(path = %image_path.display(), "skipping face with non-finite encoding");
                    continue;
                }
                if let Some(expected) = gallery.dimension() {
                    if expected != embedding.len() {
                        return Err(AppError::EmbeddingMismatch {
                            expected,
                            found: embedding.len(),
                        });
                    }
                }
                gallery = gallery.append(label.clone(), embedding);
                report.encoded += 1;
            }
        }
    }

    Ok((gallery, report))
}

fn sorted_entries(dir: &Path) -> AppResult<Vec<PathBuf>> {
    let mut paths = fs::read_dir(dir)?
        .map(|entry| entry.map(|entry| entry.path()))
        .collect::<Result<Vec<_>, _>>()?;
    paths.sort();
    Ok(paths)
}

fn is_image(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
            .unwrap_or(false)
}
