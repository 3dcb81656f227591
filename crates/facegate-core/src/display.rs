use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use image::codecs::png::PngEncoder;
use image::{ColorType, ImageEncoder, Rgb, RgbImage};
use tracing::{debug, warn};

use crate::errors::{AppError, AppResult};
use crate::provider::FaceRegion;

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const ACCEPT_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const REJECT_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const BOX_THICKNESS: u32 = 2;
const BANNER_HEIGHT: u32 = 40;

/// Presentation side of the capture loop. Nothing here affects the outcome of
/// a flow, so implementations swallow their own failures.
pub trait FrameDisplay {
    fn render(&mut self, frame: &RgbImage, regions: &[FaceRegion]);
    fn show_result(&mut self, image: &RgbImage, authenticated: bool);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullDisplay;

impl FrameDisplay for NullDisplay {
    fn render(&mut self, _frame: &RgbImage, _regions: &[FaceRegion]) {}

    fn show_result(&mut self, _image: &RgbImage, _authenticated: bool) {}
}

/// Writes the most recent frame (with detected faces boxed) and the final
/// verdict to PNG files in a directory, for headless kiosks and debugging.
#[derive(Debug, Clone)]
pub struct SnapshotDisplay {
    dir: PathBuf,
}

impl SnapshotDisplay {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn live_path(&self) -> PathBuf {
        self.dir.join("live.png")
    }

    pub fn result_path(&self) -> PathBuf {
        self.dir.join("result.png")
    }

    fn write(&self, image: &RgbImage, path: &Path) {
        if let Err(err) = fs::create_dir_all(&self.dir)
            .map_err(AppError::from)
            .and_then(|_| write_png(image, path))
        {
            warn!(path = %path.display(), "failed to write snapshot: {err}");
        }
    }
}

impl FrameDisplay for SnapshotDisplay {
    fn render(&mut self, frame: &RgbImage, regions: &[FaceRegion]) {
        let mut annotated = frame.clone();
        for region in regions {
            draw_box(&mut annotated, region, BOX_COLOR);
        }
        self.write(&annotated, &self.live_path());
    }

    fn show_result(&mut self, image: &RgbImage, authenticated: bool) {
        let mut annotated = image.clone();
        let color = if authenticated {
            ACCEPT_COLOR
        } else {
            REJECT_COLOR
        };
        draw_banner(&mut annotated, color);
        debug!(authenticated, "rendering result snapshot");
        self.write(&annotated, &self.result_path());
    }
}

pub fn draw_box(image: &mut RgbImage, region: &FaceRegion, color: Rgb<u8>) {
    let Some(region) = region.clamp_to(image.width(), image.height()) else {
        return;
    };
    let (left, top) = (region.left as u32, region.top as u32);
    let (right, bottom) = (region.right as u32 - 1, region.bottom as u32 - 1);

    for t in 0..BOX_THICKNESS {
        for x in left..=right {
            for y in [top.saturating_add(t).min(bottom), bottom.saturating_sub(t).max(top)] {
                image.put_pixel(x, y, color);
            }
        }
        for y in top..=bottom {
            for x in [left.saturating_add(t).min(right), right.saturating_sub(t).max(left)] {
                image.put_pixel(x, y, color);
            }
        }
    }
}

fn draw_banner(image: &mut RgbImage, color: Rgb<u8>) {
    let height = BANNER_HEIGHT.min(image.height());
    for y in 0..height {
        for x in 0..image.width() {
            image.put_pixel(x, y, color);
        }
    }
}

fn write_png(image: &RgbImage, path: &Path) -> AppResult<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    PngEncoder::new(&mut writer)
        .write_image(image.as_raw(), image.width(), image.height(), ColorType::Rgb8)
        .map_err(|err| AppError::FrameProcessing(format!("failed to encode PNG: {err}")))?;
    writer.flush()?;
    Ok(())
}
