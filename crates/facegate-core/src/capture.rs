use std::env;
use std::fs;
use std::path::PathBuf;

use image::{ImageFormat, Rgb, RgbImage};
use tracing::{debug, info};
use v4l::buffer::Type;
use v4l::capability::{Capabilities, Flags as CapabilityFlags};
use v4l::format::{Format, FourCC};
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;

use crate::errors::{AppError, AppResult};

const STREAM_BUFFERS: u32 = 4;

/// An open capture session. Dropping it releases the device.
pub trait FrameSource {
    /// `Ok(None)` means the device produced nothing this time; callers keep
    /// polling until their own deadline.
    fn read_frame(&mut self) -> AppResult<Option<RgbImage>>;
}

pub trait Camera {
    fn open(&self) -> AppResult<Box<dyn FrameSource + '_>>;

    /// Lock file claimed for the duration of a capture so that other
    /// processes see the device as busy. `None` for cameras no other process
    /// can reach.
    fn lock_path(&self) -> Option<PathBuf> {
        None
    }
}

impl<C: Camera + ?Sized> Camera for &C {
    fn open(&self) -> AppResult<Box<dyn FrameSource + '_>> {
        (**self).open()
    }

    fn lock_path(&self) -> Option<PathBuf> {
        (**self).lock_path()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceLocator {
    Index(u32),
    Path(PathBuf),
}

impl DeviceLocator {
    pub fn from_option(device: Option<String>) -> Self {
        match device {
            Some(text) => {
                if let Ok(index) = text.parse::<u32>() {
                    DeviceLocator::Index(index)
                } else {
                    DeviceLocator::Path(PathBuf::from(text))
                }
            }
            None => DeviceLocator::Index(0),
        }
    }

    pub fn display(&self) -> String {
        match self {
            DeviceLocator::Index(i) => format!("/dev/video{i}"),
            DeviceLocator::Path(path) => path.display().to_string(),
        }
    }

    /// Stable name for the device node, following symlinks such as
    /// `/dev/v4l/by-id/...` so that every alias shares one lock.
    fn lock_name(&self) -> String {
        match self {
            DeviceLocator::Index(index) => format!("video{index}"),
            DeviceLocator::Path(path) => {
                let resolved = fs::canonicalize(path).unwrap_or_else(|_| path.clone());
                resolved
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_else(|| resolved.display().to_string().replace('/', "_"))
            }
        }
    }

    fn open(&self) -> AppResult<v4l::Device> {
        let opened = match self {
            DeviceLocator::Index(index) => v4l::Device::new(*index as usize),
            DeviceLocator::Path(path) => v4l::Device::with_path(path),
        };
        opened.map_err(|source| AppError::DeviceOpen {
            device: self.display(),
            source,
        })
    }
}

#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub device: DeviceLocator,
    pub pixel_format: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub warmup_frames: u32,
    /// Directory for per-device lock files; the system temp dir when unset.
    pub lock_dir: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct V4lCamera {
    config: CaptureConfig,
}

impl V4lCamera {
    pub fn new(config: CaptureConfig) -> Self {
        Self { config }
    }
}

impl Camera for V4lCamera {
    fn lock_path(&self) -> Option<PathBuf> {
        let dir = self.config.lock_dir.clone().unwrap_or_else(env::temp_dir);
        Some(dir.join(format!("facegate-{}.lock", self.config.device.lock_name())))
    }

    fn open(&self) -> AppResult<Box<dyn FrameSource + '_>> {
        let config = &self.config;
        let device = config.device.open()?;
        debug!(device = %config.device.display(), "opened video device");

        let caps = device.query_caps()?;
        ensure_capabilities(&caps)?;

        let requested = parse_fourcc(&config.pixel_format)
            .ok_or_else(|| AppError::UnsupportedFormat(config.pixel_format.clone()))?;
        let formats = device.enum_formats()?;
        if !formats.iter().any(|format| format.fourcc == requested) {
            return Err(AppError::UnsupportedFormat(config.pixel_format.clone()));
        }

        let mut format = device.format()?;
        format.fourcc = requested;
        if let Some(width) = config.width {
            format.width = width;
        }
        if let Some(height) = config.height {
            format.height = height;
        }
        let format = device.set_format(&format)?;
        info!(
            device = %config.device.display(),
            card = %caps.card,
            pixel_format = %fourcc_to_string(format.fourcc),
            width = format.width,
            height = format.height,
            "camera ready"
        );

        let mut stream = Stream::with_buffers(&device, Type::VideoCapture, STREAM_BUFFERS)?;
        for idx in 0..config.warmup_frames {
            stream.next().map_err(|err| {
                AppError::FrameProcessing(format!(
                    "failed to read warm-up frame {}: {err}",
                    idx + 1
                ))
            })?;
        }

        Ok(Box::new(V4lFrameSource {
            _device: device,
            stream,
            format,
        }))
    }
}

struct V4lFrameSource {
    _device: v4l::Device,
    stream: Stream<'static>,
    format: Format,
}

impl FrameSource for V4lFrameSource {
    fn read_frame(&mut self) -> AppResult<Option<RgbImage>> {
        let (data, meta) = self
            .stream
            .next()
            .map_err(|err| AppError::FrameProcessing(format!("failed to dequeue frame: {err}")))?;
        if data.is_empty() || meta.bytesused == 0 {
            return Ok(None);
        }
        let used = (meta.bytesused as usize).min(data.len());
        convert_frame_to_rgb(&data[..used], &self.format).map(Some)
    }
}

fn ensure_capabilities(caps: &Capabilities) -> AppResult<()> {
    let flags = caps.capabilities;
    let mut reasons = Vec::new();
    if !flags.contains(CapabilityFlags::VIDEO_CAPTURE) {
        reasons.push("missing VIDEO_CAPTURE");
    }
    if !flags.contains(CapabilityFlags::STREAMING) {
        reasons.push("missing STREAMING");
    }
    if reasons.is_empty() {
        Ok(())
    } else {
        Err(AppError::Capability(reasons.join(", ")))
    }
}

pub fn convert_frame_to_rgb(data: &[u8], format: &Format) -> AppResult<RgbImage> {
    let width = format.width;
    let height = format.height;
    let pixels = width as usize * height as usize;
    let pixel_format = fourcc_to_string(format.fourcc);

    let require = |expected: usize| -> AppResult<()> {
        if data.len() < expected {
            Err(AppError::FrameProcessing(format!(
                "expected {expected} bytes for {pixel_format} frame, got {}",
                data.len()
            )))
        } else {
            Ok(())
        }
    };

    let image = match pixel_format.as_str() {
        "Y16" => {
            require(pixels * 2)?;
            let gray = data[..pixels * 2].chunks_exact(2).map(|px| px[1]);
            gray_to_rgb(width, height, gray)
        }
        "GREY" | "Y08" => {
            require(pixels)?;
            gray_to_rgb(width, height, data[..pixels].iter().copied())
        }
        "RGB3" => {
            require(pixels * 3)?;
            RgbImage::from_raw(width, height, data[..pixels * 3].to_vec())
        }
        "YUYV" => {
            require(pixels * 2)?;
            if width % 2 != 0 {
                return Err(AppError::FrameProcessing(
                    "YUYV frames need an even width".into(),
                ));
            }
            let mut buffer = Vec::with_capacity(pixels * 3);
            for chunk in data[..pixels * 2].chunks_exact(4) {
                let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
                buffer.extend_from_slice(&yuv_to_rgb(y0, u, v));
                buffer.extend_from_slice(&yuv_to_rgb(y1, u, v));
            }
            RgbImage::from_raw(width, height, buffer)
        }
        "MJPG" => {
            let decoded = image::load_from_memory_with_format(data, ImageFormat::Jpeg)
                .map_err(|err| {
                    AppError::FrameProcessing(format!("failed to decode MJPG frame: {err}"))
                })?;
            Some(decoded.to_rgb8())
        }
        other => {
            return Err(AppError::FrameProcessing(format!(
                "unsupported conversion from pixel format {other}"
            )))
        }
    };

    image.ok_or_else(|| AppError::FrameProcessing("failed to build image buffer".into()))
}

fn gray_to_rgb(width: u32, height: u32, gray: impl Iterator<Item = u8>) -> Option<RgbImage> {
    let buffer: Vec<u8> = gray.flat_map(|v| [v, v, v]).collect();
    RgbImage::from_raw(width, height, buffer)
}

// BT.601 limited range.
fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = y as i32 - 16;
    let d = u as i32 - 128;
    let e = v as i32 - 128;
    let clip = |value: i32| value.clamp(0, 255) as u8;
    [
        clip((298 * c + 409 * e + 128) >> 8),
        clip((298 * c - 100 * d - 208 * e + 128) >> 8),
        clip((298 * c + 516 * d + 128) >> 8),
    ]
}

/// Blank frame used when there is nothing to show.
pub fn blank_frame(width: u32, height: u32) -> RgbImage {
    RgbImage::from_pixel(width, height, Rgb([0, 0, 0]))
}

fn parse_fourcc(code: &str) -> Option<FourCC> {
    if code.is_empty() || code.len() > 4 {
        return None;
    }
    let mut repr = [b' '; 4];
    for (i, byte) in code.as_bytes().iter().enumerate() {
        repr[i] = *byte;
    }
    Some(FourCC::new(&repr))
}

fn fourcc_to_string(fourcc: FourCC) -> String {
    String::from_utf8_lossy(&fourcc.repr)
        .trim_matches(|c| c == char::from(0) || c == ' ')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_format(fourcc: &str, width: u32, height: u32) -> Format {
        Format::new(width, height, parse_fourcc(fourcc).expect("fourcc"))
    }

    #[test]
    fn y16_keeps_the_high_byte() {
        let format = build_format("Y16", 2, 1);
        let image = convert_frame_to_rgb(&[0x00, 0x10, 0xff, 0xf0], &format).unwrap();
        assert_eq!(image.as_raw(), &vec![0x10, 0x10, 0x10, 0xf0, 0xf0, 0xf0]);
    }

    #[test]
    fn grey_is_replicated_across_channels() {
        let format = build_format("GREY", 2, 2);
        let image = convert_frame_to_rgb(&[10, 20, 30, 40], &format).unwrap();
        assert_eq!(image.get_pixel(1, 1), &Rgb([40, 40, 40]));
    }

    #[test]
    fn yuyv_neutral_chroma_decodes_to_gray() {
        let format = build_format("YUYV", 2, 1);
        let image = convert_frame_to_rgb(&[16, 128, 235, 128], &format).unwrap();
        assert_eq!(image.get_pixel(0, 0), &Rgb([0, 0, 0]));
        assert_eq!(image.get_pixel(1, 0), &Rgb([255, 255, 255]));
    }

    #[test]
    fn short_buffers_are_rejected() {
        let format = build_format("RGB3", 2, 2);
        let err = convert_frame_to_rgb(&[0; 5], &format).unwrap_err();
        assert!(matches!(err, AppError::FrameProcessing(msg) if msg.contains("expected 12 bytes")));
    }

    #[test]
    fn unknown_formats_are_rejected() {
        let format = build_format("H264", 2, 2);
        assert!(convert_frame_to_rgb(&[0; 16], &format).is_err());
    }

    #[test]
    fn device_locator_accepts_index_or_path() {
        assert_eq!(
            DeviceLocator::from_option(Some("2".into())),
            DeviceLocator::Index(2)
        );
        assert_eq!(
            DeviceLocator::from_option(Some("/dev/video7".into())).display(),
            "/dev/video7"
        );
        assert_eq!(DeviceLocator::from_option(None).display(), "/dev/video0");
    }

    #[test]
    fn index_and_path_of_one_device_share_a_lock_file() {
        let camera = |device: &str| {
            V4lCamera::new(CaptureConfig {
                device: DeviceLocator::from_option(Some(device.into())),
                pixel_format: "YUYV".into(),
                width: None,
                height: None,
                warmup_frames: 0,
                lock_dir: Some(PathBuf::from("/run/facegate")),
            })
        };
        assert_eq!(
            camera("2").lock_path(),
            Some(PathBuf::from("/run/facegate/facegate-video2.lock"))
        );
        assert_eq!(
            camera("/nonexistent/video2").lock_path(),
            camera("2").lock_path()
        );
    }
}
