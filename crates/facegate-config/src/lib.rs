use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

pub const PRIMARY_CONFIG_PATH: &str = "/etc/facegate/config.toml";
pub const SECONDARY_CONFIG_PATH: &str = "/usr/local/etc/facegate/config.toml";
pub const DEFAULT_GALLERY_PATH: &str = "/var/lib/facegate/gallery.json";
pub const DEFAULT_REGISTRY_PATH: &str = "/var/lib/facegate/registry.json";
pub const DEFAULT_CAPTURE_WINDOW_SECS: u64 = 15;
pub const DEFAULT_RESULT_DWELL_SECS: u64 = 15;
pub const DEFAULT_MATCH_THRESHOLD: f64 = 0.6;
pub const DEFAULT_VIDEO_DEVICE: &str = "/dev/video0";
pub const DEFAULT_PIXEL_FORMAT: &str = "YUYV";
pub const DEFAULT_WARMUP_FRAMES: u32 = 0;
pub const DEFAULT_JITTERS: u32 = 1;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ConfigFile {
    pub gallery_path: Option<PathBuf>,
    pub registry_path: Option<PathBuf>,
    pub capture_window_secs: Option<u64>,
    pub result_dwell_secs: Option<u64>,
    pub match_threshold: Option<f64>,
    pub video_device: Option<String>,
    pub pixel_format: Option<String>,
    pub warmup_frames: Option<u32>,
    pub jitters: Option<u32>,
    pub landmark_model: Option<PathBuf>,
    pub encoder_model: Option<PathBuf>,
    pub snapshot_dir: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub gallery_path: PathBuf,
    pub registry_path: PathBuf,
    pub capture_window: Duration,
    pub result_dwell: Duration,
    pub match_threshold: f64,
    pub video_device: String,
    pub pixel_format: String,
    pub warmup_frames: u32,
    pub jitters: u32,
    pub landmark_model: Option<PathBuf>,
    pub encoder_model: Option<PathBuf>,
    pub snapshot_dir: Option<PathBuf>,
}

impl ResolvedConfig {
    pub fn from_raw(raw: ConfigFile) -> Self {
        Self {
            gallery_path: raw
                .gallery_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_GALLERY_PATH)),
            registry_path: raw
                .registry_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_REGISTRY_PATH)),
            capture_window: Duration::from_secs(
                raw.capture_window_secs
                    .unwrap_or(DEFAULT_CAPTURE_WINDOW_SECS)
                    .max(1),
            ),
            result_dwell: Duration::from_secs(
                raw.result_dwell_secs.unwrap_or(DEFAULT_RESULT_DWELL_SECS),
            ),
            match_threshold: raw.match_threshold.unwrap_or(DEFAULT_MATCH_THRESHOLD),
            video_device: raw
                .video_device
                .unwrap_or_else(|| DEFAULT_VIDEO_DEVICE.to_string()),
            pixel_format: raw
                .pixel_format
                .unwrap_or_else(|| DEFAULT_PIXEL_FORMAT.to_string()),
            warmup_frames: raw.warmup_frames.unwrap_or(DEFAULT_WARMUP_FRAMES),
            jitters: raw.jitters.unwrap_or(DEFAULT_JITTERS),
            landmark_model: raw.landmark_model,
            encoder_model: raw.encoder_model,
            snapshot_dir: raw.snapshot_dir,
        }
    }
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self::from_raw(ConfigFile::default())
    }
}

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub contents: ConfigFile,
    pub source: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfigWithSource {
    pub resolved: ResolvedConfig,
    pub source: Option<PathBuf>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

impl ConfigError {
    pub fn path(&self) -> &Path {
        match self {
            ConfigError::Read { path, .. } | ConfigError::Parse { path, .. } => path,
        }
    }
}

/// Search order: an explicit path first, then the system-wide locations.
pub fn search_paths(explicit: Option<&Path>) -> Vec<PathBuf> {
    explicit
        .map(Path::to_path_buf)
        .into_iter()
        .chain([
            PathBuf::from(PRIMARY_CONFIG_PATH),
            PathBuf::from(SECONDARY_CONFIG_PATH),
        ])
        .collect()
}

/// Loads configuration for a command line that may name its own file. An
/// explicitly named file must exist; the system-wide ones are optional.
pub fn load_resolved_config(explicit: Option<&Path>) -> Result<ResolvedConfigWithSource, ConfigError> {
    if let Some(path) = explicit {
        if !path.exists() {
            return Err(ConfigError::Read {
                path: path.to_path_buf(),
                source: io::Error::new(io::ErrorKind::NotFound, "configuration file not found"),
            });
        }
    }
    load_resolved_from_paths(&search_paths(explicit))
}

pub fn load_from_paths(paths: &[PathBuf]) -> Result<Option<LoadedConfig>, ConfigError> {
    for path in paths {
        match fs::read_to_string(path) {
            Ok(contents) => {
                let parsed = parse(path, &contents)?;
                return Ok(Some(LoadedConfig {
                    contents: parsed,
                    source: path.clone(),
                }));
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
            Err(err) => {
                return Err(ConfigError::Read {
                    path: path.clone(),
                    source: err,
                })
            }
        }
    }

    Ok(None)
}

fn parse(path: &Path, contents: &str) -> Result<ConfigFile, ConfigError> {
    let parsed = toml::from_str::<ConfigFile>(contents).map_err(|err| ConfigError::Parse {
        path: path.to_path_buf(),
        message: err.to_string(),
    })?;

    if let Some(threshold) = parsed.match_threshold {
        if !threshold.is_finite() || threshold <= 0.0 {
            return Err(ConfigError::Parse {
                path: path.to_path_buf(),
                message: format!("match_threshold must be a positive number, got {threshold}"),
            });
        }
    }
    Ok(parsed)
}

pub fn load_resolved_from_paths(
    paths: &[PathBuf],
) -> Result<ResolvedConfigWithSource, ConfigError> {
    match load_from_paths(paths)? {
        Some(entry) => Ok(ResolvedConfigWithSource {
            resolved: ResolvedConfig::from_raw(entry.contents),
            source: Some(entry.source),
        }),
        None => Ok(ResolvedConfigWithSource {
            resolved: ResolvedConfig::default(),
            source: None,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn first_existing_path_wins() {
        let dir = tempdir().unwrap();
        let primary = dir.path().join("primary.toml");
        let secondary = dir.path().join("secondary.toml");
        fs::write(&secondary, "warmup_frames = 2").unwrap();
        fs::write(&primary, "warmup_frames = 5").unwrap();

        let loaded = load_from_paths(&[primary.clone(), secondary])
            .unwrap()
            .expect("config expected");
        assert_eq!(loaded.source, primary);
        assert_eq!(loaded.contents.warmup_frames, Some(5));
    }

    #[test]
    fn missing_files_fall_through() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("missing.toml");
        let secondary = dir.path().join("secondary.toml");
        fs::write(&secondary, "pixel_format = \"GREY\"").unwrap();

        let loaded = load_from_paths(&[missing, secondary.clone()])
            .unwrap()
            .expect("config expected");
        assert_eq!(loaded.source, secondary);
        assert_eq!(loaded.contents.pixel_format.as_deref(), Some("GREY"));
    }

    #[test]
    fn parse_errors_are_reported() {
        let dir = tempdir().unwrap();
        let broken = dir.path().join("broken.toml");
        fs::write(&broken, "gallery_path = { invalid = true }").unwrap();

        let err = load_from_paths(&[broken.clone()]).unwrap_err();
        match err {
            ConfigError::Parse { path, .. } => assert_eq!(path, broken),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn non_positive_threshold_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "match_threshold = 0.0").unwrap();

        let err = load_from_paths(&[path]).unwrap_err();
        assert!(err.to_string().contains("match_threshold"));
    }

    #[test]
    fn unreadable_paths_are_reported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dir.toml");
        fs::create_dir_all(&path).unwrap();

        let err = load_from_paths(&[path.clone()]).unwrap_err();
        assert_eq!(err.path(), path.as_path());
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn explicit_path_must_exist() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        let err = load_resolved_config(Some(&missing)).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn explicit_path_is_searched_first() {
        let explicit = PathBuf::from("/tmp/custom.toml");
        let paths = search_paths(Some(&explicit));
        assert_eq!(paths[0], explicit);
        assert_eq!(paths[1], PathBuf::from(PRIMARY_CONFIG_PATH));
        assert_eq!(search_paths(None).len(), 2);
    }

    #[test]
    fn defaults_apply_when_nothing_is_found() {
        let resolved = load_resolved_from_paths(&[]).unwrap();
        assert!(resolved.source.is_none());
        let config = resolved.resolved;
        assert_eq!(config.gallery_path, PathBuf::from(DEFAULT_GALLERY_PATH));
        assert_eq!(config.capture_window, Duration::from_secs(15));
        assert_eq!(config.match_threshold, DEFAULT_MATCH_THRESHOLD);
        assert_eq!(config.pixel_format, "YUYV");
        assert!(config.snapshot_dir.is_none());
    }

    #[test]
    fn capture_window_has_a_one_second_floor() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "capture_window_secs = 0\nresult_dwell_secs = 0\nsnapshot_dir = \"/run/facegate\"",
        )
        .unwrap();

        let resolved = load_resolved_from_paths(&[path.clone()]).unwrap();
        assert_eq!(resolved.source, Some(path));
        assert_eq!(resolved.resolved.capture_window, Duration::from_secs(1));
        assert_eq!(resolved.resolved.result_dwell, Duration::ZERO);
        assert_eq!(
            resolved.resolved.snapshot_dir,
            Some(PathBuf::from("/run/facegate"))
        );
    }
}
