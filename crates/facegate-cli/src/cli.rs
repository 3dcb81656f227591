use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};

pub const DEFAULT_LOG_PAGE_SIZE: usize = 10;

#[derive(Debug, Parser)]
#[command(
    name = "facegate",
    version,
    about = "Camera face authentication: enroll people, authenticate, keep an audit trail"
)]
pub struct Cli {
    /// Emit machine-readable JSON instead of human text
    #[arg(long, global = true)]
    pub json: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(flatten)]
    pub stores: StoreArgs,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    pub fn output_mode(&self) -> OutputMode {
        OutputMode::from(self.json)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Human,
    Json,
}

impl From<bool> for OutputMode {
    fn from(json: bool) -> Self {
        if json {
            OutputMode::Json
        } else {
            OutputMode::Human
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Capture from the camera and check the best face against the gallery
    Authenticate(AuthenticateArgs),
    /// Capture from the camera and add a new authorized person
    Enroll(EnrollArgs),
    /// Remove an authorized person and their gallery entry
    Delete(DeleteArgs),
    /// Enroll a person from an image file instead of the camera
    Import(ImportArgs),
    /// Rebuild the gallery from a directory of labelled pictures
    BuildGallery(BuildGalleryArgs),
    /// List recorded authentication attempts, newest first
    Logs(LogsArgs),
}

#[derive(Debug, Clone, Default, Args)]
pub struct StoreArgs {
    /// Configuration file searched before the system-wide locations
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Gallery file (overrides gallery_path)
    #[arg(long, global = true, value_name = "PATH")]
    pub gallery: Option<PathBuf>,

    /// Registry file (overrides registry_path)
    #[arg(long, global = true, value_name = "PATH")]
    pub registry: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Args)]
pub struct CaptureArgs {
    /// V4L2 device path or index (e.g. /dev/video2 or 2)
    #[arg(long)]
    pub device: Option<String>,

    /// Pixel format FourCC to negotiate (YUYV, MJPG, GREY, Y16, RGB3)
    #[arg(long, value_name = "FOURCC")]
    pub pixel_format: Option<String>,

    /// Frames to discard after opening the device
    #[arg(long)]
    pub warmup_frames: Option<u32>,

    /// Length of the capture window in seconds
    #[arg(long, value_name = "SECS")]
    pub window_secs: Option<u64>,

    /// Directory receiving live.png and result.png while capturing
    #[arg(long, value_name = "DIR")]
    pub snapshot_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Args)]
pub struct ModelArgs {
    /// Path to the dlib landmark predictor model
    #[arg(long, value_name = "PATH")]
    pub landmark_model: Option<PathBuf>,

    /// Path to the dlib face encoding network model
    #[arg(long, value_name = "PATH")]
    pub encoder_model: Option<PathBuf>,

    /// Re-sampling passes per encoded face
    #[arg(long)]
    pub jitters: Option<u32>,
}

#[derive(Debug, Clone, Args)]
pub struct AuthenticateArgs {
    #[command(flatten)]
    pub capture: CaptureArgs,

    #[command(flatten)]
    pub models: ModelArgs,

    /// Match when the embedding distance is strictly below this value
    #[arg(long)]
    pub threshold: Option<f64>,

    /// Seconds to keep the verdict on screen
    #[arg(long, value_name = "SECS")]
    pub dwell_secs: Option<u64>,
}

#[derive(Debug, Clone, Args)]
pub struct EnrollArgs {
    /// Name of the person being enrolled
    pub name: String,

    #[command(flatten)]
    pub capture: CaptureArgs,

    #[command(flatten)]
    pub models: ModelArgs,
}

#[derive(Debug, Clone, Args)]
pub struct DeleteArgs {
    /// Name of the authorized person to remove
    pub name: String,
}

#[derive(Debug, Clone, Args)]
pub struct ImportArgs {
    /// Name of the person being enrolled
    pub name: String,

    /// Picture containing the person's face
    pub image: PathBuf,

    #[command(flatten)]
    pub models: ModelArgs,
}

#[derive(Debug, Clone, Args)]
pub struct BuildGalleryArgs {
    /// Directory laid out as DATASET/<person>/<image>
    pub dataset: PathBuf,

    /// Write the gallery here instead of the configured gallery path
    #[arg(long, value_name = "PATH")]
    pub output: Option<PathBuf>,

    #[command(flatten)]
    pub models: ModelArgs,
}

#[derive(Debug, Clone, Args)]
pub struct LogsArgs {
    /// 1-based page number
    #[arg(long, default_value_t = 1)]
    pub page: usize,

    /// Entries per page
    #[arg(long, default_value_t = DEFAULT_LOG_PAGE_SIZE)]
    pub page_size: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn global_flags_work_after_the_subcommand() {
        let cli = Cli::try_parse_from([
            "facegate",
            "enroll",
            "Alice",
            "--json",
            "-vv",
            "--gallery",
            "/tmp/g.json",
            "--device",
            "2",
        ])
        .unwrap();
        assert_eq!(cli.output_mode(), OutputMode::Json);
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.stores.gallery, Some(PathBuf::from("/tmp/g.json")));
        match cli.command {
            Commands::Enroll(args) => {
                assert_eq!(args.name, "Alice");
                assert_eq!(args.capture.device.as_deref(), Some("2"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn logs_defaults_to_first_page_of_ten() {
        let cli = Cli::try_parse_from(["facegate", "logs"]).unwrap();
        match cli.command {
            Commands::Logs(args) => {
                assert_eq!(args.page, 1);
                assert_eq!(args.page_size, 10);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
