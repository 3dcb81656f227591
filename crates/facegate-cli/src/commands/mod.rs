use std::any::Any;
use std::process::ExitCode;

use crate::cli::{Cli, Commands, OutputMode};
use crate::errors::AppResult;

pub trait CommandHandler: Send + Sync {
    fn execute(&self, mode: OutputMode, verbose: bool) -> AppResult<ExitCode>;
    fn as_any(&self) -> &dyn Any;
}

mod authenticate;
mod build_gallery;
mod delete;
mod enroll;
mod import;
mod logs;

pub use authenticate::{AuthenticateHandler, REJECTED_EXIT_STATUS};
pub use build_gallery::BuildGalleryHandler;
pub use delete::DeleteHandler;
pub use enroll::EnrollHandler;
pub use import::ImportHandler;
pub use logs::LogsHandler;

impl From<Cli> for Box<dyn CommandHandler> {
    fn from(cli: Cli) -> Self {
        let stores = cli.stores;
        match cli.command {
            Commands::Authenticate(args) => Box::new(AuthenticateHandler::new(args, stores)),
            Commands::Enroll(args) => Box::new(EnrollHandler::new(args, stores)),
            Commands::Delete(args) => Box::new(DeleteHandler::new(args, stores)),
            Commands::Import(args) => Box::new(ImportHandler::new(args, stores)),
            Commands::BuildGallery(args) => Box::new(BuildGalleryHandler::new(args, stores)),
            Commands::Logs(args) => Box::new(LogsHandler::new(args, stores)),
        }
    }
}
