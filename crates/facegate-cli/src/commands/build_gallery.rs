use std::any::Any;
use std::process::ExitCode;

use crate::cli::{BuildGalleryArgs, OutputMode, StoreArgs};
use crate::commands::CommandHandler;
use crate::errors::AppResult;
use crate::flows::{run_build_gallery, BuildGalleryOutcome};
use crate::output::render_build_gallery;

pub struct BuildGalleryHandler {
    args: BuildGalleryArgs,
    stores: StoreArgs,
    run: Box<dyn Fn(&BuildGalleryArgs, &StoreArgs) -> AppResult<BuildGalleryOutcome> + Send + Sync>,
    render: Box<dyn Fn(&BuildGalleryOutcome, OutputMode, bool) -> AppResult<()> + Send + Sync>,
}

impl BuildGalleryHandler {
    pub fn new(args: BuildGalleryArgs, stores: StoreArgs) -> Self {
        Self::with_dependencies(args, stores, run_build_gallery, render_build_gallery)
    }

    pub fn with_dependencies(
        args: BuildGalleryArgs,
        stores: StoreArgs,
        run: impl Fn(&BuildGalleryArgs, &StoreArgs) -> AppResult<BuildGalleryOutcome> + Send + Sync + 'static,
        render: impl Fn(&BuildGalleryOutcome, OutputMode, bool) -> AppResult<()> + Send + Sync + 'static,
    ) -> Self {
        Self {
            args,
            stores,
            run: Box::new(run),
            render: Box::new(render),
        }
    }
}

impl CommandHandler for BuildGalleryHandler {
    fn execute(&self, mode: OutputMode, verbose: bool) -> AppResult<ExitCode> {
        let outcome = (self.run)(&self.args, &self.stores)?;
        (self.render)(&outcome, mode, verbose)?;
        Ok(ExitCode::SUCCESS)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
