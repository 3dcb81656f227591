use std::any::Any;
use std::process::ExitCode;

use facegate_core::EnrollmentOutcome;

use crate::cli::{ImportArgs, OutputMode, StoreArgs};
use crate::commands::CommandHandler;
use crate::errors::AppResult;
use crate::flows::run_import;
use crate::output::render_enroll;

pub struct ImportHandler {
    args: ImportArgs,
    stores: StoreArgs,
    run: Box<dyn Fn(&ImportArgs, &StoreArgs) -> AppResult<EnrollmentOutcome> + Send + Sync>,
    render: Box<dyn Fn(&EnrollmentOutcome, OutputMode, bool) -> AppResult<()> + Send + Sync>,
}

impl ImportHandler {
    pub fn new(args: ImportArgs, stores: StoreArgs) -> Self {
        Self::with_dependencies(args, stores, run_import, render_enroll)
    }

    pub fn with_dependencies(
        args: ImportArgs,
        stores: StoreArgs,
        run: impl Fn(&ImportArgs, &StoreArgs) -> AppResult<EnrollmentOutcome> + Send + Sync + 'static,
        render: impl Fn(&EnrollmentOutcome, OutputMode, bool) -> AppResult<()> + Send + Sync + 'static,
    ) -> Self {
        Self {
            args,
            stores,
            run: Box::new(run),
            render: Box::new(render),
        }
    }
}

impl CommandHandler for ImportHandler {
    fn execute(&self, mode: OutputMode, verbose: bool) -> AppResult<ExitCode> {
        let outcome = (self.run)(&self.args, &self.stores)?;
        (self.render)(&outcome, mode, verbose)?;
        Ok(ExitCode::SUCCESS)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
