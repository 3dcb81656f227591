use std::any::Any;
use std::process::ExitCode;

use facegate_core::EnrollmentOutcome;

use crate::cli::{EnrollArgs, OutputMode, StoreArgs};
use crate::commands::CommandHandler;
use crate::errors::AppResult;
use crate::flows::run_enroll;
use crate::output::render_enroll;

pub struct EnrollHandler {
    args: EnrollArgs,
    stores: StoreArgs,
    run: Box<dyn Fn(&EnrollArgs, &StoreArgs) -> AppResult<EnrollmentOutcome> + Send + Sync>,
    render: Box<dyn Fn(&EnrollmentOutcome, OutputMode, bool) -> AppResult<()> + Send + Sync>,
}

impl EnrollHandler {
    pub fn new(args: EnrollArgs, stores: StoreArgs) -> Self {
        Self::with_dependencies(args, stores, run_enroll, render_enroll)
    }

    pub fn with_dependencies(
        args: EnrollArgs,
        stores: StoreArgs,
        run: impl Fn(&EnrollArgs, &StoreArgs) -> AppResult<EnrollmentOutcome> + Send + Sync + 'static,
        render: impl Fn(&EnrollmentOutcome, OutputMode, bool) -> AppResult<()> + Send + Sync + 'static,
    ) -> Self {
        Self {
            args,
            stores,
            run: Box::new(run),
            render: Box::new(render),
        }
    }

    pub fn args(&self) -> &EnrollArgs {
        &self.args
    }
}

impl CommandHandler for EnrollHandler {
    fn execute(&self, mode: OutputMode, verbose: bool) -> AppResult<ExitCode> {
        let outcome = (self.run)(&self.args, &self.stores)?;
        (self.render)(&outcome, mode, verbose)?;
        Ok(ExitCode::SUCCESS)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
