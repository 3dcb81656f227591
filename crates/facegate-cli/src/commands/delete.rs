use std::any::Any;
use std::process::ExitCode;

use facegate_core::DeletionOutcome;

use crate::cli::{DeleteArgs, OutputMode, StoreArgs};
use crate::commands::CommandHandler;
use crate::errors::AppResult;
use crate::flows::run_delete;
use crate::output::render_delete;

pub struct DeleteHandler {
    args: DeleteArgs,
    stores: StoreArgs,
    run: Box<dyn Fn(&DeleteArgs, &StoreArgs) -> AppResult<DeletionOutcome> + Send + Sync>,
    render: Box<dyn Fn(&DeletionOutcome, OutputMode, bool) -> AppResult<()> + Send + Sync>,
}

impl DeleteHandler {
    pub fn new(args: DeleteArgs, stores: StoreArgs) -> Self {
        Self::with_dependencies(args, stores, run_delete, render_delete)
    }

    pub fn with_dependencies(
        args: DeleteArgs,
        stores: StoreArgs,
        run: impl Fn(&DeleteArgs, &StoreArgs) -> AppResult<DeletionOutcome> + Send + Sync + 'static,
        render: impl Fn(&DeletionOutcome, OutputMode, bool) -> AppResult<()> + Send + Sync + 'static,
    ) -> Self {
        Self {
            args,
            stores,
            run: Box::new(run),
            render: Box::new(render),
        }
    }

    pub fn args(&self) -> &DeleteArgs {
        &self.args
    }
}

impl CommandHandler for DeleteHandler {
    fn execute(&self, mode: OutputMode, verbose: bool) -> AppResult<ExitCode> {
        let outcome = (self.run)(&self.args, &self.stores)?;
        (self.render)(&outcome, mode, verbose)?;
        Ok(ExitCode::SUCCESS)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
