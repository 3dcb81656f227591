use std::any::Any;
use std::process::ExitCode;

use facegate_core::registry::AuthLogPage;

use crate::cli::{LogsArgs, OutputMode, StoreArgs};
use crate::commands::CommandHandler;
use crate::errors::AppResult;
use crate::flows::run_logs;
use crate::output::render_logs;

pub struct LogsHandler {
    args: LogsArgs,
    stores: StoreArgs,
    run: Box<dyn Fn(&LogsArgs, &StoreArgs) -> AppResult<AuthLogPage> + Send + Sync>,
    render: Box<dyn Fn(&AuthLogPage, OutputMode, bool) -> AppResult<()> + Send + Sync>,
}

impl LogsHandler {
    pub fn new(args: LogsArgs, stores: StoreArgs) -> Self {
        Self::with_dependencies(args, stores, run_logs, render_logs)
    }

    pub fn with_dependencies(
        args: LogsArgs,
        stores: StoreArgs,
        run: impl Fn(&LogsArgs, &StoreArgs) -> AppResult<AuthLogPage> + Send + Sync + 'static,
        render: impl Fn(&AuthLogPage, OutputMode, bool) -> AppResult<()> + Send + Sync + 'static,
    ) -> Self {
        Self {
            args,
            stores,
            run: Box::new(run),
            render: Box::new(render),
        }
    }
}

impl CommandHandler for LogsHandler {
    fn execute(&self, mode: OutputMode, verbose: bool) -> AppResult<ExitCode> {
        let outcome = (self.run)(&self.args, &self.stores)?;
        (self.render)(&outcome, mode, verbose)?;
        Ok(ExitCode::SUCCESS)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
