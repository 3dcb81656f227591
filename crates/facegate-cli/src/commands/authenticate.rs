use std::any::Any;
use std::process::ExitCode;

use facegate_core::AuthDecision;

use crate::cli::{AuthenticateArgs, OutputMode, StoreArgs};
use crate::commands::CommandHandler;
use crate::errors::AppResult;
use crate::flows::run_authenticate;
use crate::output::render_authenticate;

/// Exit status for a completed attempt that did not match anyone.
pub const REJECTED_EXIT_STATUS: u8 = 1;

pub struct AuthenticateHandler {
    args: AuthenticateArgs,
    stores: StoreArgs,
    run: Box<dyn Fn(&AuthenticateArgs, &StoreArgs) -> AppResult<AuthDecision> + Send + Sync>,
    render: Box<dyn Fn(&AuthDecision, OutputMode, bool) -> AppResult<()> + Send + Sync>,
}

impl AuthenticateHandler {
    pub fn new(args: AuthenticateArgs, stores: StoreArgs) -> Self {
        Self::with_dependencies(args, stores, run_authenticate, render_authenticate)
    }

    pub fn with_dependencies(
        args: AuthenticateArgs,
        stores: StoreArgs,
        run: impl Fn(&AuthenticateArgs, &StoreArgs) -> AppResult<AuthDecision> + Send + Sync + 'static,
        render: impl Fn(&AuthDecision, OutputMode, bool) -> AppResult<()> + Send + Sync + 'static,
    ) -> Self {
        Self {
            args,
            stores,
            run: Box::new(run),
            render: Box::new(render),
        }
    }
}

impl CommandHandler for AuthenticateHandler {
    fn execute(&self, mode: OutputMode, verbose: bool) -> AppResult<ExitCode> {
        let decision = (self.run)(&self.args, &self.stores)?;
        (self.render)(&decision, mode, verbose)?;
        if decision.authenticated {
            Ok(ExitCode::SUCCESS)
        } else {
            Ok(ExitCode::from(REJECTED_EXIT_STATUS))
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
