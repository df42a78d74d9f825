//! Shared context handed to every component

use std::sync::Arc;

use crate::runner::{CommandOutput, CommandRunner, CommandSpec, RunError, SystemRunner};
use crate::storage::layout::HostLayout;
use crate::storage::settings::Settings;

/// Runner, filesystem layout and settings for one invocation
#[derive(Clone)]
pub struct HostContext {
    pub runner: Arc<dyn CommandRunner>,
    pub layout: HostLayout,
    pub settings: Settings,
}

impl HostContext {
    pub fn new(runner: Arc<dyn CommandRunner>, layout: HostLayout, settings: Settings) -> Self {
        Self {
            runner,
            layout,
            settings,
        }
    }

    /// Context for the real host
    pub fn system(layout: HostLayout, settings: Settings) -> Self {
        Self::new(Arc::new(SystemRunner), layout, settings)
    }

    /// Run a command with the configured timeout
    pub async fn run<I, S>(&self, program: &str, args: I) -> Result<CommandOutput, RunError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.run_spec(CommandSpec::new(program, args)).await
    }

    /// Run a prepared command, applying the configured timeout unless the
    /// command sets its own
    pub async fn run_spec(&self, mut cmd: CommandSpec) -> Result<CommandOutput, RunError> {
        if cmd.timeout.is_none() {
            cmd.timeout = Some(self.settings.command_timeout());
        }
        self.runner.run(cmd).await
    }

    pub fn has(&self, program: &str) -> bool {
        self.runner.has(program)
    }
}

impl std::fmt::Debug for HostContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostContext")
            .field("layout", &self.layout)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}
