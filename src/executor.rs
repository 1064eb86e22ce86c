use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info};

use crate::cancel::CancelToken;
use crate::config::HarnessConfig;
use crate::errors::BenchError;
use crate::invocation::build_invocation;
use crate::materialize::OutputLayout;
use crate::process::ToolRunner;
use crate::types::{CompilationUnit, ExecutionResult};

/// Runs single units through the frontend and classifies the outcome.
///
/// Per-unit problems (nonzero exit, crash, timeout, spawn failure) never
/// escape as errors; they are folded into the returned [`ExecutionResult`].
/// Only output-root write failures do.
pub struct Executor<R> {
    config: Arc<HarnessConfig>,
    layout: OutputLayout,
    runner: R,
    cancel: CancelToken,
    log_commands: bool,
}

impl<R: ToolRunner> Executor<R> {
    pub fn new(config: Arc<HarnessConfig>, runner: R, cancel: CancelToken) -> Self {
        let layout = OutputLayout::from_config(&config);
        Self {
            config,
            layout,
            runner,
            cancel,
            log_commands: false,
        }
    }

    /// Log every frontend command line at info level before it runs.
    pub fn with_command_logging(mut self, enabled: bool) -> Self {
        self.log_commands = enabled;
        self
    }

    pub fn layout(&self) -> &OutputLayout {
        &self.layout
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    pub fn into_runner(self) -> R {
        self.runner
    }

    /// Run one unit.
    ///
    /// Returns `Err` only when the harness itself cannot write into the
    /// output root; that aborts the whole run.
    pub fn execute(&self, unit: &Arc<CompilationUnit>) -> Result<ExecutionResult> {
        let staged = self
            .layout
            .stage_artifact()
            .map_err(|source| BenchError::OutputWriteError {
                path: self.layout.root().to_path_buf(),
                source,
            })?;

        let invocation = build_invocation(unit, &self.config, &staged);
        let command_line = invocation.display_line();
        if self.log_commands {
            info!("{command_line}");
        } else {
            debug!(unit = %unit.name, "{command_line}");
        }
        let tool = self
            .runner
            .run(&invocation, self.config.per_unit_timeout, &self.cancel);

        let status = tool.exit.status();
        debug!(unit = %unit.name, exit = %tool.exit, "unit finished in {:?}", tool.duration);

        let (artifact_path, error_log_path, staged_artifact) = if status.is_success() {
            (Some(self.layout.artifact_path(unit)), None, Some(staged))
        } else {
            (None, Some(self.layout.error_log_path(unit)), None)
        };

        Ok(ExecutionResult {
            unit: Arc::clone(unit),
            status,
            exit: tool.exit,
            duration: tool.duration,
            artifact_path,
            error_log_path,
            command_line,
            output: tool.output,
            staged_artifact,
        })
    }
}
