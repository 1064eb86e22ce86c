//! Fixed-size worker pool that drives every unit to completion.
//!
//! Units are queued in input order on a rayon pool of `worker_count` threads
//! (FIFO spawns, so dispatch order follows the database). Each worker blocks
//! only on its own child process and sends its result down a channel; the
//! calling thread receives results in completion order and hands them to the
//! caller's sink one at a time. The sink is therefore the single point where
//! results are written out, and needs no locking.

use std::sync::Arc;
use std::sync::mpsc;

use anyhow::Result;
use rayon::ThreadPoolBuilder;
use tracing::{debug, info};

use crate::errors::BenchError;
use crate::executor::Executor;
use crate::process::ToolRunner;
use crate::types::{CompilationUnit, ExecutionResult, UnitStatus};

/// Counts of terminal outcomes for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub total: usize,
    pub completed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub timed_out: usize,
}

impl RunSummary {
    fn record(&mut self, status: UnitStatus) {
        self.completed += 1;
        match status {
            UnitStatus::Success => self.succeeded += 1,
            UnitStatus::Failure => self.failed += 1,
            UnitStatus::TimedOut => self.timed_out += 1,
        }
    }
}

pub struct Dispatcher {
    worker_count: usize,
}

impl Dispatcher {
    pub fn new(worker_count: usize) -> Self {
        Self {
            worker_count: worker_count.max(1),
        }
    }

    /// Run every unit exactly once and feed each result to `sink` as it
    /// completes.
    ///
    /// A unit's failure or timeout never stops the batch. An output-root
    /// write failure in a worker, or an error returned by `sink`, does: the
    /// run is cancelled (in-flight children are killed,
    /// queued units are skipped), the remaining results are drained unseen,
    /// and that error is returned. If the run was interrupted before
    /// every unit finished, returns [`BenchError::Interrupted`].
    pub fn run<R, F>(
        &self,
        units: Vec<Arc<CompilationUnit>>,
        executor: &Executor<R>,
        mut sink: F,
    ) -> Result<RunSummary>
    where
        R: ToolRunner,
        F: FnMut(ExecutionResult) -> Result<()>,
    {
        let mut summary = RunSummary {
            total: units.len(),
            ..RunSummary::default()
        };
        if units.is_empty() {
            return Ok(summary);
        }

        if let Some(unit) = units.iter().find(|u| u.command.is_empty()) {
            return Err(BenchError::InvalidConfig {
                detail: format!("unit {} has an empty command", unit.name),
            }
            .into());
        }

        let threads = self.worker_count.min(units.len());
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("frontbench-worker-{i}"))
            .build()
            .map_err(|e| BenchError::WorkerPool {
                detail: e.to_string(),
            })?;

        info!("running {} units on {} workers", units.len(), threads);

        let cancel = executor.cancel_token();
        let (tx, rx) = mpsc::channel::<Result<ExecutionResult>>();
        let mut fatal: Option<anyhow::Error> = None;

        std::thread::scope(|scope| {
            scope.spawn(move || {
                pool.scope_fifo(|fifo| {
                    for unit in units {
                        let tx = tx.clone();
                        fifo.spawn_fifo(move |_| {
                            if cancel.is_cancelled() {
                                debug!(unit = %unit.name, "skipped, run cancelled");
                                return;
                            }
                            let result = executor.execute(&unit);
                            let _ = tx.send(result);
                        });
                    }
                });
            });

            for result in rx.iter() {
                if fatal.is_some() {
                    continue;
                }
                let delivered = result.and_then(|result| {
                    summary.record(result.status);
                    sink(result)
                });
                if let Err(e) = delivered {
                    cancel.cancel();
                    fatal = Some(e);
                }
            }
        });

        if let Some(e) = fatal {
            return Err(e);
        }
        if summary.completed < summary.total && cancel.is_cancelled() {
            return Err(BenchError::Interrupted.into());
        }
        Ok(summary)
    }
}
