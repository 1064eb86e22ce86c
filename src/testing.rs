//! Deterministic stand-in for the frontend, for unit tests.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use crate::cancel::CancelToken;
use crate::config::HarnessConfig;
use crate::invocation::Invocation;
use crate::process::{ToolOutput, ToolRunner};
use crate::types::{CompilationUnit, ExitDetail};

#[derive(Debug, Clone, Copy)]
pub enum Behavior {
    Exit { code: i32, after: Duration },
    Crash,
    Hang,
}

/// Looks up the behavior for a unit by its source file name. Units without
/// an entry succeed immediately.
#[derive(Debug, Default)]
pub struct FakeRunner {
    behaviors: HashMap<String, Behavior>,
    calls: AtomicUsize,
    running: AtomicUsize,
    peak: AtomicUsize,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, file_name: &str, behavior: Behavior) -> Self {
        self.behaviors.insert(file_name.to_string(), behavior);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneous `run` calls observed.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn wait(until: Option<Duration>, start: Instant, cancel: &CancelToken) -> Option<ExitDetail> {
        loop {
            if let Some(limit) = until
                && start.elapsed() >= limit
            {
                return None;
            }
            if cancel.is_cancelled() {
                return Some(ExitDetail::Interrupted);
            }
            std::thread::sleep(Duration::from_millis(2));
        }
    }
}

impl ToolRunner for FakeRunner {
    fn run(
        &self,
        invocation: &Invocation,
        timeout: Option<Duration>,
        cancel: &CancelToken,
    ) -> ToolOutput {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let args = &invocation.args;
        let artifact = PathBuf::from(&args[args.len() - 1]);
        let source = PathBuf::from(&args[args.len() - 3]);
        let name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let behavior = self
            .behaviors
            .get(&name)
            .copied()
            .unwrap_or(Behavior::Exit { code: 0, after: Duration::ZERO });

        let start = Instant::now();
        let exit = match behavior {
            Behavior::Exit { code, after } => {
                let limit = timeout.map_or(after, |t| t.min(after));
                match Self::wait(Some(limit), start, cancel) {
                    Some(interrupted) => interrupted,
                    None if limit < after => ExitDetail::TimedOut,
                    None => ExitDetail::Code(code),
                }
            }
            Behavior::Crash => ExitDetail::Signal(11),
            Behavior::Hang => Self::wait(timeout, start, cancel).unwrap_or(ExitDetail::TimedOut),
        };

        let output = if exit == ExitDetail::Code(0) {
            let _ = std::fs::write(&artifact, format!("artifact for {name}"));
            Vec::new()
        } else {
            format!("{name}: error: fake frontend failed\n").into_bytes()
        };

        self.running.fetch_sub(1, Ordering::SeqCst);
        ToolOutput {
            exit,
            duration: start.elapsed(),
            output,
        }
    }
}

/// Config rooted in `dir`, with `dir/out` created as the output root.
pub fn test_config(dir: &Path, workers: usize, timeout: Option<Duration>) -> HarnessConfig {
    let output_root = dir.join("out");
    std::fs::create_dir_all(&output_root).unwrap();
    HarnessConfig {
        frontend_path: PathBuf::from("/fake/vast-front"),
        extra_options: vec!["-vast-emit-mlir=hl".to_string()],
        output_root,
        worker_count: NonZeroUsize::new(workers).unwrap(),
        per_unit_timeout: timeout,
        artifact_suffix: "mlir".to_string(),
        log_suffix: "log".to_string(),
    }
}

pub fn test_unit(dir: &Path, file: &str) -> Arc<CompilationUnit> {
    Arc::new(CompilationUnit {
        name: file.to_string(),
        source_path: dir.join(file),
        working_directory: dir.to_path_buf(),
        command: vec!["cc".to_string(), "-c".to_string(), file.to_string()],
        output_stem: Path::new(file).with_extension(""),
    })
}
