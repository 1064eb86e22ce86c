use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

/// One record of a Clang JSON compilation database (loosely typed).
#[derive(Debug, Deserialize)]
pub struct CompileCommandRecord {
    pub directory: Option<String>,
    pub file: Option<String>,
    pub arguments: Option<Vec<String>>,
    pub command: Option<String>,
}

/// A validated compilation unit. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilationUnit {
    /// Report name: source path relative to the codebase root.
    pub name: String,
    /// Absolute, lexically normalized source path.
    pub source_path: PathBuf,
    pub working_directory: PathBuf,
    /// Original compiler invocation, compiler first.
    pub command: Vec<String>,
    /// Unique extension-less path under the output root.
    pub output_stem: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitStatus {
    Success,
    Failure,
    TimedOut,
}

impl UnitStatus {
    pub fn is_success(self) -> bool {
        matches!(self, UnitStatus::Success)
    }
}

/// Why the frontend process stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitDetail {
    Code(i32),
    Signal(i32),
    TimedOut,
    Interrupted,
    Error(String),
}

impl ExitDetail {
    pub fn status(&self) -> UnitStatus {
        match self {
            ExitDetail::Code(0) => UnitStatus::Success,
            ExitDetail::TimedOut => UnitStatus::TimedOut,
            _ => UnitStatus::Failure,
        }
    }
}

impl fmt::Display for ExitDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitDetail::Code(code) => write!(f, "exit code {code}"),
            ExitDetail::Signal(sig) => write!(f, "killed by signal {sig}"),
            ExitDetail::TimedOut => write!(f, "timed out"),
            ExitDetail::Interrupted => write!(f, "interrupted"),
            ExitDetail::Error(msg) => write!(f, "failed to run: {msg}"),
        }
    }
}

/// Outcome of running one unit through the frontend.
///
/// Exactly one of `artifact_path` and `error_log_path` is set, chosen by
/// `status`. `staged_artifact` holds the frontend's output file until the
/// materializer moves it to `artifact_path`.
#[derive(Debug)]
pub struct ExecutionResult {
    pub unit: Arc<CompilationUnit>,
    pub status: UnitStatus,
    pub exit: ExitDetail,
    pub duration: Duration,
    pub artifact_path: Option<PathBuf>,
    pub error_log_path: Option<PathBuf>,
    pub command_line: String,
    pub output: Vec<u8>,
    pub staged_artifact: Option<tempfile::TempPath>,
}
