use std::ffi::OsString;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::{SecondsFormat, Utc};

use crate::config::HarnessConfig;
use crate::errors::BenchError;
use crate::types::{CompilationUnit, ExecutionResult};

const STAGING_PREFIX: &str = ".frontbench-";

/// Maps units to their mirrored locations under the output root.
#[derive(Debug, Clone)]
pub struct OutputLayout {
    root: PathBuf,
    artifact_suffix: String,
    log_suffix: String,
}

impl OutputLayout {
    pub fn new(root: impl Into<PathBuf>, artifact_suffix: &str, log_suffix: &str) -> Self {
        Self {
            root: root.into(),
            artifact_suffix: artifact_suffix.to_string(),
            log_suffix: log_suffix.to_string(),
        }
    }

    pub fn from_config(config: &HarnessConfig) -> Self {
        Self::new(&config.output_root, &config.artifact_suffix, &config.log_suffix)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn artifact_path(&self, unit: &CompilationUnit) -> PathBuf {
        self.mirrored(unit, &self.artifact_suffix)
    }

    pub fn error_log_path(&self, unit: &CompilationUnit) -> PathBuf {
        self.mirrored(unit, &self.log_suffix)
    }

    fn mirrored(&self, unit: &CompilationUnit, suffix: &str) -> PathBuf {
        let mut relative: OsString = unit.output_stem.clone().into_os_string();
        relative.push(".");
        relative.push(suffix);
        self.root.join(relative)
    }

    /// Reserve a unique hidden file in the output root for the frontend to
    /// write its artifact into. Removed on drop unless persisted.
    pub fn stage_artifact(&self) -> io::Result<tempfile::TempPath> {
        let file = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .suffix(&format!(".{}", self.artifact_suffix))
            .tempfile_in(&self.root)?;
        Ok(file.into_temp_path())
    }
}

/// Create the output root and check that files can be written into it.
pub fn prepare_output_root(root: &Path) -> Result<()> {
    let write_error = |source: io::Error| BenchError::OutputWriteError {
        path: root.to_path_buf(),
        source,
    };

    fs::create_dir_all(root).map_err(write_error)?;
    let probe = tempfile::Builder::new()
        .prefix(STAGING_PREFIX)
        .tempfile_in(root)
        .map_err(write_error)?;
    probe.close().map_err(write_error)?;
    Ok(())
}

/// Persist a result: move the staged artifact into place on success, or
/// write the captured output as an error log otherwise. Removes whichever of
/// the two files an earlier run may have left for the same unit.
pub fn materialize(result: &mut ExecutionResult, layout: &OutputLayout) -> Result<()> {
    match (&result.artifact_path, &result.error_log_path) {
        (Some(artifact), None) => {
            let artifact = artifact.clone();
            create_parent(&artifact)?;
            match result.staged_artifact.take() {
                Some(staged) => {
                    staged
                        .persist(&artifact)
                        .map_err(|e| BenchError::OutputWriteError {
                            path: artifact.clone(),
                            source: e.error,
                        })?;
                }
                None => write_atomic(&artifact, &[])?,
            }
            remove_stale(&layout.error_log_path(&result.unit))?;
        }
        (None, Some(log)) => {
            let log = log.clone();
            result.staged_artifact = None;
            create_parent(&log)?;
            write_atomic(&log, &error_log_contents(result))?;
            remove_stale(&layout.artifact_path(&result.unit))?;
        }
        _ => anyhow::bail!(
            "result for {} must carry exactly one output path",
            result.unit.name
        ),
    }
    Ok(())
}

fn error_log_contents(result: &ExecutionResult) -> Vec<u8> {
    let mut contents = format!(
        "# unit: {}\n# command: {}\n# status: {}\n# finished: {}\n",
        result.unit.name,
        result.command_line,
        result.exit,
        Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
    )
    .into_bytes();
    contents.extend_from_slice(&result.output);
    contents
}

fn create_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| BenchError::OutputWriteError {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    Ok(())
}

fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let write_error = |source: io::Error| BenchError::OutputWriteError {
        path: path.to_path_buf(),
        source,
    };
    let dir = path.parent().unwrap_or(Path::new("."));
    let mut file = tempfile::Builder::new()
        .prefix(STAGING_PREFIX)
        .tempfile_in(dir)
        .map_err(write_error)?;
    file.write_all(contents).map_err(write_error)?;
    file.persist(path).map_err(|e| write_error(e.error))?;
    Ok(())
}

fn remove_stale(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(BenchError::OutputWriteError {
            path: path.to_path_buf(),
            source,
        }
        .into()),
    }
}
