//! Run configuration.
//!
//! Settings come from the command line, optionally layered over a
//! `frontbench.toml` file. The merged result is a [`HarnessConfig`] that is
//! built once at startup and shared read-only by every worker.

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use serde::Deserialize;

use crate::errors::BenchError;

pub const CONFIG_FILE_NAME: &str = "frontbench.toml";

/// Immutable settings for one benchmark run.
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    pub frontend_path: PathBuf,
    /// Appended, in order, to every invocation.
    pub extra_options: Vec<String>,
    pub output_root: PathBuf,
    pub worker_count: NonZeroUsize,
    pub per_unit_timeout: Option<Duration>,
    pub artifact_suffix: String,
    pub log_suffix: String,
}

/// Optional settings read from a TOML file. Every key may be omitted.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default)]
    pub num_processes: Option<usize>,
    #[serde(default)]
    pub vast_options: Vec<String>,
    /// Per-unit timeout, e.g. "30s" or "500ms"
    #[serde(default)]
    pub timeout: Option<String>,
    #[serde(default)]
    pub artifact_suffix: Option<String>,
    #[serde(default)]
    pub log_suffix: Option<String>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).map_err(|source| BenchError::ConfigReadError {
                path: path.to_path_buf(),
                source,
            })?;
        let config: Self = toml::from_str(&content).map_err(|e| BenchError::InvalidConfig {
            detail: format!("{}: {}", path.display(), e),
        })?;
        Ok(config)
    }

    /// Find the config file to use: `explicit` if given, else
    /// `./frontbench.toml`, else `<config dir>/frontbench/config.toml`.
    /// Returns the default config when none of the implicit locations exist.
    pub fn discover(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        let local = PathBuf::from(CONFIG_FILE_NAME);
        if local.is_file() {
            return Self::load(&local);
        }

        if let Some(dir) = dirs::config_dir() {
            let user = dir.join("frontbench").join("config.toml");
            if user.is_file() {
                return Self::load(&user);
            }
        }

        Ok(Self::default())
    }
}

/// Values supplied on the command line; `None` means "not given".
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub frontend_path: PathBuf,
    pub output_root: PathBuf,
    pub num_processes: Option<usize>,
    pub vast_options: Vec<String>,
    pub timeout: Option<String>,
}

impl HarnessConfig {
    /// Merge CLI values over file values over defaults.
    pub fn resolve(cli: CliOverrides, file: FileConfig) -> Result<Self> {
        let workers = cli
            .num_processes
            .or(file.num_processes)
            .unwrap_or_else(default_worker_count);
        let worker_count = NonZeroUsize::new(workers).ok_or_else(|| BenchError::InvalidConfig {
            detail: "--num_processes must be greater than zero".to_string(),
        })?;

        let per_unit_timeout = match cli.timeout.or(file.timeout) {
            Some(s) => Some(parse_duration(&s)?),
            None => None,
        };
        if per_unit_timeout.is_some_and(|t| t.is_zero()) {
            return Err(BenchError::InvalidConfig {
                detail: "timeout must be greater than zero".to_string(),
            }
            .into());
        }

        let mut extra_options = file.vast_options;
        extra_options.extend(cli.vast_options);

        let artifact_suffix = file.artifact_suffix.unwrap_or_else(|| "mlir".to_string());
        let log_suffix = file.log_suffix.unwrap_or_else(|| "log".to_string());
        if artifact_suffix.is_empty() || log_suffix.is_empty() || artifact_suffix == log_suffix {
            return Err(BenchError::InvalidConfig {
                detail: "artifact and log suffixes must be non-empty and distinct".to_string(),
            }
            .into());
        }

        let output_root = std::path::absolute(&cli.output_root).map_err(|source| {
            BenchError::OutputWriteError {
                path: cli.output_root.clone(),
                source,
            }
        })?;

        // Units run in their own directories, so a path like `./vast-front`
        // must be pinned here. A bare name is left for the `PATH` lookup.
        let frontend_path = if cli.frontend_path.components().count() > 1 {
            std::path::absolute(&cli.frontend_path).map_err(|e| BenchError::InvalidConfig {
                detail: format!("cannot resolve {}: {e}", cli.frontend_path.display()),
            })?
        } else {
            cli.frontend_path
        };

        Ok(Self {
            frontend_path,
            extra_options,
            output_root,
            worker_count,
            per_unit_timeout,
            artifact_suffix,
            log_suffix,
        })
    }
}

pub fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
}

/// Parse a duration string such as "3s", "500ms", "1.5s" or "2m".
/// A bare number is taken as seconds.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return Err(BenchError::InvalidConfig {
            detail: "empty duration".to_string(),
        }
        .into());
    }

    let (num_part, unit_part) = s
        .char_indices()
        .find(|(_, c)| c.is_alphabetic() || *c == 'µ')
        .map(|(i, _)| s.split_at(i))
        .unwrap_or((s, "s"));

    let value: f64 = num_part
        .trim()
        .parse()
        .map_err(|_| BenchError::InvalidConfig {
            detail: format!("invalid duration number: {num_part}"),
        })?;

    let seconds_per_unit = match unit_part.to_lowercase().as_str() {
        "ns" => 1e-9,
        "us" | "µs" => 1e-6,
        "ms" => 1e-3,
        "s" => 1.0,
        "m" | "min" => 60.0,
        _ => {
            return Err(BenchError::InvalidConfig {
                detail: format!("unknown duration unit: {unit_part}"),
            }
            .into());
        }
    };

    Duration::try_from_secs_f64(value * seconds_per_unit).map_err(|e| {
        BenchError::InvalidConfig {
            detail: format!("invalid duration {s}: {e}"),
        }
        .into()
    })
}
