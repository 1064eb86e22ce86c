use std::path::PathBuf;

#[derive(thiserror::Error, Debug)]
pub enum BenchError {
    #[error("Failed to read compilation database {path}: {source}")]
    UnreadableDatabase {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Malformed compilation database {path}: {detail}")]
    MalformedDatabase { path: PathBuf, detail: String },

    #[error("Cannot write to output directory {path}: {source}")]
    OutputWriteError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to read config file {path}: {source}")]
    ConfigReadError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid configuration: {detail}")]
    InvalidConfig { detail: String },

    #[error("Failed to start worker pool: {detail}")]
    WorkerPool { detail: String },

    #[error("interrupted")]
    Interrupted,
}
