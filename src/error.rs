use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CovmarkError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to walk source tree: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("Parse error in {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid location key: '{0}'")]
    InvalidKey(String),

    #[error("Formatting error: {0}")]
    Fmt(#[from] std::fmt::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CovmarkError>;
