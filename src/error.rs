//! Errors at the I/O boundary. The compiler core never fails; only loading
//! input documents can.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FormError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON in {path}: {message}")]
    Json { path: PathBuf, message: String },

    #[error("invalid options in {path}: {message}")]
    Options { path: PathBuf, message: String },

    #[error("schema root must be an object, found {found}")]
    SchemaNotObject { found: &'static str },
}
