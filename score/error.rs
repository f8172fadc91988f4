// ========================================================================================
//                                   Error handling
// ========================================================================================
//
// Every failure that can escape the genotype subsystem is one of the kinds below. None
// of them are retried internally; they propagate to the caller as the outcome of the
// load or score operation that raised them.

use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GenotypeError {
    #[error("I/O error for {path}: {message}")]
    Io { path: String, message: String },

    #[error("malformed input in {path}{}: {message}", line_suffix(.line))]
    MalformedInput {
        path: String,
        line: Option<usize>,
        message: String,
    },

    #[error("unsupported format in {path}: {message}")]
    UnsupportedFormat { path: String, message: String },

    #[error(
        "variants on chromosome {chromosome} in {path} are not clustered together; \
         rows of one chromosome must be contiguous across all variant files"
    )]
    Ordering { path: String, chromosome: String },

    #[error(
        "{count} duplicated variant ID(s) detected. Valid variant IDs were written to {}; \
         re-run with --extract {} to avoid this error",
        .remediation.display(),
        .remediation.display()
    )]
    DuplicateVariant { count: usize, remediation: PathBuf },

    #[error(
        "{count} variants observed, but at most {} variants are supported",
        crate::catalog::MAX_UNFILTERED_VARIANTS
    )]
    LimitExceeded { count: u64 },

    #[error("configuration error: {0}")]
    Configuration(String),
}

pub type Result<T> = std::result::Result<T, GenotypeError>;

fn line_suffix(line: &Option<usize>) -> String {
    match line {
        Some(line) => format!(" at line {line}"),
        None => String::new(),
    }
}

impl GenotypeError {
    pub fn io(path: &Path, err: impl std::fmt::Display) -> Self {
        Self::Io {
            path: path.display().to_string(),
            message: err.to_string(),
        }
    }

    pub fn malformed(path: &Path, line: Option<usize>, message: impl Into<String>) -> Self {
        Self::MalformedInput {
            path: path.display().to_string(),
            line,
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }
}

impl From<toml::de::Error> for GenotypeError {
    fn from(err: toml::de::Error) -> Self {
        Self::Configuration(format!("failed to parse configuration file: {err}"))
    }
}
