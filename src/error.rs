//! Errors raised while building or starting the matrix

use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid schedule {expr:?}: {reason}")]
    InvalidSchedule { expr: String, reason: String },
    #[error("invalid hardware config: {0}")]
    InvalidHardware(String),
    #[error("duplicate board name {0:?}")]
    DuplicateBoard(String),
    #[error("no {0} canvas registered")]
    MissingCanvas(&'static str),
}

impl ConfigError {
    pub(crate) fn schedule(expr: &str, reason: impl Into<String>) -> Self {
        Self::InvalidSchedule {
            expr: expr.to_string(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum MatrixError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("no boards configured")]
    NoBoards,
    #[error("startup failed: {0}")]
    Startup(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, MatrixError>;
