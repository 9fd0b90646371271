use std::fmt;
use std::io;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SplitgzError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Out of range: {0}")]
    OutOfRange(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Corrupt archive: {0}")]
    CorruptArchive(String),

    #[error("Transform failed for chunk {index}: {message}")]
    Transform { index: u64, message: String },

    #[error("Timed out after {0:?} waiting for {1}")]
    Timeout(Duration, &'static str),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Thread error: {0}")]
    Thread(String),
}

impl SplitgzError {
    pub fn invalid_argument<T: fmt::Display>(msg: T) -> Self {
        SplitgzError::InvalidArgument(msg.to_string())
    }

    pub fn out_of_range<T: fmt::Display>(msg: T) -> Self {
        SplitgzError::OutOfRange(msg.to_string())
    }

    pub fn invalid_operation<T: fmt::Display>(msg: T) -> Self {
        SplitgzError::InvalidOperation(msg.to_string())
    }

    pub fn corrupt_archive<T: fmt::Display>(msg: T) -> Self {
        SplitgzError::CorruptArchive(msg.to_string())
    }

    pub fn transform<T: fmt::Display>(index: u64, msg: T) -> Self {
        SplitgzError::Transform {
            index,
            message: msg.to_string(),
        }
    }

    pub fn thread<T: fmt::Display>(msg: T) -> Self {
        SplitgzError::Thread(msg.to_string())
    }

    /// Map an `io::Error` raised while opening `path`, keeping the
    /// not-found / already-exists distinctions the CLI reports on.
    pub fn from_open(err: io::Error, path: &str) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => SplitgzError::NotFound(path.to_string()),
            io::ErrorKind::AlreadyExists => SplitgzError::AlreadyExists(path.to_string()),
            _ => SplitgzError::Io(err),
        }
    }
}

pub type SplitgzResult<T> = Result<T, SplitgzError>;
