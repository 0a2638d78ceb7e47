use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecorderError {
    #[error("cannot use multiple recorder contexts at the same time: previous usage {previous}, current usage {current}")]
    MultipleActiveSessions { previous: String, current: String },
    #[error("unable to find a matching interaction for request {method} {url}")]
    NoMatchingInteraction { method: String, url: String },
    #[error("no recorded interaction found at {path}")]
    NotFound { path: String },
    #[error("error while loading file {path}: {reason}")]
    CorruptArchive { path: String, reason: String },
    #[error("error while writing file {path}: {reason}")]
    StoreIo { path: String, reason: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("io error: {0}")]
    Io(String),
    #[error("config parse error: {0}")]
    ConfigParse(String),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("cli error: {0}")]
    Cli(String),
}
