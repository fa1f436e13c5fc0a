use thiserror::Error;

/// The fatal, non-retried error conditions the core can surface.
///
/// Every variant maps to one of the error kinds enumerated in the index
/// design doc; nothing here is recovered from internally.
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("merge inputs carry non-equal configs: {0}")]
    ConfigMismatch(String),

    #[error("unknown config type: {0}")]
    UnknownConfigType(String),

    #[error("index of type {config_type} does not support the {capability} capability")]
    UnsupportedProtocol {
        config_type: &'static str,
        capability: &'static str,
    },

    #[error("key fields resolve to more than one type, or an unsupported type: {0}")]
    KeyTypeConflict(String),

    #[error("pattern expansion referenced a field that does not exist: {0}")]
    PathNotFound(String),

    #[error("bucket claims key not present in source bucket (corrupt index): {0:?}")]
    CorruptIndex(Vec<u8>),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("failed to parse index descriptor")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, IndexError>;
