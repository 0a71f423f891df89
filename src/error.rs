use std::io;

use faceline_vision::DecodeError;
use thiserror::Error;

/// Failure talking to the object store.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("object {container}/{key} not found")]
    NotFound { container: String, key: String },
    #[error("access to {container}/{key} denied")]
    PermissionDenied { container: String, key: String },
    #[error("transfer of {container}/{key} failed: {source}")]
    Io {
        container: String,
        key: String,
        #[source]
        source: io::Error,
    },
}

impl TransferError {
    pub fn from_io(container: &str, key: &str, source: io::Error) -> Self {
        let (container, key) = (container.to_string(), key.to_string());
        match source.kind() {
            io::ErrorKind::NotFound => Self::NotFound { container, key },
            io::ErrorKind::PermissionDenied => Self::PermissionDenied { container, key },
            _ => Self::Io {
                container,
                key,
                source,
            },
        }
    }
}

/// Failure handing a message to the next stage.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("dispatch io: {0}")]
    Io(#[from] io::Error),
    #[error("encoding dispatch message: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Errors whose cause may clear up on its own.
pub trait Transient {
    fn is_transient(&self) -> bool;
}

impl Transient for TransferError {
    fn is_transient(&self) -> bool {
        matches!(self, Self::Io { .. })
    }
}

impl Transient for DispatchError {
    fn is_transient(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Transfer(#[from] TransferError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("{0:#}")]
    Detection(anyhow::Error),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error("invalid event: {0}")]
    Event(String),
    #[error("reference database: {0}")]
    Reference(String),
    #[error("configuration: {0}")]
    Config(String),
}

impl PipelineError {
    /// Stable name of the failure class, used in logs and response bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transfer(_) => "TransferError",
            Self::Decode(_) => "DecodeError",
            Self::Detection(_) => "DetectionError",
            Self::Dispatch(_) => "DispatchError",
            Self::Event(_) => "EventError",
            Self::Reference(_) => "ReferenceError",
            Self::Config(_) => "ConfigError",
        }
    }
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_kinds_map_to_transfer_variants() {
        let missing = TransferError::from_io("c", "k", io::Error::from(io::ErrorKind::NotFound));
        assert!(matches!(missing, TransferError::NotFound { .. }));
        assert!(!missing.is_transient());

        let denied =
            TransferError::from_io("c", "k", io::Error::from(io::ErrorKind::PermissionDenied));
        assert!(matches!(denied, TransferError::PermissionDenied { .. }));
        assert!(!denied.is_transient());

        let flaky = TransferError::from_io("c", "k", io::Error::from(io::ErrorKind::Interrupted));
        assert!(flaky.is_transient());
    }

    #[test]
    fn kinds_are_distinct() {
        let err: PipelineError = TransferError::NotFound {
            container: "data".into(),
            key: "reference.bin".into(),
        }
        .into();
        assert_eq!(err.kind(), "TransferError");
        assert_eq!(err.to_string(), "object data/reference.bin not found");

        assert_eq!(
            PipelineError::Detection(anyhow::anyhow!("bad image")).kind(),
            "DetectionError"
        );
        assert_eq!(PipelineError::Event("x".into()).kind(), "EventError");
    }
}
