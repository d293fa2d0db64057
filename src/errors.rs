//! Change Propagation Error Hierarchy
//!
//! Errors are grouped by layer: infrastructure failures (storage, network,
//! serialization), configuration failures, and dispatch protocol conditions.
//! Transient conditions are retried inside the dispatcher and the ingestor;
//! nothing here is ever surfaced on the content platform's edit path.

use std::time::Duration;

use config::ConfigError;
use tokio::task::JoinError;

use crate::ChangeId;
use crate::SiteId;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Infrastructure-level failures (network, storage, serialization)
    #[error(transparent)]
    System(#[from] SystemError),

    /// Configuration loading and validation failures
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Dispatch protocol conditions (prune conflicts, invalid input)
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// Unrecoverable failures requiring process termination
    #[error("Fatal error: {0}")]
    Fatal(String),
}

impl Error {
    /// Durable backend could not be reached. Retried with backoff.
    pub fn is_store_unavailable(&self) -> bool {
        matches!(
            self,
            Error::System(SystemError::Storage(StorageError::StoreUnavailable(_)))
        )
    }

    /// Conditions that are expected to clear on their own.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::System(SystemError::Storage(StorageError::StoreUnavailable(_))) => true,
            Error::System(SystemError::Network(e)) => !matches!(e, NetworkError::InvalidURI(_)),
            Error::System(SystemError::Timeout(_)) => true,
            Error::System(SystemError::QueueFull(_)) => true,
            _ => false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SystemError {
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Storage operation failed: {0}")]
    Storage(#[from] StorageError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] SerializationError),

    #[error("Background task failed: {0}")]
    TaskFailed(#[from] JoinError),

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// Bounded in-process queue has no free slot
    #[error("Queue {0} is full")]
    QueueFull(&'static str),

    /// Consumer side of an in-process queue is gone
    #[error("Queue {0} is closed")]
    QueueClosed(&'static str),
}

#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    /// The destination site cannot be reached at all
    #[error("Channel to site {site} unavailable: {reason}")]
    ChannelUnavailable { site: SiteId, reason: String },

    /// Transmission did not complete in time
    #[error("Transmission to {site} timed out after {duration:?}")]
    Timeout { site: SiteId, duration: Duration },

    /// No endpoint is known for the site
    #[error("No endpoint registered for site {0}")]
    UnknownSite(SiteId),

    /// Malformed endpoint address
    #[error("Invalid URI format: {0}")]
    InvalidURI(String),

    /// gRPC transport layer errors
    #[error(transparent)]
    TonicError(#[from] Box<tonic::transport::Error>),

    /// gRPC status code errors
    #[error(transparent)]
    TonicStatusError(#[from] Box<tonic::Status>),
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The durable backing cannot be reached (disk I/O failures)
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Embedded database errors other than I/O
    #[error("Embedded database error: {0}")]
    DbError(String),

    /// Stored bytes do not decode
    #[error("Data corruption detected at {location}")]
    DataCorruption { location: String },

    /// Error type for value conversion operations
    #[error("Value convert failed")]
    Convert(#[from] ConvertError),
}

#[derive(Debug, thiserror::Error)]
pub enum SerializationError {
    #[error("Bincode serialization failed: {0}")]
    Bincode(#[from] bincode::Error),
}

/// Error type for value conversion operations
#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
    /// Invalid input length error
    ///
    /// This occurs when the input byte slice length doesn't match the required 8 bytes.
    #[error("invalid byte length: expected 8 bytes, received {0} bytes")]
    InvalidLength(usize),

    /// Generic conversion failure with detailed message
    #[error("conversion failure: {0}")]
    ConversionFailure(String),
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// History below the cut line is still needed by a subscriber
    #[error("Prune before {before} refused: site {site} is still at cursor {cursor}")]
    PruneConflict {
        before: ChangeId,
        site: SiteId,
        cursor: ChangeId,
    },

    /// Entity identifiers must look like Q42, P31, L7 or M5
    #[error("Invalid entity id: {0}")]
    InvalidEntityId(String),

    /// Site identifiers must be non-empty
    #[error("Invalid site id: {0:?}")]
    InvalidSiteId(String),

    /// Diff payload version not understood by this build
    #[error("Unsupported diff payload: {0}")]
    UnsupportedDiff(String),

    /// Cursor advancement that would move a watermark backwards
    #[error("Cursor for {site} cannot move backwards from {current} to {requested}")]
    CursorRegression {
        site: SiteId,
        current: ChangeId,
        requested: ChangeId,
    },
}

// ============== Conversion Implementations ============== //
impl From<NetworkError> for Error {
    fn from(e: NetworkError) -> Self {
        Error::System(SystemError::Network(e))
    }
}

impl From<StorageError> for Error {
    fn from(e: StorageError) -> Self {
        Error::System(SystemError::Storage(e))
    }
}

impl From<ConvertError> for Error {
    fn from(e: ConvertError) -> Self {
        Error::System(SystemError::Storage(StorageError::Convert(e)))
    }
}

impl From<SerializationError> for Error {
    fn from(e: SerializationError) -> Self {
        Error::System(SystemError::Serialization(e))
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        SerializationError::Bincode(e).into()
    }
}

impl From<sled::Error> for StorageError {
    fn from(err: sled::Error) -> Self {
        match err {
            sled::Error::Io(e) => StorageError::StoreUnavailable(e.to_string()),
            sled::Error::Corruption { at, .. } => StorageError::DataCorruption {
                location: format!("{:?}", at),
            },
            other => StorageError::DbError(other.to_string()),
        }
    }
}

impl From<sled::Error> for Error {
    fn from(err: sled::Error) -> Self {
        StorageError::from(err).into()
    }
}

impl From<sled::transaction::TransactionError<Error>> for Error {
    fn from(err: sled::transaction::TransactionError<Error>) -> Self {
        match err {
            sled::transaction::TransactionError::Abort(e) => e,
            sled::transaction::TransactionError::Storage(e) => e.into(),
        }
    }
}

impl From<tonic::transport::Error> for Error {
    fn from(err: tonic::transport::Error) -> Self {
        NetworkError::TonicError(Box::new(err)).into()
    }
}

impl From<tonic::Status> for Error {
    fn from(err: tonic::Status) -> Self {
        NetworkError::TonicStatusError(Box::new(err)).into()
    }
}

impl From<JoinError> for Error {
    fn from(err: JoinError) -> Self {
        Error::System(SystemError::TaskFailed(err))
    }
}
