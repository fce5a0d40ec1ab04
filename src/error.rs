use thiserror::Error;

pub type Result<T> = std::result::Result<T, PaymentError>;

#[derive(Error, Debug)]
pub enum PaymentError {
    /// Malformed creation or operator input. Nothing was persisted.
    #[error("Validation error: {0}")]
    ValidationError(String),
    /// The gateway could not be reached, timed out, or returned an undecodable payload.
    #[error("Gateway transport error: {0}")]
    GatewayTransport(String),
    /// The gateway answered but refused the request.
    #[error("Gateway rejected request: {0}")]
    GatewayRejected(String),
    #[error("Not found: {0}")]
    NotFound(String),
    /// Optimistic write lost too many races, or a unique key already exists.
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Storage error: {0}")]
    StorageError(String),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[cfg(feature = "storage-rocksdb")]
    #[error("RocksDB error: {0}")]
    RocksDbError(#[from] rocksdb::Error),
}

impl From<serde_json::Error> for PaymentError {
    fn from(e: serde_json::Error) -> Self {
        PaymentError::StorageError(format!("Serialization error: {}", e))
    }
}
