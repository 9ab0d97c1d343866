use sled::transaction::TransactionError;
use thiserror::Error;

/// Errors that can arise while interacting with the market store and its procedures.
#[derive(Debug, Error)]
pub enum MarketError {
    /// Wrapper around sled's error type.
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    /// Wrapper around bincode serialization and deserialization errors.
    #[error("serialization error: {0}")]
    Bincode(#[from] bincode::Error),

    /// Wrapper around IO errors (directory creation, etc.).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Returned when a procedure targets a record that is not present.
    #[error("record not found: {0}")]
    NotFound(String),

    /// Returned when deserializing a record with an unexpected schema version.
    #[error("schema mismatch for {entity}: expected {expected}, got {found}")]
    SchemaMismatch {
        entity: &'static str,
        expected: u8,
        found: u8,
    },

    /// Malformed crowns/pennies amount
    #[error("invalid currency: {0}")]
    InvalidCurrency(String),

    /// Buyer balance is below the listing price
    #[error("insufficient funds")]
    InsufficientFunds,

    /// User input rejected before any mutation
    #[error("{0}")]
    Validation(String),

    /// Listing requires a permit the buyer does not hold
    #[error("a {0} permit is required")]
    PermitRequired(String),

    /// Caller may not act on this record
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// User already has a character that is neither retired nor dead
    #[error("an active character already exists for {0}")]
    ActiveCharacterExists(String),

    /// Internal error (poisoned locks, unexpected conditions)
    #[error("internal error: {0}")]
    Internal(String),
}

impl MarketError {
    /// Message shown to the player when a flow fails.
    pub fn user_message(&self) -> String {
        match self {
            MarketError::InsufficientFunds => "You cannot afford this item.".to_string(),
            MarketError::Validation(msg) => msg.clone(),
            MarketError::NotFound(what) => format!("Not found: {}", what),
            other => other.to_string(),
        }
    }
}

impl From<TransactionError<MarketError>> for MarketError {
    fn from(err: TransactionError<MarketError>) -> Self {
        match err {
            TransactionError::Abort(e) => e,
            TransactionError::Storage(e) => MarketError::Sled(e),
        }
    }
}
