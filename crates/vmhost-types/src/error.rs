use thiserror::Error;

/// Errors that can occur while building or parsing core types.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TypesError {
    #[error("Invalid address format: {0}")]
    InvalidAddressFormat(String),

    #[error("Invalid address length: expected 32, got {0}")]
    InvalidAddressLength(usize),

    #[error("Invalid hash length: expected 32, got {0}")]
    InvalidHashLength(usize),

    #[error("Invalid hex: {0}")]
    InvalidHex(String),

    #[error("Bech32 error: {0}")]
    Bech32Error(String),

    #[error("Invalid code metadata length: {0}")]
    InvalidCodeMetadata(usize),

    #[error("Invalid big integer: {0}")]
    InvalidBigInt(String),

    #[error("Unknown return code: {0}")]
    UnknownReturnCode(u64),

    #[error("Unknown call type: {0}")]
    UnknownCallType(u64),
}

impl From<hex::FromHexError> for TypesError {
    fn from(e: hex::FromHexError) -> Self {
        TypesError::InvalidHex(e.to_string())
    }
}
