//! # Error Taxonomy
//!
//! Every error the core can surface to a caller maps onto one of the stable
//! numeric codes from the wire protocol. `CoreError` is the single error type
//! shared by storage, codec, and command-processing code; `Response` is built
//! from it by reading `code()`.

use thiserror::Error;

/// Stable numeric error codes carried on the wire in `Response::error_code`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ErrorCode {
    InvalidRequest = 100,
    NotFound = 101,
    PayloadTooLarge = 102,
    Timeout = 103,
    RangeOverflow = 104,
    InvalidType = 105,
    Internal = 500,
}

impl ErrorCode {
    pub fn as_u16(self) -> u16 {
        self as u16
    }
}

/// Core error type. Validation and limit errors are synchronous and never
/// retried by the core (§7); transport errors surface through the correlator
/// as `CoreError::Timeout` instead of propagating here.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("key not found")]
    NotFound,

    #[error("payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("operation timed out")]
    Timeout,

    #[error("numeric range overflow")]
    RangeOverflow,

    #[error("value is not a valid number")]
    InvalidType,

    #[error("internal error: {0}")]
    Internal(String),

    #[error("CBOR payload too large ({actual} bytes, limit {limit})")]
    CborPayloadTooLarge { actual: usize, limit: usize },

    #[error("CBOR decode error: {0}")]
    CborDecode(String),

    #[error("CBOR encode error: {0}")]
    CborEncode(String),
}

impl CoreError {
    /// The stable numeric code to place on the wire.
    pub fn code(&self) -> ErrorCode {
        match self {
            CoreError::InvalidRequest(_) => ErrorCode::InvalidRequest,
            CoreError::NotFound => ErrorCode::NotFound,
            CoreError::PayloadTooLarge(_) => ErrorCode::PayloadTooLarge,
            CoreError::Timeout => ErrorCode::Timeout,
            CoreError::RangeOverflow => ErrorCode::RangeOverflow,
            CoreError::InvalidType => ErrorCode::InvalidType,
            CoreError::Internal(_)
            | CoreError::CborPayloadTooLarge { .. }
            | CoreError::CborDecode(_)
            | CoreError::CborEncode(_) => ErrorCode::Internal,
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
