use crate::query::QueryType;

/// An error encountered while building, validating or (de)serializing a query or a response.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("unexpected end of input: needed {needed} more bytes while reading {field}")]
    Truncated { field: &'static str, needed: usize },
    #[error("{0} trailing bytes after end of message")]
    TrailingBytes(usize),
    #[error("unsupported message version: {0}")]
    UnsupportedVersion(u8),
    #[error("unsupported query type: {0}")]
    UnsupportedQueryType(u8),
    #[error("unsupported request type: {0}")]
    UnsupportedRequestType(u8),
    #[error("request does not contain any per chain queries")]
    NoQueries,
    #[error("too many {what}: {count} (maximum is {max})")]
    TooMany {
        what: &'static str,
        count: usize,
        max: usize,
    },
    #[error("per chain query {index} is invalid: {reason}")]
    InvalidQuery { index: usize, reason: String },
    #[error("field {field} is not valid UTF-8")]
    InvalidUtf8 { field: &'static str },
    #[error("invalid signature length: {0} (expected 65)")]
    InvalidSignatureLength(usize),
}

/// A problem with key material. These are setup errors: nothing can be sent without a usable key.
#[derive(thiserror::Error, Debug)]
pub enum KeyError {
    #[error("invalid key length: {0} (expected 32)")]
    InvalidLength(usize),
    #[error("key bytes are all zero")]
    Zero,
    #[error("key is not a valid secp256k1 scalar")]
    OutOfRange,
    #[error("key is not valid hex: {0}")]
    Hex(#[from] hex::FromHexError),
    #[error("failed to read key file {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        source: std::io::Error,
    },
    #[error("failed to sign digest: {0}")]
    Signing(k256::ecdsa::Error),
    #[error("invalid recoverable signature: {0}")]
    InvalidSignature(String),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The subscription (or the host behind it) is gone. No further messages will arrive.
    #[error("subscription closed")]
    Closed,
    #[error("failed to publish to {topic}: {reason}")]
    Publish { topic: String, reason: String },
    #[error("failed to subscribe to {topic}: {reason}")]
    Subscribe { topic: String, reason: String },
}

/// A correlated response did not structurally correspond to the request it claims to answer.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum VerificationError {
    #[error("unexpected number of per chain query responses: expected {expected}, got {actual}")]
    ResponseCountMismatch { expected: usize, actual: usize },
    #[error("per chain response {index} has type {actual} but the query has type {expected}")]
    VariantMismatch {
        index: usize,
        expected: QueryType,
        actual: QueryType,
    },
    #[error("per chain response {index} has {actual} results but the query has {expected} calls")]
    ResultCountMismatch {
        index: usize,
        expected: usize,
        actual: usize,
    },
}

/// Why an exchange ended without a verified response.
#[derive(thiserror::Error, Debug)]
pub enum CorrelationError {
    #[error("failed to encode request: {0}")]
    Encode(#[from] QueryError),
    #[error("failed to sign request: {0}")]
    Signing(#[from] KeyError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("no matching response within {0:?}")]
    TimedOut(std::time::Duration),
    #[error("exchange cancelled")]
    Cancelled,
}
