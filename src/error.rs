use thiserror::Error;

use crate::vacuum::fields::Field;

/// Failures talking to the device session.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("dp query failed: {0}")]
    Query(String),

    #[error("send failed: {0}")]
    Send(String),

    #[error("device session is not running")]
    ChannelClosed,

    #[error("no reply from device after {0} ms")]
    Timeout(u64),

    #[error("status payload has no dps object")]
    MissingDps,
}

/// A raw `(code, value)` pair that could not be turned into a typed value.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unknown field code {0}")]
    UnknownField(String),

    #[error("unknown value {value} for {field:?}")]
    UnknownValue { field: Field, value: String },
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CommandError {
    /// The argument is not a member of the field's value domain.
    #[error("invalid value '{value}' for {field:?}")]
    InvalidValue { field: Field, value: String },

    #[error(transparent)]
    Transport(#[from] TransportError),
}
