use crate::value::AbiType;

pub type AbiResult<T, E = AbiError> = ::core::result::Result<T, E>;

/// Failures while loading or validating an ABI document.
#[derive(Debug, thiserror::Error)]
pub enum AbiError {
    #[error("invalid abi json: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("unsupported abi version {0}")]
    UnsupportedVersion(u8),
    #[error("unsupported type `{ty}` of `{name}`")]
    UnsupportedType { name: String, ty: String },
    #[error("unsupported header field `{0}`")]
    UnsupportedHeader(String),
    #[error("invalid explicit id `{0}`")]
    InvalidId(String),
    #[error("{kind} id 0x{id:08x} is used twice")]
    DuplicateId { kind: &'static str, id: u32 },
    #[error("{kind} `{name}` is declared twice")]
    DuplicateName { kind: &'static str, name: String },
}

/// Failures while building a message body or parsing a typed value.
#[derive(Debug, thiserror::Error)]
pub enum EncodingError {
    #[error("unknown function `{0}`")]
    UnknownFunction(String),
    #[error("unknown event `{0}`")]
    UnknownEvent(String),
    #[error("missing parameter `{0}`")]
    MissingParam(String),
    #[error("parameter `{name}` expects {expected}, got {actual}")]
    TypeMismatch {
        name: String,
        expected: AbiType,
        actual: &'static str,
    },
    #[error("value of `{name}` does not fit into {ty}")]
    OutOfRange { name: String, ty: AbiType },
    #[error("invalid utf-8 payload: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),
    #[error("invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),
    #[error("invalid integer literal `{0}`")]
    InvalidInt(String),
    #[error("invalid address `{0}`")]
    InvalidAddress(String),
    #[error("invalid json value of `{name}`: {reason}")]
    InvalidJson { name: String, reason: String },
    #[error("invalid boc: {0}")]
    InvalidBoc(String),
    #[error("cell error: {0}")]
    Cell(#[from] everscale_types::error::Error),
}

/// Failures while reading a message body back into typed values.
#[derive(Debug, thiserror::Error)]
pub enum DecodingError {
    #[error("field `{field}` expects {expected} bits, only {actual} left")]
    NotEnoughBits {
        field: String,
        expected: u16,
        actual: u16,
    },
    #[error("field `{field}` expects a cell reference")]
    NotEnoughRefs { field: String },
    #[error("function id mismatch: expected 0x{expected:08x}, got 0x{actual:08x}")]
    IdMismatch { expected: u32, actual: u32 },
    #[error("unknown function `{0}`")]
    UnknownFunction(String),
    #[error("unknown event `{0}`")]
    UnknownEvent(String),
    #[error("no function or event with id 0x{0:08x}")]
    UnknownId(u32),
    #[error("unexpected data after `{0}`")]
    TrailingData(String),
    #[error("field `{field}` holds an invalid value: {reason}")]
    InvalidValue { field: String, reason: &'static str },
    #[error("invalid boc: {0}")]
    InvalidBoc(String),
    #[error("cell error: {0}")]
    Cell(#[from] everscale_types::error::Error),
}
