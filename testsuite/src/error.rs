use tycho_testsuite_abi::{AbiError, Address, DecodingError, EncodingError};

use crate::message::MessageId;

/// Harness result.
pub type HarnessResult<T, E = HarnessError> = ::core::result::Result<T, E>;

/// Harness error.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("contract {0} is already deployed")]
    DuplicateAddress(Address),
    #[error("nickname `{name}` is already bound to {address}")]
    DuplicateNickname { name: String, address: Address },
    #[error("unknown address {0}")]
    UnknownAddress(Address),
    #[error("unknown nickname `{0}`")]
    UnknownNickname(String),
    #[error("message #{id} targets unknown address {address}")]
    UnknownDestination { id: MessageId, address: Address },
    #[error("contract {0} has no abi")]
    MissingAbi(Address),
    #[error("queue index {index} is out of range (len {len})")]
    OutOfRange { index: usize, len: usize },
    #[error("queue still holds {0} messages")]
    QueueNotEmpty(usize),
    #[error("constructor of {address} failed with exit code {exit_code}")]
    ConstructorFailed { address: Address, exit_code: i32 },
    #[error("call `{method}` on {address} failed with exit code {exit_code}")]
    CallFailed {
        address: Address,
        method: String,
        exit_code: i32,
        exit_arg: Option<i32>,
    },
    #[error("external message to {address} was not accepted")]
    NotAccepted { address: Address },
    #[error("getter `{method}` of {address} produced no answer")]
    NoAnswer { address: Address, method: String },
    #[error("balance overflow on {0}")]
    BalanceOverflow(Address),
    #[error("{0} overflows the session ledger")]
    LedgerOverflow(&'static str),
    #[error("bridge failed on message #{id:?}: {source}")]
    Bridge {
        id: Option<MessageId>,
        #[source]
        source: anyhow::Error,
    },
    #[error("failed to load artifact `{name}`")]
    Artifact {
        name: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("invalid abi")]
    Abi(#[from] AbiError),
    #[error("failed to encode message body")]
    Encoding(#[from] EncodingError),
    #[error("failed to decode message body")]
    Decoding(#[from] DecodingError),
    #[error("fatal error")]
    Fatal(#[from] anyhow::Error),
}

impl From<everscale_types::error::Error> for HarnessError {
    #[inline]
    fn from(value: everscale_types::error::Error) -> Self {
        Self::Fatal(anyhow::Error::from(value))
    }
}
