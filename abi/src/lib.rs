//! Cell helpers, addresses and a JSON ABI codec used by the test suite.

pub use self::address::Address;
pub use self::cell::{build_bytes_chain, read_bytes_chain, Bytes, CellExt};
pub use self::codec::{
    decode_event, decode_input, decode_out_body, decode_output, encode_answer, encode_call,
    encode_constructor, encode_event, read_function_id, DecodedCall, DecodedEvent,
    DecodedHeader, ExternalHeader, OutBody,
};
pub use self::error::{AbiError, AbiResult, DecodingError, EncodingError};
pub use self::schema::{
    compute_id, event_signature, function_signature, Abi, Event, Function, HeaderField, Param,
    ABI_VERSION, CONSTRUCTOR,
};
pub use self::signer::Signer;
pub use self::value::{decode_int, AbiType, AbiValue, Params};

mod address;
mod cell;
pub mod codec;
mod error;
mod schema;
mod signer;
mod value;
