use everscale_types::error::Error;
use everscale_types::num::Tokens;
use everscale_types::prelude::*;
use serde::Serialize;
use serde_json::Value as JsonValue;
use tycho_testsuite_abi::codec::{store_address, store_grams};
use tycho_testsuite_abi::{Address, CellExt, Params};

use crate::registry::ContractImage;

pub type MessageId = u64;

/// Leading 32 bits of a bounced message body.
pub const BOUNCE_PREFIX: u32 = 0xffffffff;

/// Max number of original body bits kept in a bounced message.
pub const BOUNCE_BODY_BITS: u16 = 256;

/// Message classification assigned when the message is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Inbound external call made by the driver.
    ExternalCall,
    /// Internal message with a body known to the destination ABI.
    InternalCall,
    /// External outbound answer to a call.
    Answer,
    /// External outbound event.
    Event,
    /// Internal message carrying a bounced body.
    Bounced,
    /// Internal message without a body.
    Empty,
    /// Anything that could not be decoded.
    Unknown,
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::ExternalCall => "external_call",
            Self::InternalCall => "internal_call",
            Self::Answer => "answer",
            Self::Event => "event",
            Self::Bounced => "bounced",
            Self::Empty => "empty",
            Self::Unknown => "unknown",
        })
    }
}

/// Logical view of a message body.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedBody {
    /// Function or event name.
    pub name: String,
    pub params: Params,
}

/// Immutable message record.
#[derive(Debug, Clone)]
pub struct Message {
    pub id: MessageId,
    pub kind: MessageKind,
    pub src: Address,
    /// [`Address::None`] for external outbound messages.
    pub dst: Address,
    pub value: Tokens,
    pub bounce: bool,
    pub bounced: bool,
    pub body: Cell,
    /// Deploys the destination when it does not exist yet.
    pub init: Option<ContractImage>,
    pub created_lt: u64,
    pub created_at: u32,
    pub decoded: Option<DecodedBody>,
}

impl Message {
    pub fn is_external_in(&self) -> bool {
        self.kind == MessageKind::ExternalCall
    }

    pub fn is_external_out(&self) -> bool {
        self.dst.is_none() && !self.is_external_in()
    }

    pub fn is_internal(&self) -> bool {
        !self.src.is_none() && !self.dst.is_none()
    }

    /// Function, event or bounced function name.
    pub fn name(&self) -> Option<&str> {
        self.decoded.as_ref().map(|body| body.name.as_str())
    }

    pub fn params(&self) -> Option<&Params> {
        self.decoded.as_ref().map(|body| &body.params)
    }

    /// Serializes the message as a `Message Any` cell.
    pub fn build_cell(&self) -> Result<Cell, Error> {
        let mut b = CellBuilder::new();
        if self.is_external_in() {
            // ext_in_msg_info$10 src:addr_none dest import_fee:0
            b.store_bit_one()?;
            b.store_bit_zero()?;
            store_address(&mut b, &Address::None)?;
            store_address(&mut b, &self.dst)?;
            store_grams(&mut b, 0)?;
        } else if self.dst.is_none() {
            // ext_out_msg_info$11 src dest:addr_none created_lt created_at
            b.store_bit_one()?;
            b.store_bit_one()?;
            store_address(&mut b, &self.src)?;
            store_address(&mut b, &Address::None)?;
            b.store_u64(self.created_lt)?;
            b.store_u32(self.created_at)?;
        } else {
            // int_msg_info$0 ihr_disabled bounce bounced src dest
            b.store_bit_zero()?;
            b.store_bit_one()?;
            b.store_bit(self.bounce)?;
            b.store_bit(self.bounced)?;
            store_address(&mut b, &self.src)?;
            store_address(&mut b, &self.dst)?;
            // value:(grams, no extra currencies) ihr_fee fwd_fee
            store_grams(&mut b, self.value.into_inner())?;
            b.store_bit_zero()?;
            store_grams(&mut b, 0)?;
            store_grams(&mut b, 0)?;
            b.store_u64(self.created_lt)?;
            b.store_u32(self.created_at)?;
        }

        match &self.init {
            Some(image) => {
                b.store_bit_one()?;
                b.store_bit_one()?;
                b.store_reference(image.to_cell()?)?;
            }
            None => b.store_bit_zero()?,
        }

        b.store_bit_one()?;
        b.store_reference(self.body.clone())?;
        b.build()
    }

    pub fn to_json(&self) -> JsonValue {
        serde_json::json!({
            "id": self.id,
            "kind": self.kind,
            "src": self.src,
            "dst": self.dst,
            "value": self.value.into_inner().to_string(),
            "bounce": self.bounce,
            "bounced": self.bounced,
            "deploy": self.init.is_some(),
            "name": self.name(),
            "params": self.params().map(Params::to_json),
            "body": self.body.to_boc_base64(),
        })
    }
}

impl std::fmt::Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "#{} {} {} -> {} value={}",
            self.id,
            self.kind,
            self.src,
            self.dst,
            self.value.into_inner()
        )?;
        if let Some(name) = self.name() {
            write!(f, " `{name}`")?;
        }
        Ok(())
    }
}

/// Builds a bounced body: the bounce prefix and up to 256 bits of the
/// original body root.
pub fn make_bounce_body(body: &DynCell) -> Result<Cell, Error> {
    let mut b = CellBuilder::new();
    b.store_u32(BOUNCE_PREFIX)?;
    b.store_raw(body.data(), body.bit_len().min(BOUNCE_BODY_BITS))?;
    b.build()
}

/// Function id of the message that bounced.
pub fn bounced_function_id(body: &DynCell) -> Option<u32> {
    let mut slice = body.as_slice().ok()?;
    if slice.load_u32().ok()? != BOUNCE_PREFIX {
        return None;
    }
    slice.load_u32().ok()
}
