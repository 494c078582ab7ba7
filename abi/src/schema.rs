use std::sync::Arc;

use ahash::HashMap;
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::error::{AbiError, AbiResult};
use crate::value::AbiType;

/// Supported major ABI version.
pub const ABI_VERSION: u8 = 2;

/// Name of the constructor function.
pub const CONSTRUCTOR: &str = "constructor";

/// Named and typed parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub name: String,
    pub ty: AbiType,
}

impl Param {
    pub fn new(name: &str, ty: AbiType) -> Self {
        Self {
            name: name.to_owned(),
            ty,
        }
    }
}

/// Header field of an external inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderField {
    /// Optional 256-bit public key.
    PubKey,
    /// 64-bit timestamp in milliseconds.
    Time,
    /// 32-bit expiration time in seconds.
    Expire,
}

#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    pub inputs: Vec<Param>,
    pub outputs: Vec<Param>,
    /// Id of an inbound call body (high bit cleared).
    pub input_id: u32,
    /// Id of an answer body (high bit set).
    pub output_id: u32,
}

#[derive(Debug, Clone)]
pub struct Event {
    pub name: String,
    pub inputs: Vec<Param>,
    pub id: u32,
}

/// Parsed contract ABI with id lookup tables.
#[derive(Debug)]
pub struct Abi {
    name: String,
    header: Vec<HeaderField>,
    functions: Vec<Function>,
    events: Vec<Event>,
    functions_by_name: HashMap<String, usize>,
    functions_by_input_id: HashMap<u32, usize>,
    functions_by_output_id: HashMap<u32, usize>,
    events_by_id: HashMap<u32, usize>,
}

impl Abi {
    /// Parses an ABI json document.
    pub fn from_json(name: &str, json: &str) -> AbiResult<Self> {
        let raw = serde_json::from_str::<RawAbi>(json)?;
        Self::from_raw(name, raw)
    }

    pub fn from_value(name: &str, json: serde_json::Value) -> AbiResult<Self> {
        let raw = serde_json::from_value::<RawAbi>(json)?;
        Self::from_raw(name, raw)
    }

    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    fn from_raw(name: &str, raw: RawAbi) -> AbiResult<Self> {
        if raw.abi_version != ABI_VERSION {
            return Err(AbiError::UnsupportedVersion(raw.abi_version));
        }

        let header = raw
            .header
            .iter()
            .map(|field| match field.as_str() {
                "pubkey" => Ok(HeaderField::PubKey),
                "time" => Ok(HeaderField::Time),
                "expire" => Ok(HeaderField::Expire),
                other => Err(AbiError::UnsupportedHeader(other.to_owned())),
            })
            .collect::<AbiResult<Vec<_>>>()?;

        let mut abi = Self {
            name: name.to_owned(),
            header,
            functions: Vec::with_capacity(raw.functions.len()),
            events: Vec::with_capacity(raw.events.len()),
            functions_by_name: Default::default(),
            functions_by_input_id: Default::default(),
            functions_by_output_id: Default::default(),
            events_by_id: Default::default(),
        };

        for raw in raw.functions {
            let inputs = parse_params(&raw.inputs)?;
            let outputs = parse_params(&raw.outputs)?;
            let id = match &raw.id {
                Some(id) => parse_explicit_id(id)?,
                None => compute_id(&function_signature(&raw.name, &inputs, &outputs)),
            };

            let index = abi.functions.len();
            let input_id = id & !OUTPUT_BIT;
            let output_id = id | OUTPUT_BIT;
            if abi.functions_by_input_id.insert(input_id, index).is_some() {
                return Err(AbiError::DuplicateId {
                    kind: "function",
                    id: input_id,
                });
            }
            if abi.functions_by_name.insert(raw.name.clone(), index).is_some() {
                return Err(AbiError::DuplicateName {
                    kind: "function",
                    name: raw.name,
                });
            }
            abi.functions_by_output_id.insert(output_id, index);
            abi.functions.push(Function {
                name: raw.name,
                inputs,
                outputs,
                input_id,
                output_id,
            });
        }

        for raw in raw.events {
            let inputs = parse_params(&raw.inputs)?;
            let id = match &raw.id {
                Some(id) => parse_explicit_id(id)?,
                None => compute_id(&event_signature(&raw.name, &inputs)),
            } & !OUTPUT_BIT;

            let index = abi.events.len();
            if abi.events_by_id.insert(id, index).is_some() {
                return Err(AbiError::DuplicateId { kind: "event", id });
            }
            abi.events.push(Event {
                name: raw.name,
                inputs,
                id,
            });
        }

        Ok(abi)
    }

    /// Contract name this ABI was loaded for.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn header(&self) -> &[HeaderField] {
        &self.header
    }

    pub fn has_header(&self, field: HeaderField) -> bool {
        self.header.contains(&field)
    }

    pub fn functions(&self) -> &[Function] {
        &self.functions
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn function(&self, name: &str) -> Option<&Function> {
        let index = *self.functions_by_name.get(name)?;
        self.functions.get(index)
    }

    pub fn function_by_input_id(&self, id: u32) -> Option<&Function> {
        let index = *self.functions_by_input_id.get(&id)?;
        self.functions.get(index)
    }

    pub fn function_by_output_id(&self, id: u32) -> Option<&Function> {
        let index = *self.functions_by_output_id.get(&id)?;
        self.functions.get(index)
    }

    pub fn event(&self, name: &str) -> Option<&Event> {
        self.events.iter().find(|event| event.name == name)
    }

    pub fn event_by_id(&self, id: u32) -> Option<&Event> {
        let index = *self.events_by_id.get(&id)?;
        self.events.get(index)
    }
}

const OUTPUT_BIT: u32 = 0x8000_0000;

fn parse_params(raw: &[RawParam]) -> AbiResult<Vec<Param>> {
    raw.iter()
        .map(|param| {
            let ty = param
                .ty
                .parse::<AbiType>()
                .map_err(|()| AbiError::UnsupportedType {
                    name: param.name.clone(),
                    ty: param.ty.clone(),
                })?;
            Ok(Param {
                name: param.name.clone(),
                ty,
            })
        })
        .collect()
}

fn parse_explicit_id(id: &str) -> AbiResult<u32> {
    let hex = id.strip_prefix("0x").unwrap_or(id);
    u32::from_str_radix(hex, 16).map_err(|_| AbiError::InvalidId(id.to_owned()))
}

fn join_types(params: &[Param]) -> String {
    params
        .iter()
        .map(|param| param.ty.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// `name(inputs)(outputs)v2`
pub fn function_signature(name: &str, inputs: &[Param], outputs: &[Param]) -> String {
    format!(
        "{name}({})({})v{ABI_VERSION}",
        join_types(inputs),
        join_types(outputs)
    )
}

/// `name(inputs)v2`
pub fn event_signature(name: &str, inputs: &[Param]) -> String {
    format!("{name}({})v{ABI_VERSION}", join_types(inputs))
}

/// First four bytes of the signature hash.
pub fn compute_id(signature: &str) -> u32 {
    let hash = Sha256::digest(signature.as_bytes());
    u32::from_be_bytes([hash[0], hash[1], hash[2], hash[3]])
}

#[derive(Deserialize)]
struct RawAbi {
    #[serde(rename = "ABI version")]
    abi_version: u8,
    #[serde(default)]
    header: Vec<String>,
    #[serde(default)]
    functions: Vec<RawFunction>,
    #[serde(default)]
    events: Vec<RawEvent>,
}

#[derive(Deserialize)]
struct RawFunction {
    name: String,
    #[serde(default)]
    inputs: Vec<RawParam>,
    #[serde(default)]
    outputs: Vec<RawParam>,
    #[serde(default)]
    id: Option<String>,
}

#[derive(Deserialize)]
struct RawEvent {
    name: String,
    #[serde(default)]
    inputs: Vec<RawParam>,
    #[serde(default)]
    id: Option<String>,
}

#[derive(Deserialize)]
struct RawParam {
    name: String,
    #[serde(rename = "type")]
    ty: String,
}
