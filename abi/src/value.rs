use std::str::FromStr;

use everscale_types::prelude::*;
use num_bigint::{BigInt, BigUint, Sign};
use num_traits::ToPrimitive;
use serde_json::Value as JsonValue;

use crate::address::Address;
use crate::cell::{Bytes, CellExt};
use crate::error::EncodingError;

/// Parameter type of an ABI function or event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AbiType {
    Uint(u16),
    Int(u16),
    /// `varuint16` or `varuint32`.
    VarUint(u8),
    Bool,
    Address,
    Bytes,
    FixedBytes(u16),
    String,
    Cell,
}

impl AbiType {
    /// Upper bound of the data bits and references a value may occupy.
    pub const fn max_size(&self) -> (u16, u8) {
        match self {
            Self::Uint(bits) | Self::Int(bits) => (*bits, 0),
            Self::VarUint(size) => {
                let (len_bits, _) = var_uint_layout(*size);
                (len_bits + (*size as u16 - 1) * 8, 0)
            }
            Self::Bool => (1, 0),
            Self::Address => (Address::STD_BITS, 0),
            Self::FixedBytes(len) => (*len * 8, 0),
            Self::Bytes | Self::String | Self::Cell => (0, 1),
        }
    }
}

/// Returns the length prefix bits and max payload bytes of a `varuintN`.
pub(crate) const fn var_uint_layout(size: u8) -> (u16, u8) {
    let len_bits = 8 - (size - 1).leading_zeros() as u16;
    (len_bits, size - 1)
}

impl std::fmt::Display for AbiType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Uint(bits) => write!(f, "uint{bits}"),
            Self::Int(bits) => write!(f, "int{bits}"),
            Self::VarUint(size) => write!(f, "varuint{size}"),
            Self::Bool => f.write_str("bool"),
            Self::Address => f.write_str("address"),
            Self::Bytes => f.write_str("bytes"),
            Self::FixedBytes(len) => write!(f, "fixedbytes{len}"),
            Self::String => f.write_str("string"),
            Self::Cell => f.write_str("cell"),
        }
    }
}

impl FromStr for AbiType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        fn sized(s: &str, prefix: &str) -> Option<u16> {
            s.strip_prefix(prefix)?.parse::<u16>().ok()
        }

        Ok(match s {
            "bool" => Self::Bool,
            "address" => Self::Address,
            "bytes" => Self::Bytes,
            "string" => Self::String,
            "cell" => Self::Cell,
            "varuint16" => Self::VarUint(16),
            "varuint32" => Self::VarUint(32),
            _ => {
                if let Some(bits) = sized(s, "uint") {
                    if !(1..=256).contains(&bits) {
                        return Err(());
                    }
                    Self::Uint(bits)
                } else if let Some(bits) = sized(s, "int") {
                    if !(1..=256).contains(&bits) {
                        return Err(());
                    }
                    Self::Int(bits)
                } else if let Some(len) = sized(s, "fixedbytes") {
                    if !(1..=32).contains(&len) {
                        return Err(());
                    }
                    Self::FixedBytes(len)
                } else {
                    return Err(());
                }
            }
        })
    }
}

/// Typed ABI value.
#[derive(Debug, Clone, PartialEq)]
pub enum AbiValue {
    Int(BigInt),
    Bool(bool),
    Address(Address),
    Bytes(Bytes),
    String(String),
    Cell(Cell),
}

impl AbiValue {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Int(_) => "integer",
            Self::Bool(_) => "bool",
            Self::Address(_) => "address",
            Self::Bytes(_) => "bytes",
            Self::String(_) => "string",
            Self::Cell(_) => "cell",
        }
    }

    pub fn as_int(&self) -> Option<&BigInt> {
        match self {
            Self::Int(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        self.as_int()?.to_u64()
    }

    pub fn as_u128(&self) -> Option<u128> {
        self.as_int()?.to_u128()
    }

    pub fn as_i64(&self) -> Option<i64> {
        self.as_int()?.to_i64()
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_address(&self) -> Option<&Address> {
        match self {
            Self::Address(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Self::Bytes(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_cell(&self) -> Option<&Cell> {
        match self {
            Self::Cell(value) => Some(value),
            _ => None,
        }
    }

    /// JSON view used by dumps. Integers become decimal strings,
    /// bytes become hex and cells become base64 BOC.
    pub fn to_json(&self) -> JsonValue {
        match self {
            Self::Int(value) => JsonValue::String(value.to_string()),
            Self::Bool(value) => JsonValue::Bool(*value),
            Self::Address(value) => JsonValue::String(value.to_string()),
            Self::Bytes(value) => JsonValue::String(value.to_hex()),
            Self::String(value) => JsonValue::String(value.clone()),
            Self::Cell(value) => JsonValue::String(value.to_boc_base64()),
        }
    }

    /// Parses a JSON value according to the declared type.
    pub fn from_json(name: &str, ty: AbiType, json: &JsonValue) -> Result<Self, EncodingError> {
        let invalid = |reason: &str| EncodingError::InvalidJson {
            name: name.to_owned(),
            reason: reason.to_owned(),
        };

        Ok(match ty {
            AbiType::Uint(_) | AbiType::Int(_) | AbiType::VarUint(_) => match json {
                JsonValue::Number(n) => match (n.as_u64(), n.as_i64()) {
                    (Some(n), _) => Self::Int(BigInt::from(n)),
                    (None, Some(n)) => Self::Int(BigInt::from(n)),
                    _ => return Err(invalid("expected an integer")),
                },
                JsonValue::String(s) => Self::Int(decode_int(s)?),
                _ => return Err(invalid("expected an integer")),
            },
            AbiType::Bool => match json {
                JsonValue::Bool(value) => Self::Bool(*value),
                _ => return Err(invalid("expected a bool")),
            },
            AbiType::Address => match json {
                JsonValue::String(s) => Self::Address(s.parse()?),
                _ => return Err(invalid("expected an address string")),
            },
            AbiType::Bytes | AbiType::FixedBytes(_) => match json {
                JsonValue::String(s) => Self::Bytes(Bytes::from_hex(s)?),
                _ => return Err(invalid("expected a hex string")),
            },
            AbiType::String => match json {
                JsonValue::String(s) => Self::String(s.clone()),
                _ => return Err(invalid("expected a string")),
            },
            AbiType::Cell => match json {
                JsonValue::String(s) => Self::Cell(
                    Cell::from_boc_base64(s).map_err(|e| invalid(&e.to_string()))?,
                ),
                _ => return Err(invalid("expected a base64 boc")),
            },
        })
    }
}

macro_rules! impl_int_value {
    ($($ty:ty),*$(,)?) => {$(
        impl From<$ty> for AbiValue {
            #[inline]
            fn from(value: $ty) -> Self {
                Self::Int(BigInt::from(value))
            }
        }
    )*};
}

impl_int_value!(u8, u16, u32, u64, u128, i8, i16, i32, i64, i128);

impl From<BigInt> for AbiValue {
    fn from(value: BigInt) -> Self {
        Self::Int(value)
    }
}

impl From<BigUint> for AbiValue {
    fn from(value: BigUint) -> Self {
        Self::Int(BigInt::from_biguint(Sign::Plus, value))
    }
}

impl From<bool> for AbiValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<Address> for AbiValue {
    fn from(value: Address) -> Self {
        Self::Address(value)
    }
}

impl From<Bytes> for AbiValue {
    fn from(value: Bytes) -> Self {
        Self::Bytes(value)
    }
}

impl From<&str> for AbiValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<String> for AbiValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<Cell> for AbiValue {
    fn from(value: Cell) -> Self {
        Self::Cell(value)
    }
}

/// Named values in declaration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params(Vec<(String, AbiValue)>);

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with<V: Into<AbiValue>>(mut self, name: &str, value: V) -> Self {
        self.insert(name, value);
        self
    }

    /// Inserts a value, replacing the previous one with the same name.
    pub fn insert<V: Into<AbiValue>>(&mut self, name: &str, value: V) {
        let value = value.into();
        match self.0.iter_mut().find(|(n, _)| n == name) {
            Some((_, slot)) => *slot = value,
            None => self.0.push((name.to_owned(), value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&AbiValue> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AbiValue)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn into_inner(self) -> Vec<(String, AbiValue)> {
        self.0
    }

    pub fn to_json(&self) -> JsonValue {
        let map = self
            .0
            .iter()
            .map(|(name, value)| (name.clone(), value.to_json()))
            .collect::<serde_json::Map<_, _>>();
        JsonValue::Object(map)
    }

    /// Parses a JSON object following the declared parameter list.
    pub fn from_json(params: &[crate::Param], json: &JsonValue) -> Result<Self, EncodingError> {
        let JsonValue::Object(map) = json else {
            return Err(EncodingError::InvalidJson {
                name: String::new(),
                reason: "expected an object".to_owned(),
            });
        };

        let mut result = Vec::with_capacity(params.len());
        for param in params {
            let value = map
                .get(&param.name)
                .ok_or_else(|| EncodingError::MissingParam(param.name.clone()))?;
            result.push((
                param.name.clone(),
                AbiValue::from_json(&param.name, param.ty, value)?,
            ));
        }
        Ok(Self(result))
    }
}

impl<K: Into<String>, V: Into<AbiValue>> FromIterator<(K, V)> for Params {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut params = Self::new();
        for (name, value) in iter {
            params.insert(&name.into(), value);
        }
        params
    }
}

/// Parses a decimal or `0x`-prefixed hex integer, optionally negative.
pub fn decode_int(s: &str) -> Result<BigInt, EncodingError> {
    let invalid = || EncodingError::InvalidInt(s.to_owned());

    let trimmed = s.trim();
    let (negative, digits) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed),
    };

    if digits.starts_with(['+', '-']) {
        return Err(invalid());
    }

    let value = match digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        Some(hex) => BigInt::parse_bytes(hex.as_bytes(), 16),
        None => BigInt::parse_bytes(digits.as_bytes(), 10),
    }
    .ok_or_else(invalid)?;

    Ok(if negative { -value } else { value })
}
