//! Message body layout.
//!
//! Values are packed into the root cell in declaration order. Before each
//! value the writer checks whether its worst-case size still fits next to
//! one reserved reference. If not, a fresh cell is started and linked as
//! the last reference of the previous one. The reader mirrors the same
//! rule, so both sides always agree on where continuation cells begin.

use everscale_types::cell::CellSlice;
use everscale_types::error::Error;
use everscale_types::prelude::*;
use num_bigint::{BigInt, BigUint, Sign};
use num_traits::One;

use crate::address::Address;
use crate::cell::{build_bytes_chain, read_bytes_chain, Bytes};
use crate::error::{DecodingError, EncodingError};
use crate::schema::{Abi, HeaderField, Param, CONSTRUCTOR};
use crate::signer::Signer;
use crate::value::{var_uint_layout, AbiType, AbiValue, Params};

const MAX_BITS: u16 = 1023;
const MAX_REFS: u8 = 4;

/// Maybe-bit plus a 512-bit ed25519 signature.
pub const SIGNATURE_BITS: u16 = 1 + 512;

/// Values of the external message header.
#[derive(Debug, Clone, Default)]
pub struct ExternalHeader {
    /// Milliseconds.
    pub time: u64,
    /// Seconds.
    pub expire: u32,
    /// Signs the body and fills the `pubkey` header field.
    pub signer: Option<Signer>,
}

/// Header read back from an external body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedHeader {
    pub signature: Option<Vec<u8>>,
    pub pubkey: Option<HashBytes>,
    pub time: Option<u64>,
    pub expire: Option<u32>,
}

/// Decoded inbound call.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedCall {
    pub function: String,
    pub params: Params,
    pub header: Option<DecodedHeader>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DecodedEvent {
    Known { name: String, fields: Params },
    /// Id is not present in the ABI.
    Unknown { id: u32 },
}

/// Decoded external outbound body.
#[derive(Debug, Clone, PartialEq)]
pub enum OutBody {
    Answer { function: String, params: Params },
    Event { name: String, fields: Params },
    Unknown { id: Option<u32> },
}

/// Builds a call body. A `header` switches to the external layout.
pub fn encode_call(
    abi: &Abi,
    method: &str,
    params: &Params,
    header: Option<&ExternalHeader>,
) -> Result<Cell, EncodingError> {
    let function = abi
        .function(method)
        .ok_or_else(|| EncodingError::UnknownFunction(method.to_owned()))?;
    let values = collect_values(&function.inputs, params)?;

    let Some(header) = header else {
        let mut writer = BodyWriter::new();
        writer.store_u32(function.input_id)?;
        writer.store_values(&values)?;
        return writer.finish();
    };

    let build = |slot: SignatureSlot<'_>| -> Result<Cell, EncodingError> {
        let mut writer = BodyWriter::new();
        writer.store_signature(slot)?;
        writer.store_header(abi.header(), header)?;
        writer.store_u32(function.input_id)?;
        writer.store_values(&values)?;
        writer.finish()
    };

    match &header.signer {
        Some(signer) => {
            let unsigned = build(SignatureSlot::Omit)?;
            let signature = signer.sign_cell(unsigned.as_ref());
            build(SignatureSlot::Present(&signature))
        }
        None => build(SignatureSlot::Empty),
    }
}

pub fn encode_constructor(
    abi: &Abi,
    params: &Params,
    header: Option<&ExternalHeader>,
) -> Result<Cell, EncodingError> {
    encode_call(abi, CONSTRUCTOR, params, header)
}

/// Builds an answer body with the output id of `method`.
pub fn encode_answer(abi: &Abi, method: &str, outputs: &Params) -> Result<Cell, EncodingError> {
    let function = abi
        .function(method)
        .ok_or_else(|| EncodingError::UnknownFunction(method.to_owned()))?;
    let values = collect_values(&function.outputs, outputs)?;

    let mut writer = BodyWriter::new();
    writer.store_u32(function.output_id)?;
    writer.store_values(&values)?;
    writer.finish()
}

pub fn encode_event(abi: &Abi, name: &str, fields: &Params) -> Result<Cell, EncodingError> {
    let event = abi
        .event(name)
        .ok_or_else(|| EncodingError::UnknownEvent(name.to_owned()))?;
    let values = collect_values(&event.inputs, fields)?;

    let mut writer = BodyWriter::new();
    writer.store_u32(event.id)?;
    writer.store_values(&values)?;
    writer.finish()
}

/// Decodes an answer of `method`.
pub fn decode_output(abi: &Abi, method: &str, body: &DynCell) -> Result<Params, DecodingError> {
    let function = abi
        .function(method)
        .ok_or_else(|| DecodingError::UnknownFunction(method.to_owned()))?;

    let mut reader = BodyReader::new(body)?;
    let id = reader.load_u32("function_id")?;
    if id != function.output_id {
        return Err(DecodingError::IdMismatch {
            expected: function.output_id,
            actual: id,
        });
    }
    let params = reader.load_values(&function.outputs)?;
    reader.finish(&function.name)?;
    Ok(params)
}

/// Decodes an event body. Ids missing from the ABI are reported as
/// [`DecodedEvent::Unknown`].
pub fn decode_event(abi: &Abi, body: &DynCell) -> Result<DecodedEvent, DecodingError> {
    let mut reader = BodyReader::new(body)?;
    let id = reader.load_u32("event_id")?;
    let Some(event) = abi.event_by_id(id) else {
        return Ok(DecodedEvent::Unknown { id });
    };

    let fields = reader.load_values(&event.inputs)?;
    reader.finish(&event.name)?;
    Ok(DecodedEvent::Known {
        name: event.name.clone(),
        fields,
    })
}

/// Decodes an inbound call body.
pub fn decode_input(
    abi: &Abi,
    body: &DynCell,
    external: bool,
) -> Result<DecodedCall, DecodingError> {
    let mut reader = BodyReader::new(body)?;
    let header = if external {
        reader.load_signature_and_header(abi.header()).map(Some)?
    } else {
        None
    };

    let id = reader.load_u32("function_id")?;
    let function = abi
        .function_by_input_id(id)
        .ok_or(DecodingError::UnknownId(id))?;

    let params = reader.load_values(&function.inputs)?;
    reader.finish(&function.name)?;
    Ok(DecodedCall {
        function: function.name.clone(),
        params,
        header,
    })
}

/// Classifies an external outbound body as an answer or an event.
pub fn decode_out_body(abi: &Abi, body: &DynCell) -> Result<OutBody, DecodingError> {
    let Some(id) = read_function_id(body) else {
        return Ok(OutBody::Unknown { id: None });
    };

    if let Some(function) = abi.function_by_output_id(id) {
        let params = decode_output(abi, &function.name, body)?;
        return Ok(OutBody::Answer {
            function: function.name.clone(),
            params,
        });
    }

    match decode_event(abi, body)? {
        DecodedEvent::Known { name, fields } => Ok(OutBody::Event { name, fields }),
        DecodedEvent::Unknown { id } => Ok(OutBody::Unknown { id: Some(id) }),
    }
}

/// Leading 32 bits of an internal or outbound body.
pub fn read_function_id(body: &DynCell) -> Option<u32> {
    let mut slice = body.as_slice().ok()?;
    slice.load_u32().ok()
}

// === Raw TL-B helpers ===

/// Stores up to 8 bits from the low end of `value`.
pub fn store_small(b: &mut CellBuilder, value: u8, bits: u16) -> Result<(), Error> {
    debug_assert!((1..=8).contains(&bits));
    b.store_raw(&[value << (8 - bits)], bits)
}

pub fn load_small(s: &mut CellSlice<'_>, bits: u16) -> Result<u8, Error> {
    debug_assert!((1..=8).contains(&bits));
    let mut buffer = [0u8; 1];
    s.load_raw(&mut buffer, bits)?;
    Ok(buffer[0] >> (8 - bits))
}

/// `MsgAddress` with `addr_none` and `addr_std` (no anycast).
pub fn store_address(b: &mut CellBuilder, address: &Address) -> Result<(), Error> {
    match address {
        Address::None => store_small(b, 0b00, 2),
        Address::Std { workchain, id } => {
            store_small(b, 0b100, 3)?;
            b.store_u8(*workchain as u8)?;
            b.store_raw(&id.0, 256)
        }
    }
}

pub fn load_address(s: &mut CellSlice<'_>, field: &str) -> Result<Address, DecodingError> {
    ensure_bits(s, field, 2)?;
    match load_small(s, 2)? {
        0b00 => Ok(Address::None),
        0b10 => {
            ensure_bits(s, field, Address::STD_BITS - 2)?;
            if s.load_bit()? {
                return Err(DecodingError::InvalidValue {
                    field: field.to_owned(),
                    reason: "anycast is not supported",
                });
            }
            let workchain = s.load_u8()? as i8;
            let mut id = [0u8; 32];
            s.load_raw(&mut id, 256)?;
            Ok(Address::Std {
                workchain,
                id: HashBytes(id),
            })
        }
        _ => Err(DecodingError::InvalidValue {
            field: field.to_owned(),
            reason: "unsupported address kind",
        }),
    }
}

/// `Grams` as `VarUInteger 16`.
pub fn store_grams(b: &mut CellBuilder, value: u128) -> Result<(), Error> {
    let len = 16 - (value.leading_zeros() / 8) as usize;
    if len > 15 {
        return Err(Error::IntOverflow);
    }
    store_small(b, len as u8, 4)?;
    if len > 0 {
        b.store_raw(&value.to_be_bytes()[16 - len..], (len * 8) as u16)?;
    }
    Ok(())
}

pub fn load_grams(s: &mut CellSlice<'_>) -> Result<u128, Error> {
    let len = load_small(s, 4)? as usize;
    let mut buffer = [0u8; 16];
    if len > 0 {
        s.load_raw(&mut buffer[16 - len..], (len * 8) as u16)?;
    }
    Ok(u128::from_be_bytes(buffer))
}

fn store_biguint(b: &mut CellBuilder, value: &BigUint, bits: u16) -> Result<(), Error> {
    let byte_len = (bits as usize).div_ceil(8);
    let pad = byte_len * 8 - bits as usize;
    let raw = (value << pad).to_bytes_be();

    let mut buffer = vec![0u8; byte_len];
    let raw = &raw[raw.len().saturating_sub(byte_len)..];
    buffer[byte_len - raw.len()..].copy_from_slice(raw);
    b.store_raw(&buffer, bits)
}

fn load_biguint(s: &mut CellSlice<'_>, bits: u16) -> Result<BigUint, Error> {
    let byte_len = (bits as usize).div_ceil(8);
    let pad = byte_len * 8 - bits as usize;

    let mut buffer = vec![0u8; byte_len];
    s.load_raw(&mut buffer, bits)?;
    Ok(BigUint::from_bytes_be(&buffer) >> pad)
}

fn ensure_bits(s: &CellSlice<'_>, field: &str, bits: u16) -> Result<(), DecodingError> {
    let actual = s.size_bits();
    if actual < bits {
        return Err(DecodingError::NotEnoughBits {
            field: field.to_owned(),
            expected: bits,
            actual,
        });
    }
    Ok(())
}

fn ensure_ref(s: &CellSlice<'_>, field: &str) -> Result<(), DecodingError> {
    if s.size_refs() == 0 {
        return Err(DecodingError::NotEnoughRefs {
            field: field.to_owned(),
        });
    }
    Ok(())
}

fn collect_values<'a>(
    decl: &'a [Param],
    params: &'a Params,
) -> Result<Vec<(&'a Param, &'a AbiValue)>, EncodingError> {
    decl.iter()
        .map(|param| match params.get(&param.name) {
            Some(value) => Ok((param, value)),
            None => Err(EncodingError::MissingParam(param.name.clone())),
        })
        .collect()
}

enum SignatureSlot<'a> {
    /// Layout is reserved but nothing is written (data to be signed).
    Omit,
    Empty,
    Present(&'a [u8; 64]),
}

struct BodyWriter {
    finished: Vec<CellBuilder>,
    current: CellBuilder,
    used_bits: u16,
    used_refs: u8,
}

impl BodyWriter {
    fn new() -> Self {
        Self {
            finished: Vec::new(),
            current: CellBuilder::new(),
            used_bits: 0,
            used_refs: 0,
        }
    }

    fn ensure_capacity(&mut self, bits: u16, refs: u8) {
        if self.used_bits + bits > MAX_BITS || self.used_refs + refs >= MAX_REFS {
            let full = std::mem::replace(&mut self.current, CellBuilder::new());
            self.finished.push(full);
            self.used_bits = 0;
            self.used_refs = 0;
        }
    }

    fn store_signature(&mut self, slot: SignatureSlot<'_>) -> Result<(), Error> {
        match slot {
            SignatureSlot::Omit => {}
            SignatureSlot::Empty => self.current.store_bit_zero()?,
            SignatureSlot::Present(signature) => {
                self.current.store_bit_one()?;
                self.current.store_raw(signature, 512)?;
            }
        }
        self.used_bits = SIGNATURE_BITS;
        Ok(())
    }

    fn store_header(
        &mut self,
        fields: &[HeaderField],
        header: &ExternalHeader,
    ) -> Result<(), Error> {
        for field in fields {
            match field {
                HeaderField::PubKey => {
                    self.ensure_capacity(1 + 256, 0);
                    match &header.signer {
                        Some(signer) => {
                            self.current.store_bit_one()?;
                            self.current.store_raw(&signer.public_key().0, 256)?;
                            self.used_bits += 1 + 256;
                        }
                        None => {
                            self.current.store_bit_zero()?;
                            self.used_bits += 1;
                        }
                    }
                }
                HeaderField::Time => {
                    self.ensure_capacity(64, 0);
                    self.current.store_u64(header.time)?;
                    self.used_bits += 64;
                }
                HeaderField::Expire => {
                    self.ensure_capacity(32, 0);
                    self.current.store_u32(header.expire)?;
                    self.used_bits += 32;
                }
            }
        }
        Ok(())
    }

    fn store_u32(&mut self, value: u32) -> Result<(), Error> {
        self.ensure_capacity(32, 0);
        self.current.store_u32(value)?;
        self.used_bits += 32;
        Ok(())
    }

    fn store_values(&mut self, values: &[(&Param, &AbiValue)]) -> Result<(), EncodingError> {
        for (param, value) in values {
            let (max_bits, max_refs) = param.ty.max_size();
            self.ensure_capacity(max_bits, max_refs);
            let (bits, refs) = store_value(&mut self.current, param, value)?;
            self.used_bits += bits;
            self.used_refs += refs;
        }
        Ok(())
    }

    fn finish(self) -> Result<Cell, EncodingError> {
        let mut next: Option<Cell> = None;
        let builders = self.finished.into_iter().chain(std::iter::once(self.current));
        for mut b in builders.rev() {
            if let Some(child) = next.take() {
                b.store_reference(child)?;
            }
            next = Some(b.build()?);
        }
        Ok(next.unwrap_or_else(Cell::empty_cell))
    }
}

fn store_value(
    b: &mut CellBuilder,
    param: &Param,
    value: &AbiValue,
) -> Result<(u16, u8), EncodingError> {
    let out_of_range = || EncodingError::OutOfRange {
        name: param.name.clone(),
        ty: param.ty,
    };

    match (param.ty, value) {
        (AbiType::Uint(bits), AbiValue::Int(value)) => {
            let value = value.to_biguint().ok_or_else(out_of_range)?;
            if value.bits() > bits as u64 {
                return Err(out_of_range());
            }
            store_biguint(b, &value, bits)?;
            Ok((bits, 0))
        }
        (AbiType::Int(bits), AbiValue::Int(value)) => {
            let negative = value.sign() == Sign::Minus;
            let magnitude = if negative {
                -value - BigInt::one()
            } else {
                value.clone()
            };
            if magnitude.bits() >= bits as u64 {
                return Err(out_of_range());
            }

            let twos = if negative {
                (BigInt::one() << bits as usize) + value
            } else {
                value.clone()
            };
            let twos = twos.to_biguint().ok_or_else(out_of_range)?;
            store_biguint(b, &twos, bits)?;
            Ok((bits, 0))
        }
        (AbiType::VarUint(size), AbiValue::Int(value)) => {
            let (len_bits, max_len) = var_uint_layout(size);
            let value = value.to_biguint().ok_or_else(out_of_range)?;
            let len = value.bits().div_ceil(8) as u16;
            if len > max_len as u16 {
                return Err(out_of_range());
            }
            b.store_raw(&[(len as u8) << (8 - len_bits)], len_bits)?;
            if len > 0 {
                store_biguint(b, &value, len * 8)?;
            }
            Ok((len_bits + len * 8, 0))
        }
        (AbiType::Bool, AbiValue::Bool(value)) => {
            b.store_bit(*value)?;
            Ok((1, 0))
        }
        (AbiType::Address, AbiValue::Address(address)) => {
            store_address(b, address)?;
            Ok((address.bit_len(), 0))
        }
        (AbiType::Bytes, AbiValue::Bytes(bytes)) => {
            b.store_reference(build_bytes_chain(bytes.as_slice())?)?;
            Ok((0, 1))
        }
        (AbiType::String, AbiValue::String(s)) => {
            b.store_reference(build_bytes_chain(s.as_bytes())?)?;
            Ok((0, 1))
        }
        (AbiType::FixedBytes(len), AbiValue::Bytes(bytes)) => {
            if bytes.len() != len as usize {
                return Err(out_of_range());
            }
            b.store_raw(bytes.as_slice(), len * 8)?;
            Ok((len * 8, 0))
        }
        (AbiType::Cell, AbiValue::Cell(cell)) => {
            b.store_reference(cell.clone())?;
            Ok((0, 1))
        }
        (expected, value) => Err(EncodingError::TypeMismatch {
            name: param.name.clone(),
            expected,
            actual: value.kind_name(),
        }),
    }
}

struct BodyReader<'a> {
    slice: CellSlice<'a>,
    used_bits: u16,
    used_refs: u8,
}

impl<'a> BodyReader<'a> {
    fn new(cell: &'a DynCell) -> Result<Self, DecodingError> {
        Ok(Self {
            slice: cell.as_slice()?,
            used_bits: 0,
            used_refs: 0,
        })
    }

    fn ensure_capacity(&mut self, bits: u16, refs: u8) -> Result<(), DecodingError> {
        if self.used_bits + bits > MAX_BITS || self.used_refs + refs >= MAX_REFS {
            ensure_ref(&self.slice, "continuation")?;
            let next = self.slice.load_reference()?;
            self.slice = next.as_slice()?;
            self.used_bits = 0;
            self.used_refs = 0;
        }
        Ok(())
    }

    fn load_u32(&mut self, field: &str) -> Result<u32, DecodingError> {
        self.ensure_capacity(32, 0)?;
        ensure_bits(&self.slice, field, 32)?;
        self.used_bits += 32;
        Ok(self.slice.load_u32()?)
    }

    fn load_signature_and_header(
        &mut self,
        fields: &[HeaderField],
    ) -> Result<DecodedHeader, DecodingError> {
        let mut header = DecodedHeader::default();

        ensure_bits(&self.slice, "signature", 1)?;
        if self.slice.load_bit()? {
            ensure_bits(&self.slice, "signature", 512)?;
            let mut signature = vec![0u8; 64];
            self.slice.load_raw(&mut signature, 512)?;
            header.signature = Some(signature);
        }
        self.used_bits = SIGNATURE_BITS;

        for field in fields {
            match field {
                HeaderField::PubKey => {
                    self.ensure_capacity(1 + 256, 0)?;
                    ensure_bits(&self.slice, "pubkey", 1)?;
                    self.used_bits += 1;
                    if self.slice.load_bit()? {
                        ensure_bits(&self.slice, "pubkey", 256)?;
                        let mut key = [0u8; 32];
                        self.slice.load_raw(&mut key, 256)?;
                        header.pubkey = Some(HashBytes(key));
                        self.used_bits += 256;
                    }
                }
                HeaderField::Time => {
                    self.ensure_capacity(64, 0)?;
                    ensure_bits(&self.slice, "time", 64)?;
                    header.time = Some(self.slice.load_u64()?);
                    self.used_bits += 64;
                }
                HeaderField::Expire => {
                    self.ensure_capacity(32, 0)?;
                    ensure_bits(&self.slice, "expire", 32)?;
                    header.expire = Some(self.slice.load_u32()?);
                    self.used_bits += 32;
                }
            }
        }

        Ok(header)
    }

    fn load_values(&mut self, decl: &[Param]) -> Result<Params, DecodingError> {
        let mut params = Params::new();
        for param in decl {
            let (max_bits, max_refs) = param.ty.max_size();
            self.ensure_capacity(max_bits, max_refs)?;

            let bits_before = self.slice.size_bits();
            let refs_before = self.slice.size_refs();
            let value = self.load_value(param)?;
            self.used_bits += bits_before - self.slice.size_bits();
            self.used_refs += refs_before - self.slice.size_refs();

            params.insert(&param.name, value);
        }
        Ok(params)
    }

    fn load_value(&mut self, param: &Param) -> Result<AbiValue, DecodingError> {
        let field = param.name.as_str();
        let s = &mut self.slice;

        Ok(match param.ty {
            AbiType::Uint(bits) => {
                ensure_bits(s, field, bits)?;
                AbiValue::Int(BigInt::from(load_biguint(s, bits)?))
            }
            AbiType::Int(bits) => {
                ensure_bits(s, field, bits)?;
                let raw = load_biguint(s, bits)?;
                let negative = raw.bit(bits as u64 - 1);
                let mut value = BigInt::from(raw);
                if negative {
                    value -= BigInt::one() << bits as usize;
                }
                AbiValue::Int(value)
            }
            AbiType::VarUint(size) => {
                let (len_bits, max_len) = var_uint_layout(size);
                ensure_bits(s, field, len_bits)?;
                let len = load_small(s, len_bits)?;
                if len > max_len {
                    return Err(DecodingError::InvalidValue {
                        field: field.to_owned(),
                        reason: "varuint length is too big",
                    });
                }
                let bits = len as u16 * 8;
                ensure_bits(s, field, bits)?;
                let value = if bits > 0 {
                    load_biguint(s, bits)?
                } else {
                    BigUint::default()
                };
                AbiValue::Int(BigInt::from(value))
            }
            AbiType::Bool => {
                ensure_bits(s, field, 1)?;
                AbiValue::Bool(s.load_bit()?)
            }
            AbiType::Address => AbiValue::Address(load_address(s, field)?),
            AbiType::Bytes => {
                ensure_ref(s, field)?;
                let chain = s.load_reference()?;
                AbiValue::Bytes(Bytes::from(read_bytes_chain(chain)))
            }
            AbiType::String => {
                ensure_ref(s, field)?;
                let chain = s.load_reference()?;
                let value = String::from_utf8(read_bytes_chain(chain)).map_err(|_| {
                    DecodingError::InvalidValue {
                        field: field.to_owned(),
                        reason: "invalid utf-8",
                    }
                })?;
                AbiValue::String(value)
            }
            AbiType::FixedBytes(len) => {
                let bits = len * 8;
                ensure_bits(s, field, bits)?;
                let mut buffer = vec![0u8; len as usize];
                s.load_raw(&mut buffer, bits)?;
                AbiValue::Bytes(Bytes::from(buffer))
            }
            AbiType::Cell => {
                ensure_ref(s, field)?;
                AbiValue::Cell(s.load_reference_cloned()?)
            }
        })
    }

    fn finish(self, name: &str) -> Result<(), DecodingError> {
        if self.slice.size_bits() != 0 || self.slice.size_refs() != 0 {
            return Err(DecodingError::TrailingData(name.to_owned()));
        }
        Ok(())
    }
}
