use std::borrow::Cow;
use std::sync::Arc;

use everscale_types::prelude::*;

use crate::error::{DecodingError, EncodingError};

/// Max number of whole bytes stored in one cell of a byte chain.
pub const BYTES_PER_CELL: usize = 127;

/// Serialization helpers for [`Cell`].
pub trait CellExt: Sized {
    /// Decodes a cell from raw BOC bytes.
    fn from_boc(bytes: &[u8]) -> Result<Self, DecodingError>;

    /// Decodes a cell from a hex encoded BOC.
    fn from_boc_hex(s: &str) -> Result<Self, DecodingError>;

    /// Decodes a cell from a base64 encoded BOC.
    fn from_boc_base64(s: &str) -> Result<Self, DecodingError>;

    fn to_boc(&self) -> Vec<u8>;

    fn to_boc_hex(&self) -> String;

    fn to_boc_base64(&self) -> String;

    /// Returns `true` for a cell without data bits and references.
    fn is_empty_cell(&self) -> bool;

    /// Whole data bytes of the root cell (trailing partial byte excluded).
    fn data_bytes(&self) -> &[u8];

    fn data_hex(&self) -> String {
        hex::encode(self.data_bytes())
    }

    /// Root cell data as text, invalid sequences are replaced.
    fn data_utf8_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.data_bytes())
    }
}

impl CellExt for Cell {
    fn from_boc(bytes: &[u8]) -> Result<Self, DecodingError> {
        Boc::decode(bytes).map_err(|e| DecodingError::InvalidBoc(e.to_string()))
    }

    fn from_boc_hex(s: &str) -> Result<Self, DecodingError> {
        let bytes =
            hex::decode(s.trim()).map_err(|e| DecodingError::InvalidBoc(e.to_string()))?;
        Self::from_boc(&bytes)
    }

    fn from_boc_base64(s: &str) -> Result<Self, DecodingError> {
        Boc::decode_base64(s.trim()).map_err(|e| DecodingError::InvalidBoc(e.to_string()))
    }

    fn to_boc(&self) -> Vec<u8> {
        Boc::encode(self)
    }

    fn to_boc_hex(&self) -> String {
        hex::encode(Boc::encode(self))
    }

    fn to_boc_base64(&self) -> String {
        Boc::encode_base64(self)
    }

    fn is_empty_cell(&self) -> bool {
        self.bit_len() == 0 && self.reference_count() == 0
    }

    fn data_bytes(&self) -> &[u8] {
        let len = self.bit_len() as usize / 8;
        &self.data()[..len]
    }
}

/// Stores bytes as a chain of cells linked through the first reference.
pub fn build_bytes_chain(bytes: &[u8]) -> Result<Cell, EncodingError> {
    if bytes.is_empty() {
        return Ok(Cell::empty_cell());
    }

    let mut next: Option<Cell> = None;
    for chunk in bytes.chunks(BYTES_PER_CELL).rev() {
        let mut b = CellBuilder::new();
        b.store_raw(chunk, (chunk.len() * 8) as u16)?;
        if let Some(child) = next.take() {
            b.store_reference(child)?;
        }
        next = Some(b.build()?);
    }

    Ok(next.unwrap_or_else(Cell::empty_cell))
}

/// Collects whole data bytes of a cell chain.
pub fn read_bytes_chain(cell: &DynCell) -> Vec<u8> {
    let mut result = Vec::new();
    let mut current = Some(cell);
    while let Some(cell) = current {
        let len = cell.bit_len() as usize / 8;
        result.extend_from_slice(&cell.data()[..len]);
        current = cell.reference(0);
    }
    result
}

/// Immutable byte string.
#[derive(Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Bytes(Arc<[u8]>);

impl Bytes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_hex(s: &str) -> Result<Self, EncodingError> {
        let s = s.trim();
        let s = s.strip_prefix("0x").unwrap_or(s);
        Ok(Self::from(hex::decode(s)?))
    }

    pub fn from_utf8_str(s: &str) -> Self {
        Self::from(s)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Strict UTF-8 view.
    pub fn to_utf8(&self) -> Result<&str, EncodingError> {
        std::str::from_utf8(&self.0).map_err(EncodingError::from)
    }

    /// Lossy UTF-8 view, invalid sequences are replaced.
    pub fn to_utf8_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.0)
    }

    /// Packs the bytes into a cell chain.
    pub fn to_cell(&self) -> Result<Cell, EncodingError> {
        build_bytes_chain(&self.0)
    }

    /// Reads the bytes back from a cell chain.
    pub fn from_cell(cell: &DynCell) -> Self {
        Self::from(read_bytes_chain(cell))
    }
}

impl std::fmt::Debug for Bytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Bytes({})", self.to_hex())
    }
}

impl std::fmt::Display for Bytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl AsRef<[u8]> for Bytes {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for Bytes {
    fn from(value: Vec<u8>) -> Self {
        Self(value.into())
    }
}

impl From<&[u8]> for Bytes {
    fn from(value: &[u8]) -> Self {
        Self(value.into())
    }
}

impl<const N: usize> From<[u8; N]> for Bytes {
    fn from(value: [u8; N]) -> Self {
        Self(value.as_slice().into())
    }
}

impl From<&str> for Bytes {
    fn from(value: &str) -> Self {
        Self(value.as_bytes().into())
    }
}

impl serde::Serialize for Bytes {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> serde::Deserialize<'de> for Bytes {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = <Cow<'de, str>>::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}
