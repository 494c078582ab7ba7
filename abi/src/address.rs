use std::str::FromStr;

use everscale_types::cell::HashBytes;

use crate::error::EncodingError;

/// Contract address.
///
/// Textual form is `workchain:hex64`, the empty string stands for
/// [`Address::None`]. A missing workchain (`:hex64`) is read as `0`.
#[derive(Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Address {
    #[default]
    None,
    Std {
        workchain: i8,
        id: HashBytes,
    },
}

impl Address {
    /// Bit length of a serialized `addr_std` without anycast.
    pub const STD_BITS: u16 = 2 + 1 + 8 + 256;

    pub const fn std(workchain: i8, id: HashBytes) -> Self {
        Self::Std { workchain, id }
    }

    pub const fn none() -> Self {
        Self::None
    }

    /// Address with a zero account id.
    pub const fn zero(workchain: i8) -> Self {
        Self::Std {
            workchain,
            id: HashBytes::ZERO,
        }
    }

    pub const fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    pub const fn workchain(&self) -> Option<i8> {
        match self {
            Self::None => None,
            Self::Std { workchain, .. } => Some(*workchain),
        }
    }

    pub const fn id(&self) -> Option<&HashBytes> {
        match self {
            Self::None => None,
            Self::Std { id, .. } => Some(id),
        }
    }

    /// Serialized bit length.
    pub const fn bit_len(&self) -> u16 {
        match self {
            Self::None => 2,
            Self::Std { .. } => Self::STD_BITS,
        }
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => Ok(()),
            Self::Std { workchain, id } => write!(f, "{workchain}:{}", hex::encode(id.0)),
        }
    }
}

impl std::fmt::Debug for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => f.write_str("Address(none)"),
            Self::Std { .. } => write!(f, "Address({self})"),
        }
    }
}

impl FromStr for Address {
    type Err = EncodingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(Self::None);
        }

        let invalid = || EncodingError::InvalidAddress(s.to_owned());

        let (workchain, id) = s.split_once(':').ok_or_else(invalid)?;
        let workchain = match workchain {
            "" => 0,
            wc => wc.parse::<i8>().map_err(|_| invalid())?,
        };

        if id.len() != 64 {
            return Err(invalid());
        }
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(id, &mut bytes).map_err(|_| invalid())?;

        Ok(Self::Std {
            workchain,
            id: HashBytes(bytes),
        })
    }
}

impl serde::Serialize for Address {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for Address {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = <std::borrow::Cow<'de, str>>::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
