//! Principal identifiers on each leg of a swap.

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::{fmt, str::FromStr};
use thiserror::Error;

/// A 20 byte Ethereum account address, the depositor/claimer identity
/// on the escrow leg.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ethereum([u8; 20]);

impl Ethereum {
    pub fn into_raw(self) -> [u8; 20] {
        self.0
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl From<[u8; 20]> for Ethereum {
    fn from(bytes: [u8; 20]) -> Self {
        Ethereum(bytes)
    }
}

impl fmt::Debug for Ethereum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ethereum({})", self)
    }
}

impl fmt::Display for Ethereum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(&self.0))
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ParseErr {
    #[error("invalid hex: {0}")]
    FromHex(#[from] hex::FromHexError),
    #[error("invalid length, expected {expected} bytes, got {got}")]
    InvalidLength { expected: usize, got: usize },
}

impl FromStr for Ethereum {
    type Err = ParseErr;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let vec = hex::decode(s)?;
        if vec.len() != 20 {
            return Err(ParseErr::InvalidLength {
                expected: 20,
                got: vec.len(),
            });
        }
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&vec);
        Ok(Ethereum(bytes))
    }
}

impl Serialize for Ethereum {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Ethereum {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct Visitor;

        impl<'vde> de::Visitor<'vde> for Visitor {
            type Value = Ethereum;

            fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str("a 0x-prefixed hex encoded 20 byte address")
            }

            fn visit_str<E>(self, v: &str) -> Result<Ethereum, E>
            where
                E: de::Error,
            {
                Ethereum::from_str(v).map_err(|_| {
                    de::Error::invalid_value(de::Unexpected::Str(v), &"hex encoded address")
                })
            }
        }

        deserializer.deserialize_str(Visitor)
    }
}

/// A 33 byte compressed secp256k1 public key identifying a Lightning
/// node, the identity on the invoice leg.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Lightning([u8; 33]);

impl Lightning {
    pub fn as_bytes(&self) -> &[u8; 33] {
        &self.0
    }
}

impl From<[u8; 33]> for Lightning {
    fn from(bytes: [u8; 33]) -> Self {
        Lightning(bytes)
    }
}

impl fmt::Debug for Lightning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Lightning({})", self)
    }
}

impl fmt::Display for Lightning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(hex::encode(&self.0[..]).as_str())
    }
}

impl FromStr for Lightning {
    type Err = ParseErr;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let vec = hex::decode(s)?;
        if vec.len() != 33 {
            return Err(ParseErr::InvalidLength {
                expected: 33,
                got: vec.len(),
            });
        }
        let mut bytes = [0u8; 33];
        bytes.copy_from_slice(&vec);
        Ok(Lightning(bytes))
    }
}

impl Serialize for Lightning {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Lightning {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct Visitor;

        impl<'vde> de::Visitor<'vde> for Visitor {
            type Value = Lightning;

            fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str("a hex encoded 33 byte compressed public key")
            }

            fn visit_str<E>(self, v: &str) -> Result<Lightning, E>
            where
                E: de::Error,
            {
                Lightning::from_str(v).map_err(|_| {
                    de::Error::invalid_value(de::Unexpected::Str(v), &"hex encoded public key")
                })
            }
        }

        deserializer.deserialize_str(Visitor)
    }
}
