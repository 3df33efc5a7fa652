use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::{fmt, str::FromStr};

/// An amount of Bitcoin paid over the Lightning Network, in satoshi.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Bitcoin(u64);

impl Bitcoin {
    pub const fn from_sat(sat: u64) -> Self {
        Bitcoin(sat)
    }

    pub fn as_sat(self) -> u64 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Bitcoin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let whole = self.0 / 100_000_000;
        let frac = self.0 % 100_000_000;
        write!(f, "{}.{:08} BTC", whole, frac)
    }
}

/// A quantity of an ERC20 token, in the token's smallest unit (wei for
/// an 18-decimals token).
///
/// Serialized as a decimal string because 2^128 exceeds what most wire
/// formats represent as a number.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Erc20Quantity(u128);

impl Erc20Quantity {
    pub const fn zero() -> Self {
        Erc20Quantity(0)
    }

    pub const fn from_wei(wei: u128) -> Self {
        Erc20Quantity(wei)
    }

    pub fn as_wei(self) -> u128 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, rhs: Erc20Quantity) -> Option<Erc20Quantity> {
        self.0.checked_add(rhs.0).map(Erc20Quantity)
    }

    pub fn saturating_add(self, rhs: Erc20Quantity) -> Erc20Quantity {
        Erc20Quantity(self.0.saturating_add(rhs.0))
    }
}

impl fmt::Display for Erc20Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} wei", self.0)
    }
}

impl FromStr for Erc20Quantity {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u128>().map(Erc20Quantity)
    }
}

impl Serialize for Erc20Quantity {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for Erc20Quantity {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct Visitor;

        impl<'vde> de::Visitor<'vde> for Visitor {
            type Value = Erc20Quantity;

            fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str("a decimal string representing a wei quantity")
            }

            fn visit_str<E>(self, v: &str) -> Result<Erc20Quantity, E>
            where
                E: de::Error,
            {
                Erc20Quantity::from_str(v).map_err(|_| {
                    de::Error::invalid_value(de::Unexpected::Str(v), &"a decimal wei string")
                })
            }
        }

        deserializer.deserialize_str(Visitor)
    }
}
