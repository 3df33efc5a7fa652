use crate::secret::Secret;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::{fmt, str::FromStr};
use tiny_keccak::{Hasher, Keccak};

/// The hash function binding a deposit's hashlock to an invoice's
/// payment hash.
///
/// Both legs of a swap must use the same function. A Lightning node
/// always hashes preimages with SHA-256, whereas an EVM escrow's
/// natural primitive is Keccak-256; which one a given escrow deployment
/// verifies is a configuration value, never an assumption. The
/// coordinator refuses to drive a swap whose legs disagree.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::EnumString,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum HashFunction {
    Sha256,
    Keccak256,
}

impl HashFunction {
    pub fn hash(&self, secret: &Secret) -> SecretHash {
        match self {
            HashFunction::Sha256 => {
                let mut hasher = Sha256::new();
                hasher.update(secret.as_raw_secret());
                let mut digest = [0u8; 32];
                digest.copy_from_slice(&hasher.finalize());
                SecretHash(digest)
            }
            HashFunction::Keccak256 => {
                let mut hasher = Keccak::v256();
                hasher.update(secret.as_raw_secret());
                let mut digest = [0u8; 32];
                hasher.finalize(&mut digest);
                SecretHash(digest)
            }
        }
    }

    /// Verify that a candidate preimage unlocks the given commitment.
    pub fn verify(&self, secret: &Secret, hash: SecretHash) -> bool {
        self.hash(secret) == hash
    }
}

/// The 32 byte commitment a claim must provide a preimage for.
#[derive(Clone, Copy, PartialEq, PartialOrd, Ord, Eq, Hash)]
pub struct SecretHash([u8; 32]);

impl SecretHash {
    pub const LENGTH: usize = 32;

    pub fn into_raw(self) -> [u8; 32] {
        self.0
    }

    pub fn as_raw(&self) -> &[u8; 32] {
        &self.0
    }

    /// An all-zero commitment has no known preimage and is rejected by
    /// the escrow ledger at deposit time.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl From<[u8; 32]> for SecretHash {
    fn from(bytes: [u8; 32]) -> Self {
        SecretHash(bytes)
    }
}

impl fmt::Debug for SecretHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretHash({:x})", self)
    }
}

impl fmt::Display for SecretHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self)
    }
}

impl fmt::LowerHex for SecretHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(hex::encode(&self.0).as_str())
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ParseErr {
    #[error("invalid hex: {0}")]
    FromHex(#[from] hex::FromHexError),
    #[error("invalid length, expected 32 bytes, got {got}")]
    InvalidLength { got: usize },
}

impl FromStr for SecretHash {
    type Err = ParseErr;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let vec = hex::decode(s)?;
        if vec.len() != Self::LENGTH {
            return Err(ParseErr::InvalidLength { got: vec.len() });
        }
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&vec);
        Ok(SecretHash(bytes))
    }
}

impl Serialize for SecretHash {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{:x}", self))
    }
}

impl<'de> Deserialize<'de> for SecretHash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct Visitor;

        impl<'vde> de::Visitor<'vde> for Visitor {
            type Value = SecretHash;

            fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str("a hex encoded 32 byte value")
            }

            fn visit_str<E>(self, v: &str) -> Result<SecretHash, E>
            where
                E: de::Error,
            {
                SecretHash::from_str(v).map_err(|_| {
                    de::Error::invalid_value(de::Unexpected::Str(v), &"hex encoded bytes")
                })
            }
        }

        deserializer.deserialize_str(Visitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_of_known_preimage() {
        let secret = Secret::from(*b"hello world, you are beautiful!!");

        let hash = HashFunction::Sha256.hash(&secret);

        assert_eq!(
            hash.to_string(),
            "68d627971643a6f97f27c58957826fcba853ec2077fd10ec6b93d8e61deb4cec"
        );
    }

    #[test]
    fn sha256_of_zero_preimage() {
        let secret = Secret::from([0u8; 32]);

        let hash = HashFunction::Sha256.hash(&secret);

        assert_eq!(
            hash.to_string(),
            "66687aadf862bd776c8fc18b8e9f8e20089714856ee233b3902a591d0d5f2925"
        );
    }

    #[test]
    fn keccak256_of_zero_preimage() {
        let secret = Secret::from([0u8; 32]);

        let hash = HashFunction::Keccak256.hash(&secret);

        assert_eq!(
            hash.to_string(),
            "290decd9548b62a8d60345a988386fc84ba6bc95484008f6362f93160ef3e563"
        );
    }

    #[test]
    fn the_two_functions_disagree_on_the_same_preimage() {
        let secret = Secret::from(*b"hello world, you are beautiful!!");

        assert_ne!(
            HashFunction::Sha256.hash(&secret),
            HashFunction::Keccak256.hash(&secret)
        );
    }

    #[test]
    fn verify_rejects_the_wrong_preimage() {
        let secret = Secret::from(*b"hello world, you are beautiful!!");
        let other = Secret::from(*b"hello world, you are despicable!");

        let hash = HashFunction::Sha256.hash(&secret);

        assert!(HashFunction::Sha256.verify(&secret, hash));
        assert!(!HashFunction::Sha256.verify(&other, hash));
    }

    #[test]
    fn round_trip_serialization() {
        let hash = HashFunction::Sha256.hash(&Secret::from([7u8; 32]));

        let json = serde_json::to_string(&hash).unwrap();
        let deserialized = serde_json::from_str::<SecretHash>(&json).unwrap();

        assert_eq!(deserialized, hash);
    }
}
