//! Data shapes of the invoice leg.
//!
//! The payment request is a self-describing envelope that can be
//! decoded without contacting a node: a fixed prefix followed by the
//! base64 encoding of a JSON document. Malformed input yields a
//! [`DecodeError`], never substituted defaults.

use crate::{asset, secret::Secret, secret_hash::SecretHash, timestamp::Timestamp, Network};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// The envelope prefix; the `1` terminates the human-readable part in
/// the style of bech32 payment requests.
const PREFIX: &str = "lnswap1";

/// A hash-locked payment request issued by the invoice gateway.
#[derive(Clone, Debug, PartialEq)]
pub struct Invoice {
    pub payment_hash: SecretHash,
    pub amount: asset::Bitcoin,
    pub expiry: Timestamp,
    pub description: String,
    pub payment_request: PaymentRequest,
}

/// The outcome of a successfully settled payment.
///
/// The `secret` is the invoice preimage the paying node learned on
/// settlement; it is the value later supplied to the escrow claim.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PaymentOutcome {
    pub secret: Secret,
    pub payment_hash: SecretHash,
    pub amount_paid: asset::Bitcoin,
    pub timestamp: Timestamp,
}

/// The fields a payment request encodes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Decoded {
    pub payment_hash: SecretHash,
    pub amount: asset::Bitcoin,
    pub expiry: Timestamp,
    pub description: String,
    pub network: Network,
    /// The underlying BOLT11 invoice when the request was issued by a
    /// real Lightning node; `None` for in-process gateways.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bolt11: Option<String>,
}

/// An encoded payment request string.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PaymentRequest(String);

impl PaymentRequest {
    pub fn encode(decoded: &Decoded) -> Self {
        let json = serde_json::to_vec(decoded).expect("payment request fields to serialize");
        PaymentRequest(format!("{}{}", PREFIX, base64::encode(&json)))
    }

    /// Pure parsing; no side effects, no network access.
    pub fn decode(&self) -> Result<Decoded, DecodeError> {
        let payload = self
            .0
            .strip_prefix(PREFIX)
            .ok_or(DecodeError::MissingPrefix)?;
        let json = base64::decode(payload)?;
        let decoded = serde_json::from_slice::<Decoded>(&json)?;

        if decoded.payment_hash.is_zero() {
            return Err(DecodeError::ZeroPaymentHash);
        }

        Ok(decoded)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PaymentRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("payment request does not start with `{}`", PREFIX)]
    MissingPrefix,
    #[error("payment request payload is not valid base64: {0}")]
    Encoding(#[from] base64::DecodeError),
    #[error("payment request payload is not a valid invoice document: {0}")]
    Document(#[from] serde_json::Error),
    #[error("payment request carries an all-zero payment hash")]
    ZeroPaymentHash,
}
