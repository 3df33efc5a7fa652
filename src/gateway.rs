//! The invoice gateway: the Lightning side collaborator.
//!
//! The traits are the contract the coordinator drives; [`LndGateway`]
//! implements them against lnd's REST API. lnd settles invoices against
//! SHA-256 payment hashes, which is why the gateway's agreed hash
//! function is not configurable here; the escrow leg has to be
//! configured to match.

use crate::{
    asset,
    invoice::{Decoded, DecodeError, Invoice, PaymentOutcome, PaymentRequest},
    secret::Secret,
    secret_hash::{HashFunction, SecretHash},
    timestamp::{RelativeTime, Timestamp},
    Network,
};
use reqwest::{Certificate, StatusCode, Url};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("payment failed: {0}")]
    PaymentFailed(String),
    #[error("the invoice expired at {0}")]
    InvoiceExpired(Timestamp),
    #[error("lightning node unreachable")]
    NodeUnreachable(#[source] reqwest::Error),
    #[error("lightning node returned status {0}")]
    UnexpectedStatus(StatusCode),
    #[error("lightning node returned malformed data: {0}")]
    MalformedResponse(String),
    #[error("payment request does not embed a bolt11 invoice")]
    NotPayable,
    #[error("payment request is for network {actual}, gateway is on {expected}")]
    NetworkMismatch { expected: Network, actual: Network },
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("failed to construct http client")]
    Configuration(#[source] reqwest::Error),
}

impl Error {
    /// Transient errors may be retried with backoff; everything else is
    /// authoritative for the attempted call.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::NodeUnreachable(_))
    }
}

/// The hash function this gateway's payment hashes are computed with.
pub trait AgreedHashFunction {
    fn hash_function(&self) -> HashFunction;
}

/// Issue a hash-locked payment request.
///
/// The returned invoice's payment hash is the hashlock the escrow leg
/// must be locked to; a coordinator never generates its own.
#[async_trait::async_trait]
pub trait IssueInvoice {
    async fn issue_invoice(
        &self,
        amount: asset::Bitcoin,
        description: String,
        expiry: RelativeTime,
    ) -> Result<Invoice, Error>;
}

/// Pay a payment request.
///
/// Payment is attempted once and the outcome is authoritative; callers
/// must not retry a `PaymentFailed` result.
#[async_trait::async_trait]
pub trait PayInvoice {
    async fn pay_invoice(&self, request: &PaymentRequest) -> Result<PaymentOutcome, Error>;
}

/// Probe whether the invoice with the given payment hash has settled.
///
/// A settled invoice reports the revealed preimage. Non-blocking so the
/// coordinator owns the polling loop and its deadline.
#[async_trait::async_trait]
pub trait CheckSettled {
    async fn check_settled(
        &self,
        payment_hash: SecretHash,
    ) -> Result<Option<PaymentOutcome>, Error>;
}

#[derive(Debug, Serialize)]
struct AddInvoiceRequest {
    value: String,
    memo: String,
    expiry: String,
}

#[derive(Debug, Deserialize)]
struct AddInvoiceResponse {
    r_hash: String,
    payment_request: String,
}

#[derive(Debug, Deserialize)]
struct SendPaymentResponse {
    #[serde(default)]
    payment_error: String,
    payment_preimage: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LookupInvoiceResponse {
    #[serde(default)]
    settled: bool,
    r_preimage: Option<String>,
    amt_paid_sat: Option<String>,
}

#[derive(Clone, Debug)]
pub struct LndGatewayParams {
    pub url: Url,
    /// Hex encoded admin macaroon, sent as `Grpc-Metadata-macaroon`.
    pub macaroon: String,
    pub network: Network,
    pub certificate: Option<Certificate>,
}

/// An invoice gateway backed by lnd's REST API.
#[derive(Debug)]
pub struct LndGateway {
    url: Url,
    macaroon: String,
    network: Network,
    client: reqwest::Client,
}

impl LndGateway {
    pub fn new(params: LndGatewayParams) -> Result<Self, Error> {
        let mut builder = reqwest::Client::builder();
        if let Some(certificate) = params.certificate {
            builder = builder.add_root_certificate(certificate);
        }
        let client = builder.build().map_err(Error::Configuration)?;

        Ok(LndGateway {
            url: params.url,
            macaroon: params.macaroon,
            network: params.network,
            client,
        })
    }

    fn invoices_url(&self) -> Url {
        self.url
            .join("/v1/invoices")
            .expect("append valid string to url")
    }

    fn payments_url(&self) -> Url {
        self.url
            .join("/v1/channels/transactions")
            .expect("append valid string to url")
    }

    fn invoice_url(&self, payment_hash: SecretHash) -> Url {
        self.url
            .join("/v1/invoice/")
            .expect("append valid string to url")
            .join(format!("{:x}", payment_hash).as_str())
            .expect("append valid hex to url")
    }

    async fn get_invoice(
        &self,
        payment_hash: SecretHash,
    ) -> Result<Option<LookupInvoiceResponse>, Error> {
        let response = self
            .client
            .get(self.invoice_url(payment_hash))
            .header("Grpc-Metadata-macaroon", &self.macaroon)
            .send()
            .await
            .map_err(Error::NodeUnreachable)?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Error::UnexpectedStatus(response.status()));
        }

        let invoice = response
            .json::<LookupInvoiceResponse>()
            .await
            .map_err(Error::NodeUnreachable)?;

        Ok(Some(invoice))
    }
}

impl AgreedHashFunction for LndGateway {
    fn hash_function(&self) -> HashFunction {
        // lnd always hashes preimages with SHA-256.
        HashFunction::Sha256
    }
}

#[async_trait::async_trait]
impl IssueInvoice for LndGateway {
    async fn issue_invoice(
        &self,
        amount: asset::Bitcoin,
        description: String,
        expiry: RelativeTime,
    ) -> Result<Invoice, Error> {
        let body = AddInvoiceRequest {
            value: amount.as_sat().to_string(),
            memo: description.clone(),
            expiry: u32::from(expiry).to_string(),
        };

        let response = self
            .client
            .post(self.invoices_url())
            .header("Grpc-Metadata-macaroon", &self.macaroon)
            .json(&body)
            .send()
            .await
            .map_err(Error::NodeUnreachable)?;

        if !response.status().is_success() {
            return Err(Error::UnexpectedStatus(response.status()));
        }

        let added = response
            .json::<AddInvoiceResponse>()
            .await
            .map_err(Error::NodeUnreachable)?;

        let payment_hash = decode_base64_hash(&added.r_hash)?;
        let absolute_expiry = Timestamp::now().plus(expiry.into());

        let payment_request = PaymentRequest::encode(&Decoded {
            payment_hash,
            amount,
            expiry: absolute_expiry,
            description: description.clone(),
            network: self.network,
            bolt11: Some(added.payment_request),
        });

        tracing::info!(%payment_hash, %amount, "issued hash-locked invoice");

        Ok(Invoice {
            payment_hash,
            amount,
            expiry: absolute_expiry,
            description,
            payment_request,
        })
    }
}

#[async_trait::async_trait]
impl PayInvoice for LndGateway {
    async fn pay_invoice(&self, request: &PaymentRequest) -> Result<PaymentOutcome, Error> {
        let decoded = request.decode()?;

        if decoded.network != self.network {
            return Err(Error::NetworkMismatch {
                expected: self.network,
                actual: decoded.network,
            });
        }
        if Timestamp::now() > decoded.expiry {
            return Err(Error::InvoiceExpired(decoded.expiry));
        }

        let bolt11 = decoded.bolt11.ok_or(Error::NotPayable)?;

        let response = self
            .client
            .post(self.payments_url())
            .header("Grpc-Metadata-macaroon", &self.macaroon)
            .json(&serde_json::json!({ "payment_request": bolt11 }))
            .send()
            .await
            .map_err(Error::NodeUnreachable)?;

        if !response.status().is_success() {
            return Err(Error::UnexpectedStatus(response.status()));
        }

        let sent = response
            .json::<SendPaymentResponse>()
            .await
            .map_err(Error::NodeUnreachable)?;

        if !sent.payment_error.is_empty() {
            return Err(Error::PaymentFailed(sent.payment_error));
        }

        let preimage = sent
            .payment_preimage
            .ok_or_else(|| Error::MalformedResponse("successful payment without preimage".into()))?;
        let secret = decode_base64_secret(&preimage)?;

        tracing::info!(payment_hash = %decoded.payment_hash, "invoice paid, preimage obtained");

        Ok(PaymentOutcome {
            secret,
            payment_hash: decoded.payment_hash,
            amount_paid: decoded.amount,
            timestamp: Timestamp::now(),
        })
    }
}

#[async_trait::async_trait]
impl CheckSettled for LndGateway {
    async fn check_settled(
        &self,
        payment_hash: SecretHash,
    ) -> Result<Option<PaymentOutcome>, Error> {
        let invoice = match self.get_invoice(payment_hash).await? {
            Some(invoice) if invoice.settled => invoice,
            _ => return Ok(None),
        };

        let preimage = invoice
            .r_preimage
            .ok_or_else(|| Error::MalformedResponse("settled invoice without preimage".into()))?;
        let secret = decode_base64_secret(&preimage)?;

        let amount_paid = invoice
            .amt_paid_sat
            .unwrap_or_default()
            .parse::<u64>()
            .map(asset::Bitcoin::from_sat)
            .map_err(|_| Error::MalformedResponse("amt_paid_sat is not a number".into()))?;

        Ok(Some(PaymentOutcome {
            secret,
            payment_hash,
            amount_paid,
            timestamp: Timestamp::now(),
        }))
    }
}

fn decode_base64_hash(value: &str) -> Result<SecretHash, Error> {
    let bytes = base64::decode(value)
        .map_err(|_| Error::MalformedResponse("r_hash is not valid base64".into()))?;
    if bytes.len() != SecretHash::LENGTH {
        return Err(Error::MalformedResponse(format!(
            "r_hash has {} bytes, expected {}",
            bytes.len(),
            SecretHash::LENGTH
        )));
    }
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&bytes);
    Ok(SecretHash::from(hash))
}

fn decode_base64_secret(value: &str) -> Result<Secret, Error> {
    let bytes = base64::decode(value)
        .map_err(|_| Error::MalformedResponse("preimage is not valid base64".into()))?;
    Secret::from_vec(&bytes)
        .map_err(|e| Error::MalformedResponse(format!("preimage is unusable: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserialize_add_invoice_response() {
        let json = r#"{
            "r_hash": "aNYnlxZDpvl/J8WJV4Jvy6hT7CB3/RDsa5PY5h3rTOw=",
            "payment_request": "lnbcrt500u1p0example",
            "add_index": "7"
        }"#;

        let response = serde_json::from_str::<AddInvoiceResponse>(json).unwrap();

        assert_eq!(response.payment_request, "lnbcrt500u1p0example");
        assert_eq!(
            decode_base64_hash(&response.r_hash).unwrap().to_string(),
            "68d627971643a6f97f27c58957826fcba853ec2077fd10ec6b93d8e61deb4cec"
        );
    }

    #[test]
    fn deserialize_send_payment_response_with_error() {
        let json = r#"{"payment_error": "no route", "payment_preimage": null}"#;

        let response = serde_json::from_str::<SendPaymentResponse>(json).unwrap();

        assert_eq!(response.payment_error, "no route");
    }

    #[test]
    fn deserialize_lookup_invoice_response() {
        let json = r#"{
            "settled": true,
            "r_preimage": "aGVsbG8gd29ybGQsIHlvdSBhcmUgYmVhdXRpZnVsISE=",
            "amt_paid_sat": "50000",
            "state": "SETTLED"
        }"#;

        let response = serde_json::from_str::<LookupInvoiceResponse>(json).unwrap();

        assert!(response.settled);
        let secret = decode_base64_secret(&response.r_preimage.unwrap()).unwrap();
        assert_eq!(
            secret,
            Secret::from(*b"hello world, you are beautiful!!")
        );
    }

    #[test]
    fn reject_short_preimage() {
        let short = base64::encode(b"too short");

        assert!(matches!(
            decode_base64_secret(&short),
            Err(Error::MalformedResponse(_))
        ));
    }
}
