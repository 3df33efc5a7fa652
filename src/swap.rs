//! The swap coordinator: two drivers, one per role, that walk a
//! [`SwapOrder`] through its lifecycle against an escrow ledger and an
//! invoice gateway.
//!
//! The maker issues the hash-locked invoice, funds the escrow under the
//! invoice's payment hash and hands the payment request to the taker.
//! The taker verifies terms end to end before spending anything, pays
//! the invoice, learns the preimage from the settlement and claims the
//! escrow with it. The maker follows its deposit through the ledger's
//! event stream and polls the gateway in between ticks; the taker polls
//! both sides directly. Once a deadline or a timelock has passed, a
//! driver never resumes the happy path, even if the awaited condition
//! shows up late.

use crate::{
    asset,
    escrow::{self, DepositId, EscrowLedger},
    expiries::{CurrentTime, MIN_SAFETY_MARGIN_SECS},
    gateway::{self, AgreedHashFunction, CheckSettled, IssueInvoice, PayInvoice},
    invoice::{DecodeError, PaymentRequest},
    order::{SwapOrder, SwapStatus},
    secret::Secret,
    secret_hash::HashFunction,
    timestamp::Timestamp,
};
use futures::StreamExt;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;

#[derive(Debug, Error)]
pub enum SwapError {
    #[error("escrow verifies claims with {escrow}, the gateway issues {gateway} payment hashes")]
    HashFunctionMismatch {
        escrow: HashFunction,
        gateway: HashFunction,
    },
    #[error("invoice is over {actual}, the agreed amount is {expected}")]
    UnexpectedInvoiceAmount {
        expected: asset::Bitcoin,
        actual: asset::Bitcoin,
    },
    #[error("deposit holds {actual}, the agreed amount is {expected}")]
    UnexpectedDepositAmount {
        expected: asset::Erc20Quantity,
        actual: asset::Erc20Quantity,
    },
    #[error("deposit is claimable by {actual}, not by us ({expected})")]
    WrongClaimer {
        expected: crate::identity::Ethereum,
        actual: crate::identity::Ethereum,
    },
    #[error(
        "deposit expires at {escrow}, invoice at {invoice}: not enough room to claim after paying"
    )]
    UnsafeDeposit { escrow: Timestamp, invoice: Timestamp },
    #[error("gave up after waiting {0:?}")]
    Timeout(Duration),
    #[error("swap expired before completion")]
    Expired,
    #[error("the revealed secret does not hash to the agreed hashlock")]
    SecretMismatch,
    #[error(transparent)]
    Escrow(#[from] escrow::Error),
    #[error(transparent)]
    Gateway(#[from] gateway::Error),
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// Timing knobs for one driver run.
#[derive(Clone, Copy, Debug)]
pub struct RunParams {
    /// How long to sleep between polls of the ledger and the gateway.
    pub poll_interval: Duration,
    /// Wall-clock budget for the whole run.
    pub max_wait: Duration,
}

impl Default for RunParams {
    fn default() -> Self {
        RunParams {
            poll_interval: Duration::from_secs(1),
            max_wait: Duration::from_secs(3600),
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct Deadline {
    at: tokio::time::Instant,
    budget: Duration,
}

impl Deadline {
    fn after(budget: Duration) -> Self {
        Deadline {
            at: tokio::time::Instant::now() + budget,
            budget,
        }
    }

    fn expired(&self) -> bool {
        tokio::time::Instant::now() >= self.at
    }

    fn to_error(self) -> SwapError {
        SwapError::Timeout(self.budget)
    }
}

fn check_hash_functions<C, G>(ledger: &EscrowLedger<C>, gateway: &G) -> Result<(), SwapError>
where
    C: CurrentTime,
    G: AgreedHashFunction,
{
    let escrow = ledger.hash_function();
    let gateway = gateway.hash_function();

    if escrow != gateway {
        return Err(SwapError::HashFunctionMismatch { escrow, gateway });
    }
    Ok(())
}

/// Drive a swap as the maker.
///
/// Issues the invoice, funds the escrow under the invoice's payment
/// hash, sends the payment request to the taker through `request_tx`
/// and then waits for the invoice to settle and the escrow to be
/// claimed, following the deposit through the ledger's event stream.
/// If the run times out or the escrow timelock passes, the deposit is
/// cancelled as soon as the ledger allows it.
pub async fn maker_swap<C, G>(
    order: &mut SwapOrder,
    ledger: &EscrowLedger<C>,
    gateway: &G,
    request_tx: oneshot::Sender<PaymentRequest>,
    params: RunParams,
) -> Result<(), SwapError>
where
    C: CurrentTime + Send + Sync,
    G: AgreedHashFunction + IssueInvoice + CheckSettled + Send + Sync,
{
    check_hash_functions(ledger, gateway)?;

    let expiries = order.expiries().to_absolute(ledger.clock());

    let invoice = gateway
        .issue_invoice(
            order.lightning_amount(),
            format!("swap {}", order.id()),
            order.expiries().invoice(),
        )
        .await?;

    order.record_secret_hash(invoice.payment_hash);
    order.transition_to(SwapStatus::InvoiceIssued);

    let deposit_id = ledger
        .deposit(
            order.maker(),
            order.taker(),
            expiries.escrow,
            invoice.payment_hash,
            order.token_amount(),
        )
        .await?;
    order.transition_to(SwapStatus::EscrowFunded);

    // A dropped receiver means the taker is gone; the timeout path
    // below recovers the deposit.
    let _ = request_tx.send(invoice.payment_request.clone());
    tracing::info!(swap_id = %order.id(), %deposit_id, "escrow funded, payment request sent");

    let deadline = Deadline::after(params.max_wait);
    let mut invoice_settled = false;
    let mut deposit_events = Box::pin(escrow::watch(ledger, deposit_id, params.poll_interval));

    loop {
        tokio::select! {
            event = deposit_events.next() => match event {
                Some(escrow::Event::Claimed { .. }) => {
                    if !invoice_settled {
                        // The claim itself proves the secret was revealed.
                        order.transition_to(SwapStatus::InvoicePaid);
                        order.transition_to(SwapStatus::SecretRevealed);
                    }
                    order.transition_to(SwapStatus::Settled);
                    tracing::info!(swap_id = %order.id(), "swap settled");
                    return Ok(());
                }
                Some(escrow::Event::Cancelled { .. }) => {
                    order.transition_to(SwapStatus::Expired);
                    return Err(SwapError::Expired);
                }
                _ => {}
            },
            _ = tokio::time::sleep(params.poll_interval) => {
                if !invoice_settled {
                    match gateway.check_settled(invoice.payment_hash).await {
                        Ok(Some(outcome)) => {
                            if !ledger
                                .hash_function()
                                .verify(&outcome.secret, invoice.payment_hash)
                            {
                                return Err(SwapError::SecretMismatch);
                            }
                            tracing::info!(swap_id = %order.id(), "invoice settled, secret revealed");
                            invoice_settled = true;
                            order.transition_to(SwapStatus::InvoicePaid);
                            order.transition_to(SwapStatus::SecretRevealed);
                        }
                        Ok(None) => {}
                        Err(e) if e.is_transient() => {
                            tracing::warn!(swap_id = %order.id(), error = %e, "gateway poll failed, retrying");
                        }
                        Err(e) => return Err(e.into()),
                    }
                }

                if ledger.is_expired(deposit_id).await? {
                    let deposit = ledger.get_deposit(deposit_id).await?;
                    if deposit.is_live() {
                        ledger.cancel(deposit_id, order.maker()).await?;
                        order.transition_to(SwapStatus::Expired);
                        tracing::warn!(swap_id = %order.id(), %deposit_id, "timelock passed, deposit recovered");
                        return Err(SwapError::Expired);
                    }
                }
                if deadline.expired() {
                    order.transition_to(SwapStatus::Expired);
                    return Err(deadline.to_error());
                }
            }
        }
    }
}

/// Drive a swap as the taker.
///
/// Verifies the received payment request and the on-ledger deposit
/// against the agreed terms, pays the invoice exactly once, checks the
/// preimage against the hashlock and claims the escrow with it. Nothing
/// is spent until the deposit is confirmed to be claimable on terms
/// that leave time to claim after paying.
pub async fn taker_swap<C, G>(
    order: &mut SwapOrder,
    ledger: &EscrowLedger<C>,
    gateway: &G,
    request_rx: oneshot::Receiver<PaymentRequest>,
    params: RunParams,
) -> Result<Secret, SwapError>
where
    C: CurrentTime + Send + Sync,
    G: AgreedHashFunction + PayInvoice + Send + Sync,
{
    check_hash_functions(ledger, gateway)?;

    let deadline = Deadline::after(params.max_wait);

    let request = tokio::time::timeout(params.max_wait, request_rx)
        .await
        .ok()
        .and_then(|received| received.ok())
        .ok_or_else(|| deadline.to_error())?;

    let decoded = request.decode()?;

    if decoded.amount != order.lightning_amount() {
        return Err(SwapError::UnexpectedInvoiceAmount {
            expected: order.lightning_amount(),
            actual: decoded.amount,
        });
    }

    order.record_secret_hash(decoded.payment_hash);
    order.transition_to(SwapStatus::InvoiceIssued);
    tracing::info!(
        swap_id = %order.id(),
        payment_hash = %decoded.payment_hash,
        "payment request verified, waiting for the escrow"
    );

    let (deposit_id, deposit) = wait_for_deposit(ledger, &decoded, order, &deadline, params).await?;
    verify_deposit_terms(order, &decoded, deposit_id, &deposit)?;
    order.transition_to(SwapStatus::EscrowFunded);

    let outcome = pay_with_retries(gateway, &request, order, &deadline, params).await?;
    order.transition_to(SwapStatus::InvoicePaid);

    if !ledger
        .hash_function()
        .verify(&outcome.secret, decoded.payment_hash)
    {
        return Err(SwapError::SecretMismatch);
    }
    order.transition_to(SwapStatus::SecretRevealed);
    tracing::info!(swap_id = %order.id(), "invoice paid, claiming the escrow");

    ledger.claim(deposit_id, order.taker(), outcome.secret).await?;
    order.transition_to(SwapStatus::Settled);
    tracing::info!(swap_id = %order.id(), %deposit_id, "swap settled");

    Ok(outcome.secret)
}

async fn wait_for_deposit<C>(
    ledger: &EscrowLedger<C>,
    decoded: &crate::invoice::Decoded,
    order: &mut SwapOrder,
    deadline: &Deadline,
    params: RunParams,
) -> Result<(DepositId, escrow::Deposit), SwapError>
where
    C: CurrentTime + Send + Sync,
{
    loop {
        if let Some(found) = ledger.find_deposit(decoded.payment_hash).await {
            return Ok(found);
        }
        if deadline.expired() {
            order.transition_to(SwapStatus::Expired);
            return Err(deadline.to_error());
        }
        tokio::time::sleep(params.poll_interval).await;
    }
}

/// The deposit must be claimable by us, hold the agreed amount and
/// outlive the invoice by the safety margin. An invoice that is paid
/// close to its own expiry still leaves the margin to claim.
fn verify_deposit_terms(
    order: &SwapOrder,
    decoded: &crate::invoice::Decoded,
    deposit_id: DepositId,
    deposit: &escrow::Deposit,
) -> Result<(), SwapError> {
    if deposit.claimer != order.taker() {
        return Err(SwapError::WrongClaimer {
            expected: order.taker(),
            actual: deposit.claimer,
        });
    }
    if deposit.amount != order.token_amount() {
        return Err(SwapError::UnexpectedDepositAmount {
            expected: order.token_amount(),
            actual: deposit.amount,
        });
    }

    let escrow_secs = u32::from(deposit.expiry);
    let invoice_secs = u32::from(decoded.expiry);
    if escrow_secs <= invoice_secs || escrow_secs - invoice_secs < MIN_SAFETY_MARGIN_SECS {
        return Err(SwapError::UnsafeDeposit {
            escrow: deposit.expiry,
            invoice: decoded.expiry,
        });
    }

    tracing::debug!(swap_id = %order.id(), %deposit_id, "deposit matches the agreed terms");
    Ok(())
}

/// Attempt the payment, retrying only while the node is unreachable.
/// A failed payment is authoritative and must not be retried: a retry
/// could double-pay.
async fn pay_with_retries<G>(
    gateway: &G,
    request: &PaymentRequest,
    order: &mut SwapOrder,
    deadline: &Deadline,
    params: RunParams,
) -> Result<crate::invoice::PaymentOutcome, SwapError>
where
    G: PayInvoice + Sync,
{
    loop {
        match gateway.pay_invoice(request).await {
            Ok(outcome) => return Ok(outcome),
            Err(e) if e.is_transient() => {
                if deadline.expired() {
                    order.transition_to(SwapStatus::Expired);
                    return Err(deadline.to_error());
                }
                tracing::warn!(swap_id = %order.id(), error = %e, "payment attempt failed, retrying");
                tokio::time::sleep(params.poll_interval).await;
            }
            Err(e) => {
                order.transition_to(SwapStatus::Cancelled);
                return Err(e.into());
            }
        }
    }
}
