use crate::{
    asset,
    expiries::Expiries,
    identity,
    secret_hash::SecretHash,
    timestamp::Timestamp,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct SwapId(Uuid);

impl SwapId {
    pub fn random() -> Self {
        SwapId(Uuid::new_v4())
    }
}

impl fmt::Display for SwapId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Which asset the party driving the swap gives up.
///
/// Descriptive only: it records the economic orientation of the order
/// for display and persistence. Execution order is fixed by role, not
/// direction; the escrow leg always funds first and the invoice is
/// always paid second, whichever way the assets flow.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum Direction {
    TokenToLightning,
    LightningToToken,
}

/// Lifecycle of a swap order.
///
/// Terminal states are `Settled`, `Cancelled` and `Expired`; an order
/// never leaves a terminal state.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum SwapStatus {
    Created,
    InvoiceIssued,
    /// The first-funded leg: the deposit is on the ledger.
    EscrowFunded,
    /// The second-funded leg: the invoice has been paid.
    InvoicePaid,
    SecretRevealed,
    Settled,
    Cancelled,
    Expired,
}

impl SwapStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SwapStatus::Settled | SwapStatus::Cancelled | SwapStatus::Expired
        )
    }
}

/// The agreed terms of one swap plus its progress.
///
/// Terms are fixed at creation. The hashlock is learnt from the issued
/// invoice and recorded exactly once; it is never generated here.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SwapOrder {
    id: SwapId,
    direction: Direction,
    token_amount: asset::Erc20Quantity,
    lightning_amount: asset::Bitcoin,
    maker: identity::Ethereum,
    taker: identity::Ethereum,
    expiries: Expiries,
    created_at: Timestamp,
    secret_hash: Option<SecretHash>,
    status: SwapStatus,
}

impl SwapOrder {
    pub fn new(
        direction: Direction,
        token_amount: asset::Erc20Quantity,
        lightning_amount: asset::Bitcoin,
        maker: identity::Ethereum,
        taker: identity::Ethereum,
        expiries: Expiries,
    ) -> Self {
        SwapOrder {
            id: SwapId::random(),
            direction,
            token_amount,
            lightning_amount,
            maker,
            taker,
            expiries,
            created_at: Timestamp::now(),
            secret_hash: None,
            status: SwapStatus::Created,
        }
    }

    pub fn id(&self) -> SwapId {
        self.id
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn token_amount(&self) -> asset::Erc20Quantity {
        self.token_amount
    }

    pub fn lightning_amount(&self) -> asset::Bitcoin {
        self.lightning_amount
    }

    pub fn maker(&self) -> identity::Ethereum {
        self.maker
    }

    pub fn taker(&self) -> identity::Ethereum {
        self.taker
    }

    pub fn expiries(&self) -> Expiries {
        self.expiries
    }

    pub fn created_at(&self) -> Timestamp {
        self.created_at
    }

    pub fn secret_hash(&self) -> Option<SecretHash> {
        self.secret_hash
    }

    pub fn status(&self) -> SwapStatus {
        self.status
    }

    /// Record the hashlock learnt from the counterparty's invoice.
    ///
    /// Returns `false` without modifying the order if a hashlock was
    /// already recorded.
    pub(crate) fn record_secret_hash(&mut self, secret_hash: SecretHash) -> bool {
        if self.secret_hash.is_some() {
            return false;
        }
        self.secret_hash = Some(secret_hash);
        true
    }

    /// Advance the lifecycle. Transitions out of a terminal state are
    /// ignored.
    pub(crate) fn transition_to(&mut self, status: SwapStatus) {
        if self.status.is_terminal() {
            tracing::warn!(
                swap_id = %self.id,
                current = %self.status,
                attempted = %status,
                "ignoring transition out of terminal state"
            );
            return;
        }
        tracing::debug!(swap_id = %self.id, from = %self.status, to = %status, "swap transition");
        self.status = status;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secret_hash::HashFunction;
    use crate::Secret;
    use std::str::FromStr;

    fn order() -> SwapOrder {
        SwapOrder::new(
            Direction::TokenToLightning,
            asset::Erc20Quantity::from_wei(15_000_000_000_000_000u128),
            asset::Bitcoin::from_sat(50_000),
            identity::Ethereum::from_str("0x00a329c0648769a73afac7f9381e08fb43dbea72").unwrap(),
            identity::Ethereum::from_str("0xc5549e335b2786520f4c5d706c76c9ee69d0a028").unwrap(),
            Expiries::recommended(),
        )
    }

    #[test]
    fn hashlock_is_recorded_exactly_once() {
        let mut order = order();
        let first = HashFunction::Sha256.hash(&Secret::from([1u8; 32]));
        let second = HashFunction::Sha256.hash(&Secret::from([2u8; 32]));

        assert!(order.record_secret_hash(first));
        assert!(!order.record_secret_hash(second));
        assert_eq!(order.secret_hash(), Some(first));
    }

    #[test]
    fn terminal_states_are_sticky() {
        let mut order = order();

        order.transition_to(SwapStatus::InvoiceIssued);
        order.transition_to(SwapStatus::Expired);
        order.transition_to(SwapStatus::Settled);

        assert_eq!(order.status(), SwapStatus::Expired);
    }

    #[test]
    fn fresh_orders_are_distinct() {
        assert_ne!(order().id(), order().id());
    }

    #[test]
    fn status_round_trips_through_strings() {
        let status = SwapStatus::SecretRevealed;

        let rendered = status.to_string();

        assert_eq!(rendered, "secret-revealed");
        assert_eq!(SwapStatus::from_str(&rendered).unwrap(), status);
    }
}
