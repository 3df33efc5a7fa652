//! The escrow ledger, the trust anchor of a swap.
//!
//! Deposits are hash-time-locked: a claim must present the preimage of
//! the deposit's hashlock before the expiration time, a cancellation is
//! only legal to the depositor strictly after it. The ledger enforces
//! these rules independently of the coordinator's good behaviour.
//!
//! All mutations go through a single lock, so operations on the same
//! deposit are linearizable: no two of claim/cancel can both succeed,
//! and a deposit is marked claimed or cancelled before any value moves.
//! The event log is append-only; the claim event carries the revealed
//! preimage and is the mechanism by which the secret becomes public.

use crate::{
    asset::Erc20Quantity,
    expiries::CurrentTime,
    identity,
    secret::Secret,
    secret_hash::{HashFunction, SecretHash},
    timestamp::Timestamp,
};
use futures::Stream;
use genawaiter::sync::Gen;
use sha2::{Digest, Sha256};
use std::{collections::HashMap, fmt, time::Duration};
use thiserror::Error;
use tokio::sync::Mutex;

/// Unique identifier of a deposit.
///
/// Derived as SHA-256(depositor || hashlock || creation timestamp,
/// little-endian seconds). The derivation is deterministic so external
/// monitors can compute the id of a deposit they expect to appear;
/// a second deposit deriving to an existing id is rejected, never
/// overwritten.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DepositId([u8; 32]);

impl DepositId {
    pub fn derive(
        depositor: identity::Ethereum,
        secret_hash: SecretHash,
        created_at: Timestamp,
    ) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(depositor.as_bytes());
        hasher.update(secret_hash.as_raw());
        hasher.update(&created_at.to_bytes());

        let mut id = [0u8; 32];
        id.copy_from_slice(&hasher.finalize());
        DepositId(id)
    }
}

impl fmt::Debug for DepositId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DepositId({})", self)
    }
}

impl fmt::Display for DepositId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(hex::encode(&self.0).as_str())
    }
}

/// One hash-time-locked deposit record.
///
/// `claimed` and `cancelled` are mutually exclusive and each settable
/// exactly once; the record is immutable thereafter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Deposit {
    pub depositor: identity::Ethereum,
    pub claimer: identity::Ethereum,
    pub amount: Erc20Quantity,
    pub expiry: Timestamp,
    pub secret_hash: SecretHash,
    pub created_at: Timestamp,
    pub claimed: bool,
    pub cancelled: bool,
}

impl Deposit {
    pub fn is_live(&self) -> bool {
        !self.claimed && !self.cancelled
    }
}

/// Observable ledger events, forming an append-only audit trail.
#[derive(Clone, Copy, Debug, PartialEq, strum::Display)]
pub enum Event {
    Created {
        id: DepositId,
        depositor: identity::Ethereum,
        claimer: identity::Ethereum,
        amount: Erc20Quantity,
        expiry: Timestamp,
        secret_hash: SecretHash,
    },
    /// Carries the revealed preimage; anyone watching the ledger can
    /// read it and reuse it on the other leg.
    Claimed {
        id: DepositId,
        claimer: identity::Ethereum,
        secret: Secret,
    },
    Cancelled {
        id: DepositId,
        depositor: identity::Ethereum,
    },
}

impl Event {
    pub fn deposit_id(&self) -> DepositId {
        match self {
            Event::Created { id, .. } | Event::Claimed { id, .. } | Event::Cancelled { id, .. } => {
                *id
            }
        }
    }
}

#[derive(Clone, Copy, Debug, Error, PartialEq)]
pub enum Error {
    #[error("invalid parameters: {0}")]
    InvalidParameters(&'static str),
    #[error("deposit {0} already exists")]
    DuplicateDeposit(DepositId),
    #[error("deposit {0} not found")]
    DepositNotFound(DepositId),
    #[error("deposit {0} was already claimed")]
    AlreadyClaimed(DepositId),
    #[error("deposit {0} was already cancelled")]
    AlreadyCancelled(DepositId),
    #[error("caller is neither the claimer nor the depositor of deposit {0}")]
    Unauthorized(DepositId),
    #[error("deposit {0} expired at {1}, claims are no longer possible")]
    Expired(DepositId, Timestamp),
    #[error("deposit {0} does not expire until {1}")]
    NotYetExpired(DepositId, Timestamp),
    #[error("the provided secret does not hash to the hashlock of deposit {0}")]
    InvalidSecret(DepositId),
}

#[derive(Debug, Default)]
struct Inner {
    deposits: HashMap<DepositId, Deposit>,
    balances: HashMap<identity::Ethereum, Erc20Quantity>,
    log: Vec<Event>,
}

impl Inner {
    fn credit(&mut self, account: identity::Ethereum, amount: Erc20Quantity) {
        let balance = self
            .balances
            .entry(account)
            .or_insert_with(Erc20Quantity::zero);
        if balance.checked_add(amount).is_none() {
            tracing::warn!(%account, "balance overflow, capping at the maximum quantity");
        }
        *balance = balance.saturating_add(amount);
    }
}

/// The in-process escrow store.
///
/// Which hash function verifies claims is an explicit constructor
/// argument; it must equal the invoice gateway's payment-hash
/// algorithm, which the coordinator checks before driving a swap.
#[derive(Debug)]
pub struct EscrowLedger<C> {
    hash_function: HashFunction,
    clock: C,
    inner: Mutex<Inner>,
}

impl<C> EscrowLedger<C>
where
    C: CurrentTime,
{
    pub fn new(hash_function: HashFunction, clock: C) -> Self {
        EscrowLedger {
            hash_function,
            clock,
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn hash_function(&self) -> HashFunction {
        self.hash_function
    }

    /// The clock this ledger judges expiries by. Coordinators compute
    /// absolute timelocks against the same clock to avoid disagreement
    /// over whether a window is still open.
    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Create a deposit, moving `amount` into the ledger's custody.
    pub async fn deposit(
        &self,
        depositor: identity::Ethereum,
        claimer: identity::Ethereum,
        expiry: Timestamp,
        secret_hash: SecretHash,
        amount: Erc20Quantity,
    ) -> Result<DepositId, Error> {
        if amount.is_zero() {
            return Err(Error::InvalidParameters("amount must be positive"));
        }
        if secret_hash.is_zero() {
            return Err(Error::InvalidParameters("hashlock must be non-zero"));
        }

        let now = self.clock.current_time();
        if expiry <= now {
            return Err(Error::InvalidParameters(
                "expiration time must be strictly in the future",
            ));
        }

        let id = DepositId::derive(depositor, secret_hash, now);

        let mut inner = self.inner.lock().await;
        if inner.deposits.contains_key(&id) {
            return Err(Error::DuplicateDeposit(id));
        }

        inner.deposits.insert(id, Deposit {
            depositor,
            claimer,
            amount,
            expiry,
            secret_hash,
            created_at: now,
            claimed: false,
            cancelled: false,
        });
        inner.log.push(Event::Created {
            id,
            depositor,
            claimer,
            amount,
            expiry,
            secret_hash,
        });

        tracing::info!(%id, %depositor, %claimer, %amount, %expiry, "deposit created");

        Ok(id)
    }

    /// Claim a deposit by revealing the preimage of its hashlock.
    ///
    /// The deposit is marked claimed before the claimer is credited, so
    /// a reentrant call observes the final state rather than an
    /// in-between one.
    pub async fn claim(
        &self,
        id: DepositId,
        caller: identity::Ethereum,
        secret: Secret,
    ) -> Result<(), Error> {
        let mut inner = self.inner.lock().await;

        let (claimer, amount) = {
            let deposit = inner.deposits.get_mut(&id).ok_or(Error::DepositNotFound(id))?;

            if deposit.claimed {
                return Err(Error::AlreadyClaimed(id));
            }
            if deposit.cancelled {
                return Err(Error::AlreadyCancelled(id));
            }
            if caller != deposit.claimer {
                return Err(Error::Unauthorized(id));
            }

            let now = self.clock.current_time();
            if now > deposit.expiry {
                return Err(Error::Expired(id, deposit.expiry));
            }
            if !self.hash_function.verify(&secret, deposit.secret_hash) {
                return Err(Error::InvalidSecret(id));
            }

            deposit.claimed = true;
            (deposit.claimer, deposit.amount)
        };

        inner.credit(claimer, amount);
        inner.log.push(Event::Claimed {
            id,
            claimer,
            secret,
        });

        tracing::info!(%id, %claimer, %amount, "deposit claimed, secret is now public");

        Ok(())
    }

    /// Return a deposit to its depositor, legal strictly after expiry.
    pub async fn cancel(&self, id: DepositId, caller: identity::Ethereum) -> Result<(), Error> {
        let mut inner = self.inner.lock().await;

        let (depositor, amount) = {
            let deposit = inner.deposits.get_mut(&id).ok_or(Error::DepositNotFound(id))?;

            if deposit.claimed {
                return Err(Error::AlreadyClaimed(id));
            }
            if deposit.cancelled {
                return Err(Error::AlreadyCancelled(id));
            }
            if caller != deposit.depositor {
                return Err(Error::Unauthorized(id));
            }

            let now = self.clock.current_time();
            if now <= deposit.expiry {
                return Err(Error::NotYetExpired(id, deposit.expiry));
            }

            deposit.cancelled = true;
            (deposit.depositor, deposit.amount)
        };

        inner.credit(depositor, amount);
        inner.log.push(Event::Cancelled { id, depositor });

        tracing::info!(%id, %depositor, %amount, "deposit cancelled, funds returned");

        Ok(())
    }

    pub async fn get_deposit(&self, id: DepositId) -> Result<Deposit, Error> {
        let inner = self.inner.lock().await;
        inner
            .deposits
            .get(&id)
            .copied()
            .ok_or(Error::DepositNotFound(id))
    }

    pub async fn is_expired(&self, id: DepositId) -> Result<bool, Error> {
        let deposit = self.get_deposit(id).await?;
        Ok(self.clock.current_time() > deposit.expiry)
    }

    /// Look up the live deposit locked to the given hashlock, if any.
    ///
    /// Watchers that do not know a deposit's creation time (and hence
    /// cannot derive its id) key off the hashlock instead.
    pub async fn find_deposit(&self, secret_hash: SecretHash) -> Option<(DepositId, Deposit)> {
        let inner = self.inner.lock().await;
        inner
            .deposits
            .iter()
            .find(|(_, deposit)| deposit.secret_hash == secret_hash && deposit.is_live())
            .map(|(id, deposit)| (*id, *deposit))
    }

    /// Funds paid out to `account` through claims and cancellations.
    pub async fn balance_of(&self, account: identity::Ethereum) -> Erc20Quantity {
        let inner = self.inner.lock().await;
        inner
            .balances
            .get(&account)
            .copied()
            .unwrap_or_else(Erc20Quantity::zero)
    }

    /// Replay the event log from the given cursor. Returns the events
    /// and the next cursor.
    pub async fn events_from(&self, cursor: usize) -> (Vec<Event>, usize) {
        let inner = self.inner.lock().await;
        let events = inner.log[cursor.min(inner.log.len())..].to_vec();
        (events, inner.log.len())
    }
}

/// Stream the events of a single deposit.
///
/// Replays already-logged events first, then polls for new ones, so a
/// late subscriber does not depend on event ordering. The stream ends
/// after the terminal event (claimed or cancelled).
pub fn watch<'a, C>(
    ledger: &'a EscrowLedger<C>,
    deposit_id: DepositId,
    poll_interval: Duration,
) -> impl Stream<Item = Event> + 'a
where
    C: CurrentTime + Send + Sync,
{
    Gen::new(|co| async move {
        let mut cursor = 0;

        loop {
            let (events, next) = ledger.events_from(cursor).await;
            cursor = next;

            for event in events {
                if event.deposit_id() != deposit_id {
                    continue;
                }

                let terminal =
                    matches!(event, Event::Claimed { .. } | Event::Cancelled { .. });

                co.yield_(event).await;

                if terminal {
                    return;
                }
            }

            tokio::time::sleep(poll_interval).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    };

    /// A clock the test advances by hand.
    #[derive(Clone, Debug, Default)]
    struct ManualClock(Arc<AtomicU32>);

    impl ManualClock {
        fn at(secs: u32) -> Self {
            ManualClock(Arc::new(AtomicU32::new(secs)))
        }

        fn advance_to(&self, secs: u32) {
            self.0.store(secs, Ordering::SeqCst);
        }
    }

    impl CurrentTime for ManualClock {
        fn current_time(&self) -> Timestamp {
            Timestamp::from(self.0.load(Ordering::SeqCst))
        }
    }

    fn depositor() -> identity::Ethereum {
        identity::Ethereum::from([1u8; 20])
    }

    fn claimer() -> identity::Ethereum {
        identity::Ethereum::from([2u8; 20])
    }

    fn secret() -> Secret {
        Secret::from(*b"hello world, you are beautiful!!")
    }

    fn ledger_at(secs: u32) -> (EscrowLedger<ManualClock>, ManualClock) {
        let clock = ManualClock::at(secs);
        (EscrowLedger::new(HashFunction::Sha256, clock.clone()), clock)
    }

    async fn funded_deposit(ledger: &EscrowLedger<ManualClock>) -> DepositId {
        let secret_hash = HashFunction::Sha256.hash(&secret());
        ledger
            .deposit(
                depositor(),
                claimer(),
                Timestamp::from(4600),
                secret_hash,
                Erc20Quantity::from_wei(15_000_000_000_000_000),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn deposit_then_claim_with_correct_secret_succeeds_exactly_once() {
        let (ledger, _) = ledger_at(1000);
        let id = funded_deposit(&ledger).await;

        ledger.claim(id, claimer(), secret()).await.unwrap();

        assert_eq!(
            ledger.balance_of(claimer()).await,
            Erc20Quantity::from_wei(15_000_000_000_000_000)
        );
        assert_eq!(
            ledger.claim(id, claimer(), secret()).await,
            Err(Error::AlreadyClaimed(id))
        );
    }

    #[tokio::test]
    async fn balances_saturate_instead_of_panicking_on_overflow() {
        let (ledger, _) = ledger_at(1000);
        let first = secret();
        let second = Secret::from(*b"hello world, you are despicable!");

        let id_max = ledger
            .deposit(
                depositor(),
                claimer(),
                Timestamp::from(4600),
                HashFunction::Sha256.hash(&first),
                Erc20Quantity::from_wei(u128::MAX),
            )
            .await
            .unwrap();
        let id_one = ledger
            .deposit(
                depositor(),
                claimer(),
                Timestamp::from(4600),
                HashFunction::Sha256.hash(&second),
                Erc20Quantity::from_wei(1),
            )
            .await
            .unwrap();

        ledger.claim(id_max, claimer(), first).await.unwrap();
        ledger.claim(id_one, claimer(), second).await.unwrap();

        assert_eq!(
            ledger.balance_of(claimer()).await,
            Erc20Quantity::from_wei(u128::MAX)
        );
    }

    #[tokio::test]
    async fn cancel_after_claim_fails() {
        let (ledger, clock) = ledger_at(1000);
        let id = funded_deposit(&ledger).await;

        ledger.claim(id, claimer(), secret()).await.unwrap();
        clock.advance_to(5000);

        assert_eq!(
            ledger.cancel(id, depositor()).await,
            Err(Error::AlreadyClaimed(id))
        );
    }

    #[tokio::test]
    async fn claim_with_wrong_secret_fails_and_leaves_deposit_unclaimed() {
        let (ledger, _) = ledger_at(1000);
        let id = funded_deposit(&ledger).await;

        let wrong = Secret::from(*b"hello world, you are despicable!");

        assert_eq!(
            ledger.claim(id, claimer(), wrong).await,
            Err(Error::InvalidSecret(id))
        );

        let deposit = ledger.get_deposit(id).await.unwrap();
        assert!(!deposit.claimed);
        assert_eq!(ledger.balance_of(claimer()).await, Erc20Quantity::zero());
    }

    #[tokio::test]
    async fn claim_by_anyone_but_the_claimer_fails() {
        let (ledger, _) = ledger_at(1000);
        let id = funded_deposit(&ledger).await;

        assert_eq!(
            ledger.claim(id, depositor(), secret()).await,
            Err(Error::Unauthorized(id))
        );
    }

    #[tokio::test]
    async fn cancel_before_expiry_fails_with_not_yet_expired() {
        let (ledger, _) = ledger_at(1000);
        let id = funded_deposit(&ledger).await;

        assert_eq!(
            ledger.cancel(id, depositor()).await,
            Err(Error::NotYetExpired(id, Timestamp::from(4600)))
        );
    }

    #[tokio::test]
    async fn cancel_strictly_after_expiry_returns_the_funds() {
        let (ledger, clock) = ledger_at(1000);
        let id = funded_deposit(&ledger).await;

        clock.advance_to(4601);
        ledger.cancel(id, depositor()).await.unwrap();

        assert_eq!(
            ledger.balance_of(depositor()).await,
            Erc20Quantity::from_wei(15_000_000_000_000_000)
        );
        assert_eq!(
            ledger.cancel(id, depositor()).await,
            Err(Error::AlreadyCancelled(id))
        );
    }

    #[tokio::test]
    async fn claim_after_expiry_fails_even_with_the_correct_secret() {
        let (ledger, clock) = ledger_at(1000);
        let id = funded_deposit(&ledger).await;

        clock.advance_to(4601);

        assert_eq!(
            ledger.claim(id, claimer(), secret()).await,
            Err(Error::Expired(id, Timestamp::from(4600)))
        );
    }

    #[tokio::test]
    async fn cancel_by_anyone_but_the_depositor_fails() {
        let (ledger, clock) = ledger_at(1000);
        let id = funded_deposit(&ledger).await;

        clock.advance_to(4601);

        assert_eq!(
            ledger.cancel(id, claimer()).await,
            Err(Error::Unauthorized(id))
        );
    }

    #[tokio::test]
    async fn duplicate_deposit_is_rejected_not_overwritten() {
        let (ledger, _) = ledger_at(1000);
        let id = funded_deposit(&ledger).await;

        // Same depositor, hashlock and creation time derive the same id.
        let secret_hash = HashFunction::Sha256.hash(&secret());
        let result = ledger
            .deposit(
                depositor(),
                claimer(),
                Timestamp::from(9999),
                secret_hash,
                Erc20Quantity::from_wei(1),
            )
            .await;

        assert_eq!(result, Err(Error::DuplicateDeposit(id)));

        let deposit = ledger.get_deposit(id).await.unwrap();
        assert_eq!(
            deposit.amount,
            Erc20Quantity::from_wei(15_000_000_000_000_000)
        );
    }

    #[tokio::test]
    async fn deposit_validates_its_parameters() {
        let (ledger, _) = ledger_at(1000);
        let secret_hash = HashFunction::Sha256.hash(&secret());

        let zero_amount = ledger
            .deposit(
                depositor(),
                claimer(),
                Timestamp::from(4600),
                secret_hash,
                Erc20Quantity::zero(),
            )
            .await;
        assert!(matches!(zero_amount, Err(Error::InvalidParameters(_))));

        let zero_hashlock = ledger
            .deposit(
                depositor(),
                claimer(),
                Timestamp::from(4600),
                SecretHash::from([0u8; 32]),
                Erc20Quantity::from_wei(1),
            )
            .await;
        assert!(matches!(zero_hashlock, Err(Error::InvalidParameters(_))));

        let past_expiry = ledger
            .deposit(
                depositor(),
                claimer(),
                Timestamp::from(1000),
                secret_hash,
                Erc20Quantity::from_wei(1),
            )
            .await;
        assert!(matches!(past_expiry, Err(Error::InvalidParameters(_))));
    }

    #[tokio::test]
    async fn keccak_ledger_rejects_sha256_preimage_claims() {
        let clock = ManualClock::at(1000);
        let ledger = EscrowLedger::new(HashFunction::Keccak256, clock);

        // Hashlock computed with the wrong function for this ledger.
        let secret_hash = HashFunction::Sha256.hash(&secret());
        let id = ledger
            .deposit(
                depositor(),
                claimer(),
                Timestamp::from(4600),
                secret_hash,
                Erc20Quantity::from_wei(1),
            )
            .await
            .unwrap();

        assert_eq!(
            ledger.claim(id, claimer(), secret()).await,
            Err(Error::InvalidSecret(id))
        );
    }

    #[tokio::test]
    async fn claim_event_carries_the_revealed_secret() {
        let (ledger, _) = ledger_at(1000);
        let id = funded_deposit(&ledger).await;

        ledger.claim(id, claimer(), secret()).await.unwrap();

        let (events, _) = ledger.events_from(0).await;
        let revealed = events.iter().find_map(|event| match event {
            Event::Claimed { secret, .. } => Some(*secret),
            _ => None,
        });

        assert_eq!(revealed, Some(secret()));
    }

    #[tokio::test]
    async fn watch_replays_history_and_ends_on_the_terminal_event() {
        let (ledger, _) = ledger_at(1000);
        let id = funded_deposit(&ledger).await;
        ledger.claim(id, claimer(), secret()).await.unwrap();

        let events = watch(&ledger, id, Duration::from_millis(10))
            .collect::<Vec<_>>()
            .await;

        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], Event::Created { .. }));
        assert!(matches!(events[1], Event::Claimed { .. }));
    }

    #[tokio::test]
    async fn find_deposit_ignores_settled_deposits() {
        let (ledger, _) = ledger_at(1000);
        let id = funded_deposit(&ledger).await;
        let secret_hash = HashFunction::Sha256.hash(&secret());

        assert!(ledger.find_deposit(secret_hash).await.is_some());

        ledger.claim(id, claimer(), secret()).await.unwrap();

        assert!(ledger.find_deposit(secret_hash).await.is_none());
    }
}
