//! Expiry times for the two legs of a swap.
//!
//! Atomicity rests on the relationship between the two timelocks: the
//! escrow leg is funded first and must carry the strictly longer
//! cancellation window, because whoever funds second reveals the secret
//! by claiming and thereby exposes it to both legs at once. The first
//! funder needs enough remaining time to use the now-public secret on
//! its own leg before its cancellation window opens.

use crate::timestamp::{RelativeTime, Timestamp};
use serde::{Deserialize, Serialize};
use std::convert::TryFrom;
use thiserror::Error;

/// Current time as a UNIX timestamp from the perspective of the
/// implementer.
///
/// The escrow ledger and the coordinator both read time through this
/// trait so tests can drive the clock by hand.
pub trait CurrentTime {
    fn current_time(&self) -> Timestamp;
}

/// Wall-clock time.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl CurrentTime for SystemClock {
    fn current_time(&self) -> Timestamp {
        Timestamp::now()
    }
}

impl<C> CurrentTime for &C
where
    C: CurrentTime,
{
    fn current_time(&self) -> Timestamp {
        C::current_time(self)
    }
}

/// The minimum margin, in seconds, by which the escrow expiry must
/// exceed the invoice expiry.
///
/// The taker pays the invoice shortly before its expiry at the latest;
/// the margin is the time they are guaranteed to still have for
/// claiming the escrow afterwards.
pub const MIN_SAFETY_MARGIN_SECS: u32 = 600;

/// A validated pair of relative expiry times.
///
/// `escrow` applies to the leg funded first, `invoice` to the leg
/// funded second. Construction fails rather than produce a pair that
/// breaks the ordering rule.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "UncheckedExpiries")]
pub struct Expiries {
    escrow: RelativeTime,
    invoice: RelativeTime,
}

impl Expiries {
    pub fn new(escrow: RelativeTime, invoice: RelativeTime) -> Result<Self, UnsafeExpiries> {
        if !is_safe(escrow, invoice) {
            return Err(UnsafeExpiries { escrow, invoice });
        }

        Ok(Expiries { escrow, invoice })
    }

    /// Two hours for the escrow leg, one hour for the invoice leg.
    ///
    /// An hour of invoice validity keeps the taker from locking funds
    /// so late that the escrow window no longer protects them; an hour
    /// of margin on top covers the claim after settlement.
    pub fn recommended() -> Self {
        Expiries {
            escrow: RelativeTime::new(7200),
            invoice: RelativeTime::new(3600),
        }
    }

    pub fn escrow(&self) -> RelativeTime {
        self.escrow
    }

    pub fn invoice(&self) -> RelativeTime {
        self.invoice
    }

    /// Convert relative expiries to absolute ones, anchored at the
    /// current time of the given clock.
    pub fn to_absolute(&self, clock: &impl CurrentTime) -> AbsoluteExpiries {
        let now = clock.current_time();

        AbsoluteExpiries {
            escrow: now.plus(self.escrow.into()),
            invoice: now.plus(self.invoice.into()),
        }
    }
}

/// The serde-facing shape of [`Expiries`], validated on the way in.
#[derive(Deserialize)]
struct UncheckedExpiries {
    escrow: RelativeTime,
    invoice: RelativeTime,
}

impl TryFrom<UncheckedExpiries> for Expiries {
    type Error = UnsafeExpiries;

    fn try_from(unchecked: UncheckedExpiries) -> Result<Self, Self::Error> {
        Expiries::new(unchecked.escrow, unchecked.invoice)
    }
}

/// True if the pair honours the ordering rule: the leg funded first
/// strictly outlives the leg funded second, with margin to spare.
pub fn is_safe(escrow: RelativeTime, invoice: RelativeTime) -> bool {
    let escrow_secs = u32::from(escrow);
    let invoice_secs = u32::from(invoice);

    invoice_secs > 0
        && escrow_secs > invoice_secs
        && escrow_secs - invoice_secs >= MIN_SAFETY_MARGIN_SECS
}

#[derive(Clone, Copy, Debug, Error, PartialEq)]
#[error(
    "unsafe expiry pair: the escrow window ({escrow}s) must exceed the invoice window \
     ({invoice}s) by at least {}s",
    MIN_SAFETY_MARGIN_SECS
)]
pub struct UnsafeExpiries {
    pub escrow: RelativeTime,
    pub invoice: RelativeTime,
}

/// Absolute expiries for one swap execution.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AbsoluteExpiries {
    pub escrow: Timestamp,
    pub invoice: Timestamp,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn recommended_expiries_are_safe() {
        let expiries = Expiries::recommended();

        assert!(is_safe(expiries.escrow(), expiries.invoice()));
    }

    #[test]
    fn equal_windows_are_rejected() {
        let result = Expiries::new(RelativeTime::new(3600), RelativeTime::new(3600));

        assert!(result.is_err());
    }

    #[test]
    fn inverted_windows_are_rejected() {
        let result = Expiries::new(RelativeTime::new(1800), RelativeTime::new(3600));

        assert!(result.is_err());
    }

    #[test]
    fn absolute_expiries_are_anchored_at_now() {
        struct FixedClock;

        impl CurrentTime for FixedClock {
            fn current_time(&self) -> Timestamp {
                Timestamp::from(1000)
            }
        }

        let expiries = Expiries::new(RelativeTime::new(7200), RelativeTime::new(3600)).unwrap();
        let absolute = expiries.to_absolute(&FixedClock);

        assert_eq!(absolute.escrow, Timestamp::from(8200));
        assert_eq!(absolute.invoice, Timestamp::from(4600));
    }

    proptest! {
        /// For any constructible pair, the cancellation window of the
        /// leg funded first strictly exceeds that of the leg funded
        /// second.
        #[test]
        fn constructible_pairs_always_honour_the_ordering_rule(
            escrow in 0u32..1_000_000,
            invoice in 0u32..1_000_000,
        ) {
            if let Ok(expiries) = Expiries::new(
                RelativeTime::new(escrow),
                RelativeTime::new(invoice),
            ) {
                prop_assert!(u32::from(expiries.escrow()) > u32::from(expiries.invoice()));
                prop_assert!(
                    u32::from(expiries.escrow()) - u32::from(expiries.invoice())
                        >= MIN_SAFETY_MARGIN_SECS
                );
            }
        }

        /// Construction never accepts a pair the predicate rejects.
        #[test]
        fn construction_and_predicate_agree(
            escrow in 0u32..1_000_000,
            invoice in 0u32..1_000_000,
        ) {
            let escrow = RelativeTime::new(escrow);
            let invoice = RelativeTime::new(invoice);

            prop_assert_eq!(
                Expiries::new(escrow, invoice).is_ok(),
                is_safe(escrow, invoice)
            );
        }
    }
}
