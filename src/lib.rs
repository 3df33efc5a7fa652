#![warn(
    unused_extern_crates,
    missing_debug_implementations,
    missing_copy_implementations,
    rust_2018_idioms,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::fallible_impl_from,
    clippy::cast_precision_loss,
    clippy::cast_possible_wrap,
    clippy::print_stdout,
    clippy::dbg_macro
)]
#![forbid(unsafe_code)]

pub mod asset;
pub mod config;
pub mod escrow;
pub mod expiries;
pub mod gateway;
pub mod identity;
pub mod invoice;
pub mod order;
mod secret;
mod secret_hash;
pub mod swap;
mod timestamp;
pub mod trace;

pub use self::{
    order::{Direction, SwapId, SwapOrder, SwapStatus},
    secret::Secret,
    secret_hash::{HashFunction, SecretHash},
    timestamp::{RelativeTime, Timestamp},
};

use serde::{Deserialize, Serialize};

/// The role a party plays in a swap.
///
/// The maker gives up the escrowed token and receives bitcoin over
/// Lightning; the taker pays the Lightning invoice and claims the
/// escrow. By convention the maker's Lightning node holds the payment
/// preimage, hence the taker learns the secret through the settlement
/// of their payment.
#[derive(
    Clone,
    Copy,
    Debug,
    strum::Display,
    strum::EnumString,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
)]
pub enum Role {
    Maker,
    Taker,
}

/// The various networks a swap can be executed on.
///
/// Both legs of a swap must refer to the same network; the payment
/// request envelope carries it so a taker can reject an invoice issued
/// for a different network before acting on it.
#[derive(
    Debug,
    Clone,
    Copy,
    strum::Display,
    strum::EnumString,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Main,
    Test,
    Dev,
}

impl Default for Network {
    fn default() -> Self {
        Network::Main
    }
}
