//! Configuration of a swap daemon.
//!
//! [`File`] represents the configuration file as it appears on disk;
//! optional elements are `Option`s so filling in defaults is a
//! dedicated step, performed by [`Settings::from_config_file_and_defaults`].
//! Validation rejects combinations that could never execute a swap,
//! most importantly a hash-function disagreement between the two legs.

use crate::{
    expiries::{self, Expiries},
    identity,
    secret_hash::HashFunction,
    timestamp::RelativeTime,
    Network, Role,
};
use anyhow::Context;
use config as config_rs;
use serde::{Deserialize, Serialize};
use std::{ffi::OsStr, path::Path};
use url::Url;

/// This struct aims to represent the configuration file as it appears
/// on disk.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct File {
    pub role: Option<Role>,
    pub network: Option<Network>,
    pub escrow: Option<Escrow>,
    pub lightning: Option<Lightning>,
    pub expiries: Option<FileExpiries>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Escrow {
    pub hash_function: Option<HashFunction>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Lightning {
    pub lnd_url: Option<Url>,
    /// Hex encoded macaroon authorizing invoice creation and payment.
    pub macaroon: Option<String>,
    /// The public key of our own node, if known ahead of time.
    pub node_id: Option<identity::Lightning>,
    pub hash_function: Option<HashFunction>,
}

/// Expiries as they appear on disk, unvalidated.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct FileExpiries {
    pub escrow_secs: Option<u32>,
    pub invoice_secs: Option<u32>,
}

impl File {
    pub fn read<D>(config_file: D) -> Result<Self, config_rs::ConfigError>
    where
        D: AsRef<OsStr>,
    {
        let config_file = Path::new(&config_file);

        let mut config = config_rs::Config::new();
        config.merge(config_rs::File::from(config_file))?;
        config.try_into()
    }
}

/// Fully resolved runtime settings.
#[derive(Clone, Debug, PartialEq)]
pub struct Settings {
    pub role: Role,
    pub network: Network,
    pub escrow_hash_function: HashFunction,
    pub lnd_url: Url,
    pub macaroon: Option<String>,
    pub node_id: Option<identity::Lightning>,
    pub lightning_hash_function: HashFunction,
    pub expiries: Expiries,
}

fn default_lnd_url() -> Url {
    Url::parse("https://localhost:8080").expect("static string to be a valid url")
}

impl Settings {
    pub fn from_config_file_and_defaults(file: File) -> anyhow::Result<Self> {
        let role = file.role.unwrap_or(Role::Taker);
        let network = file.network.unwrap_or_default();

        let escrow_hash_function = file
            .escrow
            .and_then(|escrow| escrow.hash_function)
            .unwrap_or(HashFunction::Sha256);

        let lightning = file.lightning.unwrap_or(Lightning {
            lnd_url: None,
            macaroon: None,
            node_id: None,
            hash_function: None,
        });
        let lnd_url = lightning.lnd_url.unwrap_or_else(default_lnd_url);
        let lightning_hash_function = lightning.hash_function.unwrap_or(HashFunction::Sha256);

        let expiries = match file.expiries {
            Some(FileExpiries {
                escrow_secs,
                invoice_secs,
            }) => {
                let recommended = Expiries::recommended();
                let escrow = escrow_secs
                    .map(RelativeTime::new)
                    .unwrap_or_else(|| recommended.escrow());
                let invoice = invoice_secs
                    .map(RelativeTime::new)
                    .unwrap_or_else(|| recommended.invoice());
                Expiries::new(escrow, invoice).context("configured expiries are unusable")?
            }
            None => Expiries::recommended(),
        };

        let settings = Settings {
            role,
            network,
            escrow_hash_function,
            lnd_url,
            macaroon: lightning.macaroon,
            node_id: lightning.node_id,
            lightning_hash_function,
            expiries,
        };
        validate(&settings)?;

        Ok(settings)
    }
}

fn validate(settings: &Settings) -> anyhow::Result<()> {
    if settings.escrow_hash_function != settings.lightning_hash_function {
        anyhow::bail!(
            "the escrow leg verifies claims with {} but the lightning leg issues {} payment \
             hashes; no swap between them can settle",
            settings.escrow_hash_function,
            settings.lightning_hash_function
        );
    }

    // Expiries::new already validated the pair; this is a second line
    // for settings constructed by hand.
    if !expiries::is_safe(settings.expiries.escrow(), settings.expiries.invoice()) {
        anyhow::bail!(
            "expiries {}s/{}s violate the timelock ordering rule",
            settings.expiries.escrow(),
            settings.expiries.invoice()
        );
    }

    Ok(())
}
