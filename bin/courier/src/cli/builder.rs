// This file is part of Courier.
//
// Courier is free software: you can redistribute it and/or modify it under the
// terms of the GNU Lesser General Public License as published by the Free Software
// Foundation, either version 3 of the License, or (at your option) any later version.
//
// Courier is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY;
// without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.
// See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with Courier.
// If not, see https://www.gnu.org/licenses/.

use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
    time::Duration,
};

use alloy_primitives::{utils::parse_ether, Address, U256};
use alloy_signer_local::{
    coins_bip39::{English, Mnemonic},
    MnemonicBuilder, PrivateKeySigner,
};
use anyhow::{bail, Context};
use clap::Args;
use courier_builder::{BuilderEvent, BuilderSettings, SkipReason, SubmissionSettings};
use courier_utils::{emit::WithEntryPoint, retry::RetryOpts};
use secrecy::{ExposeSecret, SecretString};

use super::parse_secret;

/// CLI options for batch building and submission
#[derive(Args, Debug)]
#[command(next_help_heading = "BUILDER")]
pub struct BuilderArgs {
    /// Receiver of the collected fees
    #[arg(
        long = "builder.beneficiary",
        name = "builder.beneficiary",
        env = "BUILDER_BENEFICIARY"
    )]
    pub beneficiary: Option<Address>,

    /// Private key of the account sending batches
    #[arg(
        long = "builder.private_key",
        name = "builder.private_key",
        env = "BUILDER_PRIVATE_KEY",
        value_parser = parse_secret,
    )]
    pub private_key: Option<SecretString>,

    /// Mnemonic of the account sending batches, first derived key is used
    #[arg(
        long = "builder.mnemonic",
        name = "builder.mnemonic",
        env = "BUILDER_MNEMONIC",
        value_parser = parse_secret,
    )]
    pub mnemonic: Option<SecretString>,

    /// File holding the mnemonic of the account sending batches
    #[arg(
        long = "builder.mnemonic_file",
        name = "builder.mnemonic_file",
        env = "BUILDER_MNEMONIC_FILE"
    )]
    pub mnemonic_file: Option<PathBuf>,

    /// Signer balance, in ether, under which fees are paid to the signer instead
    #[arg(
        long = "builder.min_balance",
        name = "builder.min_balance",
        env = "BUILDER_MIN_BALANCE",
        value_parser = parse_ether,
        default_value = "0.1"
    )]
    pub min_balance: U256,

    #[arg(
        long = "builder.max_batch_gas",
        name = "builder.max_batch_gas",
        env = "BUILDER_MAX_BATCH_GAS",
        default_value = "10000000"
    )]
    pub max_batch_gas: u128,

    #[arg(
        long = "builder.max_ops_per_batch",
        name = "builder.max_ops_per_batch",
        env = "BUILDER_MAX_OPS_PER_BATCH",
        default_value = "16"
    )]
    pub max_ops_per_batch: usize,

    /// Number of pool entries considered per build
    #[arg(
        long = "builder.max_candidates",
        name = "builder.max_candidates",
        env = "BUILDER_MAX_CANDIDATES",
        default_value = "64"
    )]
    pub max_candidates: usize,

    /// Percentage added to the summed gas of a batch for its transaction gas limit
    #[arg(
        long = "builder.gas_limit_buffer_percent",
        name = "builder.gas_limit_buffer_percent",
        env = "BUILDER_GAS_LIMIT_BUFFER_PERCENT",
        default_value = "10"
    )]
    pub gas_limit_buffer_percent: u32,

    /// Interval between submission cycles
    #[arg(
        long = "builder.poll_interval_millis",
        name = "builder.poll_interval_millis",
        env = "BUILDER_POLL_INTERVAL_MILLIS",
        default_value = "1000"
    )]
    pub poll_interval_millis: u64,

    #[arg(
        long = "builder.receipt_poll_interval_millis",
        name = "builder.receipt_poll_interval_millis",
        env = "BUILDER_RECEIPT_POLL_INTERVAL_MILLIS",
        default_value = "1000"
    )]
    pub receipt_poll_interval_millis: u64,

    /// Time to wait for a receipt before a batch is treated as unresolved
    #[arg(
        long = "builder.receipt_timeout_secs",
        name = "builder.receipt_timeout_secs",
        env = "BUILDER_RECEIPT_TIMEOUT_SECS",
        default_value = "60"
    )]
    pub receipt_timeout_secs: u64,

    #[arg(
        long = "builder.submit_max_attempts",
        name = "builder.submit_max_attempts",
        env = "BUILDER_SUBMIT_MAX_ATTEMPTS",
        default_value = "3"
    )]
    pub submit_max_attempts: u64,

    #[arg(
        long = "builder.submit_min_backoff_millis",
        name = "builder.submit_min_backoff_millis",
        env = "BUILDER_SUBMIT_MIN_BACKOFF_MILLIS",
        default_value = "500"
    )]
    pub submit_min_backoff_millis: u64,

    #[arg(
        long = "builder.submit_max_backoff_millis",
        name = "builder.submit_max_backoff_millis",
        env = "BUILDER_SUBMIT_MAX_BACKOFF_MILLIS",
        default_value = "5000"
    )]
    pub submit_max_backoff_millis: u64,

    #[arg(
        long = "builder.submit_max_jitter_millis",
        name = "builder.submit_max_jitter_millis",
        env = "BUILDER_SUBMIT_MAX_JITTER_MILLIS",
        default_value = "200"
    )]
    pub submit_max_jitter_millis: u64,
}

impl BuilderArgs {
    /// The signer for batch transactions. Exactly one of the key sources must be set.
    pub fn signer(&self) -> anyhow::Result<PrivateKeySigner> {
        match (&self.private_key, &self.mnemonic, &self.mnemonic_file) {
            (Some(key), None, None) => key
                .expose_secret()
                .parse::<PrivateKeySigner>()
                .context("builder.private_key is not a valid private key"),
            (None, Some(mnemonic), None) => signer_from_mnemonic(mnemonic.expose_secret())
                .context("builder.mnemonic should derive a key"),
            (None, None, Some(path)) => {
                let phrase = SecretString::from(
                    fs::read_to_string(path)
                        .with_context(|| format!("should read mnemonic file {}", path.display()))?,
                );
                signer_from_mnemonic(phrase.expose_secret().trim()).with_context(|| {
                    format!("mnemonic file {} should derive a key", path.display())
                })
            }
            (None, None, None) => bail!(
                "one of builder.private_key, builder.mnemonic or builder.mnemonic_file is required"
            ),
            _ => bail!(
                "only one of builder.private_key, builder.mnemonic and builder.mnemonic_file may be set"
            ),
        }
    }

    pub fn builder_settings(&self, signer_address: Address) -> BuilderSettings {
        BuilderSettings {
            max_batch_gas: self.max_batch_gas,
            max_ops_per_batch: self.max_ops_per_batch,
            max_candidates: self.max_candidates,
            beneficiary: self.beneficiary.unwrap_or(signer_address),
            gas_limit_buffer_percent: self.gas_limit_buffer_percent,
        }
    }

    /// Fees go to the signer when no beneficiary is configured
    pub fn submission_settings(&self, signer_address: Address) -> SubmissionSettings {
        SubmissionSettings {
            beneficiary: self.beneficiary.unwrap_or(signer_address),
            signer_address,
            min_balance: self.min_balance,
            gas_limit_buffer_percent: self.gas_limit_buffer_percent,
            poll_interval: Duration::from_millis(self.poll_interval_millis),
            receipt_poll_interval: Duration::from_millis(self.receipt_poll_interval_millis),
            receipt_timeout: Duration::from_secs(self.receipt_timeout_secs),
            submit_retry: RetryOpts {
                max_attempts: self.submit_max_attempts,
                min_nonzero_wait: Duration::from_millis(self.submit_min_backoff_millis),
                max_wait: Duration::from_millis(self.submit_max_backoff_millis),
                max_jitter: Duration::from_millis(self.submit_max_jitter_millis),
            },
        }
    }
}

fn signer_from_mnemonic(phrase: &str) -> anyhow::Result<PrivateKeySigner> {
    Ok(MnemonicBuilder::<English>::default().phrase(phrase).build()?)
}

/// CLI options for generating a signer mnemonic
#[derive(Args, Debug)]
pub struct CreateMnemonicArgs {
    /// File to write the new mnemonic to, must not exist
    #[arg(long = "out_file", name = "out_file")]
    pub out_file: PathBuf,
}

/// Write a random mnemonic to `path`, refusing to overwrite an existing file
pub fn create_mnemonic(path: &Path) -> anyhow::Result<Address> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .with_context(|| format!("can't create mnemonic: {} not writable or exists", path.display()))?;

    let mnemonic = Mnemonic::<English>::new(&mut rand::thread_rng());
    let phrase = SecretString::from(mnemonic.to_phrase());
    writeln!(file, "{}", phrase.expose_secret())
        .with_context(|| format!("should write mnemonic to {}", path.display()))?;

    let address = signer_from_mnemonic(phrase.expose_secret())?.address();
    tracing::info!("Created mnemonic file {} for signer {address:?}", path.display());
    Ok(address)
}

/// Skips caused by routine batch limits happen on most cycles and are not logged
pub fn is_nonspammy_event(event: &WithEntryPoint<BuilderEvent>) -> bool {
    !matches!(
        event.event,
        BuilderEvent::SkippedOp {
            reason: SkipReason::SenderAlreadyInBatch
                | SkipReason::MaxGasLimit
                | SkipReason::MaxOperations,
            ..
        }
    )
}
