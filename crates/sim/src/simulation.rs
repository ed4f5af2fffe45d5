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

use std::sync::Arc;

use courier_provider::ChainClient;
use courier_types::{
    pool::MempoolError, Timestamp, UserOperation, ValidationOutput, ValidationRevert,
};
#[cfg(feature = "test-utils")]
use mockall::automock;
use tracing::instrument;

use crate::CheckMode;

// Entry point codes raised when a declared gas limit runs out:
// AA13 initCode, AA40 verification limit exceeded, AA41 too little for paymaster,
// AA51 prefund below actual cost, AA95 outer call gas.
const OUT_OF_GAS_CODES: [&str; 5] = ["AA13", "AA40", "AA41", "AA51", "AA95"];

// Paymaster deposit too low
const INSUFFICIENT_STAKE_CODE: &str = "AA31";

/// Simulation settings
#[derive(Copy, Clone, Debug)]
pub struct Settings {
    /// Gas cap for the validation phase
    pub max_verification_gas: u128,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_verification_gas: 5_000_000,
        }
    }
}

/// Runs `simulateValidation` and classifies the outcome
#[cfg_attr(feature = "test-utils", automock)]
#[async_trait::async_trait]
pub trait Simulator: Send + Sync + 'static {
    /// Simulate validation of `op` against current chain state.
    ///
    /// In `Estimation` mode a failed signature and a closed validity window are
    /// not errors, since the caller may be using a dummy signature.
    async fn simulate_validation(
        &self,
        op: UserOperation,
        mode: CheckMode,
    ) -> Result<ValidationOutput, MempoolError>;
}

/// Simulator backed by a [`ChainClient`]
#[derive(Debug)]
pub struct SimulatorImpl<C> {
    client: Arc<C>,
    settings: Settings,
}

impl<C> SimulatorImpl<C> {
    /// Create a new simulator
    pub fn new(client: Arc<C>, settings: Settings) -> Self {
        Self { client, settings }
    }
}

#[async_trait::async_trait]
impl<C: ChainClient> Simulator for SimulatorImpl<C> {
    #[instrument(skip_all, fields(sender = %op.sender))]
    async fn simulate_validation(
        &self,
        op: UserOperation,
        mode: CheckMode,
    ) -> Result<ValidationOutput, MempoolError> {
        let output = self
            .client
            .simulate_validation(op, self.settings.max_verification_gas)
            .await?
            .map_err(classify_revert)?;

        if mode == CheckMode::Admission {
            check_output(&output, Timestamp::now())?;
        }
        Ok(output)
    }
}

fn check_output(output: &ValidationOutput, now: Timestamp) -> Result<(), MempoolError> {
    if output.sig_failed {
        return Err(MempoolError::InvalidSignature);
    }
    if output.valid_time_range.is_expired_at(now) {
        return Err(MempoolError::Expired(output.valid_time_range.valid_until));
    }
    Ok(())
}

/// Map a simulation revert onto the error taxonomy
pub fn classify_revert(revert: ValidationRevert) -> MempoolError {
    let Some(code) = revert.entry_point_code() else {
        return MempoolError::ValidationReverted(revert);
    };
    if code == INSUFFICIENT_STAKE_CODE {
        return MempoolError::InsufficientStake(revert.to_string());
    }
    let reason = revert.to_string();
    if OUT_OF_GAS_CODES.contains(&code)
        || reason.contains("OOG")
        || reason.to_lowercase().contains("out of gas")
    {
        return MempoolError::OutOfGas(reason);
    }
    MempoolError::ValidationReverted(revert)
}
