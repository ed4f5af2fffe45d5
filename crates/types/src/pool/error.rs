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

use alloy_primitives::{Address, U256};
use strum::{EnumIter, IntoStaticStr};

use crate::{Entity, Timestamp, ValidationRevert};

/// Mempool result type.
pub type MempoolResult<T> = std::result::Result<T, MempoolError>;

/// Coarse classification of every way an operation can be refused
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, EnumIter, IntoStaticStr, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    /// Failed structural checks
    Malformed,
    /// An entity is banned
    Banned,
    /// An entity is throttled or a sender holds too many pooled operations
    Throttled,
    /// Fee below the floor, or not enough to replace or stay in a full pool
    Underpriced,
    /// Account or paymaster validation rejected the operation
    ValidationReverted,
    /// Paymaster does not have the deposit to sponsor the operation
    InsufficientStake,
    /// Declared gas limits are too low for validation
    OutOfGas,
    /// Same operation already pooled
    Duplicate,
    /// Validity window already closed
    Expired,
    /// Retryable node or network failure
    TransientChainError,
    /// Non-retryable chain or configuration failure
    FatalChainError,
}

/// Mempool error type.
#[derive(Debug, thiserror::Error)]
pub enum MempoolError {
    /// Some other error occurred
    #[error(transparent)]
    Other(#[from] anyhow::Error),
    /// Structural checks failed, every violation found is listed
    #[error("Operation failed prechecks: {}", join_violations(.0))]
    PrecheckViolations(Vec<PrecheckViolation>),
    /// An entity of the operation is banned
    #[error("Entity {0} is banned")]
    EntityBanned(Entity),
    /// A throttled entity already has its allowance of pooled operations
    #[error("Entity {0} is throttled")]
    EntityThrottled(Entity),
    /// Sender has reached the per-sender pool limit
    #[error("Max operations ({0}) reached for sender {1}")]
    MaxOperationsReached(usize, Address),
    /// Operation with the same hash already in pool
    #[error("Operation already known")]
    OperationAlreadyKnown,
    /// Operation with same sender/nonce already in pool and the fee bump is too small
    #[error("Replacement operation underpriced. Existing priority fee: {0}. Required priority fee: {1}")]
    ReplacementUnderpriced(u128, u128),
    /// Max fee below the configured floor
    #[error("maxFeePerGas is {0} but must be at least {1}")]
    MaxFeePerGasTooLow(u128, u128),
    /// Priority fee below the configured floor
    #[error("maxPriorityFeePerGas is {0} but must be at least {1}")]
    MaxPriorityFeePerGasTooLow(u128, u128),
    /// Operation was the lowest priority entry when the pool overflowed
    #[error("Operation was discarded on inserting")]
    DiscardedOnInsert,
    /// Simulation reverted
    #[error("Validation reverted: {0}")]
    ValidationReverted(ValidationRevert),
    /// Simulation succeeded but a signature check failed
    #[error("Invalid signature")]
    InvalidSignature,
    /// Paymaster stake or deposit is insufficient
    #[error("Insufficient stake: {0}")]
    InsufficientStake(String),
    /// Paymaster deposit does not cover its pooled operations plus this one
    #[error("Paymaster balance too low. Required balance: {0}. Current balance {1}")]
    PaymasterBalanceTooLow(U256, U256),
    /// Gas limits are too low for validation
    #[error("Out of gas: {0}")]
    OutOfGas(String),
    /// Validity window closed
    #[error("Operation expired at {0}")]
    Expired(Timestamp),
    /// An unknown entry point was specified
    #[error("Unknown entry point {0}")]
    UnknownEntryPoint(Address),
    /// Retryable node failure
    #[error("Transient chain error: {0}")]
    TransientChainError(String),
    /// Non-retryable node failure
    #[error("Fatal chain error: {0}")]
    FatalChainError(String),
}

impl MempoolError {
    /// Classification of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            MempoolError::PrecheckViolations(_) => ErrorKind::Malformed,
            MempoolError::EntityBanned(_) => ErrorKind::Banned,
            MempoolError::EntityThrottled(_) | MempoolError::MaxOperationsReached(..) => {
                ErrorKind::Throttled
            }
            MempoolError::OperationAlreadyKnown => ErrorKind::Duplicate,
            MempoolError::ReplacementUnderpriced(..)
            | MempoolError::MaxFeePerGasTooLow(..)
            | MempoolError::MaxPriorityFeePerGasTooLow(..)
            | MempoolError::DiscardedOnInsert => ErrorKind::Underpriced,
            MempoolError::ValidationReverted(_) | MempoolError::InvalidSignature => {
                ErrorKind::ValidationReverted
            }
            MempoolError::InsufficientStake(_) | MempoolError::PaymasterBalanceTooLow(..) => {
                ErrorKind::InsufficientStake
            }
            MempoolError::OutOfGas(_) => ErrorKind::OutOfGas,
            MempoolError::Expired(_) => ErrorKind::Expired,
            MempoolError::TransientChainError(_) => ErrorKind::TransientChainError,
            MempoolError::UnknownEntryPoint(_)
            | MempoolError::FatalChainError(_)
            | MempoolError::Other(_) => ErrorKind::FatalChainError,
        }
    }
}

fn join_violations(violations: &[PrecheckViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Structural problems found before any chain call is made
#[derive(Clone, Debug, parse_display::Display, Eq, PartialEq, Ord, PartialOrd)]
pub enum PrecheckViolation {
    /// Sender is the zero address
    #[display("sender must not be the zero address")]
    ZeroSender,
    /// Signature is empty
    #[display("signature must not be empty")]
    EmptySignature,
    /// initCode too short to name a factory
    #[display("initCode must be empty or at least 20 bytes, got {0}")]
    InitCodeTooShort(usize),
    /// paymasterAndData too short to name a paymaster
    #[display("paymasterAndData must be empty or at least 20 bytes, got {0}")]
    PaymasterAndDataTooShort(usize),
    /// The call gas limit is too low to account for any possible call.
    #[display("callGasLimit is {0} but must be at least {1}")]
    CallGasLimitTooLow(u128, u128),
    /// The verification gas limit of the user operation is too high.
    #[display("verificationGasLimit is {0} but must be at most {1}")]
    VerificationGasLimitTooHigh(u128, u128),
    /// The total gas limit would not fit in a batch
    #[display("total gas limit is {0} but must be at most {1}")]
    TotalGasLimitTooHigh(u128, u128),
    /// The pre-verification gas does not cover the static overhead
    #[display("preVerificationGas is {0} but must be at least {1}")]
    PreVerificationGasTooLow(u128, u128),
    /// Priority fee is above the max fee
    #[display("maxPriorityFeePerGas {1} must not exceed maxFeePerGas {0}")]
    MaxFeeBelowPriorityFee(u128, u128),
}
