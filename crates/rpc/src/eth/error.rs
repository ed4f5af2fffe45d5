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

use std::fmt::Display;

use alloy_primitives::{Address, Bytes, U128, U256};
use courier_types::{
    pool::{MempoolError, PrecheckViolation},
    Entity, Timestamp, ValidationRevert,
};
use jsonrpsee::types::{
    error::{INTERNAL_ERROR_CODE, INVALID_PARAMS_CODE},
    ErrorObjectOwned,
};
use serde::Serialize;

use crate::error::{rpc_err, rpc_err_with_data};

// Error codes borrowed from ERC-4337
const ENTRYPOINT_VALIDATION_REJECTED_CODE: i32 = -32500;
const OUT_OF_GAS_CODE: i32 = -32502;
const OUT_OF_TIME_RANGE_CODE: i32 = -32503;
const THROTTLED_OR_BANNED_CODE: i32 = -32504;
const PAYMASTER_DEPOSIT_TOO_LOW: i32 = -32508;

pub(crate) type EthResult<T> = Result<T, EthRpcError>;

/// Error returned by the RPC server eth namespace
#[derive(Debug, thiserror::Error)]
pub enum EthRpcError {
    /// Internal errors
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
    /// Invalid parameters
    #[error("{0}")]
    InvalidParams(String),
    /// Structural checks failed
    #[error("precheck failed: {}", join(.0))]
    PrecheckFailed(Vec<PrecheckViolation>),
    /// Entity throttled or banned
    #[error("{} {:?} throttled or banned", .0.kind, .0.address)]
    ThrottledOrBanned(Entity),
    /// Max operations reached for this sender
    #[error("Max operations ({0}) reached for sender {1:?}")]
    MaxOperationsReached(usize, Address),
    /// Replacement underpriced
    #[error("replacement underpriced")]
    ReplacementUnderpriced(ReplacementUnderpricedData),
    /// Operation already known
    #[error("already known")]
    OperationAlreadyKnown,
    /// Validation reverted in the entry point, account or paymaster
    #[error("validation reverted: {0}")]
    ValidationRevert(ValidationRevertData),
    /// Signature check failed
    #[error("Invalid UserOp signature or paymaster signature")]
    SignatureCheckFailed,
    /// Paymaster stake or deposit is insufficient
    #[error("{0}")]
    InsufficientStake(String),
    /// Paymaster balance too low
    #[error("Paymaster balance too low. Required balance: {0}. Current balance {1}")]
    PaymasterBalanceTooLow(U256, U256),
    /// Simulation ran out of gas
    #[error("out of gas: {0}")]
    OutOfGas(String),
    /// Operation is out of time range
    #[error("operation is out of time range")]
    OutOfTimeRange(OutOfTimeRangeData),
    /// Node failure or unknown entry point
    #[error("{0}")]
    ChainError(String),
}

fn join(violations: &[PrecheckViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutOfTimeRangeData {
    pub valid_until: Timestamp,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplacementUnderpricedData {
    pub current_max_priority_fee: U128,
    pub required_max_priority_fee: U128,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationRevertData {
    reason: Option<String>,
    revert_data: Option<Bytes>,
}

impl Display for ValidationRevertData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.reason, &self.revert_data) {
            (Some(reason), _) => write!(f, "[reason]: {reason}"),
            (None, Some(data)) => write!(f, "[revert data]: {data}"),
            (None, None) => Ok(()),
        }
    }
}

impl From<ValidationRevert> for ValidationRevertData {
    fn from(value: ValidationRevert) -> Self {
        match value {
            ValidationRevert::EntryPoint(reason) | ValidationRevert::Revert(reason) => Self {
                reason: Some(reason),
                revert_data: None,
            },
            ValidationRevert::Unknown(data) => Self {
                reason: None,
                revert_data: Some(data),
            },
        }
    }
}

impl From<MempoolError> for EthRpcError {
    fn from(value: MempoolError) -> Self {
        match value {
            MempoolError::Other(e) => Self::Internal(e),
            MempoolError::PrecheckViolations(violations) => Self::PrecheckFailed(violations),
            MempoolError::EntityBanned(entity) | MempoolError::EntityThrottled(entity) => {
                Self::ThrottledOrBanned(entity)
            }
            MempoolError::MaxOperationsReached(max, sender) => {
                Self::MaxOperationsReached(max, sender)
            }
            MempoolError::OperationAlreadyKnown => Self::OperationAlreadyKnown,
            MempoolError::ReplacementUnderpriced(current, required) => {
                Self::ReplacementUnderpriced(ReplacementUnderpricedData {
                    current_max_priority_fee: U128::from(current),
                    required_max_priority_fee: U128::from(required),
                })
            }
            e @ (MempoolError::MaxFeePerGasTooLow(..)
            | MempoolError::MaxPriorityFeePerGasTooLow(..)
            | MempoolError::DiscardedOnInsert) => Self::InvalidParams(e.to_string()),
            MempoolError::ValidationReverted(revert) => Self::ValidationRevert(revert.into()),
            MempoolError::InvalidSignature => Self::SignatureCheckFailed,
            MempoolError::InsufficientStake(reason) => Self::InsufficientStake(reason),
            MempoolError::PaymasterBalanceTooLow(required, balance) => {
                Self::PaymasterBalanceTooLow(required, balance)
            }
            MempoolError::OutOfGas(reason) => Self::OutOfGas(reason),
            MempoolError::Expired(valid_until) => {
                Self::OutOfTimeRange(OutOfTimeRangeData { valid_until })
            }
            e @ (MempoolError::UnknownEntryPoint(_)
            | MempoolError::TransientChainError(_)
            | MempoolError::FatalChainError(_)) => Self::ChainError(e.to_string()),
        }
    }
}

impl From<EthRpcError> for ErrorObjectOwned {
    fn from(error: EthRpcError) -> Self {
        let msg = error.to_string();

        match error {
            EthRpcError::Internal(_) | EthRpcError::ChainError(_) => {
                rpc_err(INTERNAL_ERROR_CODE, msg)
            }
            EthRpcError::InvalidParams(_)
            | EthRpcError::PrecheckFailed(_)
            | EthRpcError::OperationAlreadyKnown => rpc_err(INVALID_PARAMS_CODE, msg),
            EthRpcError::ReplacementUnderpriced(data) => {
                rpc_err_with_data(INVALID_PARAMS_CODE, msg, data)
            }
            EthRpcError::ThrottledOrBanned(data) => {
                rpc_err_with_data(THROTTLED_OR_BANNED_CODE, msg, data)
            }
            EthRpcError::MaxOperationsReached(_, _) => rpc_err(THROTTLED_OR_BANNED_CODE, msg),
            EthRpcError::ValidationRevert(data) => {
                rpc_err_with_data(ENTRYPOINT_VALIDATION_REJECTED_CODE, msg, data)
            }
            EthRpcError::SignatureCheckFailed => {
                rpc_err(ENTRYPOINT_VALIDATION_REJECTED_CODE, msg)
            }
            EthRpcError::InsufficientStake(_) | EthRpcError::PaymasterBalanceTooLow(_, _) => {
                rpc_err(PAYMASTER_DEPOSIT_TOO_LOW, msg)
            }
            EthRpcError::OutOfGas(_) => rpc_err(OUT_OF_GAS_CODE, msg),
            EthRpcError::OutOfTimeRange(data) => {
                rpc_err_with_data(OUT_OF_TIME_RANGE_CODE, msg, data)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use courier_types::pool::ErrorKind;

    use super::*;

    fn code(error: MempoolError) -> i32 {
        ErrorObjectOwned::from(EthRpcError::from(error)).code()
    }

    #[test]
    fn test_codes_by_kind() {
        let cases = [
            (
                MempoolError::PrecheckViolations(vec![PrecheckViolation::ZeroSender]),
                INVALID_PARAMS_CODE,
            ),
            (
                MempoolError::ValidationReverted(ValidationRevert::EntryPoint("AA24".into())),
                -32500,
            ),
            (MempoolError::InvalidSignature, -32500),
            (MempoolError::EntityBanned(Entity::account(Address::ZERO)), -32504),
            (MempoolError::EntityThrottled(Entity::paymaster(Address::ZERO)), -32504),
            (MempoolError::MaxOperationsReached(4, Address::ZERO), -32504),
            (MempoolError::InsufficientStake("AA31".into()), -32508),
            (
                MempoolError::PaymasterBalanceTooLow(U256::from(2), U256::from(1)),
                -32508,
            ),
            (MempoolError::Expired(Timestamp::new(5)), -32503),
            (MempoolError::OutOfGas("AA40".into()), -32502),
            (MempoolError::ReplacementUnderpriced(10, 11), INVALID_PARAMS_CODE),
            (MempoolError::MaxFeePerGasTooLow(1, 2), INVALID_PARAMS_CODE),
            (MempoolError::OperationAlreadyKnown, INVALID_PARAMS_CODE),
            (
                MempoolError::TransientChainError("timeout".into()),
                INTERNAL_ERROR_CODE,
            ),
            (
                MempoolError::FatalChainError("bad".into()),
                INTERNAL_ERROR_CODE,
            ),
            (MempoolError::UnknownEntryPoint(Address::ZERO), INTERNAL_ERROR_CODE),
        ];
        for (error, expected) in cases {
            let kind = error.kind();
            assert_eq!(code(error), expected, "{kind:?}");
        }
        assert_eq!(
            MempoolError::UnknownEntryPoint(Address::ZERO).kind(),
            ErrorKind::FatalChainError
        );
    }

    #[test]
    fn test_replacement_data() {
        let err = ErrorObjectOwned::from(EthRpcError::from(
            MempoolError::ReplacementUnderpriced(10, 11),
        ));
        let data: serde_json::Value = serde_json::from_str(err.data().unwrap().get()).unwrap();
        assert_eq!(data["requiredMaxPriorityFee"], "0xb");
    }
}
