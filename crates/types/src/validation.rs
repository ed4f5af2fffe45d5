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

use alloy_primitives::{Bytes, U256};
use courier_contracts::v0_6::IEntryPoint::ValidationResult;

use crate::ValidTimeRange;

/// Decoded `ValidationResult` of a successful `simulateValidation`
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ValidationOutput {
    /// Gas used by validation, including pre verification gas
    pub pre_op_gas: u128,
    /// Funds the entry point will require up front
    pub prefund: U256,
    /// The account or paymaster rejected the signature
    pub sig_failed: bool,
    /// Window in which the operation is valid
    pub valid_time_range: ValidTimeRange,
}

impl From<ValidationResult> for ValidationOutput {
    fn from(value: ValidationResult) -> Self {
        let info = value.returnInfo;
        Self {
            pre_op_gas: info.preOpGas.try_into().unwrap_or(u128::MAX),
            prefund: info.prefund,
            sig_failed: info.sigFailed,
            valid_time_range: ValidTimeRange::from_entry_point(
                info.validAfter.to::<u64>(),
                info.validUntil.to::<u64>(),
            ),
        }
    }
}

/// Why `simulateValidation` did not produce a `ValidationResult`
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ValidationRevert {
    /// `FailedOp` raised by the entry point, carries the `AAxx` reason
    #[error("{0}")]
    EntryPoint(String),
    /// `Error(string)` raised by account or paymaster code
    #[error("revert: {0}")]
    Revert(String),
    /// Revert data that could not be decoded
    #[error("unknown revert data: {0}")]
    Unknown(Bytes),
}

impl ValidationRevert {
    /// The `AAxx` code of an entry point revert, if any
    pub fn entry_point_code(&self) -> Option<&str> {
        match self {
            ValidationRevert::EntryPoint(reason) => reason.get(..4).filter(|c| c.starts_with("AA")),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use alloy_primitives::aliases::U48;
    use courier_contracts::v0_6::{ReturnInfo, StakeInfo};

    use super::*;
    use crate::Timestamp;

    #[test]
    fn test_from_validation_result() {
        let result = ValidationResult {
            returnInfo: ReturnInfo {
                preOpGas: U256::from(50_000),
                prefund: U256::from(7),
                sigFailed: false,
                validAfter: U48::from(10),
                validUntil: U48::ZERO,
                paymasterContext: Bytes::new(),
            },
            senderInfo: StakeInfo::default(),
            factoryInfo: StakeInfo::default(),
            paymasterInfo: StakeInfo::default(),
        };
        let out = ValidationOutput::from(result);
        assert_eq!(out.pre_op_gas, 50_000);
        assert_eq!(out.valid_time_range.valid_after, Timestamp::new(10));
        assert_eq!(out.valid_time_range.valid_until, Timestamp::MAX);
    }

    #[test]
    fn test_entry_point_code() {
        let revert = ValidationRevert::EntryPoint("AA31 paymaster deposit too low".into());
        assert_eq!(revert.entry_point_code(), Some("AA31"));
        assert_eq!(ValidationRevert::Revert("AA31".into()).entry_point_code(), None);
        assert_eq!(ValidationRevert::EntryPoint("x".into()).entry_point_code(), None);
    }
}
