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

use alloy_primitives::Address;
use courier_types::{
    chain::ChainSpec,
    pool::{MempoolError, PrecheckViolation},
    UserOperation,
};
#[cfg(feature = "test-utils")]
use mockall::automock;

use crate::CheckMode;

/// The min cost of a `CALL` with nonzero value
pub const MIN_CALL_GAS_LIMIT: u128 = 9100;

const ADDRESS_LEN: usize = 20;

/// Trait for checking if a user operation is well formed before any chain call is made
#[cfg_attr(feature = "test-utils", automock)]
pub trait Prechecker: Send + Sync + 'static {
    /// Run the checks, reporting every violation found
    fn check(&self, op: &UserOperation, mode: CheckMode) -> Result<(), PrecheckError>;
}

/// Precheck error
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{} precheck violation(s)", .0.len())]
pub struct PrecheckError(pub Vec<PrecheckViolation>);

impl From<PrecheckError> for MempoolError {
    fn from(error: PrecheckError) -> Self {
        MempoolError::PrecheckViolations(error.0)
    }
}

/// Precheck settings
#[derive(Copy, Clone, Debug)]
pub struct Settings {
    /// Maximum verification gas allowed for a user operation
    pub max_verification_gas: u128,
    /// Maximum total gas of a single operation, the per-batch gas ceiling
    pub max_total_gas: u128,
    /// Minimum call gas limit
    pub min_call_gas_limit: u128,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_verification_gas: 5_000_000,
            max_total_gas: 10_000_000,
            min_call_gas_limit: MIN_CALL_GAS_LIMIT,
        }
    }
}

/// Prechecker implementation
#[derive(Debug)]
pub struct PrecheckerImpl {
    chain_spec: ChainSpec,
    settings: Settings,
}

impl Prechecker for PrecheckerImpl {
    fn check(&self, op: &UserOperation, mode: CheckMode) -> Result<(), PrecheckError> {
        let mut violations = self.check_fields(op);
        if mode == CheckMode::Admission {
            violations.extend(self.check_gas(op));
        }
        if violations.is_empty() {
            Ok(())
        } else {
            Err(PrecheckError(violations))
        }
    }
}

impl PrecheckerImpl {
    /// Create a new prechecker
    pub fn new(chain_spec: ChainSpec, settings: Settings) -> Self {
        Self {
            chain_spec,
            settings,
        }
    }

    fn check_fields(&self, op: &UserOperation) -> Vec<PrecheckViolation> {
        let mut violations = vec![];
        if op.sender == Address::ZERO {
            violations.push(PrecheckViolation::ZeroSender);
        }
        if op.signature.is_empty() {
            violations.push(PrecheckViolation::EmptySignature);
        }
        if !op.init_code.is_empty() && op.init_code.len() < ADDRESS_LEN {
            violations.push(PrecheckViolation::InitCodeTooShort(op.init_code.len()));
        }
        if !op.paymaster_and_data.is_empty() && op.paymaster_and_data.len() < ADDRESS_LEN {
            violations.push(PrecheckViolation::PaymasterAndDataTooShort(
                op.paymaster_and_data.len(),
            ));
        }
        if op.max_fee_per_gas < op.max_priority_fee_per_gas {
            violations.push(PrecheckViolation::MaxFeeBelowPriorityFee(
                op.max_fee_per_gas,
                op.max_priority_fee_per_gas,
            ));
        }
        violations
    }

    fn check_gas(&self, op: &UserOperation) -> Vec<PrecheckViolation> {
        let Settings {
            max_verification_gas,
            max_total_gas,
            min_call_gas_limit,
        } = self.settings;

        let mut violations = vec![];
        if op.call_gas_limit < min_call_gas_limit {
            violations.push(PrecheckViolation::CallGasLimitTooLow(
                op.call_gas_limit,
                min_call_gas_limit,
            ));
        }
        if op.verification_gas_limit > max_verification_gas {
            violations.push(PrecheckViolation::VerificationGasLimitTooHigh(
                op.verification_gas_limit,
                max_verification_gas,
            ));
        }
        if op.total_gas() > max_total_gas {
            violations.push(PrecheckViolation::TotalGasLimitTooHigh(
                op.total_gas(),
                max_total_gas,
            ));
        }
        let min_pre_verification_gas = op.calc_static_pre_verification_gas(&self.chain_spec, false);
        if op.pre_verification_gas < min_pre_verification_gas {
            violations.push(PrecheckViolation::PreVerificationGasTooLow(
                op.pre_verification_gas,
                min_pre_verification_gas,
            ));
        }
        violations
    }
}

#[cfg(test)]
mod tests {
    use alloy_primitives::Bytes;

    use super::*;

    fn prechecker() -> PrecheckerImpl {
        PrecheckerImpl::new(ChainSpec::default(), Settings::default())
    }

    fn valid_op() -> UserOperation {
        UserOperation {
            sender: Address::repeat_byte(1),
            call_gas_limit: 100_000,
            verification_gas_limit: 100_000,
            pre_verification_gas: 100_000,
            max_fee_per_gas: 10,
            max_priority_fee_per_gas: 5,
            signature: Bytes::from(vec![1_u8; 65]),
            ..Default::default()
        }
    }

    #[test]
    fn test_valid_op_passes() {
        prechecker()
            .check(&valid_op(), CheckMode::Admission)
            .unwrap();
    }

    #[test]
    fn test_reports_every_violation() {
        let op = UserOperation {
            sender: Address::ZERO,
            signature: Bytes::new(),
            call_gas_limit: 1,
            max_fee_per_gas: 1,
            max_priority_fee_per_gas: 2,
            paymaster_and_data: Bytes::from(vec![1_u8; 4]),
            ..valid_op()
        };
        let err = prechecker().check(&op, CheckMode::Admission).unwrap_err();
        assert_eq!(
            err.0,
            vec![
                PrecheckViolation::ZeroSender,
                PrecheckViolation::EmptySignature,
                PrecheckViolation::PaymasterAndDataTooShort(4),
                PrecheckViolation::MaxFeeBelowPriorityFee(1, 2),
                PrecheckViolation::CallGasLimitTooLow(1, MIN_CALL_GAS_LIMIT),
            ]
        );
    }

    #[test]
    fn test_gas_bounds() {
        let op = UserOperation {
            verification_gas_limit: 6_000_000,
            call_gas_limit: 5_000_000,
            pre_verification_gas: 10,
            ..valid_op()
        };
        let err = prechecker().check(&op, CheckMode::Admission).unwrap_err();
        assert!(err
            .0
            .contains(&PrecheckViolation::VerificationGasLimitTooHigh(6_000_000, 5_000_000)));
        assert!(err
            .0
            .contains(&PrecheckViolation::TotalGasLimitTooHigh(11_000_010, 10_000_000)));
        assert!(err
            .0
            .iter()
            .any(|v| matches!(v, PrecheckViolation::PreVerificationGasTooLow(10, _))));
    }

    #[test]
    fn test_estimation_skips_gas_checks() {
        let op = UserOperation {
            call_gas_limit: 0,
            pre_verification_gas: 0,
            verification_gas_limit: u128::MAX,
            ..valid_op()
        };
        prechecker().check(&op, CheckMode::Estimation).unwrap();
        assert!(prechecker().check(&op, CheckMode::Admission).is_err());
    }

    #[test]
    fn test_into_mempool_error() {
        let err: MempoolError = PrecheckError(vec![PrecheckViolation::ZeroSender]).into();
        assert!(matches!(err, MempoolError::PrecheckViolations(v) if v.len() == 1));
    }
}
