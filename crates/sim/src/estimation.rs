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

use courier_types::{UserOperation, ValidationOutput};
use courier_utils::math;

/// Gas estimation settings
#[derive(Clone, Copy, Debug)]
pub struct Settings {
    /// Used for unset call gas limits during simulation
    pub max_call_gas: u128,
    /// Used for unset verification gas limits during simulation
    pub max_verification_gas: u128,
    /// Buffer added on top of the simulated verification gas
    pub verification_gas_buffer_percent: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_call_gas: 10_000_000,
            max_verification_gas: 5_000_000,
            verification_gas_buffer_percent: 10,
        }
    }
}

/// Gas limits a client should set on its operation
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct GasEstimate {
    /// Pre verification gas
    pub pre_verification_gas: u128,
    /// Verification gas limit
    pub verification_gas_limit: u128,
    /// Call gas limit
    pub call_gas_limit: u128,
}

impl GasEstimate {
    /// Assemble an estimate from a simulation of `simulated_op`.
    ///
    /// `preOpGas` includes the pre verification gas that was set on the simulated
    /// operation, which is removed before the buffer is applied.
    pub fn from_simulation(
        settings: &Settings,
        simulated_op: &UserOperation,
        output: &ValidationOutput,
        pre_verification_gas: u128,
        call_gas_limit: u128,
    ) -> Self {
        let verification_gas = output
            .pre_op_gas
            .saturating_sub(simulated_op.pre_verification_gas);
        Self {
            pre_verification_gas,
            verification_gas_limit: math::increase_by_percent(
                verification_gas,
                settings.verification_gas_buffer_percent,
            ),
            call_gas_limit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_simulation() {
        let op = UserOperation {
            pre_verification_gas: 50_000,
            ..Default::default()
        };
        let output = ValidationOutput {
            pre_op_gas: 150_000,
            ..Default::default()
        };
        let est =
            GasEstimate::from_simulation(&Settings::default(), &op, &output, 45_000, 30_000);
        assert_eq!(est.verification_gas_limit, 110_000);
        assert_eq!(est.call_gas_limit, 30_000);
        assert_eq!(est.pre_verification_gas, 45_000);
    }

    #[test]
    fn test_pre_op_gas_below_pvg_saturates() {
        let op = UserOperation {
            pre_verification_gas: 500,
            ..Default::default()
        };
        let output = ValidationOutput {
            pre_op_gas: 100,
            ..Default::default()
        };
        let est = GasEstimate::from_simulation(&Settings::default(), &op, &output, 0, 0);
        assert_eq!(est.verification_gas_limit, 0);
    }
}
