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

//! Per-chain constants used for hashing and gas accounting.

use alloy_primitives::{address, Address};
use serde::{Deserialize, Serialize};

/// Canonical v0.6 entry point deployment
pub const ENTRY_POINT_V0_6: Address = address!("5FF137D4b0FDCD49DcA30c7CF57E578a026d2789");

/// Chain constants
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainSpec {
    /// chain id
    pub id: u64,
    /// entry point the bundler serves
    pub entry_point_address: Address,
    /// Intrinsic gas cost of a transaction
    pub transaction_intrinsic_gas: u128,
    /// Fixed entry point overhead per user operation
    pub per_user_op_gas: u128,
    /// Extra overhead for operations that deploy their account
    pub per_user_op_deploy_overhead_gas: u128,
    /// Gas per 32 byte word of the packed operation
    pub per_user_op_word_gas: u128,
    /// Gas cost for a zero byte in calldata
    pub calldata_zero_byte_gas: u128,
    /// Gas cost for a non-zero byte in calldata
    pub calldata_non_zero_byte_gas: u128,
}

impl Default for ChainSpec {
    fn default() -> Self {
        Self {
            id: 1,
            entry_point_address: ENTRY_POINT_V0_6,
            transaction_intrinsic_gas: 21_000,
            per_user_op_gas: 18_300,
            per_user_op_deploy_overhead_gas: 0,
            per_user_op_word_gas: 4,
            calldata_zero_byte_gas: 4,
            calldata_non_zero_byte_gas: 16,
        }
    }
}

impl ChainSpec {
    /// Default constants for `id`, serving `entry_point_address`
    pub fn new(id: u64, entry_point_address: Address) -> Self {
        Self {
            id,
            entry_point_address,
            ..Default::default()
        }
    }
}
