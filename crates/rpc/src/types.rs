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

use alloy_primitives::{Address, Bytes, U128, U256, U64};
use courier_sim::GasEstimate;
use courier_types::{
    pool::{Reputation, ReputationStatus},
    UserOperation, UserOperationOptionalGas,
};
use serde::{Deserialize, Serialize};
use strum::{EnumString, VariantNames};

/// API namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, VariantNames, strum::Display)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ApiNamespace {
    /// `eth_` methods
    Eth,
    /// `debug_bundler_` methods
    Debug,
}

/// A v0.6 user operation as sent over JSON-RPC
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RpcUserOperation {
    sender: Address,
    nonce: U256,
    init_code: Bytes,
    call_data: Bytes,
    call_gas_limit: U128,
    verification_gas_limit: U128,
    pre_verification_gas: U128,
    max_fee_per_gas: U128,
    max_priority_fee_per_gas: U128,
    paymaster_and_data: Bytes,
    signature: Bytes,
}

impl From<UserOperation> for RpcUserOperation {
    fn from(op: UserOperation) -> Self {
        RpcUserOperation {
            sender: op.sender,
            nonce: op.nonce,
            init_code: op.init_code,
            call_data: op.call_data,
            call_gas_limit: U128::from(op.call_gas_limit),
            verification_gas_limit: U128::from(op.verification_gas_limit),
            pre_verification_gas: U128::from(op.pre_verification_gas),
            max_fee_per_gas: U128::from(op.max_fee_per_gas),
            max_priority_fee_per_gas: U128::from(op.max_priority_fee_per_gas),
            paymaster_and_data: op.paymaster_and_data,
            signature: op.signature,
        }
    }
}

impl From<RpcUserOperation> for UserOperation {
    fn from(def: RpcUserOperation) -> Self {
        UserOperation {
            sender: def.sender,
            nonce: def.nonce,
            init_code: def.init_code,
            call_data: def.call_data,
            call_gas_limit: def.call_gas_limit.to(),
            verification_gas_limit: def.verification_gas_limit.to(),
            pre_verification_gas: def.pre_verification_gas.to(),
            max_fee_per_gas: def.max_fee_per_gas.to(),
            max_priority_fee_per_gas: def.max_priority_fee_per_gas.to(),
            paymaster_and_data: def.paymaster_and_data,
            signature: def.signature,
        }
    }
}

/// A user operation submitted for estimation, gas fields may be missing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RpcUserOperationOptionalGas {
    sender: Address,
    nonce: U256,
    #[serde(default)]
    init_code: Bytes,
    #[serde(default)]
    call_data: Bytes,
    call_gas_limit: Option<U128>,
    verification_gas_limit: Option<U128>,
    pre_verification_gas: Option<U128>,
    max_fee_per_gas: Option<U128>,
    max_priority_fee_per_gas: Option<U128>,
    #[serde(default)]
    paymaster_and_data: Bytes,
    #[serde(default)]
    signature: Bytes,
}

impl From<RpcUserOperationOptionalGas> for UserOperationOptionalGas {
    fn from(def: RpcUserOperationOptionalGas) -> Self {
        UserOperationOptionalGas {
            sender: def.sender,
            nonce: def.nonce,
            init_code: def.init_code,
            call_data: def.call_data,
            call_gas_limit: def.call_gas_limit.map(|x| x.to()),
            verification_gas_limit: def.verification_gas_limit.map(|x| x.to()),
            pre_verification_gas: def.pre_verification_gas.map(|x| x.to()),
            max_fee_per_gas: def.max_fee_per_gas.map(|x| x.to()),
            max_priority_fee_per_gas: def.max_priority_fee_per_gas.map(|x| x.to()),
            paymaster_and_data: def.paymaster_and_data,
            signature: def.signature,
        }
    }
}

/// Gas limits returned by `eth_estimateUserOperationGas`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RpcGasEstimate {
    pre_verification_gas: U128,
    verification_gas_limit: U128,
    call_gas_limit: U128,
}

impl From<GasEstimate> for RpcGasEstimate {
    fn from(estimate: GasEstimate) -> Self {
        RpcGasEstimate {
            pre_verification_gas: U128::from(estimate.pre_verification_gas),
            verification_gas_limit: U128::from(estimate.verification_gas_limit),
            call_gas_limit: U128::from(estimate.call_gas_limit),
        }
    }
}

/// Reputation entry accepted by `debug_bundler_setReputation`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RpcReputationInput {
    /// Entity address
    pub address: Address,
    /// Operations seen
    pub ops_seen: U64,
    /// Operations included
    pub ops_included: U64,
    /// Status to hold, `ok` when absent
    #[serde(default)]
    pub status: ReputationStatus,
}

impl From<RpcReputationInput> for Reputation {
    fn from(rep: RpcReputationInput) -> Self {
        Reputation {
            address: rep.address,
            status: rep.status,
            ops_seen: rep.ops_seen.to(),
            ops_included: rep.ops_included.to(),
            ops_failed_simulation: 0,
            ops_expired: 0,
        }
    }
}

/// Reputation entry returned by `debug_bundler_dumpReputation`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RpcReputationOutput {
    /// Entity address
    pub address: Address,
    /// Operations seen
    pub ops_seen: U64,
    /// Operations included
    pub ops_included: U64,
    /// Failures inside the window
    pub ops_failed: U64,
    /// Current status
    pub status: ReputationStatus,
}

impl From<Reputation> for RpcReputationOutput {
    fn from(rep: Reputation) -> Self {
        RpcReputationOutput {
            address: rep.address,
            ops_seen: U64::from(rep.ops_seen),
            ops_included: U64::from(rep.ops_included),
            ops_failed: U64::from(rep.ops_failed_simulation),
            status: rep.status,
        }
    }
}
