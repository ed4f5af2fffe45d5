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

use alloy_primitives::{Address, B256};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::{Entity, Timestamp, UserOperation, ValidTimeRange};

/// A validated user operation as stored in the pool
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct PoolOperation {
    /// The user operation
    pub uo: UserOperation,
    /// Hash under the pool's entry point and chain
    pub hash: B256,
    /// The entry point address for this operation
    pub entry_point: Address,
    /// When the operation passed validation
    pub admitted_at: Timestamp,
    /// `preOpGas` from the last successful simulation
    pub simulated_gas: u128,
    /// The valid time range reported by simulation
    pub valid_time_range: ValidTimeRange,
}

impl PoolOperation {
    /// Sender, paymaster and factory, as present
    pub fn entities(&self) -> Vec<Entity> {
        self.uo.entities()
    }

    /// True if `address` plays any role in the operation
    pub fn contains_address(&self, address: Address) -> bool {
        self.uo.sender == address
            || self.uo.paymaster() == Some(address)
            || self.uo.factory() == Some(address)
    }

    /// Gas the operation occupies in a batch
    pub fn total_gas(&self) -> u128 {
        self.uo.total_gas()
    }
}

/// Standing of an address
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum ReputationStatus {
    /// Not throttled or banned
    #[default]
    Ok,
    /// Admission limited
    Throttled,
    /// Admission refused
    Banned,
}

impl Serialize for ReputationStatus {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(match self {
            ReputationStatus::Ok => "ok",
            ReputationStatus::Throttled => "throttled",
            ReputationStatus::Banned => "banned",
        })
    }
}

impl<'de> Deserialize<'de> for ReputationStatus {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        match s.as_str() {
            "ok" => Ok(ReputationStatus::Ok),
            "throttled" => Ok(ReputationStatus::Throttled),
            "banned" => Ok(ReputationStatus::Banned),
            _ => Err(de::Error::custom(format!("Invalid reputation status {s}"))),
        }
    }
}

/// Snapshot of the counters kept for an address
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reputation {
    /// The entity's address
    pub address: Address,
    /// Current status
    pub status: ReputationStatus,
    /// Operations admitted to the pool
    pub ops_seen: u64,
    /// Operations included on chain
    pub ops_included: u64,
    /// Failures currently inside the window
    pub ops_failed_simulation: u64,
    /// Expiries currently inside the window
    pub ops_expired: u64,
}

/// What happened to an operation an address took part in
#[derive(Debug, Copy, Clone, PartialEq, Eq, strum::Display)]
pub enum ReputationOutcome {
    /// Executed on chain
    Included,
    /// Failed simulation or reverted on chain
    FailedSimulation,
    /// Left the pool without being included
    Expired,
}
