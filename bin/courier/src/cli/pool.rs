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

use std::{collections::HashSet, time::Duration};

use alloy_primitives::Address;
use clap::Args;
use courier_pool::{PoolConfig, ReputationParams, ReputationTracker};

use super::{json::get_json_config, CommonArgs};

/// CLI options for the operation pool and reputation
#[derive(Args, Debug)]
#[command(next_help_heading = "POOL")]
pub struct PoolArgs {
    /// Maximum number of operations in the pool
    #[arg(
        long = "pool.max_size",
        name = "pool.max_size",
        env = "POOL_MAX_SIZE",
        default_value = "4096"
    )]
    pub max_size: usize,

    /// Maximum number of pooled operations per sender
    #[arg(
        long = "pool.max_ops_per_sender",
        name = "pool.max_ops_per_sender",
        env = "POOL_MAX_OPS_PER_SENDER",
        default_value = "4"
    )]
    pub max_ops_per_sender: usize,

    #[arg(
        long = "pool.min_replacement_fee_increase_percentage",
        name = "pool.min_replacement_fee_increase_percentage",
        env = "POOL_MIN_REPLACEMENT_FEE_INCREASE_PERCENTAGE",
        default_value = "10"
    )]
    pub min_replacement_fee_increase_percentage: u32,

    /// Submission attempts after which an operation is dropped
    #[arg(
        long = "pool.max_attempts",
        name = "pool.max_attempts",
        env = "POOL_MAX_ATTEMPTS",
        default_value = "5"
    )]
    pub max_attempts: u32,

    /// Pooled operations a throttled entity may have before new ones are refused
    #[arg(
        long = "pool.throttled_entity_mempool_count",
        name = "pool.throttled_entity_mempool_count",
        env = "POOL_THROTTLED_ENTITY_MEMPOOL_COUNT",
        default_value = "4"
    )]
    pub throttled_entity_mempool_count: usize,

    /// JSON array of addresses that are always banned
    #[arg(
        long = "pool.blocklist_path",
        name = "pool.blocklist_path",
        env = "POOL_BLOCKLIST_PATH"
    )]
    pub blocklist_path: Option<String>,

    /// JSON array of addresses that are never throttled or banned
    #[arg(
        long = "pool.allowlist_path",
        name = "pool.allowlist_path",
        env = "POOL_ALLOWLIST_PATH"
    )]
    pub allowlist_path: Option<String>,

    /// Length of the reputation window
    #[arg(
        long = "reputation.window_secs",
        name = "reputation.window_secs",
        env = "REPUTATION_WINDOW_SECS",
        default_value = "3600"
    )]
    pub reputation_window_secs: u64,

    #[arg(
        long = "reputation.throttle_threshold",
        name = "reputation.throttle_threshold",
        env = "REPUTATION_THROTTLE_THRESHOLD",
        default_value = "3"
    )]
    pub reputation_throttle_threshold: u64,

    #[arg(
        long = "reputation.ban_threshold",
        name = "reputation.ban_threshold",
        env = "REPUTATION_BAN_THRESHOLD",
        default_value = "5"
    )]
    pub reputation_ban_threshold: u64,
}

impl PoolArgs {
    pub fn pool_config(&self, common: &CommonArgs) -> PoolConfig {
        PoolConfig {
            entry_point: common.entry_point,
            chain_id: common.chain_id,
            max_size: self.max_size,
            max_ops_per_sender: self.max_ops_per_sender,
            min_replacement_fee_increase_percentage: self.min_replacement_fee_increase_percentage,
            max_attempts: self.max_attempts,
            throttled_entity_mempool_count: self.throttled_entity_mempool_count,
        }
    }

    pub fn reputation_params(&self) -> ReputationParams {
        ReputationParams {
            window: Duration::from_secs(self.reputation_window_secs),
            throttle_threshold: self.reputation_throttle_threshold,
            ban_threshold: self.reputation_ban_threshold,
        }
    }

    /// Build the tracker, loading the block and allow lists if configured
    pub fn reputation_tracker(&self) -> anyhow::Result<ReputationTracker> {
        let blocklist = load_address_list(self.blocklist_path.as_deref())?;
        let allowlist = load_address_list(self.allowlist_path.as_deref())?;
        Ok(ReputationTracker::new(
            self.reputation_params(),
            blocklist,
            allowlist,
        ))
    }
}

fn load_address_list(path: Option<&str>) -> anyhow::Result<Option<HashSet<Address>>> {
    path.map(get_json_config).transpose()
}
