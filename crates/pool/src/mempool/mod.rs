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

mod operation_pool;
pub use operation_pool::OperationPool;

mod pool;

mod reputation;
pub use reputation::{ReputationParams, ReputationTracker};

mod validator;
pub use validator::{OperationValidator, ValidatedOperation, ValidatorSettings};

use alloy_primitives::Address;
use courier_types::pool::MempoolError;

/// Pool limits for one entry point
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Address of the entry point this pool targets
    pub entry_point: Address,
    /// Chain ID this pool targets
    pub chain_id: u64,
    /// Maximum number of operations in the pool
    pub max_size: usize,
    /// Maximum number of pooled operations per sender
    pub max_ops_per_sender: usize,
    /// Percentage a replacement must raise the priority fee by
    pub min_replacement_fee_increase_percentage: u32,
    /// Submission attempts after which an operation is dropped
    pub max_attempts: u32,
    /// Pooled operations a throttled entity may have before new ones are refused
    pub throttled_entity_mempool_count: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            entry_point: courier_types::chain::ENTRY_POINT_V0_6,
            chain_id: 1,
            max_size: 4096,
            max_ops_per_sender: 4,
            min_replacement_fee_increase_percentage: 10,
            max_attempts: 5,
            throttled_entity_mempool_count: 4,
        }
    }
}

fn record_rejection(entry_point: Address, error: &MempoolError) {
    let kind: &'static str = error.kind().into();
    metrics::counter!(
        "op_pool_rejections",
        "entry_point" => entry_point.to_string(),
        "kind" => kind
    )
    .increment(1);
}
