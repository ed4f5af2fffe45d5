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

use std::{collections::HashMap, sync::Arc};

use alloy_primitives::B256;

use crate::{pool::PoolOperation, Entity, UserOperation};

/// An operation dropped while building a batch because it no longer validates
#[derive(Clone, Debug)]
pub struct RejectedOp {
    /// The operation
    pub op: Arc<PoolOperation>,
    /// Revert reason or rejection cause
    pub reason: String,
    /// Entity at fault, `None` when the fault cannot be attributed
    pub culprit: Option<Entity>,
}

/// Operations chosen for one `handleOps` submission, in execution order
#[derive(Clone, Debug, Default)]
pub struct Batch {
    /// Operations
    pub ops: Vec<Arc<PoolOperation>>,
    /// Sum of the operations' gas limits
    pub total_gas: u128,
    /// Operations found invalid during building, to be removed from the pool
    pub rejected: Vec<RejectedOp>,
}

impl Batch {
    /// Append an operation
    pub fn push(&mut self, op: Arc<PoolOperation>) {
        self.total_gas = self.total_gas.saturating_add(op.total_gas());
        self.ops.push(op);
    }

    /// Drop the operation at `index`, recording it as rejected
    pub fn reject(&mut self, index: usize, reason: String, culprit: Option<Entity>) {
        let op = self.ops.remove(index);
        self.total_gas = self.total_gas.saturating_sub(op.total_gas());
        self.rejected.push(RejectedOp {
            op,
            reason,
            culprit,
        });
    }

    /// Number of operations
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// True if no operation passed selection
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Hashes in batch order
    pub fn op_hashes(&self) -> Vec<B256> {
        self.ops.iter().map(|op| op.hash).collect()
    }

    /// The raw operations, as passed to `handleOps`
    pub fn user_ops(&self) -> Vec<UserOperation> {
        self.ops.iter().map(|op| op.uo.clone()).collect()
    }
}

/// Outcome of a mined batch transaction
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BatchReceipt {
    /// Transaction hash
    pub tx_hash: B256,
    /// Block the transaction was mined in
    pub block_number: u64,
    /// Transaction status, false if `handleOps` itself reverted
    pub success: bool,
    /// Gas used by the transaction
    pub gas_used: u128,
    /// `UserOperationEvent` success flag by operation hash
    pub op_results: HashMap<B256, bool>,
}
