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

use alloy_primitives::{Address, B256, U256};
use courier_types::{BatchReceipt, UserOperation, ValidationOutput, ValidationRevert};
#[cfg(feature = "test-utils")]
use mockall::automock;

use super::error::ProviderResult;

/// Result of an `eth_call` to `handleOps`
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HandleOpsOut {
    /// The batch executes without a `FailedOp` revert
    Success,
    /// The operation at the index failed validation with the reason
    FailedOp(usize, String),
    /// The batch reverted for another reason
    Revert(String),
}

/// Read and write access to a single entry point deployment
#[cfg_attr(feature = "test-utils", automock)]
#[async_trait::async_trait]
pub trait ChainClient: Send + Sync + 'static {
    /// Address of the entry point
    fn entry_point(&self) -> Address;

    /// Chain id reported by the node
    async fn get_chain_id(&self) -> ProviderResult<u64>;

    /// Latest block number
    async fn get_block_number(&self) -> ProviderResult<u64>;

    /// Run `simulateValidation`.
    ///
    /// The outer error is a node failure, the inner one a decoded revert.
    async fn simulate_validation(
        &self,
        op: UserOperation,
        max_validation_gas: u128,
    ) -> ProviderResult<Result<ValidationOutput, ValidationRevert>>;

    /// Gas needed to execute the operation's call data from the entry point
    async fn estimate_call_gas(&self, op: UserOperation) -> ProviderResult<u128>;

    /// Send `handleOps` with the given operations, returning the transaction hash
    async fn submit_batch(
        &self,
        ops: Vec<UserOperation>,
        beneficiary: Address,
        gas_limit: u128,
    ) -> ProviderResult<B256>;

    /// Dry run `handleOps` against the latest state without sending a transaction
    async fn call_handle_ops(
        &self,
        ops: Vec<UserOperation>,
        beneficiary: Address,
        gas_limit: u128,
    ) -> ProviderResult<HandleOpsOut>;

    /// Receipt of a submitted batch, `None` while pending
    async fn get_transaction_receipt(&self, tx_hash: B256) -> ProviderResult<Option<BatchReceipt>>;

    /// Next expected nonce for `sender` under `key`
    async fn get_sender_nonce(&self, sender: Address, key: U256) -> ProviderResult<U256>;

    /// Deposit held for `address` by the entry point
    async fn get_deposit(&self, address: Address) -> ProviderResult<U256>;

    /// Native balance of `address`
    async fn get_balance(&self, address: Address) -> ProviderResult<U256>;
}
