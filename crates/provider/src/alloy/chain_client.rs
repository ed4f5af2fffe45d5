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

use std::collections::HashMap;

use alloy_contract::Error as ContractError;
use alloy_network::TransactionBuilder;
use alloy_primitives::{aliases::U192, Address, B256, U256};
use alloy_provider::Provider as AlloyProvider;
use alloy_rpc_types_eth::{Log, TransactionReceipt, TransactionRequest};
use alloy_sol_types::{ContractError as SolContractError, SolEvent};
use alloy_transport::{Transport, TransportError};
use anyhow::Context;
use courier_contracts::v0_6::{
    IEntryPoint::{FailedOp, IEntryPointErrors, IEntryPointInstance, UserOperationEvent},
    UserOperation as ContractUserOperation,
};
use courier_types::{BatchReceipt, UserOperation, ValidationOutput, ValidationRevert};
use tracing::instrument;

use crate::{ChainClient, HandleOpsOut, ProviderResult};

/// `ChainClient` backed by an alloy provider
pub struct AlloyChainClient<AP, T> {
    i_entry_point: IEntryPointInstance<T, AP>,
}

impl<AP, T> AlloyChainClient<AP, T>
where
    T: Transport + Clone,
    AP: AlloyProvider<T>,
{
    /// Bind to the entry point at `entry_point`
    pub fn new(entry_point: Address, provider: AP) -> Self {
        Self {
            i_entry_point: IEntryPointInstance::new(entry_point, provider),
        }
    }

    fn decode_receipt(&self, receipt: TransactionReceipt) -> BatchReceipt {
        let entry_point = *self.i_entry_point.address();
        let op_results = receipt
            .inner
            .logs()
            .iter()
            .filter(|log| log.address() == entry_point)
            .filter_map(decode_user_operation_event)
            .map(|event| (event.userOpHash, event.success))
            .collect::<HashMap<_, _>>();

        BatchReceipt {
            tx_hash: receipt.transaction_hash,
            block_number: receipt.block_number.unwrap_or_default(),
            success: receipt.status(),
            gas_used: receipt.gas_used,
            op_results,
        }
    }
}

// Node gas limits are u64, larger values are clamped
fn to_gas_limit(gas: u128) -> u64 {
    u64::try_from(gas).unwrap_or(u64::MAX)
}

fn decode_user_operation_event(log: &Log) -> Option<UserOperationEvent> {
    UserOperationEvent::decode_log(&log.inner, true)
        .ok()
        .map(|decoded| decoded.data)
}

#[async_trait::async_trait]
impl<AP, T> ChainClient for AlloyChainClient<AP, T>
where
    T: Transport + Clone,
    AP: AlloyProvider<T> + 'static,
{
    fn entry_point(&self) -> Address {
        *self.i_entry_point.address()
    }

    async fn get_chain_id(&self) -> ProviderResult<u64> {
        Ok(self.i_entry_point.provider().get_chain_id().await?)
    }

    async fn get_block_number(&self) -> ProviderResult<u64> {
        Ok(self.i_entry_point.provider().get_block_number().await?)
    }

    #[instrument(skip_all)]
    async fn simulate_validation(
        &self,
        op: UserOperation,
        max_validation_gas: u128,
    ) -> ProviderResult<Result<ValidationOutput, ValidationRevert>> {
        let pvg = op.pre_verification_gas;
        let call = self
            .i_entry_point
            .simulateValidation(op.into())
            .gas(to_gas_limit(max_validation_gas.saturating_add(pvg)));

        match call.call().await {
            Ok(_) => Err(anyhow::anyhow!("simulateValidation should always revert"))?,
            Err(ContractError::TransportError(TransportError::ErrorResp(resp))) => {
                let Some(err) = resp.as_decoded_error::<SolContractError<IEntryPointErrors>>(false)
                else {
                    return match resp.as_revert_data() {
                        Some(data) => Ok(Err(ValidationRevert::Unknown(data))),
                        None => Err(TransportError::ErrorResp(resp).into()),
                    };
                };
                match err {
                    SolContractError::CustomError(IEntryPointErrors::ValidationResult(s)) => {
                        Ok(Ok(s.into()))
                    }
                    SolContractError::CustomError(IEntryPointErrors::FailedOp(f)) => {
                        Ok(Err(ValidationRevert::EntryPoint(f.reason)))
                    }
                    SolContractError::Revert(r) => Ok(Err(ValidationRevert::Revert(r.reason))),
                    _ => Err(TransportError::ErrorResp(resp).into()),
                }
            }
            Err(error) => Err(error.into()),
        }
    }

    async fn estimate_call_gas(&self, op: UserOperation) -> ProviderResult<u128> {
        let tx = TransactionRequest::default()
            .with_from(*self.i_entry_point.address())
            .with_to(op.sender)
            .with_input(op.call_data);
        let gas = self.i_entry_point.provider().estimate_gas(&tx).await?;
        Ok(gas.into())
    }

    #[instrument(skip(self, ops), fields(num_ops = ops.len()))]
    async fn submit_batch(
        &self,
        ops: Vec<UserOperation>,
        beneficiary: Address,
        gas_limit: u128,
    ) -> ProviderResult<B256> {
        let ops: Vec<ContractUserOperation> = ops.into_iter().map(Into::into).collect();
        let call = self
            .i_entry_point
            .handleOps(ops, beneficiary)
            .gas(to_gas_limit(gas_limit));
        let pending = call.send().await?;
        tracing::debug!("sent handleOps transaction {:?}", pending.tx_hash());
        Ok(*pending.tx_hash())
    }

    #[instrument(skip(self, ops), fields(num_ops = ops.len()))]
    async fn call_handle_ops(
        &self,
        ops: Vec<UserOperation>,
        beneficiary: Address,
        gas_limit: u128,
    ) -> ProviderResult<HandleOpsOut> {
        let ops: Vec<ContractUserOperation> = ops.into_iter().map(Into::into).collect();
        let tx = self
            .i_entry_point
            .handleOps(ops, beneficiary)
            .gas(to_gas_limit(gas_limit))
            .into_transaction_request();

        match self.i_entry_point.provider().call(&tx).await {
            Ok(_) => Ok(HandleOpsOut::Success),
            Err(TransportError::ErrorResp(resp)) => {
                let Some(err) = resp.as_decoded_error::<SolContractError<IEntryPointErrors>>(false)
                else {
                    return Err(TransportError::ErrorResp(resp).into());
                };
                match err {
                    SolContractError::CustomError(IEntryPointErrors::FailedOp(FailedOp {
                        opIndex,
                        reason,
                    })) => {
                        // AA95 is out of gas for the whole batch, not a fault of the operation
                        if reason.starts_with("AA95") {
                            return Err(
                                anyhow::anyhow!("handleOps called with insufficient gas").into()
                            );
                        }
                        let index = opIndex
                            .try_into()
                            .context("returned opIndex out of bounds")?;
                        Ok(HandleOpsOut::FailedOp(index, reason))
                    }
                    SolContractError::Revert(r) => Ok(HandleOpsOut::Revert(r.reason)),
                    _ => Err(TransportError::ErrorResp(resp).into()),
                }
            }
            Err(error) => Err(error.into()),
        }
    }

    async fn get_transaction_receipt(&self, tx_hash: B256) -> ProviderResult<Option<BatchReceipt>> {
        let receipt = self
            .i_entry_point
            .provider()
            .get_transaction_receipt(tx_hash)
            .await?;
        Ok(receipt.map(|r| self.decode_receipt(r)))
    }

    async fn get_sender_nonce(&self, sender: Address, key: U256) -> ProviderResult<U256> {
        // key holds at most 192 bits, the low 24 bytes
        let key = U192::from_be_slice(&key.to_be_bytes::<32>()[8..]);
        let ret = self.i_entry_point.getNonce(sender, key).call().await?;
        Ok(ret.nonce)
    }

    async fn get_deposit(&self, address: Address) -> ProviderResult<U256> {
        let ret = self.i_entry_point.balanceOf(address).call().await?;
        Ok(ret._0)
    }

    async fn get_balance(&self, address: Address) -> ProviderResult<U256> {
        Ok(self.i_entry_point.provider().get_balance(address).await?)
    }
}
