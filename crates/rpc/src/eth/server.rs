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

use alloy_primitives::{Address, B256, U64};
use courier_provider::ChainClient;
use courier_sim::{Prechecker, Simulator};
use jsonrpsee::core::RpcResult;

use super::{api::EthApi, EthApiServer};
use crate::{
    types::{RpcGasEstimate, RpcUserOperation, RpcUserOperationOptionalGas},
    utils::safe_call_rpc_handler,
};

#[async_trait::async_trait]
impl<P, S, C> EthApiServer for EthApi<P, S, C>
where
    P: Prechecker,
    S: Simulator,
    C: ChainClient,
{
    async fn send_user_operation(
        &self,
        op: RpcUserOperation,
        entry_point: Address,
    ) -> RpcResult<B256> {
        safe_call_rpc_handler(
            "eth_sendUserOperation",
            EthApi::send_user_operation(self, op, entry_point),
        )
        .await
    }

    async fn estimate_user_operation_gas(
        &self,
        op: RpcUserOperationOptionalGas,
        entry_point: Address,
    ) -> RpcResult<RpcGasEstimate> {
        safe_call_rpc_handler(
            "eth_estimateUserOperationGas",
            EthApi::estimate_user_operation_gas(self, op, entry_point),
        )
        .await
    }

    async fn supported_entry_points(&self) -> RpcResult<Vec<String>> {
        Ok(EthApi::supported_entry_points(self))
    }

    async fn chain_id(&self) -> RpcResult<U64> {
        Ok(EthApi::chain_id(self))
    }
}
