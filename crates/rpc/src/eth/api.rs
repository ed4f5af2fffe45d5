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

use std::sync::Arc;

use alloy_primitives::{Address, B256, U64};
use courier_provider::ChainClient;
use courier_sim::{Prechecker, Simulator};
use courier_utils::log::LogOnError;
use tracing::Level;

use super::EthResult;
use crate::{
    types::{RpcGasEstimate, RpcUserOperation, RpcUserOperationOptionalGas},
    BundlerServer,
};

pub(crate) struct EthApi<P, S, C> {
    server: Arc<BundlerServer<P, S, C>>,
}

impl<P, S, C> EthApi<P, S, C>
where
    P: Prechecker,
    S: Simulator,
    C: ChainClient,
{
    pub(crate) fn new(server: Arc<BundlerServer<P, S, C>>) -> Self {
        Self { server }
    }

    pub(crate) async fn send_user_operation(
        &self,
        op: RpcUserOperation,
        entry_point: Address,
    ) -> EthResult<B256> {
        self.server
            .submit_operation(op.into(), entry_point)
            .await
            .log_on_error_level(Level::DEBUG, "failed to add op to the mempool")
            .map_err(Into::into)
    }

    pub(crate) async fn estimate_user_operation_gas(
        &self,
        op: RpcUserOperationOptionalGas,
        entry_point: Address,
    ) -> EthResult<RpcGasEstimate> {
        self.server
            .estimate_operation_gas(op.into(), entry_point)
            .await
            .log_on_error_level(Level::DEBUG, "gas estimation failed")
            .map(Into::into)
            .map_err(Into::into)
    }

    pub(crate) fn supported_entry_points(&self) -> Vec<String> {
        self.server
            .supported_entry_points()
            .into_iter()
            .map(|ep| ep.to_checksum(None))
            .collect()
    }

    pub(crate) fn chain_id(&self) -> U64 {
        U64::from(self.server.chain_id())
    }
}
