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

use alloy_primitives::{Address, B256};
use async_trait::async_trait;
use courier_builder::SendBundleResult;
use courier_provider::ChainClient;
use courier_sim::{Prechecker, Simulator};
use jsonrpsee::{core::RpcResult, proc_macros::rpc};

use crate::{
    eth::{EthResult, EthRpcError},
    types::{RpcReputationInput, RpcReputationOutput, RpcUserOperation},
    utils::{self, InternalRpcResult},
    BundlerServer,
};

/// Debug API
#[rpc(client, server, namespace = "debug")]
pub trait DebugApi {
    /// Clears the pool and all reputation.
    #[method(name = "bundler_clearState")]
    async fn bundler_clear_state(&self) -> RpcResult<String>;

    /// Dumps the mempool.
    #[method(name = "bundler_dumpMempool")]
    async fn bundler_dump_mempool(&self, entry_point: Address) -> RpcResult<Vec<RpcUserOperation>>;

    /// Runs one submission cycle now and returns its transaction hash.
    ///
    /// Returns the zero hash when the pool had nothing to submit.
    #[method(name = "bundler_sendBundleNow")]
    async fn bundler_send_bundle_now(&self) -> RpcResult<B256>;

    /// Sets the reputations of entities on the given entry point.
    #[method(name = "bundler_setReputation")]
    async fn bundler_set_reputation(
        &self,
        reputations: Vec<RpcReputationInput>,
        entry_point: Address,
    ) -> RpcResult<String>;

    /// Dumps the reputations of entities from the given entry point.
    #[method(name = "bundler_dumpReputation")]
    async fn bundler_dump_reputation(
        &self,
        entry_point: Address,
    ) -> RpcResult<Vec<RpcReputationOutput>>;
}

pub(crate) struct DebugApi<P, S, C> {
    server: Arc<BundlerServer<P, S, C>>,
}

impl<P, S, C> DebugApi<P, S, C> {
    pub(crate) fn new(server: Arc<BundlerServer<P, S, C>>) -> Self {
        Self { server }
    }
}

#[async_trait]
impl<P, S, C> DebugApiServer for DebugApi<P, S, C>
where
    P: Prechecker,
    S: Simulator,
    C: ChainClient,
{
    async fn bundler_clear_state(&self) -> RpcResult<String> {
        utils::safe_call_rpc_handler("bundler_clearState", DebugApi::bundler_clear_state(self))
            .await
    }

    async fn bundler_dump_mempool(&self, entry_point: Address) -> RpcResult<Vec<RpcUserOperation>> {
        utils::safe_call_rpc_handler(
            "bundler_dumpMempool",
            DebugApi::bundler_dump_mempool(self, entry_point),
        )
        .await
    }

    async fn bundler_send_bundle_now(&self) -> RpcResult<B256> {
        utils::safe_call_rpc_handler(
            "bundler_sendBundleNow",
            DebugApi::bundler_send_bundle_now(self),
        )
        .await
    }

    async fn bundler_set_reputation(
        &self,
        reputations: Vec<RpcReputationInput>,
        entry_point: Address,
    ) -> RpcResult<String> {
        utils::safe_call_rpc_handler(
            "bundler_setReputation",
            DebugApi::bundler_set_reputation(self, reputations, entry_point),
        )
        .await
    }

    async fn bundler_dump_reputation(
        &self,
        entry_point: Address,
    ) -> RpcResult<Vec<RpcReputationOutput>> {
        utils::safe_call_rpc_handler(
            "bundler_dumpReputation",
            DebugApi::bundler_dump_reputation(self, entry_point),
        )
        .await
    }
}

impl<P, S, C> DebugApi<P, S, C>
where
    P: Prechecker,
    S: Simulator,
    C: ChainClient,
{
    async fn bundler_clear_state(&self) -> InternalRpcResult<String> {
        self.server.clear_state();
        Ok("ok".to_string())
    }

    async fn bundler_dump_mempool(&self, entry_point: Address) -> EthResult<Vec<RpcUserOperation>> {
        Ok(self
            .server
            .dump_mempool(entry_point)?
            .into_iter()
            .map(Into::into)
            .collect())
    }

    async fn bundler_send_bundle_now(&self) -> EthResult<B256> {
        tracing::debug!("Sending bundle");

        match self.server.send_bundle_now().await? {
            SendBundleResult::Success {
                tx_hash,
                block_number,
                success,
            } => {
                tracing::debug!(
                    "Bundle {tx_hash:?} mined in block {block_number}, success: {success}"
                );
                Ok(tx_hash)
            }
            SendBundleResult::Unresolved { tx_hash } => {
                tracing::debug!("Bundle {tx_hash:?} sent but not yet mined");
                Ok(tx_hash)
            }
            SendBundleResult::NoOperations => Ok(B256::ZERO),
            SendBundleResult::Error(error) => {
                tracing::error!("Error sending bundle {error:?}");
                Err(EthRpcError::Internal(error))
            }
        }
    }

    async fn bundler_set_reputation(
        &self,
        reputations: Vec<RpcReputationInput>,
        entry_point: Address,
    ) -> EthResult<String> {
        self.server
            .set_reputation(entry_point, reputations.into_iter().map(Into::into))?;
        Ok("ok".to_string())
    }

    async fn bundler_dump_reputation(
        &self,
        entry_point: Address,
    ) -> EthResult<Vec<RpcReputationOutput>> {
        Ok(self
            .server
            .dump_reputation(entry_point)?
            .into_iter()
            .map(Into::into)
            .collect())
    }
}
