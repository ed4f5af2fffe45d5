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

use alloy_network::EthereumWallet;
use anyhow::{bail, Context};
use clap::Args;
use courier_builder::{BatchBuilderImpl, BuilderEvent, SubmissionHandle, SubmissionLoop};
use courier_pool::{OpPoolEvent, OperationPool, OperationValidator};
use courier_provider::{new_alloy_chain_client, ChainClient};
use courier_rpc::{BundlerServer, RpcTask};
use courier_sim::{PrecheckerImpl, SimulatorImpl};
use courier_types::chain::ChainSpec;
use courier_utils::{
    emit::{self, WithEntryPoint, EVENT_CHANNEL_CAPACITY},
    handle::{flatten_handle, spawn_named},
};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use self::events::Event;
use crate::cli::{
    builder::{self, BuilderArgs},
    pool::PoolArgs,
    rpc::RpcArgs,
    CommonArgs,
};
mod events;

const REQUEST_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Args)]
pub struct NodeCliArgs {
    #[command(flatten)]
    pub pool: PoolArgs,

    #[command(flatten)]
    pub builder: BuilderArgs,

    #[command(flatten)]
    pub rpc: RpcArgs,
}

pub async fn run(bundler_args: NodeCliArgs, common_args: CommonArgs) -> anyhow::Result<()> {
    let NodeCliArgs {
        pool: pool_args,
        builder: builder_args,
        rpc: rpc_args,
    } = bundler_args;

    let signer = builder_args.signer()?;
    let signer_address = signer.address();
    let client = Arc::new(new_alloy_chain_client(
        common_args.node_http()?,
        common_args.entry_point,
        EthereumWallet::from(signer),
    )?);
    check_chain_id(client.as_ref(), common_args.chain_id).await?;

    let chain_spec = ChainSpec::new(common_args.chain_id, common_args.entry_point);
    tracing::info!("Chain spec: {chain_spec:#?}");
    tracing::info!("Sending batches from {signer_address:?}");

    let (event_sender, event_rx) =
        broadcast::channel::<WithEntryPoint<Event>>(EVENT_CHANNEL_CAPACITY);
    let (op_pool_event_sender, op_pool_event_rx) =
        broadcast::channel::<WithEntryPoint<OpPoolEvent>>(EVENT_CHANNEL_CAPACITY);
    let (builder_event_sender, builder_event_rx) =
        broadcast::channel::<WithEntryPoint<BuilderEvent>>(EVENT_CHANNEL_CAPACITY);

    emit::receive_and_log_events_with_filter(event_rx, |_| true);
    emit::receive_events("op pool", op_pool_event_rx, {
        let event_sender = event_sender.clone();
        move |event| {
            let _ = event_sender.send(WithEntryPoint {
                entry_point: event.entry_point,
                event: event.event.into(),
            });
        }
    });
    emit::receive_events("builder", builder_event_rx, {
        let event_sender = event_sender.clone();
        move |event| {
            if builder::is_nonspammy_event(&event) {
                let _ = event_sender.send(WithEntryPoint {
                    entry_point: event.entry_point,
                    event: event.event.into(),
                });
            }
        }
    });

    let pool = Arc::new(OperationPool::new(
        pool_args.pool_config(&common_args),
        op_pool_event_sender,
    ));
    let reputation = Arc::new(pool_args.reputation_tracker()?);
    let precheck_settings = common_args.precheck_settings(builder_args.max_batch_gas);

    let validator = OperationValidator::new(
        Arc::clone(&pool),
        Arc::clone(&reputation),
        PrecheckerImpl::new(chain_spec.clone(), precheck_settings),
        SimulatorImpl::new(Arc::clone(&client), (&common_args).into()),
        Arc::clone(&client),
        (&common_args).into(),
    );

    let (submission_handle, action_receiver) = SubmissionHandle::new(REQUEST_CHANNEL_CAPACITY);
    let submission_loop = SubmissionLoop::new(
        BatchBuilderImpl::new(
            Arc::clone(&pool),
            SimulatorImpl::new(Arc::clone(&client), (&common_args).into()),
            Arc::clone(&client),
            builder_args.builder_settings(signer_address),
            builder_event_sender.clone(),
        ),
        PrecheckerImpl::new(chain_spec.clone(), precheck_settings),
        Arc::clone(&client),
        pool,
        reputation,
        builder_args.submission_settings(signer_address),
        builder_event_sender,
    );

    let estimation_settings =
        rpc_args.estimation_settings(&common_args, builder_args.max_batch_gas);
    let server = Arc::new(BundlerServer::new(
        validator,
        client,
        chain_spec,
        estimation_settings,
        submission_handle,
    ));
    let rpc_task = RpcTask::new(rpc_args.to_args()?, server);

    let shutdown_token = CancellationToken::new();
    let loop_handle = spawn_named("submission loop", submission_loop.run(action_receiver));
    let rpc_handle = spawn_named("rpc server", rpc_task.run(shutdown_token.clone()));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received ctrl-c, shutting down");
        }
        res = flatten_handle(loop_handle) => {
            shutdown_token.cancel();
            bail!("submission loop exited: {res:?}");
        }
        res = flatten_handle(rpc_handle) => {
            bail!("rpc server exited: {res:?}");
        }
    }

    shutdown_token.cancel();
    Ok(())
}

async fn check_chain_id<C: ChainClient>(client: &C, expected: u64) -> anyhow::Result<()> {
    let chain_id = client
        .get_chain_id()
        .await
        .context("should fetch chain id from node")?;
    if chain_id != expected {
        bail!("node is on chain {chain_id} but chain_id is set to {expected}");
    }
    Ok(())
}
