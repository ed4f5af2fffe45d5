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

use std::{net::SocketAddr, sync::Arc};

use anyhow::{bail, Context};
use courier_provider::ChainClient;
use courier_sim::{Prechecker, Simulator};
use jsonrpsee::{
    server::{middleware::rpc::RpcServiceBuilder, Server},
    RpcModule,
};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{
    debug::{DebugApi, DebugApiServer},
    eth::{EthApi, EthApiServer},
    metrics::RpcMetricsMiddleware,
    types::ApiNamespace,
    BundlerServer,
};

/// RPC server arguments.
#[derive(Debug, Clone)]
pub struct Args {
    /// Port to listen on.
    pub port: u16,
    /// Host to listen on.
    pub host: String,
    /// List of API namespaces to enable.
    pub api_namespaces: Vec<ApiNamespace>,
    /// Max number of connections.
    pub max_connections: u32,
}

/// JSON-RPC server task.
pub struct RpcTask<P, S, C> {
    args: Args,
    server: Arc<BundlerServer<P, S, C>>,
}

impl<P, S, C> RpcTask<P, S, C>
where
    P: Prechecker,
    S: Simulator,
    C: ChainClient,
{
    /// Creates a new RPC server task.
    pub fn new(args: Args, server: Arc<BundlerServer<P, S, C>>) -> Self {
        Self { args, server }
    }

    /// Serve until `shutdown_token` is cancelled
    pub async fn run(self, shutdown_token: CancellationToken) -> anyhow::Result<()> {
        let addr: SocketAddr = format_socket_addr(&self.args.host, self.args.port)
            .parse()
            .context("invalid rpc listen address")?;
        info!("Starting rpc server on {addr}");

        let module = self.build_module()?;
        let rpc_middleware = RpcServiceBuilder::new().layer_fn(RpcMetricsMiddleware::new);
        let server = Server::builder()
            .set_rpc_middleware(rpc_middleware)
            .max_connections(self.args.max_connections)
            .http_only()
            .build(addr)
            .await?;
        let handle = server.start(module);

        info!("Started RPC server");

        tokio::select! {
            _ = handle.clone().stopped() => {
                tracing::error!("RPC server stopped unexpectedly");
                bail!("RPC server stopped unexpectedly")
            }
            _ = shutdown_token.cancelled() => {
                tracing::info!("Server shutdown");
                let _ = handle.stop();
                Ok(())
            }
        }
    }

    fn build_module(&self) -> anyhow::Result<RpcModule<()>> {
        let mut module = RpcModule::new(());
        for api in &self.args.api_namespaces {
            match api {
                ApiNamespace::Eth => {
                    module.merge(EthApi::new(Arc::clone(&self.server)).into_rpc())?
                }
                ApiNamespace::Debug => {
                    module.merge(DebugApi::new(Arc::clone(&self.server)).into_rpc())?
                }
            }
        }
        Ok(module)
    }
}

fn format_socket_addr(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_socket_addr() {
        assert_eq!(format_socket_addr("0.0.0.0", 3000), "0.0.0.0:3000");
        assert_eq!(format_socket_addr("::1", 3000), "[::1]:3000");
        format_socket_addr("::1", 3000)
            .parse::<SocketAddr>()
            .unwrap();
    }
}
