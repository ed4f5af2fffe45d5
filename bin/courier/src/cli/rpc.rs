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

use clap::Args;
use courier_rpc::{ApiNamespace, RpcTaskArgs};
use courier_sim::EstimationSettings;

use super::CommonArgs;

/// CLI options for the RPC server
#[derive(Args, Debug)]
#[command(next_help_heading = "RPC")]
pub struct RpcArgs {
    /// Port to listen on for JSON-RPC requests
    #[arg(
        long = "rpc.port",
        name = "rpc.port",
        env = "RPC_PORT",
        default_value = "3000"
    )]
    pub port: u16,

    /// Host to listen on for JSON-RPC requests
    #[arg(
        long = "rpc.host",
        name = "rpc.host",
        env = "RPC_HOST",
        default_value = "0.0.0.0"
    )]
    pub host: String,

    /// Which APIs to expose over the RPC interface
    #[arg(
        long = "rpc.api",
        name = "rpc.api",
        env = "RPC_API",
        default_value = "eth",
        value_delimiter = ',',
        value_parser = ["eth", "debug"]
    )]
    pub api: Vec<String>,

    /// Maximum number of concurrent connections
    #[arg(
        long = "rpc.max_connections",
        name = "rpc.max_connections",
        env = "RPC_MAX_CONNECTIONS",
        default_value = "100"
    )]
    pub max_connections: u32,

    /// Percentage added to the simulated verification gas in estimates
    #[arg(
        long = "rpc.verification_gas_buffer_percent",
        name = "rpc.verification_gas_buffer_percent",
        env = "RPC_VERIFICATION_GAS_BUFFER_PERCENT",
        default_value = "10"
    )]
    pub verification_gas_buffer_percent: u32,
}

impl RpcArgs {
    pub fn to_args(&self) -> anyhow::Result<RpcTaskArgs> {
        let api_namespaces = self
            .api
            .iter()
            .map(|api| api.parse::<ApiNamespace>())
            .collect::<Result<Vec<_>, _>>()?;

        Ok(RpcTaskArgs {
            port: self.port,
            host: self.host.clone(),
            api_namespaces,
            max_connections: self.max_connections,
        })
    }

    /// Estimates fill unset call gas with the batch ceiling
    pub fn estimation_settings(
        &self,
        common: &CommonArgs,
        max_batch_gas: u128,
    ) -> EstimationSettings {
        EstimationSettings {
            max_call_gas: max_batch_gas,
            max_verification_gas: common.max_verification_gas,
            verification_gas_buffer_percent: self.verification_gas_buffer_percent,
        }
    }
}
