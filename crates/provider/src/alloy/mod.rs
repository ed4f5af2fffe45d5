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

use alloy_network::EthereumWallet;
use alloy_primitives::Address;
use alloy_provider::ProviderBuilder;
use anyhow::Context;
use url::Url;

use crate::ChainClient;

mod chain_client;
pub use chain_client::AlloyChainClient;

/// Create a chain client over HTTP that signs its batch transactions with `wallet`
pub fn new_alloy_chain_client(
    rpc_url: &str,
    entry_point: Address,
    wallet: EthereumWallet,
) -> anyhow::Result<impl ChainClient> {
    let url = Url::parse(rpc_url).context("invalid rpc url")?;
    let provider = ProviderBuilder::new()
        .with_recommended_fillers()
        .wallet(wallet)
        .on_http(url);
    Ok(AlloyChainClient::new(entry_point, provider))
}
