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

#![warn(missing_docs, unreachable_pub)]
#![deny(unused_must_use, rust_2018_idioms)]
#![doc(test(
    no_crate_inject,
    attr(deny(warnings, rust_2018_idioms), allow(dead_code, unused_variables))
))]
//! JSON-RPC server for Courier.
//!
//! Exposes the `eth_` user operation methods and the `debug_bundler_` test
//! methods on top of a [`BundlerServer`].

mod bundler;
pub use bundler::BundlerServer;

mod debug;
pub use debug::DebugApiClient;

mod error;

mod eth;
pub use eth::EthApiClient;

mod metrics;

mod task;
pub use task::{Args as RpcTaskArgs, RpcTask};

mod types;
pub use types::{
    ApiNamespace, RpcGasEstimate, RpcReputationInput, RpcReputationOutput, RpcUserOperation,
    RpcUserOperationOptionalGas,
};

mod utils;
