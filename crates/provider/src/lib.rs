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

//! Courier providers
//!
//! The chain boundary: everything the bundler reads from or writes to the
//! entry point goes through the [`ChainClient`] trait.

mod alloy;
pub use alloy::{new_alloy_chain_client, AlloyChainClient};

mod traits;
#[cfg(feature = "test-utils")]
pub use traits::MockChainClient;
pub use traits::{ChainClient, HandleOpsOut, ProviderError, ProviderResult};
