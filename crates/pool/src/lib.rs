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
//! Mempool implementation for Courier.
//!
//! Holds admitted operations in priority order, tracks the reputation of the
//! addresses that submit them, and validates new operations before admission.

mod emit;
pub use emit::{OpPoolEvent, OpRemovalReason};

mod mempool;
pub use mempool::{
    OperationPool, OperationValidator, PoolConfig, ReputationParams, ReputationTracker,
    ValidatedOperation, ValidatorSettings,
};
