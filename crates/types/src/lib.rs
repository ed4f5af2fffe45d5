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

//! Courier types
//!
//! Shared data model for the bundling pipeline: user operations, pool entries,
//! batches, reputation records and the error taxonomy.

mod batch;
pub use batch::{Batch, BatchReceipt, RejectedOp};

pub mod chain;

mod entity;
pub use entity::{Entity, EntityType};

pub mod pool;

mod timestamp;
pub use timestamp::{Timestamp, ValidTimeRange};

mod user_operation;
pub use user_operation::{UserOperation, UserOperationId, UserOperationOptionalGas};

mod validation;
pub use validation::{ValidationOutput, ValidationRevert};
