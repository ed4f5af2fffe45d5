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

//! Batch selection and the submission loop that sends batches to the entry point.

mod batch_builder;
#[cfg(feature = "test-utils")]
pub use batch_builder::MockBatchBuilder;
pub use batch_builder::{BatchBuilder, BatchBuilderImpl, Settings as BuilderSettings};

mod emit;
pub use emit::{BuilderEvent, SkipReason};

mod submission_loop;
pub use submission_loop::{
    SendBundleRequest, SendBundleResult, Settings as SubmissionSettings, SubmissionHandle,
    SubmissionLoop,
};
