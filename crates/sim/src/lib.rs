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

//! Structural prechecks, entry point simulation and gas estimation for user operations.

mod estimation;
pub use estimation::{GasEstimate, Settings as EstimationSettings};

mod precheck;
#[cfg(feature = "test-utils")]
pub use precheck::MockPrechecker;
pub use precheck::{
    PrecheckError, Prechecker, PrecheckerImpl, Settings as PrecheckSettings, MIN_CALL_GAS_LIMIT,
};

mod simulation;
#[cfg(feature = "test-utils")]
pub use simulation::MockSimulator;
pub use simulation::{classify_revert, Settings as SimulationSettings, Simulator, SimulatorImpl};

/// Whether an operation is being admitted to the pool or only estimated.
///
/// Estimation relaxes the checks that depend on values the caller has not filled in yet.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CheckMode {
    /// Full checks for pool admission
    Admission,
    /// Relaxed checks for gas estimation
    Estimation,
}
