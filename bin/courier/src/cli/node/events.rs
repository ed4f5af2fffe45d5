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

use std::fmt;

use courier_builder::BuilderEvent;
use courier_pool::OpPoolEvent;

/// Anything the node logs from its component broadcast channels
#[derive(Clone, Debug)]
pub enum Event {
    Pool(OpPoolEvent),
    Builder(BuilderEvent),
}

impl From<OpPoolEvent> for Event {
    fn from(event: OpPoolEvent) -> Self {
        Self::Pool(event)
    }
}

impl From<BuilderEvent> for Event {
    fn from(event: BuilderEvent) -> Self {
        Self::Builder(event)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pool(event) => write!(f, "pool: {event}"),
            Self::Builder(event) => write!(f, "builder: {event}"),
        }
    }
}
