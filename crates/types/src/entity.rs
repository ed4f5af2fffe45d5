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

use std::fmt::Display;

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};
use strum::{EnumIter, EnumString, IntoStaticStr};

/// The role an address plays in a user operation
#[derive(
    Clone,
    Copy,
    Debug,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
    Deserialize,
    EnumIter,
    EnumString,
    IntoStaticStr,
    strum::Display,
)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum EntityType {
    /// The sender smart account
    Account,
    /// The paymaster sponsoring gas, if any
    Paymaster,
    /// The factory deploying the account, if any
    Factory,
}

/// An address together with the role it plays
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Entity {
    /// Role
    pub kind: EntityType,
    /// Address
    pub address: Address,
}

impl Entity {
    /// Create a new entity
    pub fn new(kind: EntityType, address: Address) -> Self {
        Self { kind, address }
    }

    /// An account entity
    pub fn account(address: Address) -> Self {
        Self::new(EntityType::Account, address)
    }

    /// A paymaster entity
    pub fn paymaster(address: Address) -> Self {
        Self::new(EntityType::Paymaster, address)
    }

    /// A factory entity
    pub fn factory(address: Address) -> Self {
        Self::new(EntityType::Factory, address)
    }
}

impl Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.address.to_checksum(None))
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn test_entity_type_strings() {
        assert_eq!(EntityType::Paymaster.to_string(), "paymaster");
        assert_eq!(EntityType::from_str("factory").unwrap(), EntityType::Factory);
        assert!(EntityType::from_str("aggregator").is_err());
    }

    #[test]
    fn test_display() {
        let e = Entity::account(Address::ZERO);
        assert_eq!(
            e.to_string(),
            "account:0x0000000000000000000000000000000000000000"
        );
    }
}
