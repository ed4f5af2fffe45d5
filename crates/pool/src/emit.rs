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

use alloy_primitives::{Address, B256, U256};
use courier_types::{Timestamp, UserOperation};

/// Event type for the pool
#[derive(Clone, Debug)]
pub enum OpPoolEvent {
    /// An operation was received and added to the pool
    ReceivedOp {
        /// Operation hash
        op_hash: B256,
        /// The full operation
        op: UserOperation,
        /// Operation valid after timestamp
        valid_after: Timestamp,
        /// Operation valid until timestamp
        valid_until: Timestamp,
        /// Hash of the operation this one replaced, if any
        replaced: Option<B256>,
    },
    /// An operation was removed from the pool
    RemovedOp {
        /// Operation hash
        op_hash: B256,
        /// Removal reason
        reason: OpRemovalReason,
    },
    /// All operations involving an address were removed from the pool
    RemovedEntity {
        /// The removed address
        address: Address,
        /// Number of operations removed
        count: usize,
    },
}

/// Reason an operation was removed from the pool
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OpRemovalReason {
    /// Removal was requested
    Requested,
    /// Op was executed successfully in a batch
    Included {
        /// Batch transaction hash
        tx_hash: B256,
    },
    /// Op consumed its nonce but failed, or reverted and can no longer be admitted
    Reverted {
        /// Batch transaction hash
        tx_hash: B256,
    },
    /// Op was replaced by a higher fee op with the same sender and nonce
    Replaced {
        /// Hash of the replacement
        by: B256,
    },
    /// Op had the lowest priority when the pool overflowed
    Evicted,
    /// Op validity window closed
    Expired {
        /// Op was valid until this timestamp
        valid_until: Timestamp,
    },
    /// The sender nonce moved past the op on chain
    StaleNonce {
        /// Current on-chain nonce for the op's sender and key
        onchain_nonce: U256,
    },
    /// Op was submitted too many times without being included
    MaxAttempts {
        /// Submission attempts made
        attempts: u32,
    },
    /// Op failed re-validation while a batch was being built
    FailedRevalidation {
        /// Revert reason or rejection cause
        reason: String,
    },
    /// Op was removed because an associated address had all of its ops removed
    EntityRemoved {
        /// The removed address
        address: Address,
    },
}

impl OpRemovalReason {
    /// True if the op left the pool without being included and its entities
    /// should be charged an expiry.
    pub fn is_expiry(&self) -> bool {
        matches!(
            self,
            OpRemovalReason::Expired { .. } | OpRemovalReason::MaxAttempts { .. }
        )
    }
}

impl Display for OpPoolEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OpPoolEvent::ReceivedOp {
                op_hash,
                op,
                replaced,
                ..
            } => {
                write!(
                    f,
                    concat!(
                        "Pool accepted op.",
                        "    Op hash: {:?}",
                        "    Sender: {:?}",
                        "    Nonce: {}",
                        "    maxFeePerGas: {}",
                        "    maxPriorityFeePerGas: {}",
                    ),
                    op_hash,
                    op.sender,
                    op.nonce,
                    op.max_fee_per_gas,
                    op.max_priority_fee_per_gas,
                )?;
                if let Some(replaced) = replaced {
                    write!(f, "    Replaced: {replaced:?}")?;
                }
                Ok(())
            }
            OpPoolEvent::RemovedOp { op_hash, reason } => {
                write!(
                    f,
                    concat!(
                        "Removed op from pool.",
                        "    Op hash: {:?}",
                        "    Reason: {:?}",
                    ),
                    op_hash, reason,
                )
            }
            OpPoolEvent::RemovedEntity { address, count } => {
                write!(
                    f,
                    concat!(
                        "Removed entity from pool.",
                        "    Address: {:?}",
                        "    Ops removed: {}",
                    ),
                    address, count,
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_received() {
        let event = OpPoolEvent::ReceivedOp {
            op_hash: B256::ZERO,
            op: UserOperation {
                max_fee_per_gas: 7,
                ..Default::default()
            },
            valid_after: Timestamp::new(0),
            valid_until: Timestamp::new(u64::MAX),
            replaced: Some(B256::repeat_byte(1)),
        };
        let s = event.to_string();
        assert!(s.starts_with("Pool accepted op."));
        assert!(s.contains("maxFeePerGas: 7"));
        assert!(s.contains("Replaced: 0x0101"));
    }

    #[test]
    fn test_expiry_reasons() {
        assert!(OpRemovalReason::MaxAttempts { attempts: 4 }.is_expiry());
        assert!(OpRemovalReason::Expired {
            valid_until: Timestamp::new(1)
        }
        .is_expiry());
        assert!(!OpRemovalReason::StaleNonce {
            onchain_nonce: U256::from(2)
        }
        .is_expiry());
        assert!(!OpRemovalReason::Evicted.is_expiry());
    }
}
