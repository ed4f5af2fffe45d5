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

use std::{fmt::Display, sync::Arc};

use alloy_primitives::{Address, B256, U256};
use courier_types::{Entity, Timestamp};

/// Builder event
#[derive(Clone, Debug)]
pub enum BuilderEvent {
    /// A batch transaction was sent
    FormedBatch {
        /// Transaction hash
        tx_hash: B256,
        /// Operations in the batch, in order
        op_hashes: Arc<Vec<B256>>,
        /// Gas limit set on the transaction
        gas_limit: u128,
        /// Receiver of the collected fees
        beneficiary: Address,
    },
    /// A batch transaction was mined
    TransactionMined {
        /// Transaction hash
        tx_hash: B256,
        /// Block number containing the transaction
        block_number: u64,
        /// False if `handleOps` reverted
        success: bool,
    },
    /// No receipt arrived in time, the batch will be reconciled later if it lands
    ReceiptTimedOut {
        /// Transaction hash
        tx_hash: B256,
    },
    /// Sending a batch failed and the cycle was abandoned
    SubmissionFailed {
        /// Error message
        error: Arc<String>,
        /// True if retries were exhausted on a retryable error
        transient: bool,
    },
    /// An operation was skipped while building a batch
    SkippedOp {
        /// Operation hash
        op_hash: B256,
        /// Reason for skipping
        reason: SkipReason,
    },
    /// An operation failed re-validation while building and will be removed
    RejectedOp {
        /// Operation hash
        op_hash: B256,
        /// Revert reason or rejection cause
        reason: Arc<String>,
        /// Entity held responsible, if any
        culprit: Option<Entity>,
    },
}

/// Reason for skipping an operation in a batch
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SkipReason {
    /// The batch already has an operation from this sender
    SenderAlreadyInBatch,
    /// The sender nonce could not be fetched
    NonceUnavailable,
    /// The operation nonce is not the next one on chain
    NonceMismatch {
        /// On-chain nonce
        expected: U256,
        /// Operation nonce
        actual: U256,
    },
    /// The operation's validity window has not opened yet
    NotYetValid {
        /// Operation valid after timestamp
        valid_after: Timestamp,
    },
    /// Re-simulation could not reach the node
    SimulationUnavailable,
    /// Batch ran out of gas to include the operation
    MaxGasLimit,
    /// Batch reached the operation count limit
    MaxOperations,
}

impl Display for BuilderEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuilderEvent::FormedBatch {
                tx_hash,
                op_hashes,
                gas_limit,
                beneficiary,
            } => {
                write!(
                    f,
                    concat!(
                        "Sent batch.",
                        "    Transaction hash: {:?}",
                        "    Ops: {:?}",
                        "    Gas limit: {}",
                        "    Beneficiary: {:?}",
                    ),
                    tx_hash, op_hashes, gas_limit, beneficiary,
                )
            }
            BuilderEvent::TransactionMined {
                tx_hash,
                block_number,
                success,
            } => {
                write!(
                    f,
                    concat!(
                        "Batch transaction mined.",
                        "    Transaction hash: {:?}",
                        "    Block number: {}",
                        "    Success: {}",
                    ),
                    tx_hash, block_number, success,
                )
            }
            BuilderEvent::ReceiptTimedOut { tx_hash } => {
                write!(
                    f,
                    "No receipt for batch transaction.    Transaction hash: {tx_hash:?}"
                )
            }
            BuilderEvent::SubmissionFailed { error, transient } => {
                write!(
                    f,
                    "Batch submission failed.    Transient: {transient}    Error: {error}"
                )
            }
            BuilderEvent::RejectedOp {
                op_hash,
                reason,
                culprit,
            } => {
                write!(
                    f,
                    "Rejected op.    Op hash: {op_hash:?}    Reason: {reason}"
                )?;
                if let Some(culprit) = culprit {
                    write!(f, "    Culprit: {culprit}")?;
                }
                Ok(())
            }
            BuilderEvent::SkippedOp { op_hash, reason } => match reason {
                SkipReason::NonceMismatch { expected, actual } => write!(
                    f,
                    "Skipped op.    Op hash: {op_hash:?}    Nonce {actual} does not match on-chain nonce {expected}"
                ),
                _ => write!(f, "Skipped op.    Op hash: {op_hash:?}    Reason: {reason:?}"),
            },
        }
    }
}
