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

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use alloy_primitives::{Address, U256};
use anyhow::Context;
use async_trait::async_trait;
use courier_pool::OperationPool;
use courier_provider::{ChainClient, HandleOpsOut};
use courier_sim::{CheckMode, Simulator};
use courier_types::{
    pool::{MempoolError, PoolOperation},
    Batch, Entity, RejectedOp, Timestamp, UserOperation, UserOperationId,
};
use courier_utils::{
    emit::{self, WithEntryPoint},
    math,
};
use futures::future;
#[cfg(any(test, feature = "test-utils"))]
use mockall::automock;
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};

use crate::emit::{BuilderEvent, SkipReason};

/// Batch selection limits
#[derive(Clone, Copy, Debug)]
pub struct Settings {
    /// Gas ceiling of a batch
    pub max_batch_gas: u128,
    /// Maximum operations in a batch
    pub max_ops_per_batch: usize,
    /// Number of pool entries considered per build
    pub max_candidates: usize,
    /// Beneficiary used when dry running `handleOps`
    pub beneficiary: Address,
    /// Percentage added to the batch gas for the dry run gas limit
    pub gas_limit_buffer_percent: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_batch_gas: 10_000_000,
            max_ops_per_batch: 16,
            max_candidates: 64,
            beneficiary: Address::ZERO,
            gas_limit_buffer_percent: 10,
        }
    }
}

/// Selects the operations for the next batch
#[cfg_attr(any(test, feature = "test-utils"), automock)]
#[async_trait]
pub trait BatchBuilder: Send + Sync + 'static {
    /// Build a batch from the current pool. An empty batch is a valid result.
    ///
    /// Operations that no longer validate are returned in [`Batch::rejected`]
    /// for the caller to remove.
    async fn build(&self) -> anyhow::Result<Batch>;
}

/// Batch builder reading from an [`OperationPool`]
#[derive(Debug)]
pub struct BatchBuilderImpl<S, C> {
    pool: Arc<OperationPool>,
    simulator: S,
    client: Arc<C>,
    settings: Settings,
    event_sender: broadcast::Sender<WithEntryPoint<BuilderEvent>>,
}

impl<S, C> BatchBuilderImpl<S, C> {
    /// Create a new builder
    pub fn new(
        pool: Arc<OperationPool>,
        simulator: S,
        client: Arc<C>,
        settings: Settings,
        event_sender: broadcast::Sender<WithEntryPoint<BuilderEvent>>,
    ) -> Self {
        Self {
            pool,
            simulator,
            client,
            settings,
            event_sender,
        }
    }

    fn emit_skip(&self, op: &PoolOperation, reason: SkipReason) {
        emit::emit(
            &self.event_sender,
            op.entry_point,
            BuilderEvent::SkippedOp {
                op_hash: op.hash,
                reason,
            },
        );
    }

    fn emit_reject(&self, op: &PoolOperation, reason: &str, culprit: Option<Entity>) {
        info!("Rejected op {:?} while building: {reason}", op.hash);
        emit::emit(
            &self.event_sender,
            op.entry_point,
            BuilderEvent::RejectedOp {
                op_hash: op.hash,
                reason: Arc::new(reason.to_string()),
                culprit,
            },
        );
    }
}

#[async_trait]
impl<S: Simulator, C: ChainClient> BatchBuilder for BatchBuilderImpl<S, C> {
    #[instrument(skip_all)]
    async fn build(&self) -> anyhow::Result<Batch> {
        let candidates = self
            .pool
            .snapshot_for_batch(self.settings.max_candidates, self.settings.max_batch_gas);
        if candidates.is_empty() {
            return Ok(Batch::default());
        }

        let eligible = self.filter_eligible(candidates).await;
        let mut batch = self.select_simulated(eligible).await;
        self.reject_failed_ops(&mut batch).await?;

        debug!(
            "Built batch with {} ops and {} gas, {} rejected",
            batch.len(),
            batch.total_gas,
            batch.rejected.len()
        );
        Ok(batch)
    }
}

impl<S: Simulator, C: ChainClient> BatchBuilderImpl<S, C> {
    // Checks that need no simulation: one op per sender, the next on-chain
    // nonce and an open validity window.
    async fn filter_eligible(
        &self,
        candidates: Vec<Arc<PoolOperation>>,
    ) -> Vec<Arc<PoolOperation>> {
        let nonces = fetch_nonces(
            self.client.as_ref(),
            candidates.iter().map(|op| (op.uo.sender, op.uo.nonce_key())),
        )
        .await;
        let now = Timestamp::now();

        let mut eligible = Vec::with_capacity(candidates.len());
        let mut senders = HashSet::new();
        for op in candidates {
            if senders.contains(&op.uo.sender) {
                self.emit_skip(&op, SkipReason::SenderAlreadyInBatch);
                continue;
            }
            let Some(&onchain_nonce) = nonces.get(&(op.uo.sender, op.uo.nonce_key())) else {
                self.emit_skip(&op, SkipReason::NonceUnavailable);
                continue;
            };
            // the lowest pooled nonce may already be mined, its successor may be pooled
            let op = if op.uo.nonce == onchain_nonce {
                op
            } else if let Some(next) = self.pool.get_by_id(&UserOperationId {
                sender: op.uo.sender,
                nonce: onchain_nonce,
            }) {
                next
            } else {
                self.emit_skip(
                    &op,
                    SkipReason::NonceMismatch {
                        expected: onchain_nonce,
                        actual: op.uo.nonce,
                    },
                );
                continue;
            };
            if op.valid_time_range.valid_after > now {
                self.emit_skip(
                    &op,
                    SkipReason::NotYetValid {
                        valid_after: op.valid_time_range.valid_after,
                    },
                );
                continue;
            }

            senders.insert(op.uo.sender);
            eligible.push(op);
        }
        eligible
    }

    // Re-simulate every eligible op against current state, then fill the batch
    // in priority order with the ops that still validate.
    async fn select_simulated(&self, eligible: Vec<Arc<PoolOperation>>) -> Batch {
        let results = future::join_all(eligible.iter().map(|op| {
            self.simulator
                .simulate_validation(op.uo.clone(), CheckMode::Admission)
        }))
        .await;

        let mut batch = Batch::default();
        for (op, result) in eligible.into_iter().zip(results) {
            if let Err(error) = result {
                match error {
                    MempoolError::TransientChainError(_)
                    | MempoolError::FatalChainError(_)
                    | MempoolError::Other(_) => {
                        warn!("Failed to re-simulate op {:?}: {error}", op.hash);
                        self.emit_skip(&op, SkipReason::SimulationUnavailable);
                    }
                    _ => {
                        let reason = revert_reason(&error);
                        let culprit = match error {
                            MempoolError::Expired(_) => None,
                            _ => culprit(&op.uo, &reason),
                        };
                        self.emit_reject(&op, &reason, culprit);
                        batch.rejected.push(RejectedOp {
                            op,
                            reason,
                            culprit,
                        });
                    }
                }
                continue;
            }

            if batch.total_gas.saturating_add(op.total_gas()) > self.settings.max_batch_gas {
                self.emit_skip(&op, SkipReason::MaxGasLimit);
                continue;
            }
            if batch.len() >= self.settings.max_ops_per_batch {
                self.emit_skip(&op, SkipReason::MaxOperations);
                continue;
            }
            batch.push(op);
        }
        batch
    }

    // Dry run `handleOps`, dropping each op the entry point reports as failed,
    // until the remaining batch executes.
    async fn reject_failed_ops(&self, batch: &mut Batch) -> anyhow::Result<()> {
        while !batch.is_empty() {
            let gas_limit =
                math::increase_by_percent(batch.total_gas, self.settings.gas_limit_buffer_percent);
            let out = self
                .client
                .call_handle_ops(batch.user_ops(), self.settings.beneficiary, gas_limit)
                .await
                .context("failed to dry run handleOps")?;
            match out {
                HandleOpsOut::Success => break,
                HandleOpsOut::FailedOp(index, reason) => {
                    anyhow::ensure!(
                        index < batch.len(),
                        "handleOps reported failed op {index} in a batch of {}",
                        batch.len()
                    );
                    let culprit = culprit(&batch.ops[index].uo, &reason);
                    self.emit_reject(&batch.ops[index], &reason, culprit);
                    batch.reject(index, reason, culprit);
                }
                HandleOpsOut::Revert(reason) => {
                    warn!("handleOps dry run reverted without a failed op: {reason}");
                    batch.ops.clear();
                    batch.total_gas = 0;
                }
            }
        }
        Ok(())
    }
}

fn revert_reason(error: &MempoolError) -> String {
    match error {
        MempoolError::ValidationReverted(revert) => revert.to_string(),
        MempoolError::InsufficientStake(reason) | MempoolError::OutOfGas(reason) => {
            reason.clone()
        }
        _ => error.to_string(),
    }
}

/// The entity an entry point failure is charged to.
///
/// `AA1x` codes blame the factory and `AA3x` codes the paymaster. Expired
/// validity windows (`AA22`, `AA32`) blame nobody. Anything else blames the sender.
pub(crate) fn culprit(uo: &UserOperation, reason: &str) -> Option<Entity> {
    match reason.get(..4) {
        Some("AA22" | "AA32") => None,
        Some("AA13" | "AA14" | "AA15") => uo
            .factory()
            .map(Entity::factory)
            .or(Some(Entity::account(uo.sender))),
        Some("AA30" | "AA31" | "AA33" | "AA34") => uo
            .paymaster()
            .map(Entity::paymaster)
            .or(Some(Entity::account(uo.sender))),
        _ => Some(Entity::account(uo.sender)),
    }
}

/// Fetch the on-chain nonce of each distinct `(sender, key)` pair concurrently.
///
/// Pairs whose fetch failed are absent from the result.
pub(crate) async fn fetch_nonces<C: ChainClient + ?Sized>(
    client: &C,
    pairs: impl Iterator<Item = (Address, U256)>,
) -> HashMap<(Address, U256), U256> {
    let pairs: HashSet<_> = pairs.collect();
    let results = future::join_all(pairs.into_iter().map(|(sender, key)| async move {
        let result = client.get_sender_nonce(sender, key).await;
        ((sender, key), result)
    }))
    .await;

    results
        .into_iter()
        .filter_map(|(pair, result)| match result {
            Ok(nonce) => Some((pair, nonce)),
            Err(error) => {
                warn!("Failed to fetch nonce for sender {:?}: {error}", pair.0);
                None
            }
        })
        .collect()
}
