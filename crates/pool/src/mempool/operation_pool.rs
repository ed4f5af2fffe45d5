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

use std::{collections::HashMap, sync::Arc};

use alloy_primitives::{Address, B256, U256};
use courier_types::{
    pool::{MempoolResult, PoolOperation},
    Timestamp, UserOperation, UserOperationId,
};
use courier_utils::emit::{self, WithEntryPoint};
use metrics::{Counter, Gauge};
use metrics_derive::Metrics;
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::debug;

use super::{pool::PoolInner, record_rejection, PoolConfig};
use crate::emit::{OpPoolEvent, OpRemovalReason};

/// The set of admitted operations waiting to be included.
///
/// Wrapper around the pool indices that implements thread-safety
/// via a RwLock. Safe to call from multiple threads. Every mutation takes
/// the write lock once, so the indices never disagree.
pub struct OperationPool {
    config: PoolConfig,
    inner: RwLock<PoolInner>,
    event_sender: broadcast::Sender<WithEntryPoint<OpPoolEvent>>,
    metrics: OperationPoolMetrics,
}

impl std::fmt::Debug for OperationPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationPool")
            .field("config", &self.config)
            .field("inner", &self.inner)
            .finish()
    }
}

impl OperationPool {
    /// Create an empty pool
    pub fn new(
        config: PoolConfig,
        event_sender: broadcast::Sender<WithEntryPoint<OpPoolEvent>>,
    ) -> Self {
        let ep = config.entry_point.to_string();
        Self {
            inner: RwLock::new(PoolInner::new(config.clone())),
            config,
            event_sender,
            metrics: OperationPoolMetrics::new_with_labels(&[("entry_point", ep)]),
        }
    }

    /// The pool's limits
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Insert a validated operation.
    ///
    /// Duplicate and replacement checks are repeated under the write lock, since
    /// the pool may have changed while the operation was being simulated.
    pub fn insert(&self, op: PoolOperation) -> MempoolResult<B256> {
        let uo = op.uo.clone();
        let valid_time_range = op.valid_time_range;
        let result = {
            let mut inner = self.inner.write();
            let result = inner.add_operation(op);
            self.metrics.num_ops.set(inner.len() as f64);
            result
        };

        let insertion = match result {
            Ok(insertion) => insertion,
            Err(error) => {
                record_rejection(self.config.entry_point, &error);
                return Err(error);
            }
        };

        self.metrics.ops_added.increment(1);
        if let Some(replaced) = insertion.replaced {
            self.metrics.ops_replaced.increment(1);
            self.emit(OpPoolEvent::RemovedOp {
                op_hash: replaced,
                reason: OpRemovalReason::Replaced {
                    by: insertion.hash,
                },
            });
        }
        self.metrics
            .ops_evicted
            .increment(insertion.evicted.len() as u64);
        for op_hash in insertion.evicted {
            self.emit(OpPoolEvent::RemovedOp {
                op_hash,
                reason: OpRemovalReason::Evicted,
            });
        }
        self.emit(OpPoolEvent::ReceivedOp {
            op_hash: insertion.hash,
            op: uo,
            valid_after: valid_time_range.valid_after,
            valid_until: valid_time_range.valid_until,
            replaced: insertion.replaced,
        });

        Ok(insertion.hash)
    }

    /// Remove an operation on request. Removing an absent hash is a no-op.
    pub fn remove(&self, hash: B256) -> bool {
        self.remove_with_reason(hash, OpRemovalReason::Requested)
            .is_some()
    }

    /// Remove an operation, recording why
    pub fn remove_with_reason(
        &self,
        hash: B256,
        reason: OpRemovalReason,
    ) -> Option<Arc<PoolOperation>> {
        let removed = {
            let mut inner = self.inner.write();
            let removed = inner.remove_operation_by_hash(hash);
            self.metrics.num_ops.set(inner.len() as f64);
            removed
        }?;
        self.metrics.ops_removed.increment(1);
        self.emit(OpPoolEvent::RemovedOp {
            op_hash: hash,
            reason,
        });
        Some(removed)
    }

    /// Batch candidates: the lowest nonce operation of each sender in priority
    /// order, skipping those that don't fit `max_gas`, at most `max_count` of
    /// them. The pool is not modified.
    pub fn snapshot_for_batch(&self, max_count: usize, max_gas: u128) -> Vec<Arc<PoolOperation>> {
        self.inner.read().snapshot(max_count, max_gas)
    }

    /// Remove operations that have expired, been overtaken by the on-chain nonce
    /// of their `(sender, key)`, or been attempted too many times.
    pub fn prune_expired(
        &self,
        now: Timestamp,
        current_nonces: &HashMap<(Address, U256), U256>,
    ) -> Vec<(Arc<PoolOperation>, OpRemovalReason)> {
        let pruned = {
            let mut inner = self.inner.write();
            let pruned = inner.prune(now, current_nonces);
            self.metrics.num_ops.set(inner.len() as f64);
            pruned
        };
        if !pruned.is_empty() {
            debug!("Pruned {} operations from the pool", pruned.len());
        }
        self.metrics.ops_removed.increment(pruned.len() as u64);
        for (op, reason) in &pruned {
            self.emit(OpPoolEvent::RemovedOp {
                op_hash: op.hash,
                reason: reason.clone(),
            });
        }
        pruned
    }

    /// Hash of the pooled operation `op` would replace, if any
    pub fn check_replacement(&self, op: &UserOperation) -> MempoolResult<Option<B256>> {
        self.inner.read().check_replacement(op)
    }

    /// Count a submission attempt for each of `hashes` still in the pool
    pub fn increment_attempts(&self, hashes: &[B256]) {
        self.inner.write().increment_attempts(hashes);
    }

    /// Submission attempts made for an operation
    pub fn attempts(&self, hash: B256) -> u32 {
        self.inner.read().attempts(hash)
    }

    /// Max cost of every pooled operation sponsored by `paymaster`, skipping `exclude`
    pub fn paymaster_pending_cost(&self, paymaster: Address, exclude: Option<B256>) -> U256 {
        self.inner.read().paymaster_pending_cost(paymaster, exclude)
    }

    /// Number of pooled operations `address` takes part in, in any role
    pub fn address_count(&self, address: Address) -> usize {
        self.inner.read().address_count(&address)
    }

    /// Look up an operation by hash
    pub fn get_by_hash(&self, hash: B256) -> Option<Arc<PoolOperation>> {
        self.inner.read().get_operation_by_hash(hash)
    }

    /// Look up an operation by sender and nonce
    pub fn get_by_id(&self, id: &UserOperationId) -> Option<Arc<PoolOperation>> {
        self.inner.read().get_operation_by_id(id)
    }

    /// Up to `max` operations in priority order
    pub fn all_operations(&self, max: usize) -> Vec<Arc<PoolOperation>> {
        self.inner.read().best_operations().take(max).collect()
    }

    /// Remove every operation `address` takes part in
    pub fn remove_by_entity(&self, address: Address) -> Vec<B256> {
        let removed = {
            let mut inner = self.inner.write();
            let removed = inner.remove_address(address);
            self.metrics.num_ops.set(inner.len() as f64);
            removed
        };
        if removed.is_empty() {
            return removed;
        }

        self.emit(OpPoolEvent::RemovedEntity {
            address,
            count: removed.len(),
        });
        for &op_hash in &removed {
            self.emit(OpPoolEvent::RemovedOp {
                op_hash,
                reason: OpRemovalReason::EntityRemoved { address },
            });
        }
        self.metrics.ops_removed.increment(removed.len() as u64);
        self.metrics.removed_entities.increment(1);
        removed
    }

    /// Drop every operation
    pub fn clear(&self) {
        self.inner.write().clear();
        self.metrics.num_ops.set(0.0);
    }

    /// Number of pooled operations
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// True if nothing is pooled
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn emit(&self, event: OpPoolEvent) {
        emit::emit(&self.event_sender, self.config.entry_point, event);
    }
}

#[derive(Metrics)]
#[metrics(scope = "op_pool")]
struct OperationPoolMetrics {
    #[metric(describe = "the number of ops in the pool.")]
    num_ops: Gauge,
    #[metric(describe = "the count of ops added.")]
    ops_added: Counter,
    #[metric(describe = "the count of ops replaced by a higher fee op.")]
    ops_replaced: Counter,
    #[metric(describe = "the count of ops evicted when the pool was full.")]
    ops_evicted: Counter,
    #[metric(describe = "the count of removed ops.")]
    ops_removed: Counter,
    #[metric(describe = "the count of removed entities.")]
    removed_entities: Counter,
}

#[cfg(test)]
mod tests {
    use courier_types::{pool::MempoolError, ValidTimeRange};
    use courier_utils::emit::EVENT_CHANNEL_CAPACITY;

    use super::*;

    fn new_pool() -> (OperationPool, broadcast::Receiver<WithEntryPoint<OpPoolEvent>>) {
        let (tx, rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let config = PoolConfig {
            max_size: 3,
            ..PoolConfig::default()
        };
        (OperationPool::new(config, tx), rx)
    }

    fn create_op(sender: Address, nonce: u64, fee: u128) -> PoolOperation {
        let uo = UserOperation {
            sender,
            nonce: U256::from(nonce),
            call_gas_limit: 10_000,
            max_fee_per_gas: fee,
            max_priority_fee_per_gas: fee,
            ..Default::default()
        };
        let config = PoolConfig::default();
        PoolOperation {
            hash: uo.hash(config.entry_point, config.chain_id),
            uo,
            entry_point: config.entry_point,
            admitted_at: Timestamp::now(),
            simulated_gas: 0,
            valid_time_range: ValidTimeRange::all_time(),
        }
    }

    #[test]
    fn test_replacement_either_order() {
        let sender = Address::random();
        let low = create_op(sender, 0, 100);
        let high = create_op(sender, 0, 300);

        // low then high: high replaces
        let (pool, _rx) = new_pool();
        pool.insert(low.clone()).unwrap();
        pool.insert(high.clone()).unwrap();
        assert_eq!(pool.len(), 1);
        assert!(pool.get_by_hash(high.hash).is_some());

        // high then low: low is underpriced and the pool is unchanged
        let (pool, _rx) = new_pool();
        pool.insert(high.clone()).unwrap();
        let err = pool.insert(low).unwrap_err();
        assert!(matches!(err, MempoolError::ReplacementUnderpriced(300, 330)));
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.get_by_id(&high.uo.id()).unwrap().hash, high.hash);
    }

    #[test]
    fn test_insert_events() {
        let sender = Address::random();
        let (pool, mut rx) = new_pool();
        let first = pool.insert(create_op(sender, 0, 10)).unwrap();
        let second = pool.insert(create_op(sender, 0, 20)).unwrap();

        match rx.try_recv().unwrap().event {
            OpPoolEvent::ReceivedOp { op_hash, replaced, .. } => {
                assert_eq!(op_hash, first);
                assert_eq!(replaced, None);
            }
            e => panic!("unexpected event {e:?}"),
        }
        match rx.try_recv().unwrap().event {
            OpPoolEvent::RemovedOp { op_hash, reason } => {
                assert_eq!(op_hash, first);
                assert_eq!(reason, OpRemovalReason::Replaced { by: second });
            }
            e => panic!("unexpected event {e:?}"),
        }
        assert!(matches!(
            rx.try_recv().unwrap().event,
            OpPoolEvent::ReceivedOp { replaced: Some(h), .. } if h == first
        ));
    }

    #[test]
    fn test_eviction_event() {
        let (pool, mut rx) = new_pool();
        let worst = pool.insert(create_op(Address::random(), 0, 1)).unwrap();
        pool.insert(create_op(Address::random(), 0, 2)).unwrap();
        pool.insert(create_op(Address::random(), 0, 3)).unwrap();
        pool.insert(create_op(Address::random(), 0, 4)).unwrap();
        assert_eq!(pool.len(), 3);
        assert!(pool.get_by_hash(worst).is_none());

        let evicted = std::iter::from_fn(|| rx.try_recv().ok()).any(|e| {
            matches!(
                e.event,
                OpPoolEvent::RemovedOp { op_hash, reason: OpRemovalReason::Evicted } if op_hash == worst
            )
        });
        assert!(evicted);
    }

    #[test]
    fn test_remove_idempotent() {
        let (pool, _rx) = new_pool();
        let hash = pool.insert(create_op(Address::random(), 0, 1)).unwrap();
        assert!(pool.remove(hash));
        assert!(!pool.remove(hash));
        assert!(pool.is_empty());
    }

    #[test]
    fn test_expired_absent_from_snapshot() {
        let (pool, _rx) = new_pool();
        let mut expiring = create_op(Address::random(), 0, 5);
        expiring.valid_time_range = ValidTimeRange::new(Timestamp::new(0), Timestamp::new(100));
        pool.insert(expiring.clone()).unwrap();
        let live = pool.insert(create_op(Address::random(), 0, 1)).unwrap();

        let pruned = pool.prune_expired(Timestamp::new(101), &HashMap::new());
        assert_eq!(pruned.len(), 1);
        assert!(pruned[0].1.is_expiry());

        let snapshot = pool.snapshot_for_batch(10, u128::MAX);
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].hash, live);
    }

    #[test]
    fn test_remove_by_entity() {
        let (pool, mut rx) = new_pool();
        let sender = Address::random();
        pool.insert(create_op(sender, 0, 1)).unwrap();
        pool.insert(create_op(sender, 1, 1)).unwrap();
        while rx.try_recv().is_ok() {}

        assert_eq!(pool.remove_by_entity(sender).len(), 2);
        assert!(pool.is_empty());
        assert!(matches!(
            rx.try_recv().unwrap().event,
            OpPoolEvent::RemovedEntity { count: 2, .. }
        ));
        assert!(pool.remove_by_entity(sender).is_empty());
    }

    #[test]
    fn test_all_operations_and_clear() {
        let (pool, _rx) = new_pool();
        let a = pool.insert(create_op(Address::random(), 0, 1)).unwrap();
        let b = pool.insert(create_op(Address::random(), 0, 2)).unwrap();
        let all: Vec<_> = pool.all_operations(10).iter().map(|o| o.hash).collect();
        assert_eq!(all, vec![b, a]);
        assert_eq!(pool.all_operations(1).len(), 1);

        pool.clear();
        assert!(pool.all_operations(10).is_empty());
    }
}
