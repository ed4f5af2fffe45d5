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
    cmp::Ordering,
    collections::{hash_map::Entry, BTreeSet, HashMap},
    sync::Arc,
};

use alloy_primitives::{Address, B256, U256};
use anyhow::Context;
use courier_types::{
    pool::{MempoolError, MempoolResult, PoolOperation},
    EntityType, Timestamp, UserOperation, UserOperationId,
};
use courier_utils::math;

use super::PoolConfig;
use crate::emit::OpRemovalReason;

/// Result of a successful insert
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Insertion {
    pub(crate) hash: B256,
    pub(crate) replaced: Option<B256>,
    pub(crate) evicted: Vec<B256>,
}

/// Pool of user operations
#[derive(Debug)]
pub(crate) struct PoolInner {
    /// Pool settings
    config: PoolConfig,
    /// Operations by hash
    by_hash: HashMap<B256, OrderedPoolOperation>,
    /// Operations by operation ID
    by_id: HashMap<UserOperationId, OrderedPoolOperation>,
    /// Best operations, sorted by priority fee
    best: BTreeSet<OrderedPoolOperation>,
    /// Submission attempts by hash
    attempts: HashMap<B256, u32>,
    /// Count of operations by entity address
    count_by_address: HashMap<Address, EntityCounter>,
    /// Submission ID counter
    submission_id: u64,
}

impl PoolInner {
    pub(crate) fn new(config: PoolConfig) -> Self {
        Self {
            config,
            by_hash: HashMap::new(),
            by_id: HashMap::new(),
            best: BTreeSet::new(),
            attempts: HashMap::new(),
            count_by_address: HashMap::new(),
            submission_id: 0,
        }
    }

    /// Returns hash of operation to replace if operation is a replacement
    pub(crate) fn check_replacement(&self, op: &UserOperation) -> MempoolResult<Option<B256>> {
        if self
            .by_hash
            .contains_key(&op.hash(self.config.entry_point, self.config.chain_id))
        {
            return Err(MempoolError::OperationAlreadyKnown);
        }

        let Some(pool_op) = self.by_id.get(&op.id()) else {
            return Ok(None);
        };

        let existing_fee = pool_op.uo().max_priority_fee_per_gas;
        let required_fee = self.min_replacement_fee(existing_fee);
        if op.max_priority_fee_per_gas < required_fee {
            return Err(MempoolError::ReplacementUnderpriced(
                existing_fee,
                required_fee,
            ));
        }

        Ok(Some(pool_op.po.hash))
    }

    pub(crate) fn add_operation(&mut self, op: PoolOperation) -> MempoolResult<Insertion> {
        let replaced = self.check_replacement(&op.uo)?;
        match replaced {
            Some(hash) => {
                self.remove_operation_internal(hash);
            }
            None => {
                let sender_count = self
                    .count_by_address
                    .get(&op.uo.sender)
                    .map_or(0, |c| c.account);
                if sender_count >= self.config.max_ops_per_sender {
                    return Err(MempoolError::MaxOperationsReached(
                        self.config.max_ops_per_sender,
                        op.uo.sender,
                    ));
                }
            }
        }

        let submission_id = self.next_submission_id();
        let pool_op = OrderedPoolOperation {
            po: Arc::new(op),
            submission_id,
        };

        for e in pool_op.po.entities() {
            self.count_by_address
                .entry(e.address)
                .or_default()
                .increment_entity_count(&e.kind);
        }

        let hash = pool_op.po.hash;
        self.by_hash.insert(hash, pool_op.clone());
        self.by_id.insert(pool_op.uo().id(), pool_op.clone());
        self.best.insert(pool_op);

        let evicted = self
            .enforce_size()
            .context("should have succeeded in resizing the pool")?;

        if evicted.contains(&hash) {
            Err(MempoolError::DiscardedOnInsert)?;
        }

        Ok(Insertion {
            hash,
            replaced,
            evicted,
        })
    }

    pub(crate) fn best_operations(&self) -> impl Iterator<Item = Arc<PoolOperation>> + '_ {
        self.best.iter().map(|o| Arc::clone(&o.po))
    }

    /// Walk the priority order over the lowest nonce operation of each sender,
    /// taking every one that fits in the remaining gas, until `max_count` are
    /// taken. Later nonces of a sender cannot execute in the same batch and
    /// never use up the budget.
    pub(crate) fn snapshot(&self, max_count: usize, max_gas: u128) -> Vec<Arc<PoolOperation>> {
        let mut lowest: HashMap<Address, U256> = HashMap::new();
        for id in self.by_id.keys() {
            lowest
                .entry(id.sender)
                .and_modify(|n| *n = (*n).min(id.nonce))
                .or_insert(id.nonce);
        }

        let mut remaining_gas = max_gas;
        let mut ops = Vec::new();
        for op in &self.best {
            if ops.len() >= max_count {
                break;
            }
            if lowest.get(&op.uo().sender) != Some(&op.uo().nonce) {
                continue;
            }
            let gas = op.po.total_gas();
            if gas > remaining_gas {
                continue;
            }
            remaining_gas -= gas;
            ops.push(Arc::clone(&op.po));
        }
        ops
    }

    /// Removes operations that can never be included.
    ///
    /// NOTE: This method is O(n) where n is the number of operations in the pool.
    pub(crate) fn prune(
        &mut self,
        now: Timestamp,
        current_nonces: &HashMap<(Address, U256), U256>,
    ) -> Vec<(Arc<PoolOperation>, OpRemovalReason)> {
        let mut to_remove = Vec::new();
        for (hash, op) in &self.by_hash {
            let uo = op.uo();
            let attempts = self.attempts.get(hash).copied().unwrap_or_default();
            let reason = if op.po.valid_time_range.is_expired_at(now) {
                OpRemovalReason::Expired {
                    valid_until: op.po.valid_time_range.valid_until,
                }
            } else if let Some(&onchain_nonce) = current_nonces
                .get(&(uo.sender, uo.nonce_key()))
                .filter(|&&n| uo.nonce < n)
            {
                OpRemovalReason::StaleNonce { onchain_nonce }
            } else if attempts > self.config.max_attempts {
                OpRemovalReason::MaxAttempts { attempts }
            } else {
                continue;
            };
            to_remove.push((*hash, reason));
        }

        to_remove
            .into_iter()
            .filter_map(|(hash, reason)| {
                self.remove_operation_internal(hash)
                    .map(|op| (op, reason))
            })
            .collect()
    }

    pub(crate) fn increment_attempts(&mut self, hashes: &[B256]) {
        for hash in hashes {
            if self.by_hash.contains_key(hash) {
                *self.attempts.entry(*hash).or_default() += 1;
            }
        }
    }

    pub(crate) fn attempts(&self, hash: B256) -> u32 {
        self.attempts.get(&hash).copied().unwrap_or_default()
    }

    /// Max cost of every pooled operation sponsored by `paymaster`, skipping `exclude`
    pub(crate) fn paymaster_pending_cost(&self, paymaster: Address, exclude: Option<B256>) -> U256 {
        self.by_hash
            .iter()
            .filter(|(hash, op)| {
                Some(**hash) != exclude && op.uo().paymaster() == Some(paymaster)
            })
            .fold(U256::ZERO, |acc, (_, op)| {
                acc.saturating_add(op.uo().max_gas_cost())
            })
    }

    pub(crate) fn address_count(&self, address: &Address) -> usize {
        self.count_by_address
            .get(address)
            .map_or(0, EntityCounter::total)
    }

    pub(crate) fn get_operation_by_hash(&self, hash: B256) -> Option<Arc<PoolOperation>> {
        self.by_hash.get(&hash).map(|o| Arc::clone(&o.po))
    }

    pub(crate) fn get_operation_by_id(&self, id: &UserOperationId) -> Option<Arc<PoolOperation>> {
        self.by_id.get(id).map(|o| Arc::clone(&o.po))
    }

    pub(crate) fn remove_operation_by_hash(&mut self, hash: B256) -> Option<Arc<PoolOperation>> {
        self.remove_operation_internal(hash)
    }

    /// Removes all operations involving the given address, returning the hashes of
    /// the removed operations.
    pub(crate) fn remove_address(&mut self, address: Address) -> Vec<B256> {
        let to_remove = self
            .by_hash
            .iter()
            .filter(|(_, op)| op.po.contains_address(address))
            .map(|(hash, _)| *hash)
            .collect::<Vec<_>>();
        for &hash in &to_remove {
            self.remove_operation_internal(hash);
        }
        to_remove
    }

    pub(crate) fn clear(&mut self) {
        self.by_hash.clear();
        self.by_id.clear();
        self.best.clear();
        self.attempts.clear();
        self.count_by_address.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.by_hash.len()
    }

    fn enforce_size(&mut self) -> anyhow::Result<Vec<B256>> {
        let mut removed = Vec::new();

        while self.by_hash.len() > self.config.max_size {
            let Some(worst) = self.best.pop_last() else {
                break;
            };
            let hash = worst.po.hash;
            let _ = self
                .remove_operation_internal(hash)
                .context("should have removed the worst operation")?;
            removed.push(hash);
        }

        Ok(removed)
    }

    fn remove_operation_internal(&mut self, hash: B256) -> Option<Arc<PoolOperation>> {
        let op = self.by_hash.remove(&hash)?;
        self.by_id.remove(&op.uo().id());
        self.best.remove(&op);
        self.attempts.remove(&hash);

        for e in op.po.entities() {
            self.decrement_address_count(e.address, &e.kind);
        }

        Some(op.po)
    }

    fn decrement_address_count(&mut self, address: Address, entity: &EntityType) {
        if let Entry::Occupied(mut count_entry) = self.count_by_address.entry(address) {
            count_entry.get_mut().decrement_entity_count(entity);
            if count_entry.get().total() == 0 {
                count_entry.remove_entry();
            }
        }
    }

    fn next_submission_id(&mut self) -> u64 {
        let id = self.submission_id;
        self.submission_id += 1;
        id
    }

    // A replacement must raise the fee by the configured margin and by at least one wei.
    fn min_replacement_fee(&self, existing_fee: u128) -> u128 {
        math::increase_by_percent(
            existing_fee,
            self.config.min_replacement_fee_increase_percentage,
        )
        .max(existing_fee.saturating_add(1))
    }
}

/// Wrapper around PoolOperation that adds a submission ID to implement
/// a custom ordering for the best operations
#[derive(Debug, Clone)]
struct OrderedPoolOperation {
    po: Arc<PoolOperation>,
    submission_id: u64,
}

impl OrderedPoolOperation {
    fn uo(&self) -> &UserOperation {
        &self.po.uo
    }
}

impl Eq for OrderedPoolOperation {}

impl Ord for OrderedPoolOperation {
    fn cmp(&self, other: &Self) -> Ordering {
        // Sort by priority fee descending then by id ascending
        other
            .uo()
            .max_priority_fee_per_gas
            .cmp(&self.uo().max_priority_fee_per_gas)
            .then_with(|| self.submission_id.cmp(&other.submission_id))
    }
}

impl PartialOrd for OrderedPoolOperation {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for OrderedPoolOperation {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

/// Number of pooled operations an address takes part in, by role
#[derive(Debug, Default, Clone, Copy)]
struct EntityCounter {
    account: usize,
    paymaster: usize,
    factory: usize,
}

impl EntityCounter {
    fn total(&self) -> usize {
        self.account + self.paymaster + self.factory
    }

    fn increment_entity_count(&mut self, kind: &EntityType) {
        match kind {
            EntityType::Account => self.account += 1,
            EntityType::Paymaster => self.paymaster += 1,
            EntityType::Factory => self.factory += 1,
        }
    }

    fn decrement_entity_count(&mut self, kind: &EntityType) {
        let count = match kind {
            EntityType::Account => &mut self.account,
            EntityType::Paymaster => &mut self.paymaster,
            EntityType::Factory => &mut self.factory,
        };
        *count = count.saturating_sub(1);
    }
}

#[cfg(test)]
mod tests {
    use alloy_primitives::Bytes;
    use courier_types::ValidTimeRange;

    use super::*;

    #[test]
    fn add_single_op() {
        let mut pool = PoolInner::new(conf());
        let op = create_op(Address::random(), 0, 1);
        let hash = pool.add_operation(op.clone()).unwrap().hash;

        check_map_entry(pool.by_hash.get(&hash), Some(&op));
        check_map_entry(pool.by_id.get(&op.uo.id()), Some(&op));
        check_map_entry(pool.best.iter().next(), Some(&op));
    }

    #[test]
    fn test_get_by_hash_and_id() {
        let mut pool = PoolInner::new(conf());
        let op = create_op(Address::random(), 0, 1);
        let hash = pool.add_operation(op.clone()).unwrap().hash;

        assert_eq!(*pool.get_operation_by_hash(hash).unwrap(), op);
        assert_eq!(*pool.get_operation_by_id(&op.uo.id()).unwrap(), op);
        assert_eq!(pool.get_operation_by_hash(B256::random()), None);
    }

    #[test]
    fn add_multiple_ops() {
        let mut pool = PoolInner::new(conf());
        let ops = [
            create_op(Address::random(), 0, 3),
            create_op(Address::random(), 0, 2),
            create_op(Address::random(), 0, 1),
        ];
        let mut hashes = vec![];
        for op in ops.iter() {
            hashes.push(pool.add_operation(op.clone()).unwrap().hash);
        }

        for (hash, op) in hashes.iter().zip(&ops) {
            check_map_entry(pool.by_hash.get(hash), Some(op));
            check_map_entry(pool.by_id.get(&op.uo.id()), Some(op));
        }
        let best: Vec<_> = pool.best_operations().map(|o| o.hash).collect();
        assert_eq!(best, hashes);
    }

    #[test]
    fn best_ties() {
        let mut pool = PoolInner::new(conf());
        let ops = [
            create_op(Address::random(), 0, 1),
            create_op(Address::random(), 0, 1),
            create_op(Address::random(), 0, 1),
        ];
        let mut hashes = vec![];
        for op in ops.iter() {
            hashes.push(pool.add_operation(op.clone()).unwrap().hash);
        }

        // earlier submissions win ties
        let best: Vec<_> = pool.best_operations().map(|o| o.hash).collect();
        assert_eq!(best, hashes);
    }

    #[test]
    fn remove_op() {
        let mut pool = PoolInner::new(conf());
        let op = create_op(Address::random(), 0, 2);
        let hash = pool.add_operation(op.clone()).unwrap().hash;

        assert!(pool.remove_operation_by_hash(hash).is_some());
        assert!(pool.remove_operation_by_hash(hash).is_none());
        check_map_entry(pool.by_hash.get(&hash), None);
        check_map_entry(pool.by_id.get(&op.uo.id()), None);
        check_map_entry(pool.best.iter().next(), None);
    }

    #[test]
    fn remove_address() {
        let mut pool = PoolInner::new(conf());
        let paymaster = Address::random();
        let op1 = create_op_with_paymaster(Address::random(), 0, 3, paymaster);
        let op2 = create_op_with_paymaster(Address::random(), 0, 2, paymaster);
        let op3 = create_op(Address::random(), 0, 1);
        pool.add_operation(op1.clone()).unwrap();
        pool.add_operation(op2.clone()).unwrap();
        let keep = pool.add_operation(op3).unwrap().hash;

        let mut removed = pool.remove_address(paymaster);
        removed.sort();
        let mut expected = vec![op1.hash, op2.hash];
        expected.sort();
        assert_eq!(removed, expected);
        assert_eq!(pool.len(), 1);
        assert!(pool.get_operation_by_hash(keep).is_some());
        assert_eq!(pool.address_count(&paymaster), 0);
    }

    #[test]
    fn address_count() {
        let mut pool = PoolInner::new(conf());
        let sender = Address::random();
        let paymaster = Address::random();

        let hashes = (0..3)
            .map(|i| {
                pool.add_operation(create_op_with_paymaster(sender, i, 1, paymaster))
                    .unwrap()
                    .hash
            })
            .collect::<Vec<_>>();
        // the sender also sponsors an op for someone else
        pool.add_operation(create_op_with_paymaster(Address::random(), 0, 1, sender))
            .unwrap();

        assert_eq!(pool.address_count(&sender), 4);
        assert_eq!(pool.address_count(&paymaster), 3);

        for hash in hashes.iter() {
            assert!(pool.remove_operation_by_hash(*hash).is_some());
        }

        assert_eq!(pool.address_count(&sender), 1);
        assert_eq!(pool.address_count(&paymaster), 0);
    }

    #[test]
    fn max_ops_per_sender() {
        let mut pool = PoolInner::new(conf());
        let sender = Address::random();
        for i in 0..4 {
            pool.add_operation(create_op(sender, i, 1)).unwrap();
        }

        let err = pool.add_operation(create_op(sender, 4, 1)).unwrap_err();
        assert!(matches!(err, MempoolError::MaxOperationsReached(4, s) if s == sender));

        // replacing still works at the limit
        let insertion = pool.add_operation(create_op(sender, 3, 2)).unwrap();
        assert!(insertion.replaced.is_some());
        assert_eq!(pool.address_count(&sender), 4);
    }

    #[test]
    fn pool_full_new_replaces_worst() {
        let mut pool = PoolInner::new(conf());
        let mut first = None;
        for i in 0..20 {
            let hash = pool
                .add_operation(create_op(Address::random(), 0, i + 1))
                .unwrap()
                .hash;
            first.get_or_insert(hash);
        }

        // on greater fee, new op should win
        let insertion = pool.add_operation(create_op(Address::random(), 0, 2)).unwrap();
        assert_eq!(insertion.evicted, vec![first.unwrap()]);
        assert_eq!(pool.len(), 20);
    }

    #[test]
    fn pool_full_worst_remains() {
        let mut pool = PoolInner::new(conf());
        for i in 0..20 {
            pool.add_operation(create_op(Address::random(), 0, i + 1))
                .unwrap();
        }

        let err = pool
            .add_operation(create_op(Address::random(), 0, 1))
            .unwrap_err();
        assert!(matches!(err, MempoolError::DiscardedOnInsert));
        assert_eq!(pool.len(), 20);

        // on equal fee, worst should remain because it came first
        let res = pool.add_operation(create_op(Address::random(), 0, 2));
        assert!(res.is_ok(), "{:?}", res.err());
    }

    #[test]
    fn replace_op_underpriced() {
        let mut pool = PoolInner::new(conf());
        let sender = Address::random();
        pool.add_operation(create_op(sender, 0, 100)).unwrap();

        let err = pool.add_operation(create_op(sender, 0, 109)).unwrap_err();
        match err {
            MempoolError::ReplacementUnderpriced(existing, required) => {
                assert_eq!(existing, 100);
                assert_eq!(required, 110);
            }
            _ => panic!("wrong error {err:?}"),
        }
        assert_eq!(pool.address_count(&sender), 1);
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn replace_zero_fee_needs_increase() {
        let mut pool = PoolInner::new(conf());
        let sender = Address::random();
        pool.add_operation(create_op(sender, 0, 0)).unwrap();

        let mut same_fee = create_op(sender, 0, 0);
        same_fee.uo.call_gas_limit = 1;
        same_fee.hash = same_fee.uo.hash(same_fee.entry_point, 1);
        let err = pool.add_operation(same_fee).unwrap_err();
        assert!(matches!(err, MempoolError::ReplacementUnderpriced(0, 1)));
    }

    #[test]
    fn replace_op() {
        let mut pool = PoolInner::new(conf());
        let sender = Address::random();
        let paymaster1 = Address::random();
        let po1 = create_op_with_paymaster(sender, 0, 10, paymaster1);
        pool.add_operation(po1.clone()).unwrap();
        assert_eq!(pool.address_count(&paymaster1), 1);

        let paymaster2 = Address::random();
        let po2 = create_op_with_paymaster(sender, 0, 11, paymaster2);
        let insertion = pool.add_operation(po2.clone()).unwrap();
        assert_eq!(insertion.replaced, Some(po1.hash));

        assert_eq!(pool.address_count(&sender), 1);
        assert_eq!(pool.address_count(&paymaster1), 0);
        assert_eq!(pool.address_count(&paymaster2), 1);
        assert_eq!(pool.len(), 1);
        assert_eq!(*pool.get_operation_by_id(&po2.uo.id()).unwrap(), po2);
    }

    #[test]
    fn test_already_known() {
        let mut pool = PoolInner::new(conf());
        let po1 = create_op(Address::random(), 0, 10);
        pool.add_operation(po1.clone()).unwrap();

        let err = pool.add_operation(po1).unwrap_err();
        assert!(matches!(err, MempoolError::OperationAlreadyKnown));
    }

    #[test]
    fn test_snapshot_respects_gas_and_count() {
        let mut pool = PoolInner::new(conf());
        let mut big = create_op(Address::random(), 0, 3);
        big.uo.call_gas_limit = 1_000;
        big.hash = big.uo.hash(big.entry_point, 1);
        let small1 = create_op(Address::random(), 0, 2);
        let small2 = create_op(Address::random(), 0, 1);
        pool.add_operation(big.clone()).unwrap();
        pool.add_operation(small1.clone()).unwrap();
        pool.add_operation(small2.clone()).unwrap();

        // the big op doesn't fit, the rest are taken in order
        let snapshot = pool.snapshot(10, 600);
        let hashes: Vec<_> = snapshot.iter().map(|o| o.hash).collect();
        assert_eq!(hashes, vec![small1.hash, small2.hash]);

        let snapshot = pool.snapshot(1, u128::MAX);
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].hash, big.hash);
        assert_eq!(pool.len(), 3);
    }

    #[test]
    fn test_snapshot_lowest_nonce_per_sender() {
        let mut pool = PoolInner::new(conf());
        let a = Address::random();
        let b = Address::random();
        // a's later nonces outbid b but could never share a batch with a0
        let a0 = create_op(a, 0, 9);
        let a1 = create_op(a, 1, 8);
        let a2 = create_op(a, 2, 7);
        let b0 = create_op(b, 0, 1);
        for op in [&a0, &a1, &a2, &b0] {
            pool.add_operation(op.clone()).unwrap();
        }

        // each op is 300 gas, a1 and a2 would otherwise fill the budget
        let hashes: Vec<_> = pool.snapshot(10, 900).iter().map(|o| o.hash).collect();
        assert_eq!(hashes, vec![a0.hash, b0.hash]);

        // a later nonce that outbids its predecessor does not displace it
        let a3 = create_op(a, 3, 20);
        pool.add_operation(a3).unwrap();
        let hashes: Vec<_> = pool.snapshot(1, u128::MAX).iter().map(|o| o.hash).collect();
        assert_eq!(hashes, vec![a0.hash]);
    }

    #[test]
    fn test_prune_expired() {
        let mut pool = PoolInner::new(conf());
        let mut po1 = create_op(Address::random(), 0, 10);
        po1.valid_time_range.valid_until = Timestamp::new(5);
        let mut po2 = create_op(Address::random(), 0, 10);
        po2.valid_time_range.valid_until = Timestamp::new(10);
        let mut po3 = create_op(Address::random(), 0, 10);
        po3.valid_time_range.valid_until = Timestamp::new(9);
        pool.add_operation(po1.clone()).unwrap();
        pool.add_operation(po2.clone()).unwrap();
        pool.add_operation(po3.clone()).unwrap();

        let pruned = pool.prune(Timestamp::new(10), &HashMap::new());
        assert_eq!(pruned.len(), 2);
        assert!(pruned.contains(&(
            Arc::new(po1),
            OpRemovalReason::Expired {
                valid_until: Timestamp::new(5)
            }
        )));
        assert!(pruned.contains(&(
            Arc::new(po3),
            OpRemovalReason::Expired {
                valid_until: Timestamp::new(9)
            }
        )));
        assert!(pool.snapshot(10, u128::MAX).iter().all(|o| o.hash == po2.hash));
    }

    #[test]
    fn test_prune_stale_nonce() {
        let mut pool = PoolInner::new(conf());
        let sender = Address::random();
        let stale = create_op(sender, 0, 1);
        let current = create_op(sender, 1, 1);
        pool.add_operation(stale.clone()).unwrap();
        pool.add_operation(current.clone()).unwrap();

        let nonces = HashMap::from([((sender, U256::ZERO), U256::from(1))]);
        let pruned = pool.prune(Timestamp::new(0), &nonces);
        assert_eq!(
            pruned,
            vec![(
                Arc::new(stale),
                OpRemovalReason::StaleNonce {
                    onchain_nonce: U256::from(1)
                }
            )]
        );
        assert!(pool.get_operation_by_hash(current.hash).is_some());
    }

    #[test]
    fn test_prune_max_attempts() {
        let mut pool = PoolInner::new(conf());
        let op = create_op(Address::random(), 0, 1);
        let hash = pool.add_operation(op).unwrap().hash;

        for _ in 0..3 {
            pool.increment_attempts(&[hash]);
        }
        assert!(pool.prune(Timestamp::new(0), &HashMap::new()).is_empty());

        pool.increment_attempts(&[hash, B256::random()]);
        assert_eq!(pool.attempts(hash), 4);
        let pruned = pool.prune(Timestamp::new(0), &HashMap::new());
        assert_eq!(pruned[0].1, OpRemovalReason::MaxAttempts { attempts: 4 });
        assert_eq!(pool.attempts(hash), 0);
    }

    #[test]
    fn test_paymaster_pending_cost() {
        let mut pool = PoolInner::new(conf());
        let paymaster = Address::random();
        let op1 = create_op_with_paymaster(Address::random(), 0, 2, paymaster);
        let op2 = create_op_with_paymaster(Address::random(), 0, 3, paymaster);
        pool.add_operation(op1.clone()).unwrap();
        pool.add_operation(op2.clone()).unwrap();
        pool.add_operation(create_op(Address::random(), 0, 4))
            .unwrap();

        let total = op1.uo.max_gas_cost() + op2.uo.max_gas_cost();
        assert_eq!(pool.paymaster_pending_cost(paymaster, None), total);
        assert_eq!(
            pool.paymaster_pending_cost(paymaster, Some(op1.hash)),
            op2.uo.max_gas_cost()
        );
    }

    #[test]
    fn test_clear() {
        let mut pool = PoolInner::new(conf());
        let sender = Address::random();
        pool.add_operation(create_op(sender, 0, 1)).unwrap();
        pool.clear();
        assert_eq!(pool.len(), 0);
        assert_eq!(pool.address_count(&sender), 0);
        assert!(pool.best.is_empty());
    }

    fn conf() -> PoolConfig {
        PoolConfig {
            entry_point: Address::repeat_byte(0xee),
            chain_id: 1,
            max_size: 20,
            max_ops_per_sender: 4,
            min_replacement_fee_increase_percentage: 10,
            max_attempts: 3,
            throttled_entity_mempool_count: 4,
        }
    }

    fn create_op(sender: Address, nonce: u64, max_priority_fee_per_gas: u128) -> PoolOperation {
        let uo = UserOperation {
            sender,
            nonce: U256::from(nonce),
            call_gas_limit: 100,
            verification_gas_limit: 100,
            pre_verification_gas: 100,
            max_fee_per_gas: max_priority_fee_per_gas + 10,
            max_priority_fee_per_gas,
            ..UserOperation::default()
        };
        let entry_point = conf().entry_point;
        PoolOperation {
            hash: uo.hash(entry_point, 1),
            uo,
            entry_point,
            admitted_at: Timestamp::new(0),
            simulated_gas: 0,
            valid_time_range: ValidTimeRange::all_time(),
        }
    }

    fn create_op_with_paymaster(
        sender: Address,
        nonce: u64,
        max_priority_fee_per_gas: u128,
        paymaster: Address,
    ) -> PoolOperation {
        let mut op = create_op(sender, nonce, max_priority_fee_per_gas);
        op.uo.paymaster_and_data = Bytes::copy_from_slice(paymaster.as_slice());
        op.hash = op.uo.hash(op.entry_point, 1);
        op
    }

    fn check_map_entry(actual: Option<&OrderedPoolOperation>, expected: Option<&PoolOperation>) {
        match (actual, expected) {
            (Some(actual), Some(expected)) => assert_eq!(*actual.po, *expected),
            (None, None) => (),
            _ => panic!("Expected {expected:?}, got {actual:?}"),
        }
    }
}
