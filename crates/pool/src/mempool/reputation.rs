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
    collections::{HashMap, HashSet, VecDeque},
    time::{Duration, Instant},
};

use alloy_primitives::Address;
use courier_types::pool::{Reputation, ReputationOutcome, ReputationStatus};
use parking_lot::RwLock;
use tracing::{debug, info};

/// Reputation scoring parameters
#[derive(Debug, Clone, Copy)]
pub struct ReputationParams {
    /// Length of the sliding window outcomes are counted in
    pub window: Duration,
    /// Failures plus expiries within the window that throttle an address
    pub throttle_threshold: u64,
    /// Failures within the window that ban an address
    pub ban_threshold: u64,
}

impl Default for ReputationParams {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(60 * 60),
            throttle_threshold: 3,
            ban_threshold: 5,
        }
    }
}

/// Tracks the standing of senders, paymasters and factories.
///
/// Interior mutability, shared between the RPC handlers and the submission loop.
#[derive(Debug)]
pub struct ReputationTracker {
    reputation: RwLock<AddressReputation>,
}

impl ReputationTracker {
    /// Create a tracker. Blocklisted addresses are always banned and allowlisted
    /// addresses are never throttled or banned.
    pub fn new(
        params: ReputationParams,
        blocklist: Option<HashSet<Address>>,
        allowlist: Option<HashSet<Address>>,
    ) -> Self {
        let rep = AddressReputation::new(params)
            .with_blocklist(blocklist.unwrap_or_default())
            .with_allowlist(allowlist.unwrap_or_default());

        Self {
            reputation: RwLock::new(rep),
        }
    }

    /// Record what happened to an operation `address` took part in, returning
    /// the resulting status
    pub fn record_outcome(
        &self,
        address: Address,
        outcome: ReputationOutcome,
    ) -> ReputationStatus {
        let now = Instant::now();
        let mut reputation = self.reputation.write();
        let before = reputation.status_at(address, now);
        reputation.record_outcome_at(address, outcome, now);
        let after = reputation.status_at(address, now);
        if before != after {
            info!("Reputation of {address:?} changed from {before:?} to {after:?} after {outcome}");
        }
        after
    }

    /// Record that an operation `address` took part in was admitted to the pool
    pub fn record_seen(&self, address: Address) {
        self.reputation.write().add_seen(address, Instant::now());
    }

    /// Drop addresses with no activity, outcome or held status inside the window
    pub fn prune(&self) {
        let pruned = self.reputation.write().prune_at(Instant::now());
        if pruned > 0 {
            debug!("Pruned {pruned} idle addresses from reputation");
        }
    }

    /// Current standing of `address`
    pub fn status_of(&self, address: Address) -> ReputationStatus {
        self.reputation.read().status_at(address, Instant::now())
    }

    /// Every address with recorded activity
    pub fn dump_reputation(&self) -> Vec<Reputation> {
        self.reputation.read().dump_at(Instant::now())
    }

    /// Overwrite the counters of an address, holding `status` for a window
    pub fn set_reputation(
        &self,
        address: Address,
        ops_seen: u64,
        ops_included: u64,
        status: ReputationStatus,
    ) {
        self.reputation
            .write()
            .set_reputation_at(address, ops_seen, ops_included, status, Instant::now())
    }

    /// Forget all recorded activity. Block and allow lists are kept.
    pub fn clear(&self) {
        self.reputation.write().counts.clear();
    }
}

#[derive(Debug)]
struct AddressReputation {
    // Addresses that are always banned
    blocklist: HashSet<Address>,
    // Addresses that are always exempt from throttling and banning
    allowlist: HashSet<Address>,
    counts: HashMap<Address, AddressCount>,
    params: ReputationParams,
}

impl AddressReputation {
    fn new(params: ReputationParams) -> Self {
        Self {
            blocklist: HashSet::new(),
            allowlist: HashSet::new(),
            counts: HashMap::new(),
            params,
        }
    }

    fn with_blocklist(self, blocklist: HashSet<Address>) -> Self {
        Self { blocklist, ..self }
    }

    fn with_allowlist(self, allowlist: HashSet<Address>) -> Self {
        Self { allowlist, ..self }
    }

    fn status_at(&self, address: Address, now: Instant) -> ReputationStatus {
        if self.blocklist.contains(&address) {
            return ReputationStatus::Banned;
        } else if self.allowlist.contains(&address) {
            return ReputationStatus::Ok;
        }

        match self.counts.get(&address) {
            Some(count) => count.status_at(&self.params, now),
            None => ReputationStatus::Ok,
        }
    }

    fn add_seen(&mut self, address: Address, now: Instant) {
        let count = self.counts.entry(address).or_default();
        count.ops_seen += 1;
        count.last_active = Some(now);
    }

    // Returns the number of addresses removed
    fn prune_at(&mut self, now: Instant) -> usize {
        let params = self.params;
        let before = self.counts.len();
        self.counts.retain(|_, count| {
            count.expire(params.window, now);
            count.is_active(&params, now)
        });
        before - self.counts.len()
    }

    fn record_outcome_at(&mut self, address: Address, outcome: ReputationOutcome, now: Instant) {
        let params = self.params;
        let count = self.counts.entry(address).or_default();
        count.expire(params.window, now);
        count.last_active = Some(now);
        match outcome {
            ReputationOutcome::Included => {
                count.ops_included += 1;
                count.failures.pop_front();
            }
            ReputationOutcome::FailedSimulation => count.failures.push_back(now),
            ReputationOutcome::Expired => count.expiries.push_back(now),
        }
        count.refresh(&params, now);
    }

    fn set_reputation_at(
        &mut self,
        address: Address,
        ops_seen: u64,
        ops_included: u64,
        status: ReputationStatus,
        now: Instant,
    ) {
        let count = self.counts.entry(address).or_default();
        count.last_active = Some(now);
        count.ops_seen = ops_seen;
        count.ops_included = ops_included;
        if status == ReputationStatus::Ok {
            count.failures.clear();
            count.expiries.clear();
            count.held = None;
        } else {
            count.held = Some((status, now));
        }
    }

    fn dump_at(&self, now: Instant) -> Vec<Reputation> {
        self.counts
            .iter()
            .map(|(address, count)| Reputation {
                address: *address,
                status: self.status_at(*address, now),
                ops_seen: count.ops_seen,
                ops_included: count.ops_included,
                ops_failed_simulation: count.failures_in_window(self.params.window, now),
                ops_expired: count.expiries_in_window(self.params.window, now),
            })
            .collect()
    }
}

#[derive(Debug, Default, Clone)]
struct AddressCount {
    ops_seen: u64,
    ops_included: u64,
    failures: VecDeque<Instant>,
    expiries: VecDeque<Instant>,
    // Escalated status and when it was reached. Held for a full window.
    held: Option<(ReputationStatus, Instant)>,
    last_active: Option<Instant>,
}

impl AddressCount {
    fn status_at(&self, params: &ReputationParams, now: Instant) -> ReputationStatus {
        let computed = self.computed_status(params, now);
        match self.held {
            Some((status, since)) if now.saturating_duration_since(since) < params.window => {
                status.max(computed)
            }
            _ => computed,
        }
    }

    fn computed_status(&self, params: &ReputationParams, now: Instant) -> ReputationStatus {
        let failures = self.failures_in_window(params.window, now);
        let expiries = self.expiries_in_window(params.window, now);
        if failures >= params.ban_threshold {
            ReputationStatus::Banned
        } else if failures + expiries >= params.throttle_threshold {
            ReputationStatus::Throttled
        } else {
            ReputationStatus::Ok
        }
    }

    fn refresh(&mut self, params: &ReputationParams, now: Instant) {
        let computed = self.computed_status(params, now);
        let held_status = match self.held {
            Some((status, since)) if now.saturating_duration_since(since) < params.window => status,
            _ => ReputationStatus::Ok,
        };
        if computed > held_status {
            self.held = Some((computed, now));
        } else if held_status == ReputationStatus::Ok {
            self.held = None;
        }
    }

    fn expire(&mut self, window: Duration, now: Instant) {
        let in_window = |t: &Instant| now.saturating_duration_since(*t) < window;
        while self.failures.front().is_some_and(|t| !in_window(t)) {
            self.failures.pop_front();
        }
        while self.expiries.front().is_some_and(|t| !in_window(t)) {
            self.expiries.pop_front();
        }
    }

    fn is_active(&self, params: &ReputationParams, now: Instant) -> bool {
        let in_window = |t: Instant| now.saturating_duration_since(t) < params.window;
        !self.failures.is_empty()
            || !self.expiries.is_empty()
            || self.held.is_some_and(|(_, since)| in_window(since))
            || self.last_active.is_some_and(in_window)
    }

    fn failures_in_window(&self, window: Duration, now: Instant) -> u64 {
        count_in_window(&self.failures, window, now)
    }

    fn expiries_in_window(&self, window: Duration, now: Instant) -> u64 {
        count_in_window(&self.expiries, window, now)
    }
}

fn count_in_window(times: &VecDeque<Instant>, window: Duration, now: Instant) -> u64 {
    times
        .iter()
        .filter(|t| now.saturating_duration_since(**t) < window)
        .count() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_secs(100);

    fn reputation() -> AddressReputation {
        AddressReputation::new(ReputationParams {
            window: WINDOW,
            throttle_threshold: 3,
            ban_threshold: 5,
        })
    }

    fn fail(rep: &mut AddressReputation, addr: Address, times: usize, now: Instant) {
        for _ in 0..times {
            rep.record_outcome_at(addr, ReputationOutcome::FailedSimulation, now);
        }
    }

    #[test]
    fn seen_included() {
        let addr = Address::random();
        let mut reputation = reputation();
        let now = Instant::now();

        for _ in 0..1000 {
            reputation.add_seen(addr, now);
            reputation.record_outcome_at(addr, ReputationOutcome::Included, now);
        }
        let counts = reputation.counts.get(&addr).unwrap();
        assert_eq!(counts.ops_seen, 1000);
        assert_eq!(counts.ops_included, 1000);
        assert_eq!(reputation.status_at(addr, now), ReputationStatus::Ok);
    }

    #[test]
    fn reputation_ok() {
        let addr = Address::random();
        let mut reputation = reputation();
        let now = Instant::now();
        reputation.add_seen(addr, now);
        fail(&mut reputation, addr, 2, now);
        assert_eq!(reputation.status_at(addr, now), ReputationStatus::Ok);
        assert_eq!(
            reputation.status_at(Address::random(), now),
            ReputationStatus::Ok
        );
    }

    #[test]
    fn reputation_throttled() {
        let addr = Address::random();
        let mut reputation = reputation();
        let now = Instant::now();
        fail(&mut reputation, addr, 1, now);
        reputation.record_outcome_at(addr, ReputationOutcome::Expired, now);
        reputation.record_outcome_at(addr, ReputationOutcome::Expired, now);
        assert_eq!(reputation.status_at(addr, now), ReputationStatus::Throttled);
    }

    #[test]
    fn reputation_banned_after_five_failures() {
        let addr = Address::random();
        let mut reputation = reputation();
        let now = Instant::now();
        fail(&mut reputation, addr, 4, now);
        assert_eq!(reputation.status_at(addr, now), ReputationStatus::Throttled);
        fail(&mut reputation, addr, 1, now);
        assert_eq!(reputation.status_at(addr, now), ReputationStatus::Banned);
    }

    #[test]
    fn expiries_alone_never_ban() {
        let addr = Address::random();
        let mut reputation = reputation();
        let now = Instant::now();
        for _ in 0..10 {
            reputation.record_outcome_at(addr, ReputationOutcome::Expired, now);
        }
        assert_eq!(reputation.status_at(addr, now), ReputationStatus::Throttled);
    }

    #[test]
    fn status_held_within_window() {
        let addr = Address::random();
        let mut reputation = reputation();
        let start = Instant::now();
        fail(&mut reputation, addr, 5, start);

        // inclusions decay the failures but the ban holds for the window
        let later = start + Duration::from_secs(10);
        for _ in 0..5 {
            reputation.record_outcome_at(addr, ReputationOutcome::Included, later);
        }
        assert_eq!(reputation.counts[&addr].failures.len(), 0);
        assert_eq!(reputation.status_at(addr, later), ReputationStatus::Banned);

        let after_window = start + WINDOW;
        assert_eq!(reputation.status_at(addr, after_window), ReputationStatus::Ok);
    }

    #[test]
    fn failures_leave_the_window() {
        let addr = Address::random();
        let mut reputation = reputation();
        let start = Instant::now();
        fail(&mut reputation, addr, 2, start);
        fail(&mut reputation, addr, 2, start + WINDOW);
        assert_eq!(
            reputation.status_at(addr, start + WINDOW),
            ReputationStatus::Ok
        );
        assert_eq!(reputation.counts[&addr].failures.len(), 2);
    }

    #[test]
    fn escalation_restarts_hold() {
        let addr = Address::random();
        let mut reputation = reputation();
        let start = Instant::now();
        fail(&mut reputation, addr, 3, start);
        assert_eq!(reputation.status_at(addr, start), ReputationStatus::Throttled);

        let later = start + Duration::from_secs(60);
        fail(&mut reputation, addr, 2, later);
        assert_eq!(reputation.status_at(addr, later), ReputationStatus::Banned);

        // the original failures are gone but the ban was reached later
        let check = start + WINDOW + Duration::from_secs(10);
        assert_eq!(reputation.status_at(addr, check), ReputationStatus::Banned);
        assert_eq!(
            reputation.status_at(addr, later + WINDOW),
            ReputationStatus::Ok
        );
    }

    #[test]
    fn set_rep() {
        let addr = Address::random();
        let mut reputation = reputation();
        let now = Instant::now();

        reputation.set_reputation_at(addr, 1000, 1000, ReputationStatus::Throttled, now);
        let counts = reputation.counts.get(&addr).unwrap();
        assert_eq!(counts.ops_seen, 1000);
        assert_eq!(counts.ops_included, 1000);
        assert_eq!(reputation.status_at(addr, now), ReputationStatus::Throttled);

        reputation.set_reputation_at(addr, 0, 0, ReputationStatus::Ok, now);
        assert_eq!(reputation.status_at(addr, now), ReputationStatus::Ok);
    }

    #[test]
    fn test_blocklist() {
        let addr = Address::random();
        let reputation = reputation().with_blocklist(HashSet::from([addr]));

        assert_eq!(
            reputation.status_at(addr, Instant::now()),
            ReputationStatus::Banned
        );
    }

    #[test]
    fn test_allowlist() {
        let addr = Address::random();
        let mut reputation = reputation().with_allowlist(HashSet::from([addr]));
        let now = Instant::now();
        fail(&mut reputation, addr, 10, now);

        assert_eq!(reputation.status_at(addr, now), ReputationStatus::Ok);
    }

    #[test]
    fn test_dump() {
        let addr = Address::random();
        let mut reputation = reputation();
        let now = Instant::now();
        reputation.add_seen(addr, now);
        fail(&mut reputation, addr, 3, now);
        reputation.record_outcome_at(addr, ReputationOutcome::Expired, now);

        let dump = reputation.dump_at(now);
        assert_eq!(
            dump,
            vec![Reputation {
                address: addr,
                status: ReputationStatus::Throttled,
                ops_seen: 1,
                ops_included: 0,
                ops_failed_simulation: 3,
                ops_expired: 1,
            }]
        );
    }

    #[test]
    fn prune_drops_idle_addresses() {
        let mut reputation = reputation();
        let start = Instant::now();
        for _ in 0..1000 {
            reputation.add_seen(Address::random(), start);
        }
        let failed = Address::random();
        fail(&mut reputation, failed, 1, start);
        assert_eq!(reputation.counts.len(), 1001);

        // everything is still inside the window
        assert_eq!(reputation.prune_at(start + Duration::from_secs(10)), 0);

        assert_eq!(reputation.prune_at(start + WINDOW), 1001);
        assert!(reputation.counts.is_empty());
    }

    #[test]
    fn prune_keeps_held_status() {
        let mut reputation = reputation();
        let start = Instant::now();
        let banned = Address::random();
        fail(&mut reputation, banned, 5, start);
        let recent = Address::random();
        let later = start + Duration::from_secs(60);
        reputation.add_seen(recent, later);

        // the failures left the window but the ban, reached later, holds
        let now = start + WINDOW;
        reputation.counts.get_mut(&banned).unwrap().held =
            Some((ReputationStatus::Banned, later));
        assert_eq!(reputation.prune_at(now), 0);
        assert_eq!(reputation.status_at(banned, now), ReputationStatus::Banned);
        assert!(reputation.counts[&banned].failures.is_empty());

        assert_eq!(reputation.prune_at(later + WINDOW), 2);
    }

    #[test]
    fn tracker_record_outcome_returns_status() {
        let tracker = ReputationTracker::new(ReputationParams::default(), None, None);
        let addr = Address::random();
        for _ in 0..4 {
            assert_ne!(
                tracker.record_outcome(addr, ReputationOutcome::FailedSimulation),
                ReputationStatus::Banned
            );
        }
        assert_eq!(
            tracker.record_outcome(addr, ReputationOutcome::FailedSimulation),
            ReputationStatus::Banned
        );
    }

    #[test]
    fn tracker_clear_keeps_blocklist() {
        let blocked = Address::random();
        let other = Address::random();
        let tracker = ReputationTracker::new(
            ReputationParams::default(),
            Some(HashSet::from([blocked])),
            None,
        );
        for _ in 0..5 {
            tracker.record_outcome(other, ReputationOutcome::FailedSimulation);
        }
        assert_eq!(tracker.status_of(other), ReputationStatus::Banned);

        tracker.clear();
        assert_eq!(tracker.status_of(other), ReputationStatus::Ok);
        assert_eq!(tracker.status_of(blocked), ReputationStatus::Banned);
        assert!(tracker.dump_reputation().is_empty());
    }
}
