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
    sync::Arc,
    time::Duration,
};

use alloy_primitives::{Address, B256, U256};
use anyhow::Context;
use async_trait::async_trait;
use courier_pool::{OpRemovalReason, OperationPool, ReputationTracker};
use courier_provider::{ChainClient, ProviderError};
use courier_sim::{CheckMode, Prechecker};
use courier_types::{
    pool::{PoolOperation, ReputationOutcome, ReputationStatus},
    Batch, BatchReceipt, RejectedOp, Timestamp,
};
use courier_utils::{
    emit::{self, WithEntryPoint},
    math,
    retry::{self, RetryOpts},
};
use metrics::{Counter, Histogram};
use metrics_derive::Metrics;
#[cfg(test)]
use mockall::automock;
use tokio::{
    sync::{broadcast, mpsc, oneshot},
    time::{self, Instant, MissedTickBehavior},
};
use tracing::{debug, error, info, instrument, warn};

use crate::{
    batch_builder::{fetch_nonces, BatchBuilder},
    emit::BuilderEvent,
};

// Abandoned batches whose receipts are still checked during maintenance
const MAX_UNRESOLVED: usize = 64;
// Transactions remembered as reconciled
const MAX_RECONCILED: usize = 1024;

/// Submission loop settings
#[derive(Clone, Copy, Debug)]
pub struct Settings {
    /// Receiver of the fees collected by `handleOps`
    pub beneficiary: Address,
    /// Address of the signing account
    pub signer_address: Address,
    /// Signer balance below which fees are paid to the signer instead
    pub min_balance: U256,
    /// Percentage added to the batch gas when setting the transaction gas limit
    pub gas_limit_buffer_percent: u32,
    /// Interval between automatic cycles
    pub poll_interval: Duration,
    /// Interval between receipt polls
    pub receipt_poll_interval: Duration,
    /// Time to wait for a receipt before abandoning the cycle
    pub receipt_timeout: Duration,
    /// Backoff for transient submission errors
    pub submit_retry: RetryOpts,
}

/// Request to run a cycle immediately
#[derive(Debug)]
pub struct SendBundleRequest {
    /// Receives the outcome of the cycle
    pub responder: oneshot::Sender<SendBundleResult>,
}

/// Outcome of a cycle
#[derive(Debug)]
pub enum SendBundleResult {
    /// The batch was mined and reconciled
    Success {
        /// Transaction hash
        tx_hash: B256,
        /// Block containing the transaction
        block_number: u64,
        /// False if `handleOps` reverted
        success: bool,
    },
    /// The pool had nothing to send
    NoOperations,
    /// The batch was sent but no receipt arrived in time
    Unresolved {
        /// Transaction hash
        tx_hash: B256,
    },
    /// The cycle was abandoned
    Error(anyhow::Error),
}

/// Handle for requesting a cycle from a running [`SubmissionLoop`]
#[derive(Clone, Debug)]
pub struct SubmissionHandle {
    sender: mpsc::Sender<SendBundleRequest>,
}

impl SubmissionHandle {
    /// Create a handle and the receiver to pass to [`SubmissionLoop::run`]
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<SendBundleRequest>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (Self { sender }, receiver)
    }

    /// Trigger a cycle and wait for its outcome
    pub async fn send_bundle_now(&self) -> anyhow::Result<SendBundleResult> {
        let (responder, rx) = oneshot::channel();
        self.sender
            .send(SendBundleRequest { responder })
            .await
            .map_err(|_| anyhow::anyhow!("submission loop is not running"))?;
        rx.await.context("submission loop dropped the request")
    }
}

/// Drives batches from the pool to the chain, one cycle at a time.
///
/// The loop is the only user of the signer's nonce.
pub struct SubmissionLoop<B, P, C> {
    builder: B,
    prechecker: P,
    client: Arc<C>,
    pool: Arc<OperationPool>,
    reputation: Arc<ReputationTracker>,
    settings: Settings,
    event_sender: broadcast::Sender<WithEntryPoint<BuilderEvent>>,
    unresolved: VecDeque<PendingBatch>,
    reconciled: Reconciled,
    last_pruned_block: Option<u64>,
    metrics: BuilderMetric,
}

#[derive(Debug)]
struct PendingBatch {
    tx_hash: B256,
    batch: Batch,
    sent_at: Instant,
}

#[derive(Debug)]
enum LoopState {
    Idle,
    Building,
    Submitting { batch: Batch, beneficiary: Address },
    AwaitingReceipt(PendingBatch),
    Reconciling { batch: Batch, receipt: BatchReceipt },
}

struct MachineState<T> {
    trigger: T,
    inner: LoopState,
    responder: Option<oneshot::Sender<SendBundleResult>>,
}

impl<T> MachineState<T> {
    fn new(trigger: T) -> Self {
        Self {
            trigger,
            inner: LoopState::Idle,
            responder: None,
        }
    }

    // End the cycle, replying to a manual trigger if there is one
    fn complete(&mut self, result: SendBundleResult) {
        if let Some(responder) = self.responder.take() {
            let _ = responder.send(result);
        }
        self.inner = LoopState::Idle;
    }
}

impl<B, P, C> SubmissionLoop<B, P, C>
where
    B: BatchBuilder,
    P: Prechecker,
    C: ChainClient,
{
    /// Create a new loop
    pub fn new(
        builder: B,
        prechecker: P,
        client: Arc<C>,
        pool: Arc<OperationPool>,
        reputation: Arc<ReputationTracker>,
        settings: Settings,
        event_sender: broadcast::Sender<WithEntryPoint<BuilderEvent>>,
    ) -> Self {
        let ep = client.entry_point().to_string();
        Self {
            builder,
            prechecker,
            client,
            pool,
            reputation,
            settings,
            event_sender,
            unresolved: VecDeque::new(),
            reconciled: Reconciled::default(),
            last_pruned_block: None,
            metrics: BuilderMetric::new_with_labels(&[("entry_point", ep)]),
        }
    }

    /// Run cycles until the task is dropped.
    ///
    /// A cycle starts on every `poll_interval` tick and on every request received
    /// on `action_receiver`.
    pub async fn run(
        mut self,
        action_receiver: mpsc::Receiver<SendBundleRequest>,
    ) -> anyhow::Result<()> {
        let trigger = LoopTrigger::new(action_receiver, self.settings.poll_interval);
        let mut state = MachineState::new(trigger);

        loop {
            if let Err(e) = self.step_state(&mut state).await {
                error!("Error in submission loop: {e:#?}");
                self.metrics.state_machine_errors.increment(1);
                state.complete(SendBundleResult::Error(e));
            }
        }
    }

    async fn step_state<T: Trigger>(&mut self, state: &mut MachineState<T>) -> anyhow::Result<()> {
        match std::mem::replace(&mut state.inner, LoopState::Idle) {
            LoopState::Idle => self.handle_idle_state(state).await,
            LoopState::Building => self.handle_building_state(state).await,
            LoopState::Submitting { batch, beneficiary } => {
                self.handle_submitting_state(state, batch, beneficiary)
                    .await;
                Ok(())
            }
            LoopState::AwaitingReceipt(pending) => {
                self.handle_awaiting_state(state, pending).await;
                Ok(())
            }
            LoopState::Reconciling { batch, receipt } => {
                self.reconcile(&batch, &receipt);
                state.complete(SendBundleResult::Success {
                    tx_hash: receipt.tx_hash,
                    block_number: receipt.block_number,
                    success: receipt.success,
                });
                Ok(())
            }
        }
    }

    async fn handle_idle_state<T: Trigger>(
        &mut self,
        state: &mut MachineState<T>,
    ) -> anyhow::Result<()> {
        state.responder = state.trigger.wait_for_trigger().await?;
        self.maintain().await;
        state.inner = LoopState::Building;
        Ok(())
    }

    async fn handle_building_state<T>(
        &mut self,
        state: &mut MachineState<T>,
    ) -> anyhow::Result<()> {
        let start = Instant::now();
        let batch = self.builder.build().await.context("failed to build batch")?;
        self.metrics
            .batch_build_time_ms
            .record(start.elapsed().as_millis() as f64);
        self.remove_rejected(&batch.rejected);

        if batch.is_empty() {
            debug!("No operations to send");
            state.complete(SendBundleResult::NoOperations);
            return Ok(());
        }

        let beneficiary = self.select_beneficiary().await;
        state.inner = LoopState::Submitting { batch, beneficiary };
        Ok(())
    }

    #[instrument(skip_all, fields(ops = batch.len()))]
    async fn handle_submitting_state<T>(
        &mut self,
        state: &mut MachineState<T>,
        batch: Batch,
        beneficiary: Address,
    ) {
        let gas_limit =
            math::increase_by_percent(batch.total_gas, self.settings.gas_limit_buffer_percent);
        let ops = batch.user_ops();
        let result = retry::with_retries_if(
            "submit batch",
            || self.client.submit_batch(ops.clone(), beneficiary, gas_limit),
            self.settings.submit_retry,
            |e: &ProviderError| e.is_transient(),
        )
        .await;

        match result {
            Ok(tx_hash) => {
                info!("Sent batch {tx_hash:?} with {} ops", batch.len());
                self.metrics.batches_sent.increment(1);
                let op_hashes = batch.op_hashes();
                self.pool.increment_attempts(&op_hashes);
                self.emit(BuilderEvent::FormedBatch {
                    tx_hash,
                    op_hashes: Arc::new(op_hashes),
                    gas_limit,
                    beneficiary,
                });
                state.inner = LoopState::AwaitingReceipt(PendingBatch {
                    tx_hash,
                    batch,
                    sent_at: Instant::now(),
                });
            }
            Err(error) => {
                let transient = error.is_transient();
                if transient {
                    warn!("Abandoning batch after repeated transient errors: {error}");
                    self.metrics.batches_abandoned.increment(1);
                } else {
                    error!("Fatal error submitting batch: {error}");
                    self.metrics.fatal_errors.increment(1);
                }
                self.emit(BuilderEvent::SubmissionFailed {
                    error: Arc::new(error.to_string()),
                    transient,
                });
                state.complete(SendBundleResult::Error(error.into()));
            }
        }
    }

    async fn handle_awaiting_state<T>(
        &mut self,
        state: &mut MachineState<T>,
        pending: PendingBatch,
    ) {
        match self.client.get_transaction_receipt(pending.tx_hash).await {
            Ok(Some(receipt)) => {
                state.inner = LoopState::Reconciling {
                    batch: pending.batch,
                    receipt,
                };
                return;
            }
            Ok(None) => {}
            Err(error) => warn!(
                "Failed to fetch receipt for batch {:?}: {error}",
                pending.tx_hash
            ),
        }

        if pending.sent_at.elapsed() >= self.settings.receipt_timeout {
            let tx_hash = pending.tx_hash;
            warn!("No receipt for batch {tx_hash:?}, leaving it unresolved");
            self.metrics.receipt_timeouts.increment(1);
            self.emit(BuilderEvent::ReceiptTimedOut { tx_hash });
            self.remember_unresolved(pending);
            state.complete(SendBundleResult::Unresolved { tx_hash });
        } else {
            time::sleep(self.settings.receipt_poll_interval).await;
            state.inner = LoopState::AwaitingReceipt(pending);
        }
    }

    async fn select_beneficiary(&self) -> Address {
        let signer = self.settings.signer_address;
        match self.client.get_balance(signer).await {
            Ok(balance) if balance < self.settings.min_balance => {
                warn!(
                    "Signer balance {balance} below minimum {}, paying fees to signer",
                    self.settings.min_balance
                );
                signer
            }
            Ok(_) => self.settings.beneficiary,
            Err(error) => {
                warn!("Failed to fetch signer balance: {error}");
                self.settings.beneficiary
            }
        }
    }

    // Late receipts are reconciled before pruning, so ops that landed are
    // credited rather than dropped as stale.
    async fn maintain(&mut self) {
        self.check_unresolved().await;
        self.reputation.prune();
        if self.pool.is_empty() {
            return;
        }

        // on-chain nonces only move when a block lands
        let nonces = match self.client.get_block_number().await {
            Ok(block) if self.last_pruned_block.map_or(true, |last| block > last) => {
                let ops = self.pool.all_operations(usize::MAX);
                let nonces = fetch_nonces(
                    self.client.as_ref(),
                    ops.iter().map(|op| (op.uo.sender, op.uo.nonce_key())),
                )
                .await;
                self.last_pruned_block = Some(block);
                nonces
            }
            Ok(_) => HashMap::new(),
            Err(error) => {
                warn!("Failed to fetch block number: {error}");
                HashMap::new()
            }
        };
        for (op, reason) in self.pool.prune_expired(Timestamp::now(), &nonces) {
            if reason.is_expiry() {
                self.record_outcome(&op, ReputationOutcome::Expired);
            }
        }
    }

    async fn check_unresolved(&mut self) {
        let unresolved = std::mem::take(&mut self.unresolved);
        for pending in unresolved {
            match self.client.get_transaction_receipt(pending.tx_hash).await {
                Ok(Some(receipt)) => {
                    info!("Found late receipt for batch {:?}", pending.tx_hash);
                    self.reconcile(&pending.batch, &receipt);
                }
                Ok(None) => self.unresolved.push_back(pending),
                Err(error) => {
                    warn!(
                        "Failed to fetch receipt for batch {:?}: {error}",
                        pending.tx_hash
                    );
                    self.unresolved.push_back(pending);
                }
            }
        }
    }

    fn remember_unresolved(&mut self, pending: PendingBatch) {
        if self.unresolved.len() >= MAX_UNRESOLVED {
            if let Some(dropped) = self.unresolved.pop_front() {
                warn!("Forgetting unresolved batch {:?}", dropped.tx_hash);
            }
        }
        self.unresolved.push_back(pending);
    }

    /// Apply a receipt to the pool and to reputation. Applying the same receipt
    /// again does nothing.
    fn reconcile(&mut self, batch: &Batch, receipt: &BatchReceipt) {
        let tx_hash = receipt.tx_hash;
        if !self.reconciled.insert(tx_hash) {
            debug!("Batch {tx_hash:?} already reconciled");
            return;
        }

        info!(
            "Batch {tx_hash:?} mined in block {} with status {}",
            receipt.block_number, receipt.success
        );
        self.metrics.batches_mined.increment(1);
        self.metrics.batch_gas_used.increment(receipt.gas_used as u64);
        self.emit(BuilderEvent::TransactionMined {
            tx_hash,
            block_number: receipt.block_number,
            success: receipt.success,
        });

        for op in &batch.ops {
            match receipt.op_results.get(&op.hash) {
                Some(true) => {
                    if self
                        .pool
                        .remove_with_reason(op.hash, OpRemovalReason::Included { tx_hash })
                        .is_some()
                    {
                        self.metrics.ops_included.increment(1);
                        self.record_outcome(op, ReputationOutcome::Included);
                    }
                }
                Some(false) => {
                    if self
                        .pool
                        .remove_with_reason(op.hash, OpRemovalReason::Reverted { tx_hash })
                        .is_some()
                    {
                        self.metrics.ops_failed.increment(1);
                        self.record_outcome(op, ReputationOutcome::FailedSimulation);
                    }
                }
                // Not executed, usually because the whole transaction reverted.
                // Nothing ties the failure to this op, so nobody is charged.
                None => {
                    if self.pool.get_by_hash(op.hash).is_some() && !self.still_admissible(op) {
                        self.pool
                            .remove_with_reason(op.hash, OpRemovalReason::Reverted { tx_hash });
                    }
                }
            }
        }
    }

    fn still_admissible(&self, op: &PoolOperation) -> bool {
        self.prechecker.check(&op.uo, CheckMode::Admission).is_ok()
            && op
                .entities()
                .iter()
                .all(|e| self.reputation.status_of(e.address) != ReputationStatus::Banned)
    }

    // Ops that failed re-validation leave the pool. Only the entity at fault is charged.
    fn remove_rejected(&self, rejected: &[RejectedOp]) {
        for rejected in rejected {
            let reason = OpRemovalReason::FailedRevalidation {
                reason: rejected.reason.clone(),
            };
            if self
                .pool
                .remove_with_reason(rejected.op.hash, reason)
                .is_none()
            {
                continue;
            }
            self.metrics.ops_rejected.increment(1);
            if let Some(culprit) = rejected.culprit {
                self.record_address_outcome(culprit.address, ReputationOutcome::FailedSimulation);
            }
        }
    }

    fn record_outcome(&self, op: &PoolOperation, outcome: ReputationOutcome) {
        for entity in op.entities() {
            self.record_address_outcome(entity.address, outcome);
        }
    }

    // A banned address takes all of its pooled ops with it
    fn record_address_outcome(&self, address: Address, outcome: ReputationOutcome) {
        if self.reputation.record_outcome(address, outcome) != ReputationStatus::Banned {
            return;
        }
        let removed = self.pool.remove_by_entity(address);
        if !removed.is_empty() {
            info!("Removed {} ops of banned address {address:?}", removed.len());
        }
    }

    fn emit(&self, event: BuilderEvent) {
        emit::emit(&self.event_sender, self.client.entry_point(), event);
    }
}

#[derive(Debug, Default)]
struct Reconciled {
    hashes: HashSet<B256>,
    order: VecDeque<B256>,
}

impl Reconciled {
    // False if the hash was already present
    fn insert(&mut self, hash: B256) -> bool {
        if !self.hashes.insert(hash) {
            return false;
        }
        self.order.push_back(hash);
        if self.order.len() > MAX_RECONCILED {
            if let Some(oldest) = self.order.pop_front() {
                self.hashes.remove(&oldest);
            }
        }
        true
    }
}

#[async_trait]
#[cfg_attr(test, automock)]
trait Trigger: Send {
    // Wait for a timer tick or a manual request, returning the responder of the latter
    async fn wait_for_trigger(
        &mut self,
    ) -> anyhow::Result<Option<oneshot::Sender<SendBundleResult>>>;
}

struct LoopTrigger {
    action_receiver: mpsc::Receiver<SendBundleRequest>,
    receiver_open: bool,
    timer: time::Interval,
}

impl LoopTrigger {
    fn new(action_receiver: mpsc::Receiver<SendBundleRequest>, poll_interval: Duration) -> Self {
        let mut timer = time::interval_at(Instant::now() + poll_interval, poll_interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            action_receiver,
            receiver_open: true,
            timer,
        }
    }
}

#[async_trait]
impl Trigger for LoopTrigger {
    async fn wait_for_trigger(
        &mut self,
    ) -> anyhow::Result<Option<oneshot::Sender<SendBundleResult>>> {
        loop {
            tokio::select! {
                _ = self.timer.tick() => return Ok(None),
                request = self.action_receiver.recv(), if self.receiver_open => {
                    match request {
                        Some(request) => return Ok(Some(request.responder)),
                        None => {
                            warn!("Send bundle channel closed, continuing on timer only");
                            self.receiver_open = false;
                        }
                    }
                }
            }
        }
    }
}

#[derive(Metrics)]
#[metrics(scope = "builder")]
struct BuilderMetric {
    #[metric(describe = "the count of batch transactions sent.")]
    batches_sent: Counter,
    #[metric(describe = "the count of batch transactions mined.")]
    batches_mined: Counter,
    #[metric(describe = "the count of batches abandoned after transient errors.")]
    batches_abandoned: Counter,
    #[metric(describe = "the count of batches without a receipt before the timeout.")]
    receipt_timeouts: Counter,
    #[metric(describe = "the count of fatal submission errors.")]
    fatal_errors: Counter,
    #[metric(describe = "the count of state machine errors.")]
    state_machine_errors: Counter,
    #[metric(describe = "the count of operations included.")]
    ops_included: Counter,
    #[metric(describe = "the count of operations that failed on chain.")]
    ops_failed: Counter,
    #[metric(describe = "the count of operations rejected while building a batch.")]
    ops_rejected: Counter,
    #[metric(describe = "the total gas used by mined batches.")]
    batch_gas_used: Counter,
    #[metric(describe = "the time to build a batch in milliseconds.")]
    batch_build_time_ms: Histogram,
}
