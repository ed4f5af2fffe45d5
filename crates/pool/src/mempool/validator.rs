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

use std::sync::Arc;

use alloy_primitives::{Address, B256};
use courier_provider::ChainClient;
use courier_sim::{CheckMode, Prechecker, Simulator};
use courier_types::{
    pool::{MempoolError, MempoolResult, PoolOperation, ReputationStatus},
    Timestamp, UserOperation, ValidationOutput,
};
use tracing::instrument;

use super::{record_rejection, OperationPool, ReputationTracker};

/// Fee floors applied after simulation
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidatorSettings {
    /// Lowest accepted `maxFeePerGas`
    pub min_max_fee_per_gas: u128,
    /// Lowest accepted `maxPriorityFeePerGas`
    pub min_priority_fee_per_gas: u128,
}

/// An operation that passed every admission check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedOperation {
    /// The operation as it will be pooled
    pub pool_op: PoolOperation,
    /// Hash of the pooled operation it replaces, if any
    pub replaces: Option<B256>,
}

/// Decides whether an operation may enter the pool.
///
/// Validation reads the pool and the reputation tracker but never changes
/// either of them.
pub struct OperationValidator<P, S, C> {
    pool: Arc<OperationPool>,
    reputation: Arc<ReputationTracker>,
    prechecker: P,
    simulator: S,
    client: Arc<C>,
    settings: ValidatorSettings,
}

impl<P, S, C> OperationValidator<P, S, C>
where
    P: Prechecker,
    S: Simulator,
    C: ChainClient,
{
    /// Create a new validator
    pub fn new(
        pool: Arc<OperationPool>,
        reputation: Arc<ReputationTracker>,
        prechecker: P,
        simulator: S,
        client: Arc<C>,
        settings: ValidatorSettings,
    ) -> Self {
        Self {
            pool,
            reputation,
            prechecker,
            simulator,
            client,
            settings,
        }
    }

    /// The pool checked against
    pub fn pool(&self) -> &Arc<OperationPool> {
        &self.pool
    }

    /// The reputation tracker checked against
    pub fn reputation(&self) -> &Arc<ReputationTracker> {
        &self.reputation
    }

    /// Run every admission check, cheapest first
    #[instrument(skip_all, fields(sender = %op.sender, nonce = %op.nonce))]
    pub async fn validate(&self, op: UserOperation) -> MempoolResult<ValidatedOperation> {
        let result = self.validate_inner(op).await;
        if let Err(error) = &result {
            record_rejection(self.pool.config().entry_point, error);
        }
        result
    }

    /// Prechecks relaxed for unset gas fields, reputation, then a simulation that
    /// tolerates dummy signatures
    #[instrument(skip_all, fields(sender = %op.sender))]
    pub async fn simulate_for_estimate(&self, op: UserOperation) -> MempoolResult<ValidationOutput> {
        self.prechecker.check(&op, CheckMode::Estimation)?;
        self.check_reputation(&op)?;
        self.simulator
            .simulate_validation(op, CheckMode::Estimation)
            .await
    }

    async fn validate_inner(&self, op: UserOperation) -> MempoolResult<ValidatedOperation> {
        self.prechecker.check(&op, CheckMode::Admission)?;
        self.check_reputation(&op)?;
        let replaces = self.pool.check_replacement(&op)?;

        let output = self
            .simulator
            .simulate_validation(op.clone(), CheckMode::Admission)
            .await?;

        if let Some(paymaster) = op.paymaster() {
            self.check_paymaster_deposit(paymaster, &op, replaces)
                .await?;
        }
        self.check_fee_floor(&op)?;

        let config = self.pool.config();
        Ok(ValidatedOperation {
            pool_op: PoolOperation {
                hash: op.hash(config.entry_point, config.chain_id),
                uo: op,
                entry_point: config.entry_point,
                admitted_at: Timestamp::now(),
                simulated_gas: output.pre_op_gas,
                valid_time_range: output.valid_time_range,
            },
            replaces,
        })
    }

    fn check_reputation(&self, op: &UserOperation) -> MempoolResult<()> {
        let throttled_limit = self.pool.config().throttled_entity_mempool_count;
        for entity in op.entities() {
            match self.reputation.status_of(entity.address) {
                ReputationStatus::Banned => return Err(MempoolError::EntityBanned(entity)),
                ReputationStatus::Throttled
                    if self.pool.address_count(entity.address) >= throttled_limit =>
                {
                    return Err(MempoolError::EntityThrottled(entity));
                }
                _ => {}
            }
        }
        Ok(())
    }

    async fn check_paymaster_deposit(
        &self,
        paymaster: Address,
        op: &UserOperation,
        replaces: Option<B256>,
    ) -> MempoolResult<()> {
        let deposit = self.client.get_deposit(paymaster).await?;
        let required = self
            .pool
            .paymaster_pending_cost(paymaster, replaces)
            .saturating_add(op.max_gas_cost());
        if deposit < required {
            return Err(MempoolError::PaymasterBalanceTooLow(required, deposit));
        }
        Ok(())
    }

    fn check_fee_floor(&self, op: &UserOperation) -> MempoolResult<()> {
        if op.max_fee_per_gas < self.settings.min_max_fee_per_gas {
            return Err(MempoolError::MaxFeePerGasTooLow(
                op.max_fee_per_gas,
                self.settings.min_max_fee_per_gas,
            ));
        }
        if op.max_priority_fee_per_gas < self.settings.min_priority_fee_per_gas {
            return Err(MempoolError::MaxPriorityFeePerGasTooLow(
                op.max_priority_fee_per_gas,
                self.settings.min_priority_fee_per_gas,
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use alloy_primitives::{Bytes, U256};
    use courier_provider::MockChainClient;
    use courier_sim::{MockPrechecker, MockSimulator, PrecheckError};
    use courier_types::{
        pool::{ErrorKind, PrecheckViolation, ReputationOutcome},
        ValidTimeRange,
    };
    use courier_utils::emit::EVENT_CHANNEL_CAPACITY;
    use tokio::sync::broadcast;

    use super::*;
    use crate::mempool::{PoolConfig, ReputationParams};

    const FLOOR: u128 = 1_000;

    struct Fixture {
        prechecker: MockPrechecker,
        simulator: MockSimulator,
        client: MockChainClient,
        pool: Arc<OperationPool>,
        reputation: Arc<ReputationTracker>,
    }

    impl Fixture {
        fn new() -> Self {
            let mut prechecker = MockPrechecker::new();
            prechecker.expect_check().returning(|_, _| Ok(()));
            let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
            Self {
                prechecker,
                simulator: MockSimulator::new(),
                client: MockChainClient::new(),
                pool: Arc::new(OperationPool::new(
                    PoolConfig {
                        throttled_entity_mempool_count: 1,
                        ..PoolConfig::default()
                    },
                    tx,
                )),
                reputation: Arc::new(ReputationTracker::new(
                    ReputationParams::default(),
                    None,
                    None,
                )),
            }
        }

        fn simulates_ok(mut self) -> Self {
            self.simulator
                .expect_simulate_validation()
                .returning(|_, _| Ok(output()));
            self
        }

        fn never_simulates(mut self) -> Self {
            self.simulator.expect_simulate_validation().never();
            self
        }

        fn validator(
            self,
        ) -> OperationValidator<MockPrechecker, MockSimulator, MockChainClient> {
            OperationValidator::new(
                self.pool,
                self.reputation,
                self.prechecker,
                self.simulator,
                Arc::new(self.client),
                ValidatorSettings {
                    min_max_fee_per_gas: FLOOR,
                    min_priority_fee_per_gas: FLOOR,
                },
            )
        }
    }

    fn output() -> ValidationOutput {
        ValidationOutput {
            pre_op_gas: 70_000,
            prefund: U256::from(1),
            sig_failed: false,
            valid_time_range: ValidTimeRange::new(Timestamp::new(0), Timestamp::new(u64::MAX - 1)),
        }
    }

    fn create_op(sender: Address, nonce: u64, fee: u128) -> UserOperation {
        UserOperation {
            sender,
            nonce: U256::from(nonce),
            call_gas_limit: 50_000,
            verification_gas_limit: 100_000,
            pre_verification_gas: 50_000,
            max_fee_per_gas: fee,
            max_priority_fee_per_gas: fee,
            signature: Bytes::from(vec![1_u8; 65]),
            ..Default::default()
        }
    }

    fn with_paymaster(mut op: UserOperation, paymaster: Address) -> UserOperation {
        op.paymaster_and_data = Bytes::copy_from_slice(paymaster.as_slice());
        op
    }

    #[tokio::test]
    async fn test_valid_op() {
        let validator = Fixture::new().simulates_ok().validator();
        let op = create_op(Address::random(), 0, FLOOR);
        let validated = validator.validate(op.clone()).await.unwrap();

        let config = validator.pool().config();
        assert_eq!(validated.replaces, None);
        assert_eq!(
            validated.pool_op.hash,
            op.hash(config.entry_point, config.chain_id)
        );
        assert_eq!(validated.pool_op.simulated_gas, 70_000);
        assert_eq!(validated.pool_op.valid_time_range, output().valid_time_range);
        assert_eq!(validated.pool_op.uo, op);
    }

    #[tokio::test]
    async fn test_malformed_never_simulates() {
        let mut fixture = Fixture::new().never_simulates();
        fixture.prechecker = MockPrechecker::new();
        fixture
            .prechecker
            .expect_check()
            .returning(|_, _| Err(PrecheckError(vec![PrecheckViolation::ZeroSender])));
        let err = fixture
            .validator()
            .validate(create_op(Address::ZERO, 0, FLOOR))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Malformed);
    }

    #[tokio::test]
    async fn test_banned_sender_never_simulates() {
        let fixture = Fixture::new().never_simulates();
        let sender = Address::random();
        for _ in 0..5 {
            fixture
                .reputation
                .record_outcome(sender, ReputationOutcome::FailedSimulation);
        }
        let err = fixture
            .validator()
            .validate(create_op(sender, 0, FLOOR))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Banned);
    }

    #[tokio::test]
    async fn test_banned_paymaster() {
        let fixture = Fixture::new().never_simulates();
        let paymaster = Address::random();
        fixture
            .reputation
            .set_reputation(paymaster, 0, 0, ReputationStatus::Banned);
        let op = with_paymaster(create_op(Address::random(), 0, FLOOR), paymaster);
        let err = fixture.validator().validate(op).await.unwrap_err();
        assert!(matches!(err, MempoolError::EntityBanned(e) if e.address == paymaster));
    }

    #[tokio::test]
    async fn test_throttled_entity_limit() {
        let fixture = Fixture::new().simulates_ok();
        let sender = Address::random();
        fixture
            .reputation
            .set_reputation(sender, 0, 0, ReputationStatus::Throttled);
        let validator = fixture.validator();

        // a throttled sender may hold one pooled op
        let first = validator.validate(create_op(sender, 0, FLOOR)).await.unwrap();
        validator.pool().insert(first.pool_op).unwrap();

        let err = validator
            .validate(create_op(sender, 1, FLOOR))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Throttled);
    }

    #[tokio::test]
    async fn test_fee_floor_leaves_pool_unchanged() {
        let validator = Fixture::new().simulates_ok().validator();
        let pooled = validator
            .validate(create_op(Address::random(), 0, FLOOR))
            .await
            .unwrap();
        validator.pool().insert(pooled.pool_op).unwrap();

        let err = validator
            .validate(create_op(Address::random(), 0, FLOOR - 1))
            .await
            .unwrap_err();
        assert!(matches!(err, MempoolError::MaxFeePerGasTooLow(999, FLOOR)));
        assert_eq!(err.kind(), ErrorKind::Underpriced);

        let mut op = create_op(Address::random(), 0, FLOOR);
        op.max_priority_fee_per_gas = 1;
        let err = validator.validate(op).await.unwrap_err();
        assert!(matches!(err, MempoolError::MaxPriorityFeePerGasTooLow(1, FLOOR)));
        assert_eq!(validator.pool().len(), 1);
    }

    #[tokio::test]
    async fn test_replacement_and_duplicate() {
        let validator = Fixture::new().simulates_ok().validator();
        let sender = Address::random();
        let original = validator
            .validate(create_op(sender, 0, FLOOR))
            .await
            .unwrap();
        let original_hash = validator.pool().insert(original.pool_op.clone()).unwrap();

        let err = validator
            .validate(original.pool_op.uo.clone())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Duplicate);

        let err = validator
            .validate(create_op(sender, 0, FLOOR + 1))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Underpriced);

        // double the fee plus margin replaces
        let replacement = validator
            .validate(create_op(sender, 0, FLOOR * 2 + 100))
            .await
            .unwrap();
        assert_eq!(replacement.replaces, Some(original_hash));
        validator.pool().insert(replacement.pool_op).unwrap();
        assert_eq!(validator.pool().len(), 1);
    }

    #[tokio::test]
    async fn test_paymaster_deposit() {
        let paymaster = Address::random();
        let op = with_paymaster(create_op(Address::random(), 0, FLOOR), paymaster);
        let cost = op.max_gas_cost();

        let mut fixture = Fixture::new().simulates_ok();
        fixture
            .client
            .expect_get_deposit()
            .returning(move |_| Ok(cost));
        let validator = fixture.validator();

        let validated = validator.validate(op).await.unwrap();
        validator.pool().insert(validated.pool_op).unwrap();

        // the deposit is already committed to the pooled op
        let second = with_paymaster(create_op(Address::random(), 0, FLOOR), paymaster);
        let err = validator.validate(second).await.unwrap_err();
        assert!(matches!(err, MempoolError::PaymasterBalanceTooLow(req, cur) if req == cost * U256::from(2) && cur == cost));
        assert_eq!(err.kind(), ErrorKind::InsufficientStake);
    }

    #[tokio::test]
    async fn test_simulation_error_passes_through() {
        let mut fixture = Fixture::new();
        fixture
            .simulator
            .expect_simulate_validation()
            .returning(|_, _| Err(MempoolError::OutOfGas("AA40".into())));
        let err = fixture
            .validator()
            .validate(create_op(Address::random(), 0, FLOOR))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OutOfGas);
    }

    #[tokio::test]
    async fn test_simulate_for_estimate_uses_estimation_mode() {
        let mut fixture = Fixture::new();
        fixture.prechecker = MockPrechecker::new();
        fixture
            .prechecker
            .expect_check()
            .withf(|_, mode| *mode == CheckMode::Estimation)
            .returning(|_, _| Ok(()));
        fixture
            .simulator
            .expect_simulate_validation()
            .withf(|_, mode| *mode == CheckMode::Estimation)
            .returning(|_, _| Ok(output()));
        let out = fixture
            .validator()
            .simulate_for_estimate(create_op(Address::random(), 0, 0))
            .await
            .unwrap();
        assert_eq!(out.pre_op_gas, 70_000);
    }
}
