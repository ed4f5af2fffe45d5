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
use courier_builder::{SendBundleResult, SubmissionHandle};
use courier_pool::OperationValidator;
use courier_provider::ChainClient;
use courier_sim::{EstimationSettings, GasEstimate, Prechecker, Simulator};
use courier_types::{
    chain::ChainSpec,
    pool::{MempoolError, MempoolResult, Reputation},
    UserOperation, UserOperationOptionalGas,
};
use tracing::{info, instrument};

/// Entry point for every client request.
///
/// Admission goes through the validator before touching the pool. Estimation
/// shares the validator's simulation but never mutates the pool.
pub struct BundlerServer<P, S, C> {
    validator: OperationValidator<P, S, C>,
    client: Arc<C>,
    chain_spec: ChainSpec,
    estimation_settings: EstimationSettings,
    submission: SubmissionHandle,
}

impl<P, S, C> BundlerServer<P, S, C>
where
    P: Prechecker,
    S: Simulator,
    C: ChainClient,
{
    /// Create a new server
    pub fn new(
        validator: OperationValidator<P, S, C>,
        client: Arc<C>,
        chain_spec: ChainSpec,
        estimation_settings: EstimationSettings,
        submission: SubmissionHandle,
    ) -> Self {
        Self {
            validator,
            client,
            chain_spec,
            estimation_settings,
            submission,
        }
    }

    /// Validate `op` and admit it to the pool
    #[instrument(skip_all, fields(sender = %op.sender, nonce = %op.nonce))]
    pub async fn submit_operation(
        &self,
        op: UserOperation,
        entry_point: Address,
    ) -> MempoolResult<B256> {
        self.check_entry_point(entry_point)?;

        let validated = self.validator.validate(op).await?;
        let entities = validated.pool_op.entities();
        let hash = self.validator.pool().insert(validated.pool_op)?;
        for entity in entities {
            self.validator.reputation().record_seen(entity.address);
        }
        info!("Admitted operation {hash:?}");
        Ok(hash)
    }

    /// Estimate the gas limits `op` should carry
    #[instrument(skip_all, fields(sender = %op.sender))]
    pub async fn estimate_operation_gas(
        &self,
        op: UserOperationOptionalGas,
        entry_point: Address,
    ) -> MempoolResult<GasEstimate> {
        self.check_entry_point(entry_point)?;

        let EstimationSettings {
            max_call_gas,
            max_verification_gas,
            ..
        } = self.estimation_settings;

        let pre_verification_gas = op
            .max_fill(max_call_gas, max_verification_gas)
            .calc_static_pre_verification_gas(&self.chain_spec, true);
        let simulated_op = UserOperation {
            pre_verification_gas,
            ..op.into_user_operation(max_call_gas, max_verification_gas)
        };

        let output = self
            .validator
            .simulate_for_estimate(simulated_op.clone())
            .await?;
        let call_gas_limit = self.client.estimate_call_gas(simulated_op.clone()).await?;

        Ok(GasEstimate::from_simulation(
            &self.estimation_settings,
            &simulated_op,
            &output,
            pre_verification_gas,
            call_gas_limit,
        ))
    }

    /// Entry points operations may be sent to
    pub fn supported_entry_points(&self) -> Vec<Address> {
        vec![self.chain_spec.entry_point_address]
    }

    /// Chain this server targets
    pub fn chain_id(&self) -> u64 {
        self.chain_spec.id
    }

    /// Every pooled operation, best first
    pub fn dump_mempool(&self, entry_point: Address) -> MempoolResult<Vec<UserOperation>> {
        self.check_entry_point(entry_point)?;
        Ok(self
            .validator
            .pool()
            .all_operations(usize::MAX)
            .into_iter()
            .map(|po| po.uo.clone())
            .collect())
    }

    /// Every address with recorded reputation
    pub fn dump_reputation(&self, entry_point: Address) -> MempoolResult<Vec<Reputation>> {
        self.check_entry_point(entry_point)?;
        Ok(self.validator.reputation().dump_reputation())
    }

    /// Overwrite reputation entries. Only the seen and included counters and the
    /// status of each entry are used.
    pub fn set_reputation(
        &self,
        entry_point: Address,
        reputations: impl IntoIterator<Item = Reputation>,
    ) -> MempoolResult<()> {
        self.check_entry_point(entry_point)?;
        for rep in reputations {
            self.validator.reputation().set_reputation(
                rep.address,
                rep.ops_seen,
                rep.ops_included,
                rep.status,
            );
        }
        Ok(())
    }

    /// Drop every pooled operation and all reputation
    pub fn clear_state(&self) {
        self.validator.pool().clear();
        self.validator.reputation().clear();
        info!("Cleared pool and reputation state");
    }

    /// Run one submission cycle now and wait for its outcome
    pub async fn send_bundle_now(&self) -> anyhow::Result<SendBundleResult> {
        self.submission.send_bundle_now().await
    }

    fn check_entry_point(&self, entry_point: Address) -> MempoolResult<()> {
        if entry_point != self.chain_spec.entry_point_address {
            return Err(MempoolError::UnknownEntryPoint(entry_point));
        }
        Ok(())
    }
}
