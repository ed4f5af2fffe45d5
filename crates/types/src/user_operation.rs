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

use alloy_primitives::{keccak256, Address, Bytes, B256, U256};
use alloy_sol_types::SolValue;
use courier_contracts::v0_6::{
    UserOperation as ContractUserOperation, UserOperationHashEncoded, UserOperationPackedForHash,
};

use crate::{chain::ChainSpec, Entity};

/// Number of low bits of the nonce holding the per-key sequence number
const NONCE_SEQUENCE_BITS: usize = 64;

const ADDRESS_LEN: usize = 20;

/// Unique identifier for a user operation from a given sender
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct UserOperationId {
    /// sender of the user operation
    pub sender: Address,
    /// full nonce, key and sequence
    pub nonce: U256,
}

/// A signed v0.6 user operation
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct UserOperation {
    /// Sender (required)
    pub sender: Address,
    /// Semi-abstracted nonce, upper 192 bits are the key and lower 64 the sequence
    pub nonce: U256,
    /// Factory address followed by its calldata, empty if the account exists
    pub init_code: Bytes,
    /// Call data
    pub call_data: Bytes,
    /// Call gas limit
    pub call_gas_limit: u128,
    /// Verification gas limit
    pub verification_gas_limit: u128,
    /// Pre verification gas
    pub pre_verification_gas: u128,
    /// Max fee per gas
    pub max_fee_per_gas: u128,
    /// Max priority fee per gas
    pub max_priority_fee_per_gas: u128,
    /// Paymaster address followed by its data, empty if self sponsored
    pub paymaster_and_data: Bytes,
    /// Signature
    pub signature: Bytes,
}

impl UserOperation {
    /// Hash of the operation as computed by the entry point's `getUserOpHash`.
    ///
    /// The signature is not part of the hash.
    pub fn hash(&self, entry_point: Address, chain_id: u64) -> B256 {
        let packed = UserOperationPackedForHash {
            sender: self.sender,
            nonce: self.nonce,
            hashInitCode: keccak256(&self.init_code),
            hashCallData: keccak256(&self.call_data),
            callGasLimit: U256::from(self.call_gas_limit),
            verificationGasLimit: U256::from(self.verification_gas_limit),
            preVerificationGas: U256::from(self.pre_verification_gas),
            maxFeePerGas: U256::from(self.max_fee_per_gas),
            maxPriorityFeePerGas: U256::from(self.max_priority_fee_per_gas),
            hashPaymasterAndData: keccak256(&self.paymaster_and_data),
        };

        keccak256(
            UserOperationHashEncoded {
                encodedHash: keccak256(packed.abi_encode()),
                entryPoint: entry_point,
                chainId: U256::from(chain_id),
            }
            .abi_encode(),
        )
    }

    /// The `(sender, nonce)` pair
    pub fn id(&self) -> UserOperationId {
        UserOperationId {
            sender: self.sender,
            nonce: self.nonce,
        }
    }

    /// The nonce key, the upper 192 bits of the nonce
    pub fn nonce_key(&self) -> U256 {
        self.nonce >> NONCE_SEQUENCE_BITS
    }

    /// Paymaster address, if one is set
    pub fn paymaster(&self) -> Option<Address> {
        address_prefix(&self.paymaster_and_data)
    }

    /// Factory address, if the operation deploys its account
    pub fn factory(&self) -> Option<Address> {
        address_prefix(&self.init_code)
    }

    /// Sum of the three gas limits
    pub fn total_gas(&self) -> u128 {
        self.call_gas_limit
            .saturating_add(self.verification_gas_limit)
            .saturating_add(self.pre_verification_gas)
    }

    /// The most the operation can be charged.
    ///
    /// With a paymaster the verification limit also covers `postOp`, which
    /// can run twice, hence the multiplier.
    pub fn max_gas_cost(&self) -> U256 {
        let mul = if self.paymaster().is_some() { 3 } else { 1 };
        U256::from(self.max_fee_per_gas)
            * (U256::from(self.pre_verification_gas)
                + U256::from(self.call_gas_limit)
                + U256::from(self.verification_gas_limit) * U256::from(mul))
    }

    /// Sender, then paymaster and factory when present
    pub fn entities(&self) -> Vec<Entity> {
        let mut entities = vec![Entity::account(self.sender)];
        if let Some(paymaster) = self.paymaster() {
            entities.push(Entity::paymaster(paymaster));
        }
        if let Some(factory) = self.factory() {
            entities.push(Entity::factory(factory));
        }
        entities
    }

    /// Pre verification gas that can be derived from the operation alone:
    /// calldata cost of its ABI encoding plus the per-operation overhead.
    ///
    /// `include_fixed_gas_overhead` adds the transaction intrinsic gas, used when
    /// estimating for an operation that may be alone in its bundle.
    pub fn calc_static_pre_verification_gas(
        &self,
        chain_spec: &ChainSpec,
        include_fixed_gas_overhead: bool,
    ) -> u128 {
        let encoded = ContractUserOperation::from(self.clone()).abi_encode();
        let words = encoded.len().div_ceil(32) as u128;
        let calldata_cost: u128 = encoded
            .iter()
            .map(|&b| {
                if b == 0 {
                    chain_spec.calldata_zero_byte_gas
                } else {
                    chain_spec.calldata_non_zero_byte_gas
                }
            })
            .sum();

        let deploy_overhead = if self.factory().is_some() {
            chain_spec.per_user_op_deploy_overhead_gas
        } else {
            0
        };
        let fixed = if include_fixed_gas_overhead {
            chain_spec.transaction_intrinsic_gas
        } else {
            0
        };

        calldata_cost
            + chain_spec.per_user_op_word_gas * words
            + chain_spec.per_user_op_gas
            + deploy_overhead
            + fixed
    }
}

impl From<UserOperation> for ContractUserOperation {
    fn from(op: UserOperation) -> Self {
        ContractUserOperation {
            sender: op.sender,
            nonce: op.nonce,
            initCode: op.init_code,
            callData: op.call_data,
            callGasLimit: U256::from(op.call_gas_limit),
            verificationGasLimit: U256::from(op.verification_gas_limit),
            preVerificationGas: U256::from(op.pre_verification_gas),
            maxFeePerGas: U256::from(op.max_fee_per_gas),
            maxPriorityFeePerGas: U256::from(op.max_priority_fee_per_gas),
            paymasterAndData: op.paymaster_and_data,
            signature: op.signature,
        }
    }
}

/// A user operation submitted for gas estimation, gas fields may be missing
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct UserOperationOptionalGas {
    /// Sender
    pub sender: Address,
    /// Nonce
    pub nonce: U256,
    /// Init code
    pub init_code: Bytes,
    /// Call data
    pub call_data: Bytes,
    /// Call gas limit, maximum if unset
    pub call_gas_limit: Option<u128>,
    /// Verification gas limit, maximum if unset
    pub verification_gas_limit: Option<u128>,
    /// Pre verification gas, ignored
    pub pre_verification_gas: Option<u128>,
    /// Max fee per gas, zero if unset so estimation never charges
    pub max_fee_per_gas: Option<u128>,
    /// Max priority fee per gas, zero if unset
    pub max_priority_fee_per_gas: Option<u128>,
    /// Paymaster and data, may be a dummy of the right length
    pub paymaster_and_data: Bytes,
    /// Signature, may be a dummy of the right length
    pub signature: Bytes,
}

impl UserOperationOptionalGas {
    /// Fill unset or zero gas limits with the given maxima.
    pub fn into_user_operation(self, max_call_gas: u128, max_verification_gas: u128) -> UserOperation {
        let cgl = default_if_none_or_zero(self.call_gas_limit, max_call_gas);
        let vgl = default_if_none_or_zero(self.verification_gas_limit, max_verification_gas);
        let pvg = default_if_none_or_zero(self.pre_verification_gas, max_call_gas);

        UserOperation {
            sender: self.sender,
            nonce: self.nonce,
            init_code: self.init_code,
            call_data: self.call_data,
            call_gas_limit: cgl,
            verification_gas_limit: vgl,
            pre_verification_gas: pvg,
            max_fee_per_gas: self.max_fee_per_gas.unwrap_or_default(),
            max_priority_fee_per_gas: self.max_priority_fee_per_gas.unwrap_or_default(),
            paymaster_and_data: self.paymaster_and_data,
            signature: self.signature,
        }
    }

    /// Like `into_user_operation`, but with every unknown numeric field and
    /// dummy byte field at its most expensive calldata encoding.
    pub fn max_fill(&self, max_call_gas: u128, max_verification_gas: u128) -> UserOperation {
        UserOperation {
            call_gas_limit: u128::MAX,
            verification_gas_limit: u128::MAX,
            pre_verification_gas: u128::MAX,
            max_fee_per_gas: u128::MAX,
            max_priority_fee_per_gas: u128::MAX,
            signature: vec![255_u8; self.signature.len()].into(),
            paymaster_and_data: max_fill_bytes(&self.paymaster_and_data),
            ..self
                .clone()
                .into_user_operation(max_call_gas, max_verification_gas)
        }
    }
}

// Keep the paymaster address so the estimate still reflects a sponsored op.
fn max_fill_bytes(b: &Bytes) -> Bytes {
    let mut out = b.to_vec();
    for byte in out.iter_mut().skip(ADDRESS_LEN) {
        *byte = 255;
    }
    out.into()
}

fn default_if_none_or_zero(v: Option<u128>, default: u128) -> u128 {
    v.filter(|v| *v != 0).unwrap_or(default)
}

fn address_prefix(data: &Bytes) -> Option<Address> {
    if data.len() < ADDRESS_LEN {
        None
    } else {
        Some(Address::from_slice(&data[..ADDRESS_LEN]))
    }
}

#[cfg(test)]
mod tests {
    use alloy_primitives::{address, b256, bytes};

    use super::*;

    // Expected hashes come from getUserOpHash() on an entry point deployed at
    // 0x66a15edcc3b50a663e72f1457ffd49b9ae284ddc on chain 1337.
    const ENTRY_POINT: Address = address!("66a15edcc3b50a663e72f1457ffd49b9ae284ddc");

    #[test]
    fn test_hash_zeroed() {
        let operation = UserOperation::default();
        assert_eq!(
            operation.hash(ENTRY_POINT, 1337),
            b256!("dca97c3b49558ab360659f6ead939773be8bf26631e61bb17045bb70dc983b2d")
        );
    }

    #[test]
    fn test_hash() {
        let operation = UserOperation {
            sender: address!("1306b01bc3e4ad202612d3843387e94737673f53"),
            nonce: U256::from(8942),
            init_code: bytes!("6942069420694206942069420694206942069420"),
            call_data: bytes!("0000000000000000000000000000000000000000080085"),
            call_gas_limit: 10000,
            verification_gas_limit: 100000,
            pre_verification_gas: 100,
            max_fee_per_gas: 99999,
            max_priority_fee_per_gas: 9999999,
            paymaster_and_data: bytes!(
                "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef"
            ),
            signature: bytes!("da0929f527cded8d0a1eaf2e8861d7f7e2d8160b7b13942f99dd367df4473a"),
        };
        assert_eq!(
            operation.hash(ENTRY_POINT, 1337),
            b256!("484add9e4d8c3172d11b5feb6a3cc712280e176d278027cfa02ee396eb28afa1")
        );
    }

    #[test]
    fn test_signature_not_hashed() {
        let a = UserOperation {
            signature: bytes!("01"),
            ..Default::default()
        };
        let b = UserOperation {
            signature: bytes!("02"),
            ..Default::default()
        };
        assert_eq!(a.hash(ENTRY_POINT, 1), b.hash(ENTRY_POINT, 1));
        assert_ne!(a.hash(ENTRY_POINT, 1), a.hash(ENTRY_POINT, 2));
    }

    #[test]
    fn test_entities_and_prefixes() {
        let op = UserOperation {
            sender: Address::repeat_byte(1),
            paymaster_and_data: bytes!("0123456789abcdef0123456789abcdef01234567ffff"),
            init_code: bytes!("0102"),
            ..Default::default()
        };
        assert_eq!(
            op.paymaster(),
            Some(address!("0123456789abcdef0123456789abcdef01234567"))
        );
        // too short to carry an address
        assert_eq!(op.factory(), None);
        assert_eq!(op.entities().len(), 2);
    }

    #[test]
    fn test_nonce_key() {
        let op = UserOperation {
            nonce: (U256::from(7) << 64) | U256::from(3),
            ..Default::default()
        };
        assert_eq!(op.nonce_key(), U256::from(7));
    }

    #[test]
    fn test_max_gas_cost_paymaster_multiplier() {
        let mut op = UserOperation {
            call_gas_limit: 10,
            verification_gas_limit: 100,
            pre_verification_gas: 1,
            max_fee_per_gas: 2,
            ..Default::default()
        };
        assert_eq!(op.max_gas_cost(), U256::from(2 * (1 + 10 + 100)));
        op.paymaster_and_data = Address::repeat_byte(9).to_vec().into();
        assert_eq!(op.max_gas_cost(), U256::from(2 * (1 + 10 + 300)));
        assert_eq!(op.total_gas(), 111);
    }

    #[test]
    fn test_static_pvg_grows_with_calldata() {
        let spec = ChainSpec::default();
        let small = UserOperation::default();
        let large = UserOperation {
            call_data: vec![1_u8; 100].into(),
            ..Default::default()
        };
        let small_pvg = small.calc_static_pre_verification_gas(&spec, false);
        assert!(small_pvg > spec.per_user_op_gas);
        assert!(large.calc_static_pre_verification_gas(&spec, false) > small_pvg);
        assert_eq!(
            small.calc_static_pre_verification_gas(&spec, true),
            small_pvg + spec.transaction_intrinsic_gas
        );
    }

    #[test]
    fn test_optional_gas_fill() {
        let op = UserOperationOptionalGas {
            call_gas_limit: Some(0),
            verification_gas_limit: Some(5),
            paymaster_and_data: Address::repeat_byte(3).to_vec().into(),
            signature: vec![0_u8; 65].into(),
            ..Default::default()
        };
        let filled = op.clone().into_user_operation(1000, 2000);
        assert_eq!(filled.call_gas_limit, 1000);
        assert_eq!(filled.verification_gas_limit, 5);
        assert_eq!(filled.max_fee_per_gas, 0);

        let maxed = op.max_fill(1000, 2000);
        assert_eq!(maxed.pre_verification_gas, u128::MAX);
        assert_eq!(maxed.signature.len(), 65);
        assert_eq!(maxed.paymaster(), Some(Address::repeat_byte(3)));
    }
}
