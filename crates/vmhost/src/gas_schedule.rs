//! Gas prices for host operations.
//!
//! The schedule is immutable during a run and replaced between runs through
//! `VmHost::gas_schedule_change`.

use serde::{Deserialize, Serialize};

/// Full gas schedule, grouped the way it is stored on disk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GasSchedule {
    pub base_operation_cost: BaseOperationCost,
    pub base_ops_api_cost: BaseOpsApiCost,
    pub big_int_api_cost: BigIntApiCost,
}

impl GasSchedule {
    /// Schedule where every price equals `n`; handy for gas accounting tests.
    pub fn uniform(n: u64) -> Self {
        Self {
            base_operation_cost: BaseOperationCost {
                store_per_byte: n,
                release_per_byte: n,
                data_copy_per_byte: n,
                persist_per_byte: n,
                compile_per_byte: n,
                aot_prepare_per_byte: n,
            },
            base_ops_api_cost: BaseOpsApiCost {
                get_sc_address: n,
                get_owner_address: n,
                get_caller: n,
                get_call_value: n,
                get_num_arguments: n,
                get_argument: n,
                storage_store: n,
                storage_load: n,
                finish: n,
                signal_error: n,
                get_gas_left: n,
                get_block_info: n,
                transfer_value: n,
                async_call_step: n,
                async_callback_gas_lock: n,
                create_contract: n,
                get_code: n,
                execute_on_dest_context: n,
                execute_on_same_context: n,
                log: n,
                int64_get_argument: n,
                int64_finish: n,
                int64_storage_store: n,
                int64_storage_load: n,
            },
            big_int_api_cost: BigIntApiCost {
                big_int_new: n,
                big_int_add: n,
                big_int_sub: n,
                big_int_mul: n,
                big_int_cmp: n,
                big_int_get_unsigned_argument: n,
                big_int_finish_unsigned: n,
                big_int_get_call_value: n,
                big_int_storage_store_unsigned: n,
                big_int_storage_load_unsigned: n,
            },
        }
    }

    /// Parse a schedule from TOML text.
    pub fn from_toml(contents: &str) -> Result<Self, crate::VmHostError> {
        toml::from_str(contents).map_err(|e| crate::VmHostError::Config(e.to_string()))
    }
}

/// Per-byte costs of data movement and compilation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BaseOperationCost {
    pub store_per_byte: u64,       // 10,000
    pub release_per_byte: u64,     // 1,000
    pub data_copy_per_byte: u64,   // 50
    pub persist_per_byte: u64,     // 1,000
    pub compile_per_byte: u64,     // 300
    pub aot_prepare_per_byte: u64, // 100
}

impl Default for BaseOperationCost {
    fn default() -> Self {
        Self {
            store_per_byte: 10_000,
            release_per_byte: 1_000,
            data_copy_per_byte: 50,
            persist_per_byte: 1_000,
            compile_per_byte: 300,
            aot_prepare_per_byte: 100,
        }
    }
}

/// Base cost of each host API call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BaseOpsApiCost {
    // Context
    pub get_sc_address: u64,    // 100
    pub get_owner_address: u64, // 5,000
    pub get_caller: u64,        // 100
    pub get_call_value: u64,    // 100
    pub get_num_arguments: u64, // 100
    pub get_argument: u64,      // 100

    // Storage
    pub storage_store: u64, // 75,000
    pub storage_load: u64,  // 50,000

    // Output
    pub finish: u64,       // 1
    pub signal_error: u64, // 1
    pub get_gas_left: u64, // 100
    pub get_block_info: u64, // 100
    pub log: u64,          // 3,750

    // Calls
    pub transfer_value: u64,          // 150,000
    pub async_call_step: u64,         // 100,000
    pub async_callback_gas_lock: u64, // 4,000,000
    pub create_contract: u64,         // 300,000
    pub get_code: u64,                // 1,000
    pub execute_on_dest_context: u64, // 100,000
    pub execute_on_same_context: u64, // 100,000

    // Small integers
    pub int64_get_argument: u64,  // 1,000
    pub int64_finish: u64,        // 1,000
    pub int64_storage_store: u64, // 75,000
    pub int64_storage_load: u64,  // 50,000
}

impl Default for BaseOpsApiCost {
    fn default() -> Self {
        Self {
            get_sc_address: 100,
            get_owner_address: 5_000,
            get_caller: 100,
            get_call_value: 100,
            get_num_arguments: 100,
            get_argument: 100,

            storage_store: 75_000,
            storage_load: 50_000,

            finish: 1,
            signal_error: 1,
            get_gas_left: 100,
            get_block_info: 100,
            log: 3_750,

            transfer_value: 150_000,
            async_call_step: 100_000,
            async_callback_gas_lock: 4_000_000,
            create_contract: 300_000,
            get_code: 1_000,
            execute_on_dest_context: 100_000,
            execute_on_same_context: 100_000,

            int64_get_argument: 1_000,
            int64_finish: 1_000,
            int64_storage_store: 75_000,
            int64_storage_load: 50_000,
        }
    }
}

/// Costs of the big integer API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BigIntApiCost {
    pub big_int_new: u64,                    // 2,000
    pub big_int_add: u64,                    // 2,000
    pub big_int_sub: u64,                    // 2,000
    pub big_int_mul: u64,                    // 6,000
    pub big_int_cmp: u64,                    // 2,000
    pub big_int_get_unsigned_argument: u64,  // 1,000
    pub big_int_finish_unsigned: u64,        // 1,000
    pub big_int_get_call_value: u64,         // 1,000
    pub big_int_storage_store_unsigned: u64, // 75,000
    pub big_int_storage_load_unsigned: u64,  // 50,000
}

impl Default for BigIntApiCost {
    fn default() -> Self {
        Self {
            big_int_new: 2_000,
            big_int_add: 2_000,
            big_int_sub: 2_000,
            big_int_mul: 6_000,
            big_int_cmp: 2_000,
            big_int_get_unsigned_argument: 1_000,
            big_int_finish_unsigned: 1_000,
            big_int_get_call_value: 1_000,
            big_int_storage_store_unsigned: 75_000,
            big_int_storage_load_unsigned: 50_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_schedule() {
        let schedule = GasSchedule::uniform(1);
        assert_eq!(schedule.base_operation_cost.store_per_byte, 1);
        assert_eq!(schedule.base_ops_api_cost.async_callback_gas_lock, 1);
        assert_eq!(schedule.big_int_api_cost.big_int_mul, 1);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let schedule = GasSchedule::from_toml(
            r#"
            [base_ops_api_cost]
            async_call_step = 7
            "#,
        )
        .unwrap();
        assert_eq!(schedule.base_ops_api_cost.async_call_step, 7);
        assert_eq!(schedule.base_ops_api_cost.storage_store, 75_000);
        assert_eq!(schedule.base_operation_cost, BaseOperationCost::default());
    }

    #[test]
    fn test_schedule_toml_roundtrip() {
        let schedule = GasSchedule::uniform(3);
        let text = toml::to_string(&schedule).unwrap();
        assert_eq!(GasSchedule::from_toml(&text).unwrap(), schedule);
    }
}
