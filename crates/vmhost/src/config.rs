//! Host configuration.
//!
//! Handles loading and validation of the execution host settings from TOML
//! files. Every switch that changes execution semantics lives here so that
//! a run is fully described by its config, gas schedule and input.

use crate::error::VmHostError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Execution host configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// VM type tag passed to the world when deriving contract addresses
    pub vm_type: Vec<u8>,
    /// Block gas limit reported to contracts
    pub block_gas_limit: u64,
    /// Storage keys with this prefix are reserved for the protocol
    pub protected_key_prefix: String,
    /// Maximum number of live instances on the call stack
    pub max_instances: usize,
    /// Keep the last started instance alive between calls
    pub warm_instance: bool,
    /// Load instances from the compiled-code cache
    pub aot_compile: bool,
    /// Lock callback gas only for contracts exporting `callBack`
    pub dynamic_gas_locking: bool,
    /// Token functions may be imported by contracts
    pub dcdt_functions_enabled: bool,
    /// Gas reconciliation checks
    pub vmv2_enabled: bool,
    /// Callback value forwarding
    pub vmv3_enabled: bool,
    /// Feature switches
    pub features: FeatureFlags,
    /// Which host API groups fail the execution on error
    pub fault_policy: FaultPolicy,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            vm_type: vec![5, 0],
            block_gas_limit: 10_000_000_000,
            protected_key_prefix: "DHARITRI".to_string(),
            max_instances: 10,
            warm_instance: false,
            aot_compile: true,
            dynamic_gas_locking: true,
            dcdt_functions_enabled: true,
            vmv2_enabled: true,
            vmv3_enabled: true,
            features: FeatureFlags::default(),
            fault_policy: FaultPolicy::default(),
        }
    }
}

impl HostConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, VmHostError> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            VmHostError::Config(format!("failed to read '{}': {}", path.display(), e))
        })?;
        Self::from_toml(&contents)
    }

    /// Parse configuration from TOML text.
    pub fn from_toml(contents: &str) -> Result<Self, VmHostError> {
        let config: HostConfig =
            toml::from_str(contents).map_err(|e| VmHostError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Render configuration as TOML.
    pub fn to_toml(&self) -> Result<String, VmHostError> {
        toml::to_string_pretty(self).map_err(|e| VmHostError::Config(e.to_string()))
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), VmHostError> {
        if self.max_instances == 0 {
            return Err(VmHostError::Config("max_instances cannot be 0".into()));
        }
        if self.protected_key_prefix.is_empty() {
            return Err(VmHostError::Config(
                "protected_key_prefix cannot be empty".into(),
            ));
        }
        if self.block_gas_limit == 0 {
            return Err(VmHostError::Config("block_gas_limit cannot be 0".into()));
        }
        Ok(())
    }
}

/// Protocol feature switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureFlags {
    /// Contracts may be deployed
    pub sc_deploy: bool,
    /// Protocol built-in functions are dispatched
    pub builtin_functions: bool,
    /// Failed callbacks are reported in the caller's output
    pub repair_callback: bool,
    /// Initial deduction includes the ahead-of-time preparation cost
    pub aot_gas_usage: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            sc_deploy: true,
            builtin_functions: true,
            repair_callback: true,
            aot_gas_usage: true,
        }
    }
}

/// Whether errors in a group of host APIs abort the running contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FaultPolicy {
    pub base_ops: bool,
    pub big_int_ops: bool,
    pub sync_exec: bool,
}

impl Default for FaultPolicy {
    fn default() -> Self {
        Self {
            base_ops: true,
            big_int_ops: true,
            sync_exec: true,
        }
    }
}
