//! Checks applied to freshly deployed contract code.

use crate::error::VmHostError;
use crate::instance::Instance;
use crate::MAX_FUNCTION_NAME_LEN;
use std::collections::BTreeSet;
use tracing::trace;

/// Token-function imports refused when token functions are disabled.
pub const DCDT_IMPORTS: &[&str] = &[
    "transferDCDTExecute",
    "transferDCDTNFTExecute",
    "transferValueExecute",
    "getDCDTBalance",
    "getDCDTTokenData",
    "getDCDTTokenType",
    "getDCDTTokenNonce",
    "getCurrentDCDTNFTNonce",
    "getDCDTNFTNameLength",
    "getDCDTNFTAttributeLength",
    "getDCDTNFTURILength",
    "bigIntGetDCDTExternalBalance",
];

/// Validator holding the names a contract may not export.
#[derive(Debug, Clone, Default)]
pub struct WasmValidator {
    reserved: BTreeSet<String>,
}

impl WasmValidator {
    pub fn new<I, S>(api_names: &[&str], builtin_names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut reserved: BTreeSet<String> = api_names.iter().map(|n| n.to_string()).collect();
        reserved.extend(builtin_names.into_iter().map(Into::into));
        Self { reserved }
    }

    pub fn is_reserved(&self, name: &str) -> bool {
        self.reserved.contains(name)
    }

    pub fn verify_contract_code(
        &self,
        instance: &dyn Instance,
        dcdt_functions_enabled: bool,
    ) -> Result<(), VmHostError> {
        verify_memory_declaration(instance)?;
        self.verify_functions(instance)?;
        if !dcdt_functions_enabled {
            verify_no_dcdt_imports(instance)?;
        }
        trace!("verified contract code");
        Ok(())
    }

    fn verify_functions(&self, instance: &dyn Instance) -> Result<(), VmHostError> {
        for name in instance.exported_functions() {
            verify_function_name(&name)?;
            if self.is_reserved(&name) {
                trace!(function = %name, "exported function uses a reserved name");
                return Err(VmHostError::InvalidFunctionName);
            }
            if !instance.has_void_signature(&name) {
                return Err(VmHostError::FunctionNonvoidSignature);
            }
        }
        Ok(())
    }
}

fn verify_memory_declaration(instance: &dyn Instance) -> Result<(), VmHostError> {
    if !instance.has_memory() {
        return Err(VmHostError::MemoryDeclarationMissing);
    }
    Ok(())
}

fn verify_function_name(name: &str) -> Result<(), VmHostError> {
    let valid = !name.is_empty()
        && name.len() <= MAX_FUNCTION_NAME_LEN
        && name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_');
    if valid {
        Ok(())
    } else {
        Err(VmHostError::InvalidFunctionName)
    }
}

fn verify_no_dcdt_imports(instance: &dyn Instance) -> Result<(), VmHostError> {
    if DCDT_IMPORTS
        .iter()
        .any(|name| instance.is_function_imported(name))
    {
        return Err(VmHostError::ContractInvalid);
    }
    Ok(())
}
