use thiserror::Error;
use vmhost_types::{ReturnCode, TypesError};

/// Errors raised while executing contracts.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum VmHostError {
    #[error("return code is not ok")]
    ReturnCodeNotOk,

    #[error("operation not permitted in read only mode")]
    InvalidCallOnReadOnlyMode,

    #[error("not enough gas")]
    NotEnoughGas,

    #[error("unhandled runtime breakpoint")]
    UnhandledRuntimeBreakpoint,

    #[error("error signalled by smartcontract")]
    SignalError,

    #[error("execution failed")]
    ExecutionFailed,

    #[error("bad bounds")]
    BadBounds,

    #[error("bad bounds (lower)")]
    BadLowerBounds,

    #[error("bad bounds (upper)")]
    BadUpperBounds,

    #[error("negative length")]
    NegativeLength,

    #[error("failed transfer")]
    FailedTransfer,

    #[error("failed transfer (insufficient funds)")]
    TransferInsufficientFunds,

    #[error("failed transfer (negative value)")]
    TransferNegativeValue,

    #[error("upgrade failed")]
    UpgradeFailed,

    #[error("upgrade failed (invalid arguments)")]
    InvalidUpgradeArguments,

    #[error("invalid function (calling init() directly is forbidden)")]
    InitFuncCalledInRun,

    #[error("invalid function (calling callBack() directly is forbidden)")]
    CallBackFuncCalledInRun,

    #[error("invalid function (unexpected callback was received)")]
    CallBackFuncNotExpected,

    #[error("invalid function (not found)")]
    FuncNotFound,

    #[error("invalid function (invalid name)")]
    InvalidFunctionName,

    #[error("invalid function (nonvoid signature)")]
    FunctionNonvoidSignature,

    #[error("invalid contract code")]
    ContractInvalid,

    #[error("invalid contract code (not found)")]
    ContractNotFound,

    #[error("invalid contract code (missing memory declaration)")]
    MemoryDeclarationMissing,

    #[error("execution failed (max instances reached)")]
    MaxInstancesReached,

    #[error("cannot write to storage under reserved key")]
    StoreReservedKey,

    #[error("cannot write to protected key")]
    CannotWriteProtectedKey,

    #[error("function does not accept payment")]
    NonPayableFunction,

    #[error("argument index out of range")]
    ArgIndexOutOfRange,

    #[error("argument out of range")]
    ArgOutOfRange,

    #[error("storage value out of range")]
    StorageValueOutOfRange,

    #[error("division by 0")]
    DivZero,

    #[error("async context does not exist")]
    AsyncContextDoesNotExist,

    #[error("account does not exist")]
    InvalidAccount,

    #[error("contract deployment is disabled")]
    DeploymentDisabled,

    #[error("cannot deploy over existing account")]
    DeploymentOverExistingAccount,

    #[error("sending value to non payable contract")]
    AccountNotPayable,

    #[error("nil callback function")]
    NilCallbackFunction,

    #[error("upgrade not allowed")]
    UpgradeNotAllowed,

    #[error("nil contract")]
    NilContract,

    #[error("calling built-in function on the same context is disallowed")]
    BuiltinCallOnSameContextDisallowed,

    #[error("sync execution request is not in the same shard")]
    SyncExecutionNotInSameShard,

    #[error("input and output gas does not match")]
    InputOutputGasMismatch,

    #[error("transfer value on dcdt call")]
    TransferValueOnDcdtCall,

    #[error("invalid call data: {0}")]
    InvalidCallData(String),

    #[error("wasm error: {0}")]
    Wasm(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("{0}")]
    Types(String),

    #[error("built-in function failed: {0}")]
    BuiltinFunction(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl VmHostError {
    /// Return code reported in a VMOutput built from this error.
    pub fn return_code(&self) -> ReturnCode {
        match self {
            VmHostError::SignalError
            | VmHostError::InitFuncCalledInRun
            | VmHostError::CallBackFuncCalledInRun
            | VmHostError::CallBackFuncNotExpected
            | VmHostError::InvalidFunctionName => ReturnCode::UserError,
            VmHostError::FuncNotFound => ReturnCode::FunctionNotFound,
            VmHostError::FunctionNonvoidSignature => ReturnCode::FunctionWrongSignature,
            VmHostError::NotEnoughGas => ReturnCode::OutOfGas,
            VmHostError::ContractNotFound => ReturnCode::ContractNotFound,
            VmHostError::ContractInvalid | VmHostError::MemoryDeclarationMissing => {
                ReturnCode::ContractInvalid
            }
            VmHostError::UpgradeFailed
            | VmHostError::InvalidUpgradeArguments
            | VmHostError::UpgradeNotAllowed => ReturnCode::UpgradeFailed,
            VmHostError::TransferInsufficientFunds => ReturnCode::OutOfFunds,
            _ => ReturnCode::ExecutionFailed,
        }
    }

    /// Errors that break a protocol invariant rather than a contract rule.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            VmHostError::InputOutputGasMismatch | VmHostError::UnhandledRuntimeBreakpoint
        )
    }
}

impl From<wasmtime::Error> for VmHostError {
    fn from(e: wasmtime::Error) -> Self {
        VmHostError::Wasm(e.to_string())
    }
}

impl From<serde_json::Error> for VmHostError {
    fn from(e: serde_json::Error) -> Self {
        VmHostError::Serialization(e.to_string())
    }
}

impl From<TypesError> for VmHostError {
    fn from(e: TypesError) -> Self {
        VmHostError::Types(e.to_string())
    }
}
