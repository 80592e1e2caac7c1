//! Host API imports for wasmtime.
//!
//! Each import reads its operands out of the contract's linear memory,
//! calls the matching function in `vmhooks` and writes results back.
//! Memory faults are reported through the same fault policy as every other
//! host API failure.

use super::HostEnv;
use crate::error::VmHostError;
use crate::host::VmHost;
use crate::instance::{self, HookResult, LinearMemory};
use crate::vmhooks::{self, FaultGroup};
use num_bigint::{BigInt, Sign};
use vmhost_types::Address;
use wasmtime::{Caller, Linker, Memory};

/// Module name under which the host API is imported.
pub(crate) const IMPORT_MODULE: &str = "env";

/// Byte width of values and balances in memory, big-endian unsigned.
const BALANCE_LEN: usize = 32;

/// Byte width of code metadata passed to contract deployment.
const CODE_METADATA_LEN: i32 = 2;

/// Byte width of a log topic.
const TOPIC_LEN: usize = 32;

/// Unwrap a guest memory access or apply the fault policy.
macro_rules! guest_try {
    ($host:expr, $access:expr, $fallback:expr) => {
        guest_try!($host, $access, $fallback, FaultGroup::BaseOps)
    };
    ($host:expr, $access:expr, $fallback:expr, $group:expr) => {
        match $access {
            Ok(value) => value,
            Err(err) => return vmhooks::with_fault($host, err, $group, $fallback),
        }
    };
}

/// Linear memory of the calling instance, reached through its store.
struct GuestMemory<'a, 'c> {
    caller: &'a mut Caller<'c, HostEnv>,
    memory: Memory,
}

impl LinearMemory for GuestMemory<'_, '_> {
    fn length(&self) -> u32 {
        u32::try_from(self.memory.data_size(&*self.caller)).unwrap_or(u32::MAX)
    }

    fn data(&self) -> &[u8] {
        self.memory.data(&*self.caller)
    }

    fn data_mut(&mut self) -> &mut [u8] {
        self.memory.data_mut(&mut *self.caller)
    }

    fn grow(&mut self, pages: u32) -> Result<(), VmHostError> {
        self.memory
            .grow(&mut *self.caller, u64::from(pages))
            .map(|_| ())
            .map_err(|_| VmHostError::BadUpperBounds)
    }
}

/// Operand access for one host function call.
struct Guest<'a, 'c> {
    caller: &'a mut Caller<'c, HostEnv>,
}

impl<'c> Guest<'_, 'c> {
    fn memory(&mut self) -> Result<GuestMemory<'_, 'c>, VmHostError> {
        let memory = self
            .caller
            .data()
            .memory
            .ok_or(VmHostError::MemoryDeclarationMissing)?;
        Ok(GuestMemory {
            caller: &mut *self.caller,
            memory,
        })
    }

    fn read(&mut self, offset: i32, length: i32) -> Result<Vec<u8>, VmHostError> {
        if length == 0 {
            return Ok(Vec::new());
        }
        instance::mem_load(&self.memory()?, offset, length)
    }

    fn write(&mut self, offset: i32, bytes: &[u8]) -> Result<(), VmHostError> {
        if bytes.is_empty() {
            return Ok(());
        }
        instance::mem_store(&mut self.memory()?, offset, bytes)
    }

    fn read_string(&mut self, offset: i32, length: i32) -> Result<String, VmHostError> {
        String::from_utf8(self.read(offset, length)?).map_err(|_| VmHostError::InvalidFunctionName)
    }

    fn read_address(&mut self, offset: i32) -> Result<Address, VmHostError> {
        let bytes = self.read(offset, Address::LEN as i32)?;
        Ok(Address::from_slice(&bytes)?)
    }

    fn read_value(&mut self, offset: i32) -> Result<BigInt, VmHostError> {
        let bytes = self.read(offset, BALANCE_LEN as i32)?;
        Ok(BigInt::from_bytes_be(Sign::Plus, &bytes))
    }

    /// Arguments laid out as `count` little-endian i32 lengths at
    /// `lengths_offset` and their bytes back to back at `data_offset`.
    fn read_arguments(
        &mut self,
        count: i32,
        lengths_offset: i32,
        data_offset: i32,
    ) -> Result<Vec<Vec<u8>>, VmHostError> {
        if count < 0 {
            return Err(VmHostError::NegativeLength);
        }
        if count == 0 {
            return Ok(Vec::new());
        }
        let lengths: Vec<i32> = self
            .read(lengths_offset, count.saturating_mul(4))?
            .chunks_exact(4)
            .map(|chunk| i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();
        instance::mem_load_multiple(&self.memory()?, data_offset, &lengths)
    }

    fn read_topics(&mut self, offset: i32, count: i32) -> Result<Vec<Vec<u8>>, VmHostError> {
        if count < 0 {
            return Err(VmHostError::NegativeLength);
        }
        let length = count
            .checked_mul(TOPIC_LEN as i32)
            .ok_or(VmHostError::BadUpperBounds)?;
        let bytes = self.read(offset, length)?;
        Ok(bytes.chunks_exact(TOPIC_LEN).map(<[u8]>::to_vec).collect())
    }
}

/// Left-pad an unsigned value to the balance width.
fn balance_bytes(value: &BigInt) -> Vec<u8> {
    let (_, bytes) = value.to_bytes_be();
    let bytes = if bytes == [0] { Vec::new() } else { bytes };
    if bytes.len() >= BALANCE_LEN {
        return bytes;
    }
    let mut padded = vec![0u8; BALANCE_LEN - bytes.len()];
    padded.extend_from_slice(&bytes);
    padded
}

fn len_i32(bytes: &[u8]) -> i32 {
    i32::try_from(bytes.len()).unwrap_or(i32::MAX)
}

/// Run one host function on behalf of the calling contract.
///
/// Fuel burned by the contract is charged before the body runs and the
/// store is refueled with whatever gas the body left. The host is taken
/// out of the store for the length of the body and put back afterwards.
fn call_hook<'c, R>(
    caller: &mut Caller<'c, HostEnv>,
    body: impl FnOnce(&mut VmHost, &mut Guest<'_, 'c>) -> HookResult<R>,
) -> wasmtime::Result<R> {
    let meter = caller.data().meter.clone();
    meter.absorb(caller.get_fuel()?);

    let mut host = caller
        .data_mut()
        .host
        .take()
        .ok_or_else(|| wasmtime::Error::msg("host function called outside an export call"))?;
    let result = body(&mut host, &mut Guest { caller: &mut *caller });
    caller.data_mut().host = Some(host);

    caller.set_fuel(meter.refuel())?;
    result.map_err(wasmtime::Error::new)
}

/// Register every host API function on the linker.
pub(crate) fn register(linker: &mut Linker<HostEnv>) -> Result<(), VmHostError> {
    register_context(linker)?;
    register_storage(linker)?;
    register_output(linker)?;
    register_block(linker)?;
    register_calls(linker)?;
    register_async(linker)?;
    register_small_int(linker)?;
    register_big_int(linker)?;
    Ok(())
}

fn register_context(linker: &mut Linker<HostEnv>) -> Result<(), VmHostError> {
    linker.func_wrap(
        IMPORT_MODULE,
        "getSCAddress",
        |mut caller: Caller<'_, HostEnv>, result_offset: i32| {
            call_hook(&mut caller, |host, guest| {
                let address = vmhooks::get_sc_address(host)?;
                guest_try!(host, guest.write(result_offset, address.as_bytes()), ());
                Ok(())
            })
        },
    )?;
    linker.func_wrap(
        IMPORT_MODULE,
        "getOwnerAddress",
        |mut caller: Caller<'_, HostEnv>, result_offset: i32| {
            call_hook(&mut caller, |host, guest| {
                let address = vmhooks::get_owner_address(host)?;
                guest_try!(host, guest.write(result_offset, address.as_bytes()), ());
                Ok(())
            })
        },
    )?;
    linker.func_wrap(
        IMPORT_MODULE,
        "getCaller",
        |mut caller: Caller<'_, HostEnv>, result_offset: i32| {
            call_hook(&mut caller, |host, guest| {
                let address = vmhooks::get_caller(host)?;
                guest_try!(host, guest.write(result_offset, address.as_bytes()), ());
                Ok(())
            })
        },
    )?;
    linker.func_wrap(
        IMPORT_MODULE,
        "getCallValue",
        |mut caller: Caller<'_, HostEnv>, result_offset: i32| {
            call_hook(&mut caller, |host, guest| {
                let value = balance_bytes(&vmhooks::get_call_value(host)?);
                guest_try!(host, guest.write(result_offset, &value), -1);
                Ok(len_i32(&value))
            })
        },
    )?;
    linker.func_wrap(
        IMPORT_MODULE,
        "getNumArguments",
        |mut caller: Caller<'_, HostEnv>| {
            call_hook(&mut caller, |host, _| vmhooks::get_num_arguments(host))
        },
    )?;
    linker.func_wrap(
        IMPORT_MODULE,
        "getArgumentLength",
        |mut caller: Caller<'_, HostEnv>, id: i32| {
            call_hook(&mut caller, |host, _| vmhooks::get_argument_length(host, id))
        },
    )?;
    linker.func_wrap(
        IMPORT_MODULE,
        "getArgument",
        |mut caller: Caller<'_, HostEnv>, id: i32, argument_offset: i32| {
            call_hook(&mut caller, |host, guest| {
                let Some(argument) = vmhooks::get_argument(host, id)? else {
                    return Ok(-1);
                };
                guest_try!(host, guest.write(argument_offset, &argument), -1);
                Ok(len_i32(&argument))
            })
        },
    )?;
    linker.func_wrap(
        IMPORT_MODULE,
        "getDCDTValue",
        |mut caller: Caller<'_, HostEnv>, result_offset: i32| {
            call_hook(&mut caller, |host, guest| {
                let value = balance_bytes(&vmhooks::get_dcdt_value(host)?);
                guest_try!(host, guest.write(result_offset, &value), -1);
                Ok(len_i32(&value))
            })
        },
    )?;
    linker.func_wrap(
        IMPORT_MODULE,
        "getDCDTTokenName",
        |mut caller: Caller<'_, HostEnv>, result_offset: i32| {
            call_hook(&mut caller, |host, guest| {
                let name = vmhooks::get_dcdt_token_name(host)?;
                guest_try!(host, guest.write(result_offset, &name), -1);
                Ok(len_i32(&name))
            })
        },
    )?;
    Ok(())
}

fn register_storage(linker: &mut Linker<HostEnv>) -> Result<(), VmHostError> {
    linker.func_wrap(
        IMPORT_MODULE,
        "storageStore",
        |mut caller: Caller<'_, HostEnv>,
         key_offset: i32,
         key_length: i32,
         data_offset: i32,
         data_length: i32| {
            call_hook(&mut caller, |host, guest| {
                let key = guest_try!(host, guest.read(key_offset, key_length), -1);
                let data = guest_try!(host, guest.read(data_offset, data_length), -1);
                vmhooks::storage_store(host, &key, &data)
            })
        },
    )?;
    linker.func_wrap(
        IMPORT_MODULE,
        "storageLoad",
        |mut caller: Caller<'_, HostEnv>, key_offset: i32, key_length: i32, data_offset: i32| {
            call_hook(&mut caller, |host, guest| {
                let key = guest_try!(host, guest.read(key_offset, key_length), -1);
                let data = vmhooks::storage_load(host, &key)?;
                guest_try!(host, guest.write(data_offset, &data), -1);
                Ok(len_i32(&data))
            })
        },
    )?;
    linker.func_wrap(
        IMPORT_MODULE,
        "storageLoadLength",
        |mut caller: Caller<'_, HostEnv>, key_offset: i32, key_length: i32| {
            call_hook(&mut caller, |host, guest| {
                let key = guest_try!(host, guest.read(key_offset, key_length), -1);
                vmhooks::storage_load_length(host, &key)
            })
        },
    )?;
    linker.func_wrap(
        IMPORT_MODULE,
        "storageLoadFromAddress",
        |mut caller: Caller<'_, HostEnv>,
         address_offset: i32,
         key_offset: i32,
         key_length: i32,
         data_offset: i32| {
            call_hook(&mut caller, |host, guest| {
                let address = guest_try!(host, guest.read_address(address_offset), -1);
                let key = guest_try!(host, guest.read(key_offset, key_length), -1);
                let data = vmhooks::storage_load_from_address(host, &address, &key)?;
                guest_try!(host, guest.write(data_offset, &data), -1);
                Ok(len_i32(&data))
            })
        },
    )?;
    Ok(())
}

fn register_output(linker: &mut Linker<HostEnv>) -> Result<(), VmHostError> {
    linker.func_wrap(
        IMPORT_MODULE,
        "finish",
        |mut caller: Caller<'_, HostEnv>, pointer: i32, length: i32| {
            call_hook(&mut caller, |host, guest| {
                let data = guest_try!(host, guest.read(pointer, length), ());
                vmhooks::finish(host, data)
            })
        },
    )?;
    linker.func_wrap(
        IMPORT_MODULE,
        "signalError",
        |mut caller: Caller<'_, HostEnv>, message_offset: i32, message_length: i32| {
            call_hook(&mut caller, |host, guest| {
                let message = guest_try!(host, guest.read(message_offset, message_length), ());
                vmhooks::signal_error(host, &message)
            })
        },
    )?;
    linker.func_wrap(
        IMPORT_MODULE,
        "writeLog",
        |mut caller: Caller<'_, HostEnv>,
         data_pointer: i32,
         data_length: i32,
         topic_pointer: i32,
         num_topics: i32| {
            call_hook(&mut caller, |host, guest| {
                let data = guest_try!(host, guest.read(data_pointer, data_length), ());
                let topics = guest_try!(host, guest.read_topics(topic_pointer, num_topics), ());
                vmhooks::write_log(host, topics, data)
            })
        },
    )?;
    linker.func_wrap(
        IMPORT_MODULE,
        "getGasLeft",
        |mut caller: Caller<'_, HostEnv>| {
            call_hook(&mut caller, |host, _| vmhooks::get_gas_left(host))
        },
    )?;
    Ok(())
}

fn register_block(linker: &mut Linker<HostEnv>) -> Result<(), VmHostError> {
    linker.func_wrap(
        IMPORT_MODULE,
        "getBlockNonce",
        |mut caller: Caller<'_, HostEnv>| {
            call_hook(&mut caller, |host, _| vmhooks::get_block_nonce(host))
        },
    )?;
    linker.func_wrap(
        IMPORT_MODULE,
        "getBlockTimestamp",
        |mut caller: Caller<'_, HostEnv>| {
            call_hook(&mut caller, |host, _| vmhooks::get_block_timestamp(host))
        },
    )?;
    linker.func_wrap(
        IMPORT_MODULE,
        "getBlockRound",
        |mut caller: Caller<'_, HostEnv>| {
            call_hook(&mut caller, |host, _| vmhooks::get_block_round(host))
        },
    )?;
    linker.func_wrap(
        IMPORT_MODULE,
        "getBlockEpoch",
        |mut caller: Caller<'_, HostEnv>| {
            call_hook(&mut caller, |host, _| vmhooks::get_block_epoch(host))
        },
    )?;
    Ok(())
}

fn register_calls(linker: &mut Linker<HostEnv>) -> Result<(), VmHostError> {
    linker.func_wrap(
        IMPORT_MODULE,
        "transferValue",
        |mut caller: Caller<'_, HostEnv>,
         dest_offset: i32,
         value_offset: i32,
         data_offset: i32,
         length: i32| {
            call_hook(&mut caller, |host, guest| {
                let destination = guest_try!(host, guest.read_address(dest_offset), 1);
                let value = guest_try!(host, guest.read_value(value_offset), 1);
                let data = guest_try!(host, guest.read(data_offset, length), 1);
                vmhooks::transfer_value(host, &destination, &value, data)
            })
        },
    )?;
    linker.func_wrap(
        IMPORT_MODULE,
        "transferDCDTExecute",
        |mut caller: Caller<'_, HostEnv>,
         dest_offset: i32,
         token_offset: i32,
         token_length: i32,
         value_offset: i32,
         gas_limit: i64,
         function_offset: i32,
         function_length: i32,
         num_arguments: i32,
         arguments_length_offset: i32,
         data_offset: i32| {
            call_hook(&mut caller, |host, guest| {
                let destination = guest_try!(host, guest.read_address(dest_offset), 1);
                let token = guest_try!(host, guest.read(token_offset, token_length), 1);
                let value = guest_try!(host, guest.read_value(value_offset), 1);
                let function =
                    guest_try!(host, guest.read_string(function_offset, function_length), 1);
                let arguments = guest_try!(
                    host,
                    guest.read_arguments(num_arguments, arguments_length_offset, data_offset),
                    1
                );
                vmhooks::transfer_dcdt_execute(
                    host,
                    &destination,
                    &token,
                    0,
                    &value,
                    gas_limit,
                    &function,
                    arguments,
                )
            })
        },
    )?;
    linker.func_wrap(
        IMPORT_MODULE,
        "transferDCDTNFTExecute",
        |mut caller: Caller<'_, HostEnv>,
         dest_offset: i32,
         token_offset: i32,
         token_length: i32,
         value_offset: i32,
         nonce: i64,
         gas_limit: i64,
         function_offset: i32,
         function_length: i32,
         num_arguments: i32,
         arguments_length_offset: i32,
         data_offset: i32| {
            call_hook(&mut caller, |host, guest| {
                let destination = guest_try!(host, guest.read_address(dest_offset), 1);
                let token = guest_try!(host, guest.read(token_offset, token_length), 1);
                let value = guest_try!(host, guest.read_value(value_offset), 1);
                let function =
                    guest_try!(host, guest.read_string(function_offset, function_length), 1);
                let arguments = guest_try!(
                    host,
                    guest.read_arguments(num_arguments, arguments_length_offset, data_offset),
                    1
                );
                vmhooks::transfer_dcdt_execute(
                    host,
                    &destination,
                    &token,
                    nonce as u64,
                    &value,
                    gas_limit,
                    &function,
                    arguments,
                )
            })
        },
    )?;
    linker.func_wrap(
        IMPORT_MODULE,
        "executeOnDestContext",
        |mut caller: Caller<'_, HostEnv>,
         gas_limit: i64,
         address_offset: i32,
         value_offset: i32,
         function_offset: i32,
         function_length: i32,
         num_arguments: i32,
         arguments_length_offset: i32,
         data_offset: i32| {
            call_hook(&mut caller, |host, guest| {
                let destination = guest_try!(host, guest.read_address(address_offset), 1);
                let value = guest_try!(host, guest.read_value(value_offset), 1);
                let function =
                    guest_try!(host, guest.read_string(function_offset, function_length), 1);
                let arguments = guest_try!(
                    host,
                    guest.read_arguments(num_arguments, arguments_length_offset, data_offset),
                    1
                );
                vmhooks::execute_on_dest_context(
                    host,
                    gas_limit,
                    &destination,
                    &value,
                    &function,
                    arguments,
                )
            })
        },
    )?;
    linker.func_wrap(
        IMPORT_MODULE,
        "executeOnSameContext",
        |mut caller: Caller<'_, HostEnv>,
         gas_limit: i64,
         address_offset: i32,
         value_offset: i32,
         function_offset: i32,
         function_length: i32,
         num_arguments: i32,
         arguments_length_offset: i32,
         data_offset: i32| {
            call_hook(&mut caller, |host, guest| {
                let destination = guest_try!(host, guest.read_address(address_offset), 1);
                let value = guest_try!(host, guest.read_value(value_offset), 1);
                let function =
                    guest_try!(host, guest.read_string(function_offset, function_length), 1);
                let arguments = guest_try!(
                    host,
                    guest.read_arguments(num_arguments, arguments_length_offset, data_offset),
                    1
                );
                vmhooks::execute_on_same_context(
                    host,
                    gas_limit,
                    &destination,
                    &value,
                    &function,
                    arguments,
                )
            })
        },
    )?;
    linker.func_wrap(
        IMPORT_MODULE,
        "createContract",
        |mut caller: Caller<'_, HostEnv>,
         gas_limit: i64,
         value_offset: i32,
         code_offset: i32,
         code_metadata_offset: i32,
         length: i32,
         result_offset: i32,
         num_arguments: i32,
         arguments_length_offset: i32,
         data_offset: i32| {
            call_hook(&mut caller, |host, guest| {
                let value = guest_try!(host, guest.read_value(value_offset), 1);
                let code = guest_try!(host, guest.read(code_offset, length), 1);
                let metadata =
                    guest_try!(host, guest.read(code_metadata_offset, CODE_METADATA_LEN), 1);
                let arguments = guest_try!(
                    host,
                    guest.read_arguments(num_arguments, arguments_length_offset, data_offset),
                    1
                );
                let Some(address) =
                    vmhooks::create_contract(host, gas_limit, &value, code, metadata, arguments)?
                else {
                    return Ok(1);
                };
                guest_try!(host, guest.write(result_offset, address.as_bytes()), 1);
                Ok(0)
            })
        },
    )?;
    linker.func_wrap(
        IMPORT_MODULE,
        "upgradeContract",
        |mut caller: Caller<'_, HostEnv>,
         dest_offset: i32,
         gas_limit: i64,
         value_offset: i32,
         code_offset: i32,
         code_metadata_offset: i32,
         length: i32,
         num_arguments: i32,
         arguments_length_offset: i32,
         data_offset: i32| {
            call_hook(&mut caller, |host, guest| {
                let destination = guest_try!(host, guest.read_address(dest_offset), ());
                let value = guest_try!(host, guest.read_value(value_offset), ());
                let code = guest_try!(host, guest.read(code_offset, length), ());
                let metadata =
                    guest_try!(host, guest.read(code_metadata_offset, CODE_METADATA_LEN), ());
                let arguments = guest_try!(
                    host,
                    guest.read_arguments(num_arguments, arguments_length_offset, data_offset),
                    ()
                );
                vmhooks::upgrade_contract(
                    host,
                    &destination,
                    gas_limit,
                    &value,
                    code,
                    metadata,
                    arguments,
                )?;
                Ok(())
            })
        },
    )?;
    Ok(())
}

fn register_async(linker: &mut Linker<HostEnv>) -> Result<(), VmHostError> {
    linker.func_wrap(
        IMPORT_MODULE,
        "asyncCall",
        |mut caller: Caller<'_, HostEnv>,
         dest_offset: i32,
         value_offset: i32,
         data_offset: i32,
         length: i32| {
            call_hook(&mut caller, |host, guest| {
                let destination = guest_try!(host, guest.read_address(dest_offset), ());
                let value = guest_try!(host, guest.read_value(value_offset), ());
                let data = guest_try!(host, guest.read(data_offset, length), ());
                vmhooks::async_call(host, &destination, &value, data)
            })
        },
    )?;
    linker.func_wrap(
        IMPORT_MODULE,
        "createAsyncCall",
        |mut caller: Caller<'_, HostEnv>,
         identifier_offset: i32,
         identifier_length: i32,
         dest_offset: i32,
         value_offset: i32,
         data_offset: i32,
         data_length: i32,
         success_offset: i32,
         success_length: i32,
         error_offset: i32,
         error_length: i32,
         gas: i64| {
            call_hook(&mut caller, |host, guest| {
                let identifier =
                    guest_try!(host, guest.read(identifier_offset, identifier_length), ());
                let destination = guest_try!(host, guest.read_address(dest_offset), ());
                let value = guest_try!(host, guest.read_value(value_offset), ());
                let data = guest_try!(host, guest.read(data_offset, data_length), ());
                let success_callback =
                    guest_try!(host, guest.read_string(success_offset, success_length), ());
                let error_callback =
                    guest_try!(host, guest.read_string(error_offset, error_length), ());
                vmhooks::create_async_call(
                    host,
                    &identifier,
                    &destination,
                    &value,
                    data,
                    &success_callback,
                    &error_callback,
                    gas,
                )
            })
        },
    )?;
    linker.func_wrap(
        IMPORT_MODULE,
        "setAsyncContextCallback",
        |mut caller: Caller<'_, HostEnv>,
         identifier_offset: i32,
         identifier_length: i32,
         callback_offset: i32,
         callback_length: i32| {
            call_hook(&mut caller, |host, guest| {
                let identifier =
                    guest_try!(host, guest.read(identifier_offset, identifier_length), -1);
                let callback =
                    guest_try!(host, guest.read_string(callback_offset, callback_length), -1);
                vmhooks::set_async_context_callback(host, &identifier, &callback)?;
                Ok(0)
            })
        },
    )?;
    Ok(())
}

fn register_small_int(linker: &mut Linker<HostEnv>) -> Result<(), VmHostError> {
    linker.func_wrap(
        IMPORT_MODULE,
        "int64getArgument",
        |mut caller: Caller<'_, HostEnv>, id: i32| {
            call_hook(&mut caller, |host, _| vmhooks::int64_get_argument(host, id))
        },
    )?;
    linker.func_wrap(
        IMPORT_MODULE,
        "int64finish",
        |mut caller: Caller<'_, HostEnv>, value: i64| {
            call_hook(&mut caller, |host, _| vmhooks::int64_finish(host, value))
        },
    )?;
    linker.func_wrap(
        IMPORT_MODULE,
        "int64storageStore",
        |mut caller: Caller<'_, HostEnv>, key_offset: i32, key_length: i32, value: i64| {
            call_hook(&mut caller, |host, guest| {
                let key = guest_try!(host, guest.read(key_offset, key_length), -1);
                vmhooks::int64_storage_store(host, &key, value)
            })
        },
    )?;
    linker.func_wrap(
        IMPORT_MODULE,
        "int64storageLoad",
        |mut caller: Caller<'_, HostEnv>, key_offset: i32, key_length: i32| {
            call_hook(&mut caller, |host, guest| {
                let key = guest_try!(host, guest.read(key_offset, key_length), 0);
                vmhooks::int64_storage_load(host, &key)
            })
        },
    )?;
    Ok(())
}

fn register_big_int(linker: &mut Linker<HostEnv>) -> Result<(), VmHostError> {
    linker.func_wrap(
        IMPORT_MODULE,
        "bigIntNew",
        |mut caller: Caller<'_, HostEnv>, small_value: i64| {
            call_hook(&mut caller, |host, _| vmhooks::big_int_new(host, small_value))
        },
    )?;
    linker.func_wrap(
        IMPORT_MODULE,
        "bigIntAdd",
        |mut caller: Caller<'_, HostEnv>, destination: i32, op1: i32, op2: i32| {
            call_hook(&mut caller, |host, _| {
                vmhooks::big_int_add(host, destination, op1, op2)
            })
        },
    )?;
    linker.func_wrap(
        IMPORT_MODULE,
        "bigIntSub",
        |mut caller: Caller<'_, HostEnv>, destination: i32, op1: i32, op2: i32| {
            call_hook(&mut caller, |host, _| {
                vmhooks::big_int_sub(host, destination, op1, op2)
            })
        },
    )?;
    linker.func_wrap(
        IMPORT_MODULE,
        "bigIntMul",
        |mut caller: Caller<'_, HostEnv>, destination: i32, op1: i32, op2: i32| {
            call_hook(&mut caller, |host, _| {
                vmhooks::big_int_mul(host, destination, op1, op2)
            })
        },
    )?;
    linker.func_wrap(
        IMPORT_MODULE,
        "bigIntCmp",
        |mut caller: Caller<'_, HostEnv>, op1: i32, op2: i32| {
            call_hook(&mut caller, |host, _| vmhooks::big_int_cmp(host, op1, op2))
        },
    )?;
    linker.func_wrap(
        IMPORT_MODULE,
        "bigIntGetUnsignedArgument",
        |mut caller: Caller<'_, HostEnv>, id: i32, destination: i32| {
            call_hook(&mut caller, |host, _| {
                vmhooks::big_int_get_unsigned_argument(host, id, destination)
            })
        },
    )?;
    linker.func_wrap(
        IMPORT_MODULE,
        "bigIntFinishUnsigned",
        |mut caller: Caller<'_, HostEnv>, reference: i32| {
            call_hook(&mut caller, |host, _| {
                vmhooks::big_int_finish_unsigned(host, reference)
            })
        },
    )?;
    linker.func_wrap(
        IMPORT_MODULE,
        "bigIntGetCallValue",
        |mut caller: Caller<'_, HostEnv>, destination: i32| {
            call_hook(&mut caller, |host, _| {
                vmhooks::big_int_get_call_value(host, destination)
            })
        },
    )?;
    linker.func_wrap(
        IMPORT_MODULE,
        "bigIntStorageStoreUnsigned",
        |mut caller: Caller<'_, HostEnv>, key_offset: i32, key_length: i32, source: i32| {
            call_hook(&mut caller, |host, guest| {
                let key = guest_try!(
                    host,
                    guest.read(key_offset, key_length),
                    -1,
                    FaultGroup::BigIntOps
                );
                vmhooks::big_int_storage_store_unsigned(host, &key, source)
            })
        },
    )?;
    linker.func_wrap(
        IMPORT_MODULE,
        "bigIntStorageLoadUnsigned",
        |mut caller: Caller<'_, HostEnv>, key_offset: i32, key_length: i32, destination: i32| {
            call_hook(&mut caller, |host, guest| {
                let key = guest_try!(
                    host,
                    guest.read(key_offset, key_length),
                    -1,
                    FaultGroup::BigIntOps
                );
                vmhooks::big_int_storage_load_unsigned(host, &key, destination)
            })
        },
    )?;
    Ok(())
}
