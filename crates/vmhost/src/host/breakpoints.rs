use super::VmHost;
use crate::error::VmHostError;
use crate::instance::{BreakpointValue, InstanceTrap};
use tracing::trace;

impl VmHost {
    /// Turn the end of an export call into the host's verdict on it.
    pub(super) fn handle_breakpoint_if_any(
        &mut self,
        result: Result<(), InstanceTrap>,
    ) -> Result<(), VmHostError> {
        let value = match result {
            Ok(()) => return Ok(()),
            Err(InstanceTrap::Breakpoint(value)) => value,
            Err(InstanceTrap::Trap(message)) => {
                let value = self.runtime.breakpoint_value();
                if value.is_none() {
                    trace!(error = %message, "instance execution error");
                    return Err(VmHostError::ExecutionFailed);
                }
                value
            }
        };

        let result = self.handle_breakpoint(value);
        if let Err(err) = &result {
            self.runtime.add_error(err.clone());
        }
        result
    }

    fn handle_breakpoint(&mut self, value: BreakpointValue) -> Result<(), VmHostError> {
        match value {
            BreakpointValue::AsyncCall => self.handle_async_call_breakpoint(),
            BreakpointValue::ExecutionFailed => Err(VmHostError::ExecutionFailed),
            BreakpointValue::SignalError => Err(VmHostError::SignalError),
            BreakpointValue::OutOfGas => Err(VmHostError::NotEnoughGas),
            BreakpointValue::None => Err(VmHostError::UnhandledRuntimeBreakpoint),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gas_schedule::GasSchedule;
    use crate::mock::{MockInstanceBuilder, MockWorld};
    use crate::HostConfig;

    fn host() -> VmHost {
        let mut host = VmHost::new(
            HostConfig::default(),
            GasSchedule::uniform(1),
            Box::new(MockWorld::new()),
            Box::new(MockInstanceBuilder::new()),
        )
        .unwrap();
        host.runtime.set_instance_for_test(1_000);
        host
    }

    #[test]
    fn test_breakpoint_mapping() {
        let mut host = host();
        assert_eq!(host.handle_breakpoint_if_any(Ok(())), Ok(()));
        assert_eq!(
            host.handle_breakpoint_if_any(Err(InstanceTrap::Breakpoint(BreakpointValue::SignalError))),
            Err(VmHostError::SignalError)
        );
        assert_eq!(
            host.handle_breakpoint_if_any(Err(InstanceTrap::Breakpoint(BreakpointValue::OutOfGas))),
            Err(VmHostError::NotEnoughGas)
        );
        assert_eq!(
            host.handle_breakpoint_if_any(Err(InstanceTrap::Breakpoint(BreakpointValue::None))),
            Err(VmHostError::UnhandledRuntimeBreakpoint)
        );
        assert_eq!(host.runtime.errors().len(), 3);
    }

    #[test]
    fn test_engine_trap_uses_runtime_breakpoint() {
        let mut host = host();
        assert_eq!(
            host.handle_breakpoint_if_any(Err(InstanceTrap::Trap("unreachable".into()))),
            Err(VmHostError::ExecutionFailed)
        );
        assert!(host.runtime.errors().is_empty());

        host.runtime.set_breakpoint_value(BreakpointValue::SignalError);
        assert_eq!(
            host.handle_breakpoint_if_any(Err(InstanceTrap::Trap("host error".into()))),
            Err(VmHostError::SignalError)
        );
    }
}
