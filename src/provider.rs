use crate::{NetworkMode, ProvisionStep, Result};
use serde::{Deserialize, Serialize};
use std::{fmt, time::Duration};

/// What the bootstrapper asks a provider to create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmRequest {
    pub base_image: String,
    pub hostname: String,
    pub cpu_count: u32,
    pub memory_mb: u32,
}

/// Where a machine's SSH daemon can be reached.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// A machine created by a provider. The endpoint is filled in once a network
/// is attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmHandle {
    pub name: String,
    pub endpoint: Option<Endpoint>,
}

impl VmHandle {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            endpoint: None,
        }
    }
}

/// Outcome of running one provisioning step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepStatus {
    /// `exit_code` is `None` when the step was killed by a signal.
    Exited {
        exit_code: Option<i32>,
        output: String,
    },
    TimedOut {
        output: String,
    },
}

/// The virtualization backend the bootstrapper drives.
pub trait Provider {
    /// Create (or reuse) a machine from `request`.
    fn create_vm(&mut self, request: &VmRequest) -> Result<VmHandle>;

    /// Attach `vm` to the network described by `network`, setting its endpoint
    /// when the mode makes it reachable.
    fn attach_network(&mut self, vm: &mut VmHandle, network: &NetworkMode) -> Result<()>;

    /// Run `step` with elevated privilege inside `vm`, killing it after
    /// `timeout` if one is given.
    fn run_privileged(
        &mut self,
        vm: &VmHandle,
        step: &ProvisionStep,
        timeout: Option<Duration>,
    ) -> Result<StepStatus>;
}

impl<P: Provider + ?Sized> Provider for &mut P {
    fn create_vm(&mut self, request: &VmRequest) -> Result<VmHandle> {
        (**self).create_vm(request)
    }

    fn attach_network(&mut self, vm: &mut VmHandle, network: &NetworkMode) -> Result<()> {
        (**self).attach_network(vm, network)
    }

    fn run_privileged(
        &mut self,
        vm: &VmHandle,
        step: &ProvisionStep,
        timeout: Option<Duration>,
    ) -> Result<StepStatus> {
        (**self).run_privileged(vm, step, timeout)
    }
}
