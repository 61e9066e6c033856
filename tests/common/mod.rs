// Test double for the virtualization backend.

use std::time::Duration;
use vmstrap::{
    Endpoint, Error, MachineSpec, NetworkMode, Provider, ProvisionStep, Result, StepStatus,
    VmHandle, VmRequest,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Create(VmRequest),
    Attach(String, NetworkMode),
    Run(String),
}

/// Records every call and answers from a script of canned outcomes.
#[derive(Default)]
pub struct RecordingProvider {
    pub calls: Vec<Call>,
    pub timeouts: Vec<Option<Duration>>,
    pub missing_image: bool,
    pub network_down: bool,
    /// Commands that exit with the given code instead of 0.
    pub failures: Vec<(String, i32)>,
    /// Commands that run past their deadline.
    pub hangs: Vec<String>,
    /// Commands the provider cannot even start.
    pub broken: Vec<String>,
}

impl RecordingProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(mut self, command: &str, exit_code: i32) -> Self {
        self.failures.push((command.into(), exit_code));
        self
    }

    pub fn broken(mut self, command: &str) -> Self {
        self.broken.push(command.into());
        self
    }

    pub fn hanging(mut self, command: &str) -> Self {
        self.hangs.push(command.into());
        self
    }

    pub fn commands_run(&self) -> Vec<String> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                Call::Run(command) => Some(command.clone()),
                _ => None,
            })
            .collect()
    }
}

impl Provider for RecordingProvider {
    fn create_vm(&mut self, request: &VmRequest) -> Result<VmHandle> {
        self.calls.push(Call::Create(request.clone()));
        if self.missing_image {
            return Err(Error::ImageNotFound {
                image: request.base_image.clone(),
                path: "images/missing.qcow2".into(),
            });
        }
        Ok(VmHandle::new(&request.hostname))
    }

    fn attach_network(&mut self, vm: &mut VmHandle, network: &NetworkMode) -> Result<()> {
        self.calls.push(Call::Attach(vm.name.clone(), network.clone()));
        if self.network_down {
            return Err(Error::NetworkAttachFailed {
                name: vm.name.clone(),
                reason: "bridge br0 does not exist".into(),
            });
        }
        vm.endpoint = match network {
            NetworkMode::None => None,
            NetworkMode::Forwarded { port } => Some(Endpoint {
                host: "localhost".into(),
                port: *port,
            }),
            NetworkMode::PrivateNetwork { ip } => Some(Endpoint {
                host: ip.to_string(),
                port: 22,
            }),
            NetworkMode::PublicNetwork => Some(Endpoint {
                host: vm.name.clone(),
                port: 22,
            }),
        };
        Ok(())
    }

    fn run_privileged(
        &mut self,
        _vm: &VmHandle,
        step: &ProvisionStep,
        timeout: Option<Duration>,
    ) -> Result<StepStatus> {
        self.calls.push(Call::Run(step.command.clone()));
        self.timeouts.push(timeout);

        if self.broken.contains(&step.command) {
            return Err(Error::IO(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "ssh closed its stdin",
            )));
        }

        if self.hangs.contains(&step.command) {
            return Ok(StepStatus::TimedOut {
                output: "Reading package lists...".into(),
            });
        }

        let exit_code = self
            .failures
            .iter()
            .find(|(command, _)| *command == step.command)
            .map(|(_, code)| *code)
            .unwrap_or(0);

        Ok(StepStatus::Exited {
            exit_code: Some(exit_code),
            output: format!("ran {}", step.description),
        })
    }
}

pub fn scraper_spec() -> MachineSpec {
    include_str!("../../demos/tlo-scraper.toml").parse().unwrap()
}

pub fn spec_with_steps(commands: &[&str]) -> MachineSpec {
    let mut spec = scraper_spec();
    spec.steps = commands
        .iter()
        .enumerate()
        .map(|(i, command)| ProvisionStep::new(format!("step {}", i + 1), *command))
        .collect();
    spec
}
