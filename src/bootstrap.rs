//! Brings a [`MachineSpec`] to life: create the machine, attach its network,
//! then run its provisioning steps one after another.

use crate::{Endpoint, Error, MachineSpec, NetworkMode, Provider, Result, StepStatus, VmRequest};
use serde::{Deserialize, Serialize};
use std::{fmt, time::Duration};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    NotCreated,
    Creating,
    Provisioning,
    Ready,
    Failed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::NotCreated => "not created",
            Phase::Creating => "creating",
            Phase::Provisioning => "provisioning",
            Phase::Ready => "ready",
            Phase::Failed => "failed",
        };
        write!(f, "{name}")
    }
}

/// Handle to a machine that was created and fully provisioned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunningMachine {
    pub hostname: String,
    pub base_image: String,
    pub cpu_count: u32,
    pub memory_mb: u32,
    pub network: NetworkMode,
    pub endpoint: Option<Endpoint>,
    pub steps_run: usize,
}

impl fmt::Display for RunningMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}, {} cpus, {} MB, network: {}",
            self.hostname, self.base_image, self.cpu_count, self.memory_mb, self.network
        )?;
        if let Some(endpoint) = &self.endpoint {
            write!(f, ", ssh: {endpoint}")?;
        }
        write!(f, ", {} steps run)", self.steps_run)
    }
}

pub struct Bootstrapper<P> {
    provider: P,
    step_timeout: Option<Duration>,
    phase: Phase,
}

impl<P: Provider> Bootstrapper<P> {
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            step_timeout: None,
            phase: Phase::NotCreated,
        }
    }

    pub fn with_step_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.step_timeout = timeout;
        self
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn into_provider(self) -> P {
        self.provider
    }

    /// Create the machine described by `spec` and provision it. The first
    /// failure aborts the remaining work; nothing is retried or rolled back.
    pub fn apply(&mut self, spec: MachineSpec) -> Result<RunningMachine> {
        let result = self.run(spec);
        if let Err(err) = &result {
            warn!("bootstrap failed in phase {}: {err}", self.phase);
            self.phase = Phase::Failed;
        }
        result
    }

    fn run(&mut self, spec: MachineSpec) -> Result<RunningMachine> {
        spec.validate()?;

        self.phase = Phase::Creating;
        info!(
            "creating {} from {} ({} cpus, {} MB)",
            spec.hostname, spec.base_image, spec.cpu_count, spec.memory_mb
        );
        let mut vm = self.provider.create_vm(&VmRequest {
            base_image: spec.base_image.clone(),
            hostname: spec.hostname.clone(),
            cpu_count: spec.cpu_count,
            memory_mb: spec.memory_mb,
        })?;

        info!("attaching {} to network: {}", vm.name, spec.network);
        self.provider.attach_network(&mut vm, &spec.network)?;

        self.phase = Phase::Provisioning;
        let total = spec.steps.len();
        for (index, step) in spec.steps.iter().enumerate() {
            let step_index = index + 1;
            info!("[{step_index}/{total}] {step}");
            debug!("running: {}", step.command);

            let status = self
                .provider
                .run_privileged(&vm, step, self.step_timeout)
                .map_err(|err| Error::ProvisionStepFailed {
                    step_index,
                    description: step.description.clone(),
                    exit_code: None,
                    output: err.to_string(),
                })?;

            match status {
                StepStatus::Exited {
                    exit_code: Some(0),
                    output,
                } => {
                    debug!("step {step_index} output:\n{output}");
                }
                StepStatus::Exited { exit_code, output } => {
                    return Err(Error::ProvisionStepFailed {
                        step_index,
                        description: step.description.clone(),
                        exit_code,
                        output,
                    });
                }
                StepStatus::TimedOut { output } => {
                    return Err(Error::StepTimedOut {
                        step_index,
                        description: step.description.clone(),
                        timeout: self.step_timeout.unwrap_or_default(),
                        output,
                    });
                }
            }
        }

        self.phase = Phase::Ready;
        info!("{} is ready", vm.name);

        Ok(RunningMachine {
            hostname: spec.hostname,
            base_image: spec.base_image,
            cpu_count: spec.cpu_count,
            memory_mb: spec.memory_mb,
            network: spec.network,
            endpoint: vm.endpoint,
            steps_run: total,
        })
    }
}
