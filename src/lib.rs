mod bootstrap;
pub use bootstrap::{Bootstrapper, Phase, RunningMachine};

mod config;
pub use config::Config;

mod error;
pub use error::Error;

mod machine;
pub use machine::Machine;

mod paths;
pub use paths::Paths;

mod process;

mod provider;
pub use provider::{Endpoint, Provider, StepStatus, VmHandle, VmRequest};

mod qemu;
pub use qemu::QemuProvider;

mod result;
pub use result::Result;

mod spec;
pub use spec::{MachineSpec, NetworkMode};

mod state;
pub use state::State;

mod step;
pub use step::ProvisionStep;
