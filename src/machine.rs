use crate::{Endpoint, NetworkMode, Phase, RunningMachine};
use serde::{Deserialize, Serialize};

/// Registry entry for a machine that has been applied at least once.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct Machine {
    pub name: String,
    pub image: String,
    pub cpus: u32,
    pub memory: u32,
    pub phase: Phase,
    pub network: NetworkMode,
    #[serde(default)]
    pub endpoint: Option<Endpoint>,
}

impl From<&RunningMachine> for Machine {
    fn from(running: &RunningMachine) -> Self {
        Self {
            name: running.hostname.clone(),
            image: running.base_image.clone(),
            cpus: running.cpu_count,
            memory: running.memory_mb,
            phase: Phase::Ready,
            network: running.network.clone(),
            endpoint: running.endpoint.clone(),
        }
    }
}
