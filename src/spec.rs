use crate::{Error, ProvisionStep, Result};
use serde::{Deserialize, Serialize};
use std::{fmt, fs, net::Ipv4Addr, path::Path, str::FromStr};

/// How a machine is attached to the network. Exactly one mode is active.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum NetworkMode {
    None,
    /// Host port forwarded to the guest's SSH port.
    Forwarded { port: u16 },
    /// Host-only network with a fixed guest address.
    PrivateNetwork { ip: Ipv4Addr },
    /// Bridged onto the host's physical network segment.
    PublicNetwork,
}

impl fmt::Display for NetworkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkMode::None => write!(f, "none"),
            NetworkMode::Forwarded { port } => write!(f, "forwarded ({port})"),
            NetworkMode::PrivateNetwork { ip } => write!(f, "private ({ip})"),
            NetworkMode::PublicNetwork => write!(f, "public"),
        }
    }
}

/// Declarative description of a machine to bring up and provision.
///
/// Table-valued fields come last so the TOML serializer can emit them.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct MachineSpec {
    pub base_image: String,
    pub hostname: String,
    #[serde(rename = "cpus")]
    pub cpu_count: u32,
    #[serde(rename = "memory")]
    pub memory_mb: u32,
    pub network: NetworkMode,
    pub steps: Vec<ProvisionStep>,
}

impl MachineSpec {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        fs::read_to_string(path)?.parse()
    }

    pub fn validate(&self) -> Result<()> {
        if self.base_image.trim().is_empty() {
            return Err(invalid("base image is empty"));
        }

        if !valid_hostname(&self.hostname) {
            return Err(invalid(format!("invalid hostname: {:?}", self.hostname)));
        }

        if self.cpu_count == 0 {
            return Err(invalid("cpu count must be at least 1"));
        }

        if self.memory_mb == 0 {
            return Err(invalid("memory must be at least 1 MB"));
        }

        if let NetworkMode::Forwarded { port: 0 } = self.network {
            return Err(invalid("forwarded port must be non-zero"));
        }

        if self.steps.is_empty() {
            return Err(invalid("no provisioning steps"));
        }

        if let Some(index) = self.steps.iter().position(ProvisionStep::is_blank) {
            return Err(invalid(format!("step {} has an empty command", index + 1)));
        }

        Ok(())
    }
}

impl FromStr for MachineSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }
}

fn invalid<S: Into<String>>(reason: S) -> Error {
    Error::InvalidSpec {
        reason: reason.into(),
    }
}

// RFC 1123 labels joined by dots.
fn valid_hostname(hostname: &str) -> bool {
    !hostname.is_empty()
        && hostname.len() <= 253
        && hostname.split('.').all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        })
}
