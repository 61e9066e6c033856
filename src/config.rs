use crate::{Paths, Result};
use serde::{Deserialize, Serialize};
use std::{env, fs, path::PathBuf, time::Duration};

const UEFI_ENV_VAR: &str = "VMSTRAP_UEFI_PATH";

#[cfg(target_os = "macos")]
const DEFAULT_ACCEL: &str = "hvf";
#[cfg(not(target_os = "macos"))]
const DEFAULT_ACCEL: &str = "kvm";

fn default_accel() -> String {
    DEFAULT_ACCEL.into()
}

fn default_public_bridge() -> String {
    "br0".into()
}

fn default_private_bridge() -> String {
    "virbr1".into()
}

fn default_boot_timeout() -> u64 {
    300
}

/// Settings read from `config.toml` in the tool's home directory.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Config {
    /// Guest account used for SSH (default: `$USER`).
    #[serde(default)]
    pub ssh_user: Option<String>,
    #[serde(default = "default_accel")]
    pub accel: String,
    /// Firmware passed to QEMU with `-bios`.
    #[serde(default)]
    pub uefi: Option<PathBuf>,
    #[serde(default = "default_public_bridge")]
    pub public_bridge: String,
    #[serde(default = "default_private_bridge")]
    pub private_bridge: String,
    /// Per-step timeout in seconds. Unset means steps may run forever.
    #[serde(default)]
    pub step_timeout: Option<u64>,
    /// Seconds to wait for SSH after launching a machine.
    #[serde(default = "default_boot_timeout")]
    pub boot_timeout: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ssh_user: None,
            accel: default_accel(),
            uefi: None,
            public_bridge: default_public_bridge(),
            private_bridge: default_private_bridge(),
            step_timeout: None,
            boot_timeout: default_boot_timeout(),
        }
    }
}

impl Config {
    pub fn load(paths: &Paths) -> Result<Self> {
        let mut config = if fs::metadata(paths.config()).is_ok() {
            toml::from_str(&fs::read_to_string(paths.config())?)?
        } else {
            Config::default()
        };
        if let Ok(uefi) = env::var(UEFI_ENV_VAR) {
            config.uefi = Some(uefi.into());
        }
        Ok(config)
    }

    pub fn ssh_user(&self) -> Result<String> {
        match &self.ssh_user {
            Some(user) => Ok(user.clone()),
            None => Ok(env::var("USER")?),
        }
    }

    pub fn step_timeout(&self) -> Option<Duration> {
        self.step_timeout.map(Duration::from_secs)
    }

    pub fn boot_timeout(&self) -> Duration {
        Duration::from_secs(self.boot_timeout)
    }
}
