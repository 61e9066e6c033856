use crate::Result;
use path_macro::path;
use std::{env, fs, path::PathBuf};

const HOME_ENV_VAR: &str = "VMSTRAP_HOME";
const CONFIG_PATH: &str = "config.toml";
const STATE_PATH: &str = "state.toml";
const PROCESS_LOCK_PATH: &str = ".proc.lock";
const IMAGE_DIR_PATH: &str = "images";
const MACHINE_DIR_PATH: &str = "machines";

/// On-disk layout of the tool's home directory.
#[derive(Debug, Clone, Default)]
pub struct Paths {
    root: PathBuf,
}

impl Paths {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    /// `$VMSTRAP_HOME`, falling back to `$HOME/.config/vmstrap`.
    pub fn from_env() -> Result<Self> {
        match env::var(HOME_ENV_VAR) {
            Ok(root) => Ok(Self::new(root)),
            Err(_) => Ok(Self::new(path![env::var("HOME")? / ".config" / "vmstrap"])),
        }
    }

    pub fn setup(&self) -> Result<()> {
        fs::create_dir_all(&self.root)?;
        fs::create_dir_all(self.image_dir())?;
        fs::create_dir_all(self.machine_dir())?;
        Ok(())
    }

    pub fn config(&self) -> PathBuf {
        path![self.root / CONFIG_PATH]
    }

    pub fn state(&self) -> PathBuf {
        path![self.root / STATE_PATH]
    }

    pub fn process_lock(&self) -> PathBuf {
        path![self.root / PROCESS_LOCK_PATH]
    }

    pub fn image_dir(&self) -> PathBuf {
        path![self.root / IMAGE_DIR_PATH]
    }

    /// `ubuntu/bionic64` lives at `images/ubuntu-bionic64.qcow2`.
    pub fn image(&self, image: &str) -> PathBuf {
        path![self.image_dir() / format!("{}.qcow2", image.replace('/', "-"))]
    }

    pub fn machine_dir(&self) -> PathBuf {
        path![self.root / MACHINE_DIR_PATH]
    }

    pub fn machine(&self, name: &str) -> PathBuf {
        path![self.machine_dir() / format!("{}.qcow2", name)]
    }
}
