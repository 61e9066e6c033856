use crate::{machine::Machine, process, Config, Error, MachineSpec, Paths, Phase, Result};
use serde::{Deserialize, Serialize};
use std::{
    collections::{btree_map::Values, BTreeMap},
    fs,
    process::Command,
};

/// Registry of applied machines, persisted as `state.toml`.
#[derive(Deserialize, Serialize)]
pub struct State {
    #[serde(skip)]
    paths: Paths,
    #[serde(default)]
    machines: BTreeMap<String, Machine>,
}

impl State {
    fn new(paths: Paths) -> Result<Self> {
        paths.setup()?;
        Ok(Self {
            paths,
            machines: BTreeMap::new(),
        })
    }

    pub fn load(paths: Paths) -> Result<Self> {
        let mut state = State::new(paths.clone())?;
        if fs::metadata(paths.state()).is_ok() {
            state = toml::from_str(&fs::read_to_string(paths.state())?)?;
            state.paths = paths;
        }
        Ok(state)
    }

    pub fn save(&self) -> Result<()> {
        fs::write(self.paths.state(), toml::to_string(self)?)?;
        Ok(())
    }

    /// Insert or replace the entry named `machine.name`.
    pub fn record(&mut self, machine: Machine) {
        self.machines.insert(machine.name.clone(), machine);
    }

    /// Record a spec whose apply failed with `err`. Specs rejected before any
    /// machine was requested leave the registry untouched.
    pub fn record_failure(&mut self, spec: &MachineSpec, err: &Error) {
        if let Error::InvalidSpec { .. } = err {
            return;
        }

        let endpoint = self
            .machines
            .get(&spec.hostname)
            .and_then(|machine| machine.endpoint.clone());
        self.record(Machine {
            name: spec.hostname.clone(),
            image: spec.base_image.clone(),
            cpus: spec.cpu_count,
            memory: spec.memory_mb,
            phase: Phase::Failed,
            network: spec.network.clone(),
            endpoint,
        });
    }

    pub fn get_machine(&self, name: &str) -> Result<&Machine> {
        self.machines
            .get(name)
            .ok_or(Error::InvalidMachine { name: name.into() })
    }

    pub fn machines(&self) -> Values<String, Machine> {
        self.machines.values()
    }

    pub fn machine_in_use(&self, name: &str) -> Result<bool> {
        if !self.machines.contains_key(name) {
            return Err(Error::InvalidMachine { name: name.into() });
        }
        process::resource_in_use(&self.paths.process_lock(), &self.paths.machine(name))
    }

    pub fn stop(&self, name: &str) -> Result<()> {
        if !self.machine_in_use(name)? {
            return Err(Error::MachineNotInUse { name: name.into() });
        }

        let pid = process::resource_pid(&self.paths.process_lock(), &self.paths.machine(name))?
            .ok_or(Error::MachineNotInUse { name: name.into() })?;

        Command::new("kill").arg(&pid).spawn()?.wait()?;

        Ok(())
    }

    pub fn connect(
        &self,
        name: &str,
        config: &Config,
        username: Option<String>,
        forward_keys: bool,
    ) -> Result<()> {
        let endpoint = self
            .get_machine(name)?
            .endpoint
            .as_ref()
            .ok_or(Error::Unreachable { name: name.into() })?;

        let mut cmd = Command::new("ssh");

        if forward_keys {
            cmd.arg("-A");
        }

        cmd.args(["-p", &endpoint.port.to_string()])
            .arg(format!(
                "{}@{}",
                match username {
                    Some(username) => username,
                    None => config.ssh_user()?,
                },
                endpoint.host
            ))
            .spawn()?
            .wait()?;

        Ok(())
    }
}
