use std::fmt;
use tabled::{settings::Style, Table, Tabled};
use vmstrap::{MachineSpec, State};

#[derive(Tabled)]
struct MachineInfo {
    #[tabled(rename = "NAME")]
    name: String,
    #[tabled(rename = "IMAGE")]
    image: String,
    #[tabled(rename = "CPUS")]
    cpus: u32,
    #[tabled(rename = "MEMORY (MB)")]
    memory: u32,
    #[tabled(rename = "NETWORK")]
    network: String,
    #[tabled(rename = "ENDPOINT")]
    endpoint: String,
    #[tabled(rename = "PHASE")]
    phase: String,
    #[tabled(rename = "IN-USE")]
    in_use: bool,
}

pub struct MachineTable {
    table: Table,
}

impl MachineTable {
    pub fn new(state: &State) -> Self {
        Self::filtered(state, &[])
    }

    pub fn filtered(state: &State, filter: &[&str]) -> Self {
        let mut table = Table::new(
            state
                .machines()
                .filter(|machine| filter.is_empty() || filter.contains(&machine.name.as_ref()))
                .map(|machine| MachineInfo {
                    name: machine.name.clone(),
                    image: machine.image.clone(),
                    cpus: machine.cpus,
                    memory: machine.memory,
                    network: machine.network.to_string(),
                    endpoint: machine
                        .endpoint
                        .as_ref()
                        .map(ToString::to_string)
                        .unwrap_or_else(|| "-".into()),
                    phase: machine.phase.to_string(),
                    in_use: state.machine_in_use(&machine.name).unwrap_or(false),
                })
                .collect::<Vec<_>>(),
        );
        table.with(Style::blank());
        Self { table }
    }
}

impl fmt::Display for MachineTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.table)
    }
}

#[derive(Tabled)]
struct StepInfo {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "DESCRIPTION")]
    description: String,
    #[tabled(rename = "IDEMPOTENT")]
    idempotent: bool,
    #[tabled(rename = "COMMAND")]
    command: String,
}

pub struct StepTable {
    table: Table,
}

impl StepTable {
    pub fn new(spec: &MachineSpec) -> Self {
        let mut table = Table::new(
            spec.steps
                .iter()
                .enumerate()
                .map(|(index, step)| StepInfo {
                    index: index + 1,
                    description: step.description.clone(),
                    idempotent: step.idempotent,
                    command: step.command.clone(),
                })
                .collect::<Vec<_>>(),
        );
        table.with(Style::blank());
        Self { table }
    }
}

impl fmt::Display for StepTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.table)
    }
}
