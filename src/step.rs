use serde::{Deserialize, Serialize};
use std::fmt;

fn idempotent_by_default() -> bool {
    true
}

/// A privileged shell action run inside a machine after it is created.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ProvisionStep {
    pub description: String,
    pub command: String,
    /// Whether the operator expects reruns to be safe. Not enforced.
    #[serde(default = "idempotent_by_default")]
    pub idempotent: bool,
}

impl ProvisionStep {
    pub fn new<D, C>(description: D, command: C) -> Self
    where
        D: Into<String>,
        C: Into<String>,
    {
        Self {
            description: description.into(),
            command: command.into(),
            idempotent: true,
        }
    }

    pub fn not_idempotent(mut self) -> Self {
        self.idempotent = false;
        self
    }

    pub fn is_blank(&self) -> bool {
        self.command.trim().is_empty()
    }
}

impl fmt::Display for ProvisionStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description)
    }
}
