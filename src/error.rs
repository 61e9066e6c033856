use std::{env, io, path::PathBuf, time::Duration};
use thiserror::Error;
use toml::{de, ser};

#[derive(Error, Debug)]
pub enum Error {
    #[error("io error: {0}")]
    IO(#[from] io::Error),

    #[error("invalid path: {path:?}")]
    InvalidPath { path: PathBuf },

    #[error("invalid machine spec: {reason}")]
    InvalidSpec { reason: String },

    #[error("image not found: {image} (looked in {path:?})")]
    ImageNotFound { image: String, path: PathBuf },

    #[error("failed to create machine {name}: {reason}")]
    CreateFailed { name: String, reason: String },

    #[error("failed to attach network to {name}: {reason}")]
    NetworkAttachFailed { name: String, reason: String },

    #[error("machine unreachable: {name}")]
    Unreachable { name: String },

    #[error("provision step {step_index} ({description}) failed with exit code {exit_code:?}")]
    ProvisionStepFailed {
        step_index: usize,
        description: String,
        exit_code: Option<i32>,
        output: String,
    },

    #[error("provision step {step_index} ({description}) timed out after {timeout:?}")]
    StepTimedOut {
        step_index: usize,
        description: String,
        timeout: Duration,
        output: String,
    },

    #[error("invalid machine: {name}")]
    InvalidMachine { name: String },

    #[error("machine not in use: {name}")]
    MachineNotInUse { name: String },

    #[error("missing environment variable")]
    MissingEnvVar(#[from] env::VarError),

    #[error("deserialization error")]
    Deserialization(#[from] de::Error),

    #[error("serialization error")]
    Serialization(#[from] ser::Error),
}

impl Error {
    /// Index (1-based) of the provisioning step this error belongs to, if any.
    pub fn step_index(&self) -> Option<usize> {
        match self {
            Error::ProvisionStepFailed { step_index, .. }
            | Error::StepTimedOut { step_index, .. } => Some(*step_index),
            _ => None,
        }
    }
}
