mod cli;
use cli::{Args, Subcommands};

mod tables;
use tables::{MachineTable, StepTable};

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;
use vmstrap::{Bootstrapper, Config, Machine, MachineSpec, Paths, QemuProvider, State};

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let paths = Paths::from_env()?;
    let config = Config::load(&paths)?;
    let mut state = State::load(paths.clone())?;

    match args.subcommand {
        Subcommands::Apply { spec, step_timeout } => {
            let spec = MachineSpec::load(&spec)
                .with_context(|| format!("failed to read {}", spec.display()))?;
            let step_timeout = step_timeout
                .map(std::time::Duration::from_secs)
                .or_else(|| config.step_timeout());

            let mut bootstrapper =
                Bootstrapper::new(QemuProvider::new(paths, config)).with_step_timeout(step_timeout);

            match bootstrapper.apply(spec.clone()) {
                Ok(machine) => {
                    state.record(Machine::from(&machine));
                    state.save()?;
                    println!("{machine}");
                }
                Err(err) => {
                    state.record_failure(&spec, &err);
                    state.save()?;
                    if let vmstrap::Error::ProvisionStepFailed { output, .. }
                    | vmstrap::Error::StepTimedOut { output, .. } = &err
                    {
                        eprintln!("{output}");
                    }
                    return Err(err.into());
                }
            }
        }
        Subcommands::Plan { spec } => {
            let spec = MachineSpec::load(&spec)
                .with_context(|| format!("failed to read {}", spec.display()))?;
            spec.validate()?;
            println!(
                "{} from {} ({} cpus, {} MB, network: {})",
                spec.hostname, spec.base_image, spec.cpu_count, spec.memory_mb, spec.network
            );
            println!("{}", StepTable::new(&spec));
        }
        Subcommands::Machine { name } => {
            state.get_machine(&name)?;
            println!("{}", MachineTable::filtered(&state, &[&name]));
        }
        Subcommands::Machines => {
            println!("{}", MachineTable::new(&state));
        }
        Subcommands::Stop { name } => {
            state.stop(&name)?;
        }
        Subcommands::Connect {
            forward_keys,
            username,
            name,
        } => {
            state.connect(&name, &config, username, forward_keys)?;
        }
    };

    Ok(())
}
