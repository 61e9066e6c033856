use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about)]
pub struct Args {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[clap(subcommand)]
    pub subcommand: Subcommands,
}

#[derive(Subcommand)]
pub enum Subcommands {
    /// Create a machine from a spec file and run its provisioning steps
    Apply {
        /// Path to the machine spec (TOML)
        #[arg(value_parser)]
        spec: PathBuf,

        /// Kill any step running longer than this many seconds
        #[arg(short = 't', long, value_parser)]
        step_timeout: Option<u64>,
    },
    /// Validate a spec file and list its provisioning steps
    Plan {
        /// Path to the machine spec (TOML)
        #[arg(value_parser)]
        spec: PathBuf,
    },
    /// Print information about a machine
    Machine {
        #[arg(value_parser)]
        name: String,
    },
    /// Print information about all machines
    Machines,
    /// Stop a running machine
    Stop {
        /// Name of the machine
        #[arg(value_parser)]
        name: String,
    },
    /// Connect to a machine
    Connect {
        /// Enable SSH agent forwarding
        #[arg(short = 'A', long, default_value_t = false)]
        forward_keys: bool,

        /// Username (default: configured ssh_user, then $USER)
        #[arg(short, long)]
        username: Option<String>,

        /// Name of the machine
        #[arg(value_parser)]
        name: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_commands_parse() {
        let cases = vec![
            vec!["vmstrap", "apply", "demos/tlo-scraper.toml"],
            vec!["vmstrap", "plan", "demos/tlo-scraper.toml"],
            vec!["vmstrap", "machine", "tlo-scraper.dev.local.net"],
            vec!["vmstrap", "machines"],
            vec!["vmstrap", "stop", "tlo-scraper.dev.local.net"],
            vec!["vmstrap", "connect", "tlo-scraper.dev.local.net"],
        ];

        for args in cases {
            if let Err(err) = Args::try_parse_from(&args) {
                panic!("failed to parse {args:?}: {err}");
            }
        }
    }

    #[test]
    fn apply_takes_step_timeout() {
        let args =
            Args::try_parse_from(["vmstrap", "-v", "apply", "box.toml", "--step-timeout", "600"])
                .unwrap();
        assert_eq!(args.verbose, 1);
        match args.subcommand {
            Subcommands::Apply { spec, step_timeout } => {
                assert_eq!(spec, PathBuf::from("box.toml"));
                assert_eq!(step_timeout, Some(600));
            }
            _ => panic!("expected apply"),
        }
    }

    #[test]
    fn connect_flags() {
        let args =
            Args::try_parse_from(["vmstrap", "connect", "-A", "-u", "vagrant", "box"]).unwrap();
        match args.subcommand {
            Subcommands::Connect {
                forward_keys,
                username,
                name,
            } => {
                assert!(forward_keys);
                assert_eq!(username.as_deref(), Some("vagrant"));
                assert_eq!(name, "box");
            }
            _ => panic!("expected connect"),
        }
    }

    #[test]
    fn apply_requires_a_spec() {
        assert!(Args::try_parse_from(["vmstrap", "apply"]).is_err());
    }
}
