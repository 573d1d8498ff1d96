use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

const HELP_TEMPLATE: &str = "\
{before-help}{name} {version}
{author-with-newline}{about-with-newline}
{usage-heading} {usage}

{all-args}{after-help}
";

#[derive(Parser, Debug)]
#[command(
    author = "Tony Kan, Ted Yu, William A. Goddard III, Victor Wai Tak Kam",
    version,
    about = "mdscatter CLI - Compute neutron-scattering observables from molecular-dynamics trajectories.",
    help_template = HELP_TEMPLATE,
)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity level (-v for INFO, -vv for DEBUG, -vvv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all log output except for errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Write logs to a specified file in addition to the console output
    #[arg(long, global = true, value_name = "PATH")]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the analysis described by a TOML job file.
    Run(RunArgs),
    /// List the available analyses, or the settings of one of them.
    List(ListArgs),
    /// Summarize a trajectory file.
    Info(InfoArgs),
}

/// Arguments for the `run` subcommand.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Path to the job file ([job], [parameters] and optional [environment] tables).
    #[arg(required = true, value_name = "JOB")]
    pub job: PathBuf,

    /// Number of worker threads. Overrides the job's running mode; 1 runs single-threaded.
    #[arg(short = 'j', long, value_name = "NUM")]
    pub threads: Option<usize>,

    /// Directory holding `elements.csv` / `molecules.toml` overlays.
    /// Defaults to the platform data directory.
    #[arg(long, value_name = "PATH")]
    pub data_dir: Option<PathBuf>,
}

/// Arguments for the `list` subcommand.
#[derive(Args, Debug)]
pub struct ListArgs {
    /// Show the settings of this analysis.
    #[arg(value_name = "NAME")]
    pub name: Option<String>,
}

/// Arguments for the `info` subcommand.
#[derive(Args, Debug)]
pub struct InfoArgs {
    /// Path to a trajectory written by mdscatter.
    #[arg(required = true, value_name = "TRAJECTORY")]
    pub trajectory: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_accepts_threads_and_global_flags() {
        let cli = Cli::try_parse_from(["mdscatter", "run", "job.toml", "-j", "4", "-vv"]).unwrap();
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.job, PathBuf::from("job.toml"));
                assert_eq!(args.threads, Some(4));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn quiet_conflicts_with_verbose() {
        assert!(Cli::try_parse_from(["mdscatter", "list", "-q", "-v"]).is_err());
    }

    #[test]
    fn list_name_is_optional() {
        let cli = Cli::try_parse_from(["mdscatter", "list"]).unwrap();
        assert!(matches!(cli.command, Commands::List(ListArgs { name: None })));
    }
}
