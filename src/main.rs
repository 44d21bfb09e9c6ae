mod builtins;
mod config;
mod error;
mod executor;
mod input;
mod job;
mod job_list;
mod pipeline;
mod process;
mod shell;
mod signals;

use clap::Parser;
use config::ShellConfig;
use signals::SharedJobs;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// The one job registry, shared by the control loop and the signal handlers.
static JOBS: SharedJobs = SharedJobs::new();

/// A job-control shell: run commands and pipelines in the foreground or
/// background, and stop, resume, or kill them.
#[derive(Parser, Debug)]
#[command(name = "jobsh", version, about)]
pub struct Cli {
    /// Config file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Do not print a prompt (useful when input is piped)
    #[arg(short = 'p', long)]
    no_prompt: bool,

    /// Extra logging (job creation, signal delivery) on stderr
    #[arg(short, long)]
    verbose: bool,
}

fn init_tracing(cli: &Cli, config: &ShellConfig) {
    let fallback = if cli.verbose {
        "debug"
    } else {
        config.log.filter.as_str()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => match ShellConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("jobsh: {e}");
                return ExitCode::FAILURE;
            }
        },
        None => ShellConfig::default(),
    };

    init_tracing(&cli, &config);
    tracing::debug!(?cli, ?config, "parsed CLI arguments");

    if let Err(e) = signals::install(&JOBS) {
        eprintln!("jobsh: failed to install signal handlers: {}", e.desc());
        return ExitCode::FAILURE;
    }

    let options = shell::Options {
        prompt: config.shell.prompt && !cli.no_prompt,
    };

    match shell::run(&JOBS, options) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("jobsh: {e}");
            ExitCode::FAILURE
        }
    }
}
