use anyhow::{Context, Result};
use clap::Parser;
use groupalarm_trigger::{
    default_config_path, request, Configuration, DispatchMode, DispatchOutcome, GroupalarmClient,
};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Configuration, resource, message or argument problem
const EXIT_INVALID: u8 = 1;
/// Groupalarm declined the alarm
const EXIT_REJECTED: u8 = 2;
/// Groupalarm could not be reached; the caller may invoke again
const EXIT_TRANSPORT: u8 = 3;

/// Trigger a Groupalarm.com alarm
#[derive(Parser, Debug)]
#[command(name = "groupalarm-trigger", version, about, long_about = None)]
struct Args {
    /// The selcall alarm code (e.g. 09234)
    code: String,

    /// The time point the alarm was received (e.g. "05.12.2021 19:51:52")
    time_point: String,

    /// The type of the alarm (e.g. "Einsatzalarmierung" or "Probealarm")
    #[arg(value_name = "TYPE")]
    alarm_type: String,

    /// Only test whether this alarm would be accepted, no alarm is emitted
    #[arg(short, long)]
    test: bool,

    /// Print additional debug information
    #[arg(short, long)]
    debug: bool,

    /// Path to the YAML configuration file
    /// [default: ../config/config.yaml next to the executable]
    #[arg(short, long, value_name = "PATH")]
    config_file: Option<PathBuf>,
}

fn setup_logging(debug: bool) {
    let default_directives = if debug {
        "warn,groupalarm_trigger=debug"
    } else {
        "warn"
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            let _ = err.print();
            return if err.use_stderr() {
                ExitCode::from(EXIT_INVALID)
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    setup_logging(args.debug);
    debug!(?args, "Invocation");

    match run(args).await {
        Ok(outcome) => report(&outcome),
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::from(EXIT_INVALID)
        }
    }
}

/// Everything that can fail locally fails here, before any request is sent
async fn run(args: Args) -> Result<DispatchOutcome> {
    let config_path = args.config_file.unwrap_or_else(default_config_path);
    let config = Configuration::load(&config_path).context("Failed to load the configuration")?;

    let trigger = request::prepare(&config, &args.code, &args.alarm_type, &args.time_point)
        .with_context(|| format!("Failed to prepare the alarm for code {}", args.code))?;

    let client = GroupalarmClient::from_settings(
        &config.connection,
        config.credentials.api_token.clone(),
    )?;

    let mode = if args.test {
        DispatchMode::Validate
    } else {
        DispatchMode::Commit
    };

    Ok(client.dispatch(trigger, mode).await)
}

fn report(outcome: &DispatchOutcome) -> ExitCode {
    match outcome {
        DispatchOutcome::Triggered { .. } | DispatchOutcome::Validated => {
            println!("{outcome}");
            ExitCode::SUCCESS
        }
        DispatchOutcome::Rejected(_) => {
            eprintln!("Error: {outcome}");
            ExitCode::from(EXIT_REJECTED)
        }
        DispatchOutcome::TransportFailure(_) => {
            eprintln!("Error: {outcome}");
            ExitCode::from(EXIT_TRANSPORT)
        }
    }
}
