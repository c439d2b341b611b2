//! telemetry-cli entry point.
//!
//! ## CLI Subcommands
//!
//! - `telemetry-cli config show [--json]` - Effective configuration
//! - `telemetry-cli config defaults` - Default configuration
//! - `telemetry-cli config validate [--file PATH]` - Validate env or file
//! - `telemetry-cli demo` - Exercise every component and print the results

use std::path::Path;
use std::process::ExitCode;

use telemetry_core::cli::{config_cmd, demo};
use telemetry_core::logging::{init_diagnostics, DiagnosticsConfig, DiagnosticsFormat};

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(|s| s.as_str()).unwrap_or("help");

    let diagnostics = DiagnosticsConfig {
        format: DiagnosticsFormat::Pretty,
        filter: std::env::var("RUST_LOG").unwrap_or_else(|_| "telemetry_core=warn".to_string()),
        output_path: None,
    };
    if let Err(e) = init_diagnostics(&diagnostics) {
        eprintln!("Diagnostics disabled: {}", e);
    }

    match command {
        "config" => {
            let subcommand = args.get(2).map(|s| s.as_str()).unwrap_or("show");
            match subcommand {
                "show" => {
                    let json = args.iter().skip(3).any(|a| a == "--json");
                    config_cmd::run_show(json);
                    ExitCode::SUCCESS
                }
                "defaults" => {
                    config_cmd::run_defaults();
                    ExitCode::SUCCESS
                }
                "validate" => {
                    let file = match flag_value(&args[3..], "--file") {
                        Ok(file) => file,
                        Err(msg) => {
                            eprintln!("{}", msg);
                            return ExitCode::from(2u8);
                        }
                    };
                    let code = config_cmd::run_validate(file.map(Path::new));
                    ExitCode::from(code as u8)
                }
                _ => {
                    eprintln!("Unknown config subcommand: {}", subcommand);
                    print_usage();
                    ExitCode::FAILURE
                }
            }
        }
        "demo" => ExitCode::from(demo::run_demo() as u8),
        "help" | "--help" | "-h" => {
            print_usage();
            ExitCode::SUCCESS
        }
        "version" | "--version" | "-V" => {
            println!("telemetry-cli {}", env!("CARGO_PKG_VERSION"));
            ExitCode::SUCCESS
        }
        _ => {
            eprintln!("Unknown command: {}", command);
            print_usage();
            ExitCode::FAILURE
        }
    }
}

/// Value following `flag`, if present.
fn flag_value<'a>(args: &'a [String], flag: &str) -> Result<Option<&'a str>, String> {
    match args.iter().position(|a| a == flag) {
        None => Ok(None),
        Some(i) => args
            .get(i + 1)
            .map(|v| Some(v.as_str()))
            .ok_or_else(|| format!("Missing value for {}", flag)),
    }
}

fn print_usage() {
    let version = env!("CARGO_PKG_VERSION");
    eprintln!(
        "telemetry-cli v{}

USAGE:
    telemetry-cli <COMMAND> [OPTIONS]

COMMANDS:
    config show [--json]           Show effective configuration
    config defaults                Show default configuration
    config validate [--file PATH]  Validate environment or a TOML file
    demo                           Exercise metrics, traces, alerts, and logs
    version                        Show version information
    help                           Show this help message

ENVIRONMENT:
    TELEMETRY_SERVICE_NAME             Service name (default: app)
    TELEMETRY_LOG_LEVEL                debug, info, warning, error, critical
    TELEMETRY_LOG_JSON                 JSON log lines (default: false)
    TELEMETRY_LOG_FILE                 Append log lines to this file
    TELEMETRY_HISTOGRAM_CAPACITY       Samples per histogram series (default: 10000)
    TELEMETRY_MAX_SPANS                Finished spans retained (default: 10000)
    TELEMETRY_ALERT_HISTORY            Alert occurrences retained (default: 1000)
    TELEMETRY_ALERT_INTERVAL_SECS      Rule evaluation interval (default: 30)
    TELEMETRY_ALERT_STOP_TIMEOUT_SECS  Evaluator stop wait (default: 5)
    RUST_LOG                           Internal diagnostics filter

EXIT CODES:
    0  Success
    1  Failure / validation warnings
    2  Configuration error
",
        version
    );
}
