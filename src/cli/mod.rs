//! CLI subcommands for `telemetry-cli`.
//!
//! ## Usage
//!
//! ```bash
//! telemetry-cli config show       # Effective configuration from env
//! telemetry-cli config defaults   # Documented defaults
//! telemetry-cli config validate   # Check env (or --file) for mistakes
//! telemetry-cli demo              # Exercise every component once
//! ```

pub mod config_cmd;
pub mod demo;
