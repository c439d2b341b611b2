//! Config CLI subcommands: show, defaults, validate.

use std::path::Path;

use crate::config::{self, EffectiveConfig, TelemetryConfig};
use crate::logging::Level;

/// Print effective config as key-value pairs to stdout.
pub fn run_show(json: bool) {
    let cfg = config::load().effective_config();
    if json {
        match serde_json::to_string_pretty(&cfg) {
            Ok(text) => println!("{}", text),
            Err(e) => eprintln!("Failed to render config: {}", e),
        }
    } else {
        print_config(&cfg);
    }
}

/// Print default config values (no env overrides) to stdout.
pub fn run_defaults() {
    print_config(&TelemetryConfig::default().effective_config());
}

/// Validate configuration for obvious misconfigurations.
///
/// With `file`, the TOML document is parsed instead of the environment.
/// Returns 0 if valid, 1 if any warnings are found, 2 if the file cannot
/// be loaded.
pub fn run_validate(file: Option<&Path>) -> i32 {
    let cfg = match file {
        Some(path) => match config::load_file(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                eprintln!("ERROR: {}", e);
                return 2;
            }
        },
        None => {
            let warnings = env_warnings();
            for warning in &warnings {
                eprintln!("WARNING: {}", warning);
            }
            if !warnings.is_empty() {
                return 1;
            }
            config::load()
        }
    };

    let warnings = value_warnings(&cfg);
    for warning in &warnings {
        eprintln!("WARNING: {}", warning);
    }
    if warnings.is_empty() {
        println!("Configuration is valid.");
        0
    } else {
        1
    }
}

/// Env values that `config::load` would silently replace with a default.
fn env_warnings() -> Vec<String> {
    let mut warnings = Vec::new();

    if let Ok(level) = std::env::var("TELEMETRY_LOG_LEVEL") {
        if level.parse::<Level>().is_err() {
            warnings.push(format!(
                "TELEMETRY_LOG_LEVEL ({}) is not a log level; using INFO",
                level
            ));
        }
    }

    for key in [
        "TELEMETRY_HISTOGRAM_CAPACITY",
        "TELEMETRY_MAX_SPANS",
        "TELEMETRY_ALERT_HISTORY",
        "TELEMETRY_ALERT_INTERVAL_SECS",
        "TELEMETRY_ALERT_STOP_TIMEOUT_SECS",
    ] {
        if let Ok(value) = std::env::var(key) {
            if value.trim().parse::<u64>().is_err() {
                warnings.push(format!("{} ({}) is not a number; using default", key, value));
            }
        }
    }
    warnings
}

fn value_warnings(cfg: &TelemetryConfig) -> Vec<String> {
    let mut warnings = Vec::new();

    if let Some(path) = &cfg.logging.log_file {
        let parent_missing = path
            .parent()
            .map_or(false, |p| !p.as_os_str().is_empty() && !p.exists());
        if parent_missing {
            warnings.push(format!(
                "log file directory for {} does not exist",
                path.display()
            ));
        }
    }

    if cfg.alerting.stop_timeout.is_zero() {
        warnings.push("alert stop timeout is 0; the evaluator is always detached".to_string());
    }

    if !cfg.logging.console && cfg.logging.log_file.is_none() {
        warnings.push("console disabled and no log file; log lines go nowhere".to_string());
    }
    warnings
}

fn print_config(cfg: &EffectiveConfig) {
    println!("TELEMETRY_SERVICE_NAME={}", cfg.service_name);
    println!("TELEMETRY_LOG_LEVEL={}", cfg.log_level.to_ascii_lowercase());
    println!("TELEMETRY_LOG_JSON={}", cfg.log_json);
    println!(
        "TELEMETRY_LOG_FILE={}",
        cfg.log_file.as_deref().unwrap_or("")
    );
    println!("TELEMETRY_HISTOGRAM_CAPACITY={}", cfg.histogram_capacity);
    println!("TELEMETRY_MAX_SPANS={}", cfg.max_spans);
    println!("TELEMETRY_ALERT_HISTORY={}", cfg.alert_history);
    println!("TELEMETRY_ALERT_INTERVAL_SECS={}", cfg.alert_interval_secs);
    println!("TELEMETRY_ALERT_STOP_TIMEOUT_SECS={}", cfg.alert_stop_timeout_secs);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::{clear_env_vars, ENV_LOCK};

    #[test]
    fn test_validate_passes_with_defaults() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        assert_eq!(run_validate(None), 0, "default config should pass validation");
    }

    #[test]
    fn test_validate_warns_on_unparseable_env() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        std::env::set_var("TELEMETRY_LOG_LEVEL", "verbose");
        std::env::set_var("TELEMETRY_MAX_SPANS", "many");
        assert_eq!(env_warnings().len(), 2);
        assert_eq!(run_validate(None), 1);
        clear_env_vars();
    }

    #[test]
    fn test_validate_warns_on_missing_log_dir() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        std::env::set_var("TELEMETRY_LOG_FILE", "/definitely/not/here/app.log");
        assert_eq!(run_validate(None), 1);
        clear_env_vars();
    }

    #[test]
    fn test_validate_file() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.toml");
        std::fs::write(&good, "service_name = \"svc\"\n").unwrap();
        assert_eq!(run_validate(Some(&good)), 0);

        let bad = dir.path().join("bad.toml");
        std::fs::write(&bad, "service_name = 3\n").unwrap();
        assert_eq!(run_validate(Some(&bad)), 2);
    }

    #[test]
    fn test_print_config_smoke() {
        print_config(&TelemetryConfig::default().effective_config());
    }
}
