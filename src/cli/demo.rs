//! `demo` subcommand: drive every component once and print what they saw.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::json;

use crate::alerting::{AlertRule, LogNotifier, Severity};
use crate::config;
use crate::trace::LogSpanExporter;
use crate::Telemetry;

/// Run the demo. Returns the process exit code.
pub fn run_demo() -> i32 {
    let telemetry = match Telemetry::new(config::load()) {
        Ok(t) => t,
        Err(e) => {
            eprintln!("Failed to set up telemetry: {}", e);
            return 2;
        }
    };
    match drive(&telemetry) {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("Demo failed: {}", e);
            1
        }
    }
}

fn drive(telemetry: &Telemetry) -> Result<(), Box<dyn std::error::Error>> {
    let log = telemetry.logger("demo");
    telemetry
        .tracer()
        .add_exporter(Arc::new(LogSpanExporter::new(telemetry.logger("spans"))));
    telemetry
        .alert_manager()
        .add_notifier(Arc::new(LogNotifier::new(telemetry.logger("alerts"))));

    let requests = telemetry
        .metrics()
        .counter("demo_requests_total", "Requests handled", &["method"])?;
    let latency = telemetry.metrics().histogram(
        "demo_request_seconds",
        "Request latency",
        &["method"],
        None,
    )?;
    let in_flight = telemetry
        .metrics()
        .gauge("demo_in_flight", "Requests in progress", &[])?;

    for (i, method) in ["GET", "GET", "POST", "GET", "DELETE"].into_iter().enumerate() {
        let result: Result<(), String> =
            telemetry
                .tracer()
                .trace("handle_request", &[("method", json!(method))], || {
                    in_flight.inc(1.0, &[]).map_err(|e| e.to_string())?;
                    requests.increment(&[method]).map_err(|e| e.to_string())?;
                    latency
                        .observe(0.01 * (i + 1) as f64, &[method])
                        .map_err(|e| e.to_string())?;
                    log.info("request handled", &[("method", json!(method))]);
                    in_flight.dec(1.0, &[]).map_err(|e| e.to_string())?;
                    if method == "DELETE" {
                        return Err("delete not allowed".to_string());
                    }
                    Ok(())
                });
        if let Err(e) = result {
            log.warning("request rejected", &[("reason", json!(e))]);
        }
    }

    let errors = Arc::new(AtomicU64::new(1));
    let seen = errors.clone();
    telemetry.alert_manager().add_rule(
        AlertRule::new("demo_errors", Severity::Warning, "Requests are failing", move || {
            seen.load(Ordering::Relaxed) > 0
        })
        .with_label("service", telemetry.tracer().service_name().to_string()),
    )?;
    telemetry.alert_manager().evaluate();
    errors.store(0, Ordering::Relaxed);
    telemetry.alert_manager().evaluate();

    println!("# Prometheus export");
    print!("{}", telemetry.metrics().export_prometheus());
    println!();
    println!("# JSON snapshot");
    println!(
        "{}",
        serde_json::to_string_pretty(&telemetry.metrics().collect_all().to_json())?
    );
    println!();
    println!("# Trace stats");
    println!(
        "{}",
        serde_json::to_string_pretty(&telemetry.tracer().get_stats())?
    );
    println!();
    println!("# Alert stats");
    println!(
        "{}",
        serde_json::to_string_pretty(&telemetry.alert_manager().get_stats())?
    );
    Ok(())
}
