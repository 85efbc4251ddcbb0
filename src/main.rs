//! pulsegate: entry point.
//!
//! Startup sequence:
//!   1. Load .env (if present)
//!   2. Load config
//!   3. Resolve effective log level (CLI `-v` flags > env > config)
//!   4. Init logger once
//!   5. Build the shared monitor handles (store, registry, dispatcher)
//!   6. Spawn Ctrl-C → shutdown signal watcher
//!   7. Run the poll scheduler and the HTTP channel until shutdown

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use pulsegate::config::{self, Config};
use pulsegate::error::AppError;
use pulsegate::logger;
use pulsegate::subsystems::monitor::{
    AggregationEngine, BroadcastDispatcher, DockerInspector, HttpTransport, PollScheduler,
    ProbeRunner, Snapshot, SnapshotStore, SubscriptionRegistry,
};
use pulsegate::subsystems::runtime::{Component, spawn_components};

#[cfg(feature = "channel-axum")]
use pulsegate::subsystems::comms::axum_channel::AxumChannel;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), AppError> {
    // Load .env if present: ignore errors (file is optional).
    let _ = dotenvy::dotenv();

    let args = parse_cli_args();

    let config = config::load(args.config_path.as_deref())?;

    let (effective_log_level, force_cli_level) =
        logger::effective_level(args.log_level, &config.server.log_level);
    logger::init(effective_log_level, force_cli_level, config.server.log_file.as_deref())?;

    info!(
        bind = %config.server.bind,
        services = config.monitor.services.len(),
        default_timeout_ms = config.monitor.probe_timeout.as_millis() as u64,
        default_interval_ms = config.monitor.poll_interval.as_millis() as u64,
        configured_log_level = %config.server.log_level,
        effective_log_level = %effective_log_level,
        "config loaded"
    );

    // Shared shutdown token: Ctrl-C cancels it, all tasks watch it.
    let shutdown = CancellationToken::new();

    let ctrlc_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received: initiating shutdown");
            ctrlc_token.cancel();
        }
    });

    let transport = HttpTransport::new()
        .map_err(|e| AppError::Server(format!("failed to build http client: {e}")))?;
    let runner =
        ProbeRunner::new(Arc::new(transport)).with_inspector(Arc::new(DockerInspector::new()));
    let engine = AggregationEngine::new(runner);
    let store = SnapshotStore::new(Snapshot::pending(&config.monitor.services));
    let dispatcher = BroadcastDispatcher::new(SubscriptionRegistry::new(), store);

    let scheduler = PollScheduler::new(engine, dispatcher.clone(), config.monitor.services.clone())?;
    let poll_every = scheduler.interval();
    #[cfg_attr(not(feature = "channel-axum"), allow(unused_variables))]
    let refresh = scheduler.refresh_trigger();

    let mut components: Vec<Box<dyn Component>> = vec![Box::new(scheduler)];

    #[cfg(feature = "channel-axum")]
    components.push(Box::new(AxumChannel::new(
        "http",
        config.server.bind.clone(),
        dispatcher,
        refresh,
        config.monitor.client_buffer,
    )));

    print_startup_summary(&config, poll_every);

    spawn_components(components, shutdown.clone()).join().await?;

    info!("shutdown complete");
    Ok(())
}

fn print_startup_summary(config: &Config, poll_every: std::time::Duration) {
    let fit = |text: String| -> String {
        const WIDTH: usize = 58;
        let char_count = text.chars().count();
        if char_count >= WIDTH {
            let mut out = text.chars().take(WIDTH - 1).collect::<String>();
            out.push('…');
            out
        } else {
            format!("{text:<WIDTH$}")
        }
    };

    #[cfg(feature = "channel-axum")]
    let http_line = format!("🌐 http: {} (ws: /ws/health)", config.server.bind);
    #[cfg(not(feature = "channel-axum"))]
    let http_line = "🌐 http: disabled (not compiled)".to_string();

    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║ 🩺 pulsegate                                                 ║");
    println!("╟──────────────────────────────────────────────────────────────╢");
    println!("║ 🧠 PID: {:<53}║", std::process::id());
    println!("║   {}║", fit(http_line));
    println!(
        "║   {}║",
        fit(format!(
            "⏱️  poll every {}ms, client buffer {}",
            poll_every.as_millis(),
            config.monitor.client_buffer
        ))
    );
    println!("╟──────────────────────────────────────────────────────────────╢");
    println!(
        "║ 📡 {}║",
        fit(format!(
            "Services (default timeout {}ms, interval {}ms)",
            config.monitor.probe_timeout.as_millis(),
            config.monitor.poll_interval.as_millis()
        ))
    );
    for svc in &config.monitor.services {
        let container = svc.container.as_deref().map(|c| format!(" [{c}]")).unwrap_or_default();
        println!(
            "║   {}║",
            fit(format!("{} → {} ({}ms){container}", svc.name, svc.url, svc.timeout.as_millis()))
        );
    }
    println!("╚══════════════════════════════════════════════════════════════╝");
}

struct CliArgs {
    log_level: Option<&'static str>,
    config_path: Option<String>,
}

fn parse_cli_args() -> CliArgs {
    let mut verbosity = 0u8;
    let mut config_path = None;

    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        if arg == "--" {
            break;
        }

        match arg.as_str() {
            "-h" | "--help" => {
                println!("Usage: pulsegate [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -h, --help                 Print help");
                println!("  -f, --config <PATH>        Path to configuration file (default: config/default.toml)");
                println!("  -v, -vv, -vvv, -vvvv       Increase logging verbosity");
                std::process::exit(0);
            }
            "-f" | "--config" => {
                if let Some(path) = iter.next() {
                    config_path = Some(path);
                } else {
                    eprintln!("error: -f/--config requires a path argument");
                    std::process::exit(1);
                }
            }
            "--verbose" => verbosity = verbosity.saturating_add(1),
            a if a.starts_with('-') && a.len() > 1 && a.chars().skip(1).all(|c| c == 'v') => {
                verbosity = verbosity.saturating_add((a.len() - 1) as u8);
            }
            other => eprintln!("warning: ignoring unknown argument '{other}'"),
        }
    }

    //   -v      → warn
    //   -vv     → info
    //   -vvv    → debug (per-probe results, dispatch reports)
    //   -vvvv+  → trace
    let log_level = match verbosity {
        0 => None,
        1 => Some("warn"),
        2 => Some("info"),
        3 => Some("debug"),
        _ => Some("trace"),
    };

    CliArgs { log_level, config_path }
}
