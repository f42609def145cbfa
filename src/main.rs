//! A StatsD-to-Prometheus translator sidecar: listens for StatsD traffic over UDP/TCP/Unixgram,
//! maps metric names to Prometheus series via a configurable set of rules, and serves the
//! result for scraping.

use clap::Parser as _;
use statsd_bridge::clock::SystemClock;
use statsd_bridge::error::BootstrapResult;
use statsd_bridge::mapper::config::MapperConfig;
use statsd_bridge::mapper::Mapper;
use statsd_bridge::{cli, exporter, listener, mapper, metrics, parser, queue, registry, relay, telemetry};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use telemetry::logging::{self};
use telemetry::server::AppState;
use tokio::sync::Notify;

fn main() {
    let cli = cli::Cli::parse();
    let _log_guard = logging::init(cli.log_format, cli.log_level);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to start async runtime: {e}");
            std::process::exit(1);
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            eprintln!("{e:#}");
            std::process::exit(1);
        }
    }
}

async fn run(cli: cli::Cli) -> BootstrapResult<()> {
    let mapping_config = load_mapping_config(&cli)?;

    let mapper = Arc::new(Mapper::new(&mapping_config, cli.cache_policy(), cli.cache_size)?);

    if let Some(path) = &cli.debug_dump_fsm {
        std::fs::write(path, mapper.dump_fsm_dot())
            .map_err(|e| anyhow::anyhow!("writing FSM dump to {}: {e}", path.display()))?;
        return Ok(());
    }

    if cli.check_config {
        slog::info!(slog_scope::logger(), "mapping config OK"; "rules" => mapper.loaded_mappings());
        return Ok(());
    }

    let prom_registry = prometheus::Registry::new();
    let app_metrics = Arc::new(metrics::Metrics::new(&prom_registry));
    app_metrics.loaded_mappings.set(mapper.loaded_mappings() as f64);

    let clock = Arc::new(SystemClock);
    let registry = Arc::new(registry::Registry::new(prom_registry, clock, Arc::clone(&app_metrics)));

    let (queue_sender, event_queue) = queue::EventQueue::new(
        cli.event_queue_size,
        cli.event_flush_threshold,
        Duration::from_millis(cli.event_flush_interval_ms),
        Arc::clone(&app_metrics),
    );

    let dialects = parser::tags::DialectOptions {
        dogstatsd: cli.parse_dogstatsd_tags,
        influxdb: cli.parse_influxdb_tags,
        librato: cli.parse_librato_tags,
        signalfx: cli.parse_signalfx_tags,
    };
    let line_parser = Arc::new(parser::Parser::new(dialects, Arc::clone(&app_metrics)));

    let relay_sender = match cli.relay_addr()? {
        Some(target) => {
            let (sender, mut relay) = relay::Relay::new(
                target,
                cli.relay_packet_length,
                Duration::from_secs(1),
                Arc::clone(&app_metrics),
            )
            .await?;
            tokio::spawn(async move { relay.run().await });
            Some(sender)
        }
        None => None,
    };

    let mut exporter = exporter::Exporter::new(
        event_queue,
        Arc::clone(&mapper),
        Arc::clone(&registry),
        Arc::clone(&app_metrics),
        cli.drop_unmapped,
    );
    tokio::spawn(async move { exporter.run().await });

    let read_buffer_size = cli.read_buffer_size();

    if let Some(addr) = cli.udp_addr()? {
        let parser = Arc::clone(&line_parser);
        let sender = queue_sender.clone();
        let relay = relay_sender.clone();
        let metrics = Arc::clone(&app_metrics);
        tokio::spawn(async move {
            if let Err(e) = listener::udp::serve(addr, parser, sender, relay, metrics, read_buffer_size).await {
                slog::error!(slog_scope::logger(), "udp listener exited"; "error" => %e);
            }
        });
    }

    if let Some(addr) = cli.tcp_addr()? {
        let parser = Arc::clone(&line_parser);
        let sender = queue_sender.clone();
        let relay = relay_sender.clone();
        let metrics = Arc::clone(&app_metrics);
        tokio::spawn(async move {
            if let Err(e) = listener::tcp::serve(addr, parser, sender, relay, metrics).await {
                slog::error!(slog_scope::logger(), "tcp listener exited"; "error" => %e);
            }
        });
    }

    if !cli.listen_unixgram.is_empty() {
        let path = std::path::PathBuf::from(&cli.listen_unixgram);
        let mode = cli.unixsocket_mode()?;
        let parser = Arc::clone(&line_parser);
        let sender = queue_sender.clone();
        let relay = relay_sender.clone();
        let metrics = Arc::clone(&app_metrics);
        tokio::spawn(async move {
            if let Err(e) = listener::unixgram::serve(path, parser, sender, relay, metrics, mode, read_buffer_size).await {
                slog::error!(slog_scope::logger(), "unixgram listener exited"; "error" => %e);
            }
        });
    }

    let app_state = Arc::new(AppState {
        mapper: Arc::clone(&mapper),
        registry: Arc::clone(&registry),
        metrics: Arc::clone(&app_metrics),
        mapping_config_path: cli.mapping_config.clone(),
        enable_lifecycle: cli.web_enable_lifecycle,
        telemetry_path: cli.web_telemetry_path.clone(),
        ready: AtomicBool::new(false),
        shutdown: Notify::new(),
    });

    spawn_signal_handlers(Arc::clone(&app_state));

    let web_addr = cli.web_addr()?;
    telemetry::server::serve(web_addr, app_state).await
}

fn load_mapping_config(cli: &cli::Cli) -> BootstrapResult<MapperConfig> {
    match &cli.mapping_config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .map_err(|e| anyhow::anyhow!("reading mapping config {}: {e}", path.display()))?;
            MapperConfig::from_yaml_str(&text)
                .map_err(|e| anyhow::anyhow!("parsing mapping config {}: {e}", path.display()))
        }
        None => Ok(MapperConfig::default()),
    }
}

/// Installs `SIGHUP` (reload), `SIGINT`/`SIGTERM` (shutdown) handlers.
fn spawn_signal_handlers(state: Arc<AppState>) {
    tokio::spawn(async move {
        let mut sighup = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup()) {
            Ok(s) => s,
            Err(e) => {
                slog::error!(slog_scope::logger(), "failed to install SIGHUP handler"; "error" => %e);
                return;
            }
        };
        let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                slog::error!(slog_scope::logger(), "failed to install SIGTERM handler"; "error" => %e);
                return;
            }
        };

        loop {
            tokio::select! {
                _ = sighup.recv() => {
                    match state.reload_mapping_config() {
                        Ok(()) => slog::info!(slog_scope::logger(), "mapping config reloaded via SIGHUP"),
                        Err(e) => slog::error!(slog_scope::logger(), "SIGHUP reload failed"; "error" => %e),
                    }
                }
                _ = sigterm.recv() => {
                    state.shutdown.notify_waiters();
                    return;
                }
                _ = tokio::signal::ctrl_c() => {
                    state.shutdown.notify_waiters();
                    return;
                }
            }
        }
    });
}
