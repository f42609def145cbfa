//! Command-line interface.

use crate::mapper::cache::CachePolicy;
use crate::telemetry::logging::{LogFormat, LogLevel};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "statsd-bridge", about = "A StatsD-to-Prometheus translator sidecar.")]
pub struct Cli {
    /// Path to the YAML mapping configuration file.
    #[arg(long = "statsd.mapping-config")]
    pub mapping_config: Option<PathBuf>,

    /// UDP listen address for incoming StatsD traffic.
    #[arg(long = "statsd.listen-udp", default_value = ":9125")]
    pub listen_udp: String,

    /// TCP listen address for incoming StatsD traffic. Empty string disables it.
    #[arg(long = "statsd.listen-tcp", default_value = "")]
    pub listen_tcp: String,

    /// Unix datagram socket path for incoming StatsD traffic. Empty string disables it.
    #[arg(long = "statsd.listen-unixgram", default_value = "")]
    pub listen_unixgram: String,

    /// File mode applied to the unixgram socket after binding (octal).
    #[arg(long = "statsd.unixsocket-mode", default_value = "755")]
    pub unixsocket_mode: String,

    /// Size of the read buffer used for UDP/unixgram datagram reads, in bytes.
    #[arg(long = "statsd.read-buffer", default_value_t = 0)]
    pub read_buffer: usize,

    /// Downstream UDP address to mirror raw lines to. Empty string disables the relay.
    #[arg(long = "statsd.relay.address", default_value = "")]
    pub relay_address: String,

    /// Maximum aggregated relay packet size, in bytes.
    #[arg(long = "statsd.relay.packet-length", default_value_t = 1400)]
    pub relay_packet_length: usize,

    /// Capacity of the channel listeners enqueue decoded events onto before the exporter drains
    /// them. A full queue drops the event and counts it.
    #[arg(long = "statsd.event-queue-size", default_value_t = 10_000)]
    pub event_queue_size: usize,

    /// Size of each batch handed from the EventQueue to the exporter.
    #[arg(long = "statsd.event-flush-threshold", default_value_t = 1000)]
    pub event_flush_threshold: usize,

    /// Maximum time to wait before flushing a partially-filled batch, in milliseconds.
    #[arg(long = "statsd.event-flush-interval", default_value_t = 200)]
    pub event_flush_interval_ms: u64,

    /// Enables DogStatsD-style name-trailing `|#k:v` tag parsing.
    #[arg(long = "statsd.parse-dogstatsd-tags", default_value_t = true)]
    pub parse_dogstatsd_tags: bool,

    /// Enables InfluxDB-style `name,k=v` tag parsing.
    #[arg(long = "statsd.parse-influxdb-tags", default_value_t = true)]
    pub parse_influxdb_tags: bool,

    /// Enables Librato-style `name#k=v` tag parsing.
    #[arg(long = "statsd.parse-librato-tags", default_value_t = true)]
    pub parse_librato_tags: bool,

    /// Enables SignalFX-style `name[k=v]` tag parsing.
    #[arg(long = "statsd.parse-signalfx-tags", default_value_t = true)]
    pub parse_signalfx_tags: bool,

    /// Resolution cache size. Zero disables caching.
    #[arg(long = "statsd.cache-size", default_value_t = 1000)]
    pub cache_size: usize,

    /// Resolution cache eviction policy.
    #[arg(long = "statsd.cache-type", default_value = "lru")]
    pub cache_type: CliCachePolicy,

    /// When set, an event matching no mapping rule is dropped (and only counted) instead of
    /// being registered under its escaped original name.
    #[arg(long = "statsd.drop-unmapped", default_value_t = false)]
    pub drop_unmapped: bool,

    /// Address the telemetry HTTP server listens on.
    #[arg(long = "web.listen-address", default_value = ":9102")]
    pub web_listen_address: String,

    /// URL path the Prometheus scrape endpoint is served at.
    #[arg(long = "web.telemetry-path", default_value = "/metrics")]
    pub web_telemetry_path: String,

    /// Enables the `/-/reload` and `/-/quit` HTTP lifecycle endpoints.
    #[arg(long = "web.enable-lifecycle", default_value_t = false)]
    pub web_enable_lifecycle: bool,

    /// Log output format.
    #[arg(long = "log.format", default_value = "text")]
    pub log_format: LogFormat,

    /// Minimum log level emitted.
    #[arg(long = "log.level", default_value = "info")]
    pub log_level: LogLevel,

    /// Parses and validates the mapping config, printing any error, then exits without binding
    /// any sockets.
    #[arg(long = "check-config", default_value_t = false)]
    pub check_config: bool,

    /// Writes the compiled FSM for the loaded mapping config as Graphviz DOT to this path, then
    /// exits.
    #[arg(long = "debug.dump-fsm")]
    pub debug_dump_fsm: Option<PathBuf>,
}

impl Cli {
    pub fn cache_policy(&self) -> CachePolicy {
        match self.cache_type {
            CliCachePolicy::Lru => CachePolicy::Lru,
            CliCachePolicy::Random => CachePolicy::Random,
        }
    }

    pub fn udp_addr(&self) -> anyhow::Result<Option<SocketAddr>> {
        parse_listen_addr(&self.listen_udp)
    }

    pub fn tcp_addr(&self) -> anyhow::Result<Option<SocketAddr>> {
        parse_listen_addr(&self.listen_tcp)
    }

    pub fn relay_addr(&self) -> anyhow::Result<Option<SocketAddr>> {
        parse_listen_addr(&self.relay_address)
    }

    pub fn web_addr(&self) -> anyhow::Result<SocketAddr> {
        parse_listen_addr(&self.web_listen_address)?
            .ok_or_else(|| anyhow::anyhow!("web.listen-address must not be empty"))
    }

    /// `--statsd.unixsocket-mode`, parsed as an octal `chmod`-style permission string.
    pub fn unixsocket_mode(&self) -> anyhow::Result<u32> {
        u32::from_str_radix(&self.unixsocket_mode, 8)
            .map_err(|e| anyhow::anyhow!("invalid statsd.unixsocket-mode {:?}: {e}", self.unixsocket_mode))
    }

    /// Datagram read-buffer size: `--statsd.read-buffer` if set, else the built-in default.
    pub fn read_buffer_size(&self) -> usize {
        if self.read_buffer == 0 {
            crate::listener::MAX_DATAGRAM_SIZE
        } else {
            self.read_buffer
        }
    }
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub enum CliCachePolicy {
    Lru,
    Random,
}

/// Accepts `host:port`, and `:port` as shorthand for `0.0.0.0:port` (the convention every
/// `exporter_*` Go binary this bridge replaces uses). An empty string means "disabled".
fn parse_listen_addr(raw: &str) -> anyhow::Result<Option<SocketAddr>> {
    if raw.is_empty() {
        return Ok(None);
    }

    let normalised = if let Some(port) = raw.strip_prefix(':') {
        format!("0.0.0.0:{port}")
    } else {
        raw.to_owned()
    };

    normalised
        .parse()
        .map(Some)
        .map_err(|e| anyhow::anyhow!("invalid listen address {raw:?}: {e}"))
}
