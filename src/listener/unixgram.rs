//! Unix datagram socket listener.

use super::dispatch_packet;
use crate::metrics::Metrics;
use crate::parser::Parser;
use crate::queue::QueueSender;
use crate::relay::RelaySender;
use anyhow::Context;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::UnixDatagram;

/// Binds a Unix datagram socket at `path`, removing any stale socket file left behind by a
/// previous, uncleanly-terminated process, and applies `mode` to the freshly-bound socket file.
pub async fn serve(
    path: PathBuf,
    parser: Arc<Parser>,
    sender: QueueSender,
    relay: Option<RelaySender>,
    metrics: Arc<Metrics>,
    mode: u32,
    read_buffer_size: usize,
) -> anyhow::Result<()> {
    if path.exists() {
        std::fs::remove_file(&path)
            .with_context(|| format!("removing stale unixgram socket at {}", path.display()))?;
    }

    let socket = UnixDatagram::bind(&path)
        .with_context(|| format!("binding unixgram listener at {}", path.display()))?;

    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode))
        .with_context(|| format!("setting mode {mode:o} on unixgram socket at {}", path.display()))?;

    let result = run(&socket, &parser, &sender, relay.as_ref(), &metrics, read_buffer_size).await;
    let _ = std::fs::remove_file(&path);
    result
}

async fn run(
    socket: &UnixDatagram,
    parser: &Parser,
    sender: &QueueSender,
    relay: Option<&RelaySender>,
    metrics: &Arc<Metrics>,
    read_buffer_size: usize,
) -> anyhow::Result<()> {
    let mut buf = vec![0u8; read_buffer_size];
    loop {
        let len = match socket.recv(&mut buf).await {
            Ok(len) => len,
            Err(e) => {
                slog::debug!(slog_scope::logger(), "unixgram recv error"; "error" => %e);
                continue;
            }
        };

        metrics.unixgram_packets_total.inc();
        dispatch_packet(&buf[..len], parser, sender, relay);
    }
}

/// Exposed for `--check-config`-style diagnostics that just validate the path is usable.
pub fn socket_path_is_writable_dir(path: &Path) -> bool {
    path.parent()
        .map(|parent| parent.as_os_str().is_empty() || parent.is_dir())
        .unwrap_or(false)
}
