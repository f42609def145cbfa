//! UDP listener.

use super::dispatch_packet;
use crate::metrics::Metrics;
use crate::parser::Parser;
use crate::queue::QueueSender;
use crate::relay::RelaySender;
use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;

/// Binds a UDP socket at `addr` and forwards every datagram to `sender`, forever, until the
/// process is torn down (the task is simply aborted at shutdown; there's no clean teardown
/// handshake for a connectionless listener).
pub async fn serve(
    addr: SocketAddr,
    parser: Arc<Parser>,
    sender: QueueSender,
    relay: Option<RelaySender>,
    metrics: Arc<Metrics>,
    read_buffer_size: usize,
) -> anyhow::Result<()> {
    let socket = UdpSocket::bind(addr)
        .await
        .with_context(|| format!("binding UDP listener on {addr}"))?;

    let mut buf = vec![0u8; read_buffer_size];
    loop {
        let (len, _peer) = match socket.recv_from(&mut buf).await {
            Ok(v) => v,
            Err(e) => {
                // A single bad datagram (e.g. ICMP port-unreachable surfaced as a recv error on
                // some platforms) shouldn't kill the listener.
                slog::debug!(slog_scope::logger(), "udp recv error"; "error" => %e);
                continue;
            }
        };

        metrics.udp_packets_total.inc();
        dispatch_packet(&buf[..len], &parser, &sender, relay.as_ref());
    }
}
