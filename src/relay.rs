//! UDP mirror: re-aggregates every received line into outbound packets bounded by a configured
//! byte budget and forwards them to a secondary address.
//!
//! Grounded on the same ticker-plus-threshold flush shape as [`crate::queue::EventQueue`], but
//! operating on raw lines rather than decoded events since the relay is a dumb packet mirror,
//! not a StatsD consumer.

use crate::metrics::Metrics;
use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::{self, MissedTickBehavior};

/// Sending half, cloned into every listener task alongside the main [`crate::queue::QueueSender`].
#[derive(Clone)]
pub struct RelaySender {
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

impl RelaySender {
    /// Forwards one raw StatsD line (without its trailing newline) into the relay's
    /// aggregation buffer.
    pub fn send_line(&self, line: &[u8]) {
        let _ = self.tx.send(line.to_vec());
    }
}

/// Owns the outbound socket and aggregation buffer.
pub struct Relay {
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
    socket: UdpSocket,
    target: SocketAddr,
    packet_length: usize,
    flush_interval: Duration,
    metrics: Arc<Metrics>,
}

impl Relay {
    pub async fn new(
        target: SocketAddr,
        packet_length: usize,
        flush_interval: Duration,
        metrics: Arc<Metrics>,
    ) -> anyhow::Result<(RelaySender, Self)> {
        let bind_addr: SocketAddr = if target.is_ipv6() { "[::]:0" } else { "0.0.0.0:0" }.parse().unwrap();
        let socket = UdpSocket::bind(bind_addr)
            .await
            .context("binding relay outbound UDP socket")?;

        let (tx, rx) = mpsc::unbounded_channel();
        Ok((
            RelaySender { tx },
            Self {
                rx,
                socket,
                target,
                packet_length: packet_length.max(1),
                flush_interval,
                metrics,
            },
        ))
    }

    /// Runs until the sender side is dropped, aggregating lines into newline-joined packets no
    /// larger than `packet_length` bytes, flushing early on overflow and periodically on
    /// `flush_interval` to bound staleness for low-traffic periods.
    pub async fn run(&mut self) {
        let mut ticker = time::interval(self.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut packet = Vec::with_capacity(self.packet_length);
        loop {
            tokio::select! {
                maybe_line = self.rx.recv() => {
                    match maybe_line {
                        Some(line) => self.accumulate(&mut packet, line).await,
                        None => {
                            self.flush(&mut packet).await;
                            return;
                        }
                    }
                }
                _ = ticker.tick() => {
                    self.flush(&mut packet).await;
                }
            }
        }
    }

    async fn accumulate(&mut self, packet: &mut Vec<u8>, line: Vec<u8>) {
        if line.len() > self.packet_length {
            self.metrics.relay_long_lines_total.inc();
            return;
        }

        let needed = if packet.is_empty() { line.len() } else { packet.len() + 1 + line.len() };
        if needed > self.packet_length {
            self.flush(packet).await;
        }

        if !packet.is_empty() {
            packet.push(b'\n');
        }
        packet.extend_from_slice(&line);
    }

    async fn flush(&self, packet: &mut Vec<u8>) {
        if packet.is_empty() {
            return;
        }
        let _ = self.socket.send_to(packet, self.target).await;
        packet.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn aggregates_lines_and_flushes_on_overflow() {
        let metrics = crate::metrics::test_metrics();
        let upstream = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let upstream_addr = upstream.local_addr().unwrap();

        let (tx, mut relay) = Relay::new(upstream_addr, 16, Duration::from_secs(60), metrics)
            .await
            .unwrap();

        tokio::spawn(async move {
            relay.run().await;
        });

        tx.send_line(b"aaaa:1|c");
        tx.send_line(b"bbbb:2|c");
        drop(tx);

        let mut buf = [0u8; 64];
        let (n, _) = upstream.recv_from(&mut buf).await.unwrap();
        let first = String::from_utf8_lossy(&buf[..n]).to_string();
        assert!(first.len() <= 16);

        let (n2, _) = upstream.recv_from(&mut buf).await.unwrap();
        let second = String::from_utf8_lossy(&buf[..n2]).to_string();
        assert!(!second.is_empty());
    }

    #[tokio::test]
    async fn oversized_line_is_dropped_and_counted() {
        let metrics = crate::metrics::test_metrics();
        let upstream = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let upstream_addr = upstream.local_addr().unwrap();

        let (tx, mut relay) = Relay::new(upstream_addr, 4, Duration::from_millis(20), Arc::clone(&metrics))
            .await
            .unwrap();
        tokio::spawn(async move {
            relay.run().await;
        });

        tx.send_line(b"way-too-long-for-the-budget");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(metrics.relay_long_lines_total.get(), 1);
    }
}
