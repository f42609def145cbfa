//! Wire listeners: UDP, TCP, and Unix datagram sockets that feed decoded [`crate::event::Event`]s
//! into the [`crate::queue::QueueSender`].

pub mod tcp;
pub mod udp;
pub mod unixgram;

/// Maximum size of a single datagram read, matching the
/// largest UDP payload a socket can deliver in one `recv`.
pub const MAX_DATAGRAM_SIZE: usize = 65_536;

/// Maximum length of a single newline-delimited TCP line before the connection it arrived on is
/// closed.
pub const MAX_TCP_LINE_LENGTH: usize = 65_536;

use crate::parser::Parser;
use crate::queue::QueueSender;
use crate::relay::RelaySender;

/// Feeds every line in `packet` through `parser`, forwarding decoded events to `sender` and (if
/// configured) mirroring the raw line to `relay`.
pub(crate) fn dispatch_packet(packet: &[u8], parser: &Parser, sender: &QueueSender, relay: Option<&RelaySender>) {
    for line in packet.split(|&b| b == b'\n') {
        let line = trim_trailing_cr(line);
        if line.is_empty() {
            continue;
        }
        if let Some(relay) = relay {
            relay.send_line(line);
        }
        for event in parser.parse(line) {
            sender.send(event);
        }
    }
}

fn trim_trailing_cr(line: &[u8]) -> &[u8] {
    match line.split_last() {
        Some((b'\r', rest)) => rest,
        _ => line,
    }
}
