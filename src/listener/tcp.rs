//! TCP listener: one task per accepted connection, newline-delimited reads. An overlong line
//! is counted and ends the connection.

use super::MAX_TCP_LINE_LENGTH;
use crate::metrics::Metrics;
use crate::parser::Parser;
use crate::queue::QueueSender;
use crate::relay::RelaySender;
use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

/// Binds a TCP listener at `addr` and spawns one task per accepted connection.
pub async fn serve(
    addr: SocketAddr,
    parser: Arc<Parser>,
    sender: QueueSender,
    relay: Option<RelaySender>,
    metrics: Arc<Metrics>,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding TCP listener on {addr}"))?;

    loop {
        let (stream, _peer) = match listener.accept().await {
            Ok(v) => v,
            Err(e) => {
                metrics.tcp_connection_errors_total.inc();
                slog::debug!(slog_scope::logger(), "tcp accept error"; "error" => %e);
                continue;
            }
        };

        metrics.tcp_connections_total.inc();
        let parser = Arc::clone(&parser);
        let sender = sender.clone();
        let relay = relay.clone();
        let metrics = Arc::clone(&metrics);
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, &parser, &sender, relay.as_ref(), &metrics).await {
                slog::debug!(slog_scope::logger(), "tcp connection ended"; "error" => %e);
            }
        });
    }
}

async fn handle_connection(
    stream: TcpStream,
    parser: &Parser,
    sender: &QueueSender,
    relay: Option<&RelaySender>,
    metrics: &Metrics,
) -> anyhow::Result<()> {
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::with_capacity(1024);

    loop {
        buf.clear();
        match read_line_bounded(&mut reader, &mut buf, metrics).await? {
            LineRead::Eof => return Ok(()),
            LineRead::TooLong => return Ok(()), // connection aborted
            LineRead::Line => {
                let line = strip_trailing_newline(&buf);
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
    }
}

enum LineRead {
    Eof,
    Line,
    TooLong,
}

/// Reads one `\n`-terminated line. A line exceeding [`MAX_TCP_LINE_LENGTH`] is counted and
/// reported as [`LineRead::TooLong`]; the caller closes the connection rather than continuing
/// to read from it.
async fn read_line_bounded(
    reader: &mut BufReader<TcpStream>,
    buf: &mut Vec<u8>,
    metrics: &Metrics,
) -> anyhow::Result<LineRead> {
    let n = reader.read_until(b'\n', buf).await.context("reading from TCP stream")?;
    if n == 0 {
        return Ok(LineRead::Eof);
    }

    if buf.len() > MAX_TCP_LINE_LENGTH {
        metrics.tcp_too_long_lines_total.inc();
        return Ok(LineRead::TooLong);
    }

    Ok(LineRead::Line)
}

fn strip_trailing_newline(buf: &[u8]) -> &[u8] {
    let mut line = buf;
    if line.ends_with(b"\n") {
        line = &line[..line.len() - 1];
    }
    if line.ends_with(b"\r") {
        line = &line[..line.len() - 1];
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::EventQueue;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn accepts_connections_and_parses_lines() {
        let metrics = crate::metrics::test_metrics();
        let parser = Arc::new(Parser::new(Default::default(), Arc::clone(&metrics)));
        let (tx, mut queue) = EventQueue::new(1000, 8, Duration::from_millis(50), Arc::clone(&metrics));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let parser2 = Arc::clone(&parser);
        let metrics2 = Arc::clone(&metrics);
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            metrics2.tcp_connections_total.inc();
            let _ = handle_connection(stream, &parser2, &tx, None, &metrics2).await;
        });

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"foo:1|c\nbar:2|c\n").await.unwrap();
        drop(client);

        let batch = queue.next_batch().await.unwrap();
        let names: Vec<&str> = batch.iter().map(crate::event::Event::name).collect();
        assert_eq!(names, vec!["foo", "bar"]);
    }

    #[tokio::test]
    async fn overlong_line_is_counted_and_aborts_the_connection() {
        let metrics = crate::metrics::test_metrics();
        let parser = Arc::new(Parser::new(Default::default(), Arc::clone(&metrics)));
        let (tx, mut queue) = EventQueue::new(1000, 8, Duration::from_millis(50), Arc::clone(&metrics));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let parser2 = Arc::clone(&parser);
        let metrics2 = Arc::clone(&metrics);
        let joined = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            handle_connection(stream, &parser2, &tx, None, &metrics2).await
        });

        let mut client = TcpStream::connect(addr).await.unwrap();
        let overlong = vec![b'a'; MAX_TCP_LINE_LENGTH + 1];
        client.write_all(&overlong).await.unwrap();
        client.write_all(b"\nfoo:1|c\n").await.unwrap();

        joined.await.unwrap().unwrap();
        assert_eq!(metrics.tcp_too_long_lines_total.get(), 1);
        // the connection was closed after the overlong line, so the trailing valid line never
        // reached the queue.
        drop(client);
        assert!(queue.is_empty());
    }
}
