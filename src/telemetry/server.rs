//! HTTP telemetry server: scrape endpoint plus lifecycle
//! routes, served over a `socket2`-configured listener (`SO_REUSEADDR`/`SO_REUSEPORT`) with
//! `hyper::server::conn::http1` per accepted connection. Five fixed routes, so `handle` below
//! dispatches with a plain `match` rather than a registered-route table.

use crate::mapper::Mapper;
use crate::metrics::Metrics;
use crate::registry::Registry;
use anyhow::Context;
use http_body_util::{combinators::BoxBody, BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use socket2::{Domain, SockAddr, Socket, Type};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Notify;

type RespBody = BoxBody<Bytes, std::convert::Infallible>;

/// Shared state the HTTP routes read from or act on.
pub struct AppState {
    pub mapper: Arc<Mapper>,
    pub registry: Arc<Registry>,
    pub metrics: Arc<Metrics>,
    pub mapping_config_path: Option<PathBuf>,
    pub enable_lifecycle: bool,
    pub telemetry_path: String,
    pub ready: AtomicBool,
    pub shutdown: Notify,
}

impl AppState {
    /// Reloads the mapping config from `mapping_config_path`, exactly as the `SIGHUP` handler
    /// does.
    pub fn reload_mapping_config(&self) -> anyhow::Result<()> {
        let result = self.try_reload_mapping_config();
        let outcome = if result.is_ok() { "success" } else { "failure" };
        self.metrics.config_reloads_total.with_label_values(&[outcome]).inc();
        if result.is_ok() {
            self.metrics.loaded_mappings.set(self.mapper.loaded_mappings() as f64);
        }
        result
    }

    fn try_reload_mapping_config(&self) -> anyhow::Result<()> {
        let Some(path) = &self.mapping_config_path else {
            anyhow::bail!("no mapping config path configured");
        };
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading mapping config {}", path.display()))?;
        let config = crate::mapper::config::MapperConfig::from_yaml_str(&text)
            .with_context(|| format!("parsing mapping config {}", path.display()))?;
        self.mapper.reload(&config).context("compiling mapping config")?;
        Ok(())
    }
}

/// Binds the telemetry listener and serves forever, until `state.shutdown` is notified.
pub async fn serve(addr: SocketAddr, state: Arc<AppState>) -> anyhow::Result<()> {
    let listener = bind_listener(addr).with_context(|| format!("binding telemetry server on {addr}"))?;
    state.ready.store(true, Ordering::SeqCst);

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, _peer) = match accepted {
                    Ok(v) => v,
                    Err(e) => {
                        slog::warn!(slog_scope::logger(), "telemetry server accept error"; "error" => %e);
                        continue;
                    }
                };

                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);
                    let service = service_fn(move |req| handle(req, Arc::clone(&state)));
                    if let Err(e) = hyper::server::conn::http1::Builder::new()
                        .serve_connection(io, service)
                        .await
                    {
                        slog::debug!(slog_scope::logger(), "telemetry connection ended"; "error" => %e);
                    }
                });
            }
            _ = state.shutdown.notified() => {
                return Ok(());
            }
        }
    }
}

fn bind_listener(addr: SocketAddr) -> anyhow::Result<TcpListener> {
    let socket = Socket::new(
        if addr.is_ipv4() { Domain::IPV4 } else { Domain::IPV6 },
        Type::STREAM,
        None,
    )?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;
    socket.bind(&SockAddr::from(addr))?;
    socket.listen(1024)?;
    socket.set_nonblocking(true)?;

    let std_listener: std::net::TcpListener = socket.into();
    Ok(TcpListener::from_std(std_listener)?)
}

async fn handle(req: Request<Incoming>, state: Arc<AppState>) -> Result<Response<RespBody>, std::convert::Infallible> {
    let path = req.uri().path().to_owned();

    if path == state.telemetry_path && req.method() == Method::GET {
        return Ok(metrics_response(&state));
    }

    match (req.method(), path.as_str()) {
        (&Method::GET, "/-/healthy") => Ok(plain_text(StatusCode::OK, "OK")),
        (&Method::GET, "/-/ready") => {
            if state.ready.load(Ordering::SeqCst) {
                Ok(plain_text(StatusCode::OK, "OK"))
            } else {
                Ok(plain_text(StatusCode::SERVICE_UNAVAILABLE, "not ready"))
            }
        }
        (&Method::POST | &Method::PUT, "/-/reload") if state.enable_lifecycle => {
            match state.reload_mapping_config() {
                Ok(()) => Ok(plain_text(StatusCode::OK, "reloaded")),
                Err(e) => Ok(plain_text(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string())),
            }
        }
        (&Method::POST | &Method::PUT, "/-/quit") if state.enable_lifecycle => {
            state.shutdown.notify_waiters();
            Ok(plain_text(StatusCode::OK, "shutting down"))
        }
        _ => Ok(plain_text(StatusCode::NOT_FOUND, "not found")),
    }
}

fn metrics_response(state: &AppState) -> Response<RespBody> {
    match state.registry.gather_text() {
        Ok(text) => Response::builder()
            .status(StatusCode::OK)
            .header(hyper::header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")
            .body(BoxBody::new(Full::from(text).map_err(|e: std::convert::Infallible| match e {})))
            .unwrap(),
        Err(e) => plain_text(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    }
}

fn plain_text(status: StatusCode, body: &str) -> Response<RespBody> {
    Response::builder()
        .status(status)
        .header(hyper::header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(BoxBody::new(Full::from(body.to_owned()).map_err(|e: std::convert::Infallible| match e {})))
        .unwrap()
}
