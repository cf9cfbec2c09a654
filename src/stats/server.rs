//! HTTP stats endpoint.
//!
//! Serves [`StatsSnapshot`](super::StatsSnapshot) JSON on `GET /stats`.
//! Runs on a plain thread with `tiny_http`, independent of the tokio runtime.

use crate::gateway::GatewayMonitor;
use log::{error, info, warn};
use std::io::Cursor;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tiny_http::{Header, Method, Response, Server};

/// Default port for the stats server.
pub const DEFAULT_STATS_PORT: u16 = 8080;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// HTTP stats server.
///
/// Runs in a background thread; dropping it stops the thread.
pub struct StatsServer {
    handle: Option<thread::JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
    port: u16,
}

impl StatsServer {
    /// Start serving `monitor` on `bind_addr:port` (`None` binds 0.0.0.0).
    ///
    /// Port 0 picks a free port; see [`port`](Self::port).
    pub fn start(
        bind_addr: Option<IpAddr>,
        port: u16,
        monitor: GatewayMonitor,
    ) -> Result<Self, std::io::Error> {
        let addr = match bind_addr {
            Some(ip) => format!("{}:{}", ip, port),
            None => format!("0.0.0.0:{}", port),
        };

        let server = Server::http(&addr)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::AddrInUse, format!("{}", e)))?;
        let port = server
            .server_addr()
            .to_ip()
            .map(|a| a.port())
            .unwrap_or(port);

        info!("Stats server listening on http://{}/stats", addr);

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = shutdown.clone();

        let handle = thread::Builder::new()
            .name("stats-http".to_string())
            .spawn(move || Self::run_server(server, monitor, shutdown_clone))?;

        Ok(Self {
            handle: Some(handle),
            shutdown,
            port,
        })
    }

    /// Port the server is bound to.
    pub fn port(&self) -> u16 {
        self.port
    }

    fn run_server(server: Server, monitor: GatewayMonitor, shutdown: Arc<AtomicBool>) {
        let content_type = Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..]).ok();
        let location = Header::from_bytes(&b"Location"[..], &b"/stats"[..]).ok();
        let allow_get = Header::from_bytes(&b"Allow"[..], &b"GET"[..]).ok();

        loop {
            if shutdown.load(Ordering::Acquire) {
                info!("Stats server shutting down");
                break;
            }

            let request = match server.recv_timeout(POLL_INTERVAL) {
                Ok(Some(request)) => request,
                Ok(None) => continue,
                Err(e) => {
                    error!("Stats server error: {}", e);
                    break;
                }
            };

            let response = if request.method() != &Method::Get {
                with_header(
                    Response::from_string("Method Not Allowed").with_status_code(405),
                    &allow_get,
                )
            } else {
                match request.url() {
                    "/stats" | "/stats/" => with_header(
                        Response::from_string(monitor.snapshot().to_json()).with_status_code(200),
                        &content_type,
                    ),
                    "/" => with_header(
                        Response::from_string("See /stats for gateway statistics")
                            .with_status_code(302),
                        &location,
                    ),
                    _ => Response::from_string("Not Found").with_status_code(404),
                }
            };

            if let Err(e) = request.respond(response) {
                warn!("Failed to send stats response: {}", e);
            }
        }
    }

    /// Stop the server.
    ///
    /// May take up to one poll interval.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for StatsServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn with_header(
    response: Response<Cursor<Vec<u8>>>,
    header: &Option<Header>,
) -> Response<Cursor<Vec<u8>>> {
    match header {
        Some(h) => response.with_header(h.clone()),
        None => response,
    }
}
