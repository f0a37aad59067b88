//! HTTP scrape endpoint serving `/metrics`.

use anyhow::{anyhow, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::JoinHandle;
use tiny_http::{Header, Response, Server};

use crate::Metrics;

const CONTENT_TYPE: &str = "text/plain; version=0.0.4";

/// Background thread answering scrapes until dropped or stopped.
pub struct MetricsEndpoint {
    server: Arc<Server>,
    addr: SocketAddr,
    handle: Option<JoinHandle<()>>,
}

impl MetricsEndpoint {
    /// Binds `addr` and starts serving `metrics` on a background thread.
    pub fn start(addr: &str, metrics: Arc<Metrics>) -> Result<Self> {
        let server = Server::http(addr)
            .map_err(|e| anyhow!("binding metrics endpoint on {addr}: {e}"))?;
        let local = server
            .server_addr()
            .to_ip()
            .ok_or_else(|| anyhow!("metrics endpoint {addr} is not an IP socket"))?;
        let server = Arc::new(server);

        let worker = Arc::clone(&server);
        let handle = std::thread::Builder::new()
            .name("metrics-http".to_string())
            .spawn(move || serve(&worker, &metrics))?;

        tracing::info!(addr = %local, "metrics endpoint listening");
        Ok(Self {
            server,
            addr: local,
            handle: Some(handle),
        })
    }

    /// Address actually bound, useful when started on port 0.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stops accepting scrapes and waits for the worker thread.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.server.unblock();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for MetricsEndpoint {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn serve(server: &Server, metrics: &Metrics) {
    for request in server.incoming_requests() {
        let path = request.url().split('?').next().unwrap_or("");
        let result = if path == "/metrics" {
            match metrics.render() {
                Ok(body) => {
                    let mut response = Response::from_string(body);
                    if let Ok(header) = Header::from_bytes(&b"Content-Type"[..], CONTENT_TYPE.as_bytes()) {
                        response = response.with_header(header);
                    }
                    request.respond(response)
                }
                Err(e) => {
                    tracing::warn!(error = %e, "rendering metrics failed");
                    request.respond(Response::from_string(e.to_string()).with_status_code(500))
                }
            }
        } else {
            request.respond(Response::from_string("not found").with_status_code(404))
        };
        if let Err(e) = result {
            tracing::debug!(error = %e, "metrics response failed");
        }
    }
}
