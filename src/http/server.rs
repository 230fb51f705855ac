//! HTTP server implementation.

use std::net::SocketAddr;

use tokio::net::TcpListener;
use tracing::{error, info};

use super::middleware::router;
use crate::error::{Result, TurnstileError};
use crate::ratelimit::AdmissionGuard;

/// HTTP server exposing the guarded routes.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    /// Guard placed in front of every route
    guard: AdmissionGuard,
}

impl HttpServer {
    /// Create a new HTTP server.
    pub fn new(addr: SocketAddr, guard: AdmissionGuard) -> Self {
        Self { addr, guard }
    }

    /// Start the HTTP server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await?;
        self.serve_on(listener, signal).await
    }

    /// Serve on an already bound listener.
    pub async fn serve_on<F>(self, listener: TcpListener, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let app = router(self.guard).into_make_service_with_connect_info::<SocketAddr>();

        info!(
            addr = %listener.local_addr()?,
            "Starting HTTP server with graceful shutdown"
        );

        axum::serve(listener, app)
            .with_graceful_shutdown(signal)
            .await
            .map_err(|e| {
                error!(error = %e, "HTTP server failed");
                TurnstileError::Io(e)
            })
    }
}
