//! Axum adapter for the admission guard.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;

use crate::ratelimit::{AdmissionGuard, ClientId, Identify, Rejected};

impl Identify for Request {
    /// The peer IP address, or `unknown` when the server runs without
    /// connect info.
    fn client_id(&self) -> ClientId {
        self.extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| ClientId::from(addr.ip()))
            .unwrap_or_else(|| ClientId::from("unknown"))
    }
}

impl IntoResponse for Rejected {
    fn into_response(self) -> Response {
        (
            StatusCode::TOO_MANY_REQUESTS,
            [(header::RETRY_AFTER, self.retry_after_secs.to_string())],
            self.to_string(),
        )
            .into_response()
    }
}

/// Middleware rejecting requests of clients over their limit with `429`.
pub async fn rate_limited(
    State(guard): State<AdmissionGuard>,
    request: Request,
    next: Next,
) -> Response {
    match guard.wrap(request, |request| next.run(request)).await {
        Ok(response) => response,
        Err(rejected) => rejected.into_response(),
    }
}

async fn hello() -> &'static str {
    "Hello, world!"
}

/// Build the application router with every route behind `guard`.
pub fn router(guard: AdmissionGuard) -> Router {
    Router::new()
        .route("/", get(hello))
        .route_layer(middleware::from_fn_with_state(guard, rate_limited))
}
