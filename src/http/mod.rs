//! HTTP surface: routes protected by the admission guard.

mod middleware;
mod server;

pub use middleware::{rate_limited, router};
pub use server::HttpServer;
