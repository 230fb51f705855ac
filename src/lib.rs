//! Turnstile - Sliding-Window Admission Control
//!
//! This crate decides, per client identity, whether an incoming action may
//! proceed. Counts live in one-second buckets held by a pluggable counter
//! store: an in-process table for a single worker, or Redis shared by
//! many. When the shared store is unreachable the limiter fails open.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
pub mod store;
