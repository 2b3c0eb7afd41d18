//! Tollgate - Per-tenant Admission Control
//!
//! This crate decides, for every inbound API request, whether the calling
//! credential still has quota. Each `(tenant, credential)` pair owns a
//! minute and an hour token bucket; both must admit a request. Tenants may
//! carry capacity overrides loaded from a store and cached for a short TTL,
//! and a background evictor keeps the registry's memory bounded.

pub mod config;
pub mod error;
pub mod ratelimit;
