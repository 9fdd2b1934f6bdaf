//! Webhook server for vertical resource admission
//!
//! Exposes the admission endpoint alongside health and metrics so the router
//! can be driven directly in tests.

pub mod api;
pub mod config;
