//! Network plumbing: the HTTP client and connectivity policies.

mod client;
mod policy;

pub use client::{extract_domain, HttpClient};
pub use policy::{NetworkMonitor, NetworkPolicy, NetworkState};
