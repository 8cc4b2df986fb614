//! Plumbing shared by the insight binaries: configuration loading, the HTTP
//! error type, request middleware and tracing setup.
pub mod config;
pub mod error;
pub mod middleware;
pub mod observability;
