//! Request admission gate.
//!
//! Bounds how many requests run a handler concurrently and how many more may
//! wait for a slot; everything beyond that, or waiting longer than the
//! configured deadline, gets an overload response. Usable as a tower layer
//! ([`MaxConnectionsLayer`]) or as a standalone gate in front of an HTTP
//! upstream ([`HttpServer`]).

pub mod admin;
pub mod admission;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;

pub use admission::{AdmissionController, MaxConnections, MaxConnectionsLayer};
pub use config::GateConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
