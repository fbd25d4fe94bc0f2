//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, middleware stack)
//!     → admission gate (run now, queue, or reject)
//!     → proxy.rs (forward to upstream, stream response back)
//! ```

pub mod proxy;
pub mod server;

pub use server::{HttpServer, ServerError};
