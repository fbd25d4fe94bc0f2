//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Shutdown::trigger
//!
//! Shutdown (shutdown.rs):
//!     trigger → HTTP server stops accepting → in-flight and queued
//!     requests finish → admin server stops → exit
//! ```
//!
//! # Design Decisions
//! - Queued requests are not rejected on shutdown; they drain through the
//!   normal admission path or hit their queue deadline

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
