//! Admission control subsystem.
//!
//! # Data Flow
//! ```text
//! Inbound request
//!     → service.rs (tower Service, extracts cancellation signal)
//!     → controller.rs (fast path → queue → race slot/deadline/cancel)
//!         → pool.rs (running pool, queue pool)
//!     → delegate handler (running permit held)
//!       or responder.rs (overload / queue timeout)
//!       or nothing (caller cancelled while queued)
//! ```
//!
//! # Design Decisions
//! - Permits are RAII guards; every exit path releases them
//! - No ordering guarantee among queued requests
//! - Queue deadline and overload responder are swappable at runtime

pub mod controller;
pub mod layer;
pub mod pool;
pub mod responder;
pub mod service;

pub use controller::{
    Admission, AdmissionController, AdmissionStats, AdmitPath, Admitted, RejectReason, Rejection,
};
pub use layer::MaxConnectionsLayer;
pub use pool::{Permit, PermitPool};
pub use responder::{OverloadResponder, StaticResponder, DEFAULT_OVERLOAD_MESSAGE};
pub use service::MaxConnections;
