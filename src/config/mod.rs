//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → GateConfig (validated)
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → sent to the HTTP server over an mpsc channel
//!     → queue deadline and overload response swapped atomically
//! ```
//!
//! # Design Decisions
//! - Pool capacities and addresses are fixed at startup; changing them
//!   needs a restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, ConfigError};
pub use schema::{
    AdminConfig, AdmissionConfig, GateConfig, ListenerConfig, LogFormat, ObservabilityConfig,
    OverloadConfig, UpstreamConfig,
};
