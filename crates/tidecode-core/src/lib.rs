//! Core plumbing for the tidecode runtime.
//!
//! This crate holds the two pieces every other subsystem talks through:
//!
//! - [`bus`] — a typed publish/subscribe bus for state transitions
//!   (`pty.created`, `mcp.status`, ...). Events carry state changes only,
//!   never payload streams.
//! - [`config`] — the validated configuration record the core consumes.
//!   Parsing configuration files and CLI flags happens upstream; by the
//!   time a [`config::Config`] reaches this crate it is assumed
//!   well-formed apart from the checks in [`config::Config::validate`].

pub mod bus;
pub mod config;
pub mod error;

pub use bus::{Bus, BusEvent, Event};
pub use config::{Config, ProviderMap};
pub use error::{ConfigError, ConfigResult};
