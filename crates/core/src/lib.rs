//! Shared types, errors and configuration for the WeaveDB core.
//!
//! This crate sits under every other crate in the workspace: the `Value`
//! and `Entity` data model (spec §3), the unified `Error` type (spec §7),
//! key-layout/encoding helpers shared by every keyspace (spec §4.2, §4.4,
//! §4.5), the cooperative cancellation primitive (spec §5), and the
//! enumerated configuration surface (spec §6).

#![warn(missing_docs)]

pub mod config;
pub mod deadline;
pub mod entity;
pub mod error;
pub mod key;
pub mod value;

pub use config::WeaveConfig;
pub use deadline::Deadline;
pub use entity::Entity;
pub use error::{Error, Result};
pub use value::Value;
