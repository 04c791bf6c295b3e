//! Configuration surface for the ferry pipeline
//!
//! Typed configuration structs with serde defaults, TOML loading and
//! validation. Every knob has a sensible default; a completely empty
//! document is valid (the backend just stays unconfigured, which is a
//! degraded state rather than an error).

mod error;
mod pipeline;

pub use error::{ConfigError, Result};
pub use pipeline::{
    BackendConfig, OverflowSettings, PipelineConfig, TransportConfig,
};
