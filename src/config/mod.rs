//! Engine Configuration Module
//!
//! Provides the factory-wide configuration loaded from TOML, covering every
//! threshold of the reconciliation and metrics engine.
//!
//! ## Loading Order
//!
//! 1. `BRICKLINE_CONFIG` environment variable (path to TOML file)
//! 2. `brickline.toml` in the current working directory
//! 3. Built-in defaults
//!
//! The binary loads the config once and hands each component the sections it
//! needs, so tests build configs directly instead of touching process state.

mod engine_config;
pub mod defaults;
pub mod validation;

pub use engine_config::*;
