//! Gateway Configuration Module
//!
//! Provides the validated configuration handed to every gateway component.
//!
//! ## Loading Order
//!
//! 1. Explicit path (the `--config` CLI flag)
//! 2. `GATEWAY_CONFIG` environment variable (path to TOML file)
//! 3. `gateway.toml` in the current working directory
//! 4. Built-in defaults
//!
//! Environment variables (optionally from a `.env` file) are applied on top of
//! whichever source was used, then the result is validated. Components receive
//! the configuration by reference at construction; nothing reads ambient state.

mod gateway_config;
pub mod defaults;

pub use gateway_config::*;
