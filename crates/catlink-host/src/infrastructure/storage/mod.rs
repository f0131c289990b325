//! Storage infrastructure: configuration file persistence.
//!
//! The `config` sub-module reads the host's TOML file from the platform
//! config directory (or an explicit path), writes a default one on request,
//! and supplies defaults when the file does not exist yet.

pub mod config;
