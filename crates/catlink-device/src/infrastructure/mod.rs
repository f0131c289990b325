//! Infrastructure layer for the display device.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `catlink_core`, but is never imported by the `application` layer.
//!
//! # Sub-modules
//!
//! - **`config`** – TOML settings for the simulator (identity, link timing,
//!   overflow policy).
//!
//! - **`display`** – `DisplayBackend` implementations.  The simulator logs
//!   render requests instead of driving a panel.
//!
//! - **`link`** – TCP listener standing in for the serial port, running the
//!   non-blocking cooperative loop.

pub mod config;
pub mod display;
pub mod link;
