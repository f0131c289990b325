//! catlink-device library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`, the
//! host crate's tests and the binary in `main.rs` share the same module tree.
//!
//! # What does the device do? (for beginners)
//!
//! The device is the small display on the other end of the serial cable.
//! It waits for the host to say `HELLO`, answers with its protocol version
//! and capability bits, and then executes display commands (`SET MODE=`,
//! `TRIGGER NAME=`, `DATA TEMPS=`), replying to each with `ACK` or `NACK`.
//! A host that never says `HELLO` is served in the legacy vocabulary
//! (`MODE <name>`, `TRIGGER <id>`, answered with `OK` / `ERR`).
//!
//! The real firmware runs on a microcontroller.  This crate holds the same
//! protocol logic plus a TCP simulator so hosts can be tested without
//! hardware.

/// Application layer: the per-link session and command dispatch.
pub mod application;

/// Infrastructure layer: config, display backends and the TCP link.
pub mod infrastructure;
