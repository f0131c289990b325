//! Infrastructure layer for the host application.
//!
//! Contains the OS-facing adapters: the serial/TCP link tasks and the
//! configuration file.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `catlink_core`, but MUST NOT be imported by the `application` layer.

pub mod link;
pub mod storage;
