//! Application layer for the host side of the link.
//!
//! # What lives here? (for beginners)
//!
//! Everything in this layer is plain state machines with no sockets, serial
//! ports or tasks.  The infrastructure layer owns the I/O and calls in here
//! with the bytes it read and the current time.
//!
//! # Sub-modules
//!
//! - **`host_session`** – One link's negotiation driver, single-request
//!   tracker, stale-reply quarantine and caller-contract checks.
//!
//! - **`manage_links`** – The registry of open links keyed by `LinkId`, used
//!   for status output when several displays are attached.

pub mod host_session;
pub mod manage_links;
