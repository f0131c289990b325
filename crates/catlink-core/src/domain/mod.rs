//! Session logic for catlink links.
//!
//! Pure state machines with no I/O: the per-link [`session::SessionState`],
//! monotonic [`timers`], and the host/device handshake in [`negotiation`].
//! Both binaries drive these from their own loops and supply `now`
//! themselves.

pub mod negotiation;
pub mod session;
pub mod timers;
