//! Application layer for the display device.
//!
//! # What does the device do with a line?
//!
//! - **`device_session`** – Owns one link's framer and negotiator and runs
//!   the cooperative pass: bytes in, replies out.
//!
//! - **`dispatch`** – Turns a typed host command into exactly one reply and
//!   forwards rendering work to a `DisplayBackend` implementation that is
//!   injected at construction time.

pub mod device_session;
pub mod dispatch;
