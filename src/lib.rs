//! cmping - round-trip latency probe for chatmail relays
//!
//! Sends tagged, timestamped probe messages from an account on one relay to an
//! account on another (or the same) relay, correlates their arrival on the
//! receiving side and reports per-probe and aggregate round-trip statistics,
//! much like `ping` does for ICMP.

pub mod cancel;
pub mod ping;
pub mod relay;

pub use cancel::{CancelReason, CancelToken};
