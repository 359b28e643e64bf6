//! Progressive HTTP streaming over a swarm download.
//!
//! The stream server speaks plain HTTP with Range support so media players
//! can seek; bytes come from the swarm as pieces arrive rather than from a
//! finished file on disk.

pub mod log_gate;
pub mod range;
pub mod server;

pub use log_gate::{LogGate, LogGates};
pub use range::{ByteRange, RangeSpec, UnsatisfiableRange, parse_range_header};
pub use server::{StreamError, StreamServer};
