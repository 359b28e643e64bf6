//! Spindrift Simulation - Deterministic swarm client for offline testing.

#![warn(missing_docs)]
#![warn(clippy::missing_errors_doc)]
#![deny(clippy::missing_panics_doc)]
//!
//! This crate provides an in-memory `SwarmClient` implementation that
//! serves file bytes from a buffer with controllable availability,
//! failure injection, and delays, enabling complete end-to-end testing
//! of the streaming pipeline without any network dependencies.

pub mod in_memory_swarm;

pub use in_memory_swarm::InMemorySwarm;
