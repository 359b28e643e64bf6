//! Spindrift rqbit - librqbit swarm engine binding

#![deny(missing_docs)]
#![deny(clippy::missing_errors_doc)]
#![deny(clippy::missing_panics_doc)]
#![warn(clippy::too_many_lines)]
//!
//! Wraps a `librqbit` session as the production [`SwarmClient`] so the
//! streaming side of Spindrift never touches engine internals.
//!
//! [`SwarmClient`]: spindrift_core::swarm::SwarmClient

pub mod session;

pub use session::RqbitSwarm;
