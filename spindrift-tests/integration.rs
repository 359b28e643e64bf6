//! Integration tests for Spindrift
//!
//! These tests drive the real stream server and session lifecycle against
//! the in-memory simulation swarm: actual TCP listeners, actual HTTP
//! requests, actual teardown of scratch directories and player processes.

#[path = "integration/range_serving.rs"]
mod range_serving;

#[path = "integration/streaming_resilience.rs"]
mod streaming_resilience;

#[path = "integration/lifecycle.rs"]
mod lifecycle;
