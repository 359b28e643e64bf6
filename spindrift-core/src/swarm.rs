//! Core abstraction over the swarm download engine.
//!
//! This module defines the seam between the streaming side of Spindrift and
//! whatever BitTorrent engine feeds it. The stream server, progress reporter,
//! and lifecycle controller all talk to [`SwarmClient`] and never see engine
//! internals, which keeps them testable against an in-memory double.

use std::ops::Range;

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::broadcast;

/// A member file of the joined swarm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwarmFile {
    /// Zero-based position within the swarm's file list.
    pub index: usize,
    /// File name including extension, without directory components.
    pub name: String,
    /// Total size in bytes.
    pub length: u64,
}

/// Aggregate download counters sampled from the engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SwarmStats {
    /// Bytes of the target file downloaded and verified so far.
    pub downloaded_bytes: u64,
    /// Total size of the target file.
    pub total_bytes: u64,
    /// Currently connected peers.
    pub peer_count: usize,
}

/// Terminal events emitted by the swarm engine.
///
/// At most one terminal event is ever observed per session; everything
/// before it is recoverable and handled inside the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwarmEvent {
    /// The download finished and all pieces verified.
    Complete,
    /// The engine hit an unrecoverable failure.
    Failed {
        /// Engine-reported cause.
        reason: String,
    },
}

/// Errors surfaced by swarm engine operations.
#[derive(Debug, Error)]
pub enum SwarmError {
    /// Session creation or magnet resolution failed.
    #[error("Failed to join swarm: {reason}")]
    JoinFailed { reason: String },

    /// Swarm metadata has not resolved yet, so files cannot be enumerated.
    #[error("Swarm metadata unavailable: {reason}")]
    MetadataUnavailable { reason: String },

    /// A positioned read could not be satisfied.
    #[error("Swarm read failed at offset {offset}: {reason}")]
    ReadFailed { offset: u64, reason: String },

    /// The engine has already been torn down.
    #[error("Swarm engine is shut down")]
    EngineShutdown,

    /// Releasing engine resources failed.
    #[error("Swarm shutdown failed: {reason}")]
    ShutdownFailed { reason: String },
}

/// Async interface over a joined swarm.
///
/// Implementations present the chaotic, non-sequential arrival of pieces
/// as linear byte-range reads against individual member files. A read
/// blocks until the bytes it covers have been downloaded and verified.
#[async_trait::async_trait]
pub trait SwarmClient: Send + Sync {
    /// Enumerates member files in swarm order.
    ///
    /// # Errors
    ///
    /// - `SwarmError::MetadataUnavailable` - Metadata has not resolved yet
    async fn files(&self) -> Result<Vec<SwarmFile>, SwarmError>;

    /// Samples download counters for one member file.
    ///
    /// # Errors
    ///
    /// - `SwarmError::EngineShutdown` - The engine has been released
    async fn stats(&self, file_index: usize) -> Result<SwarmStats, SwarmError>;

    /// Reads exactly `length` bytes of a member file starting at `offset`.
    ///
    /// Blocks until the covering pieces have arrived. Callers must keep
    /// `offset + length` within the file; the whole-file clamp happens in
    /// the stream server before reads are issued.
    ///
    /// # Errors
    ///
    /// - `SwarmError::ReadFailed` - The engine could not produce the bytes
    /// - `SwarmError::EngineShutdown` - The engine was released mid-read
    async fn read_at(
        &self,
        file_index: usize,
        offset: u64,
        length: usize,
    ) -> Result<Bytes, SwarmError>;

    /// Hints the engine to fetch a byte range of a member file soon.
    ///
    /// Best-effort: failure to register the hint never fails the request
    /// that produced it.
    ///
    /// # Errors
    ///
    /// - `SwarmError::EngineShutdown` - The engine has been released
    async fn prioritize(&self, file_index: usize, range: Range<u64>) -> Result<(), SwarmError>;

    /// Subscribes to the engine's terminal event.
    fn subscribe(&self) -> broadcast::Receiver<SwarmEvent>;

    /// Releases network and engine resources.
    ///
    /// Idempotent: a second call is a no-op that reports success.
    ///
    /// # Errors
    ///
    /// - `SwarmError::ShutdownFailed` - The engine could not be released cleanly
    async fn shutdown(&self) -> Result<(), SwarmError>;
}
