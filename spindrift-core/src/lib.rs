//! Spindrift Core - Progressive swarm-to-HTTP video streaming
//!
//! This crate provides the building blocks for streaming a video file out
//! of a peer-to-peer swarm while it is still downloading: descriptor
//! parsing, target file selection, the range stream server, progress
//! reporting, player launching, and the session lifecycle that tears
//! everything down exactly once.

pub mod config;
pub mod descriptor;
pub mod lifecycle;
pub mod media;
pub mod player;
pub mod progress;
pub mod scratch;
pub mod streaming;
pub mod swarm;
pub mod tracing_setup;

// Re-export main types for convenient access
pub use config::SpindriftConfig;
pub use descriptor::{Descriptor, DescriptorError, InfoHash};
pub use lifecycle::{LifecycleState, ShutdownTrigger, StreamSession};
pub use media::{MediaError, TargetFile};
pub use scratch::ScratchDir;
pub use streaming::{StreamError, StreamServer};
pub use swarm::{SwarmClient, SwarmError, SwarmEvent, SwarmFile, SwarmStats};

/// Errors that can bubble up from any Spindrift subsystem.
#[derive(Debug, thiserror::Error)]
pub enum SpindriftError {
    #[error("Descriptor error: {0}")]
    Descriptor(#[from] DescriptorError),

    #[error("Media selection error: {0}")]
    Media(#[from] MediaError),

    #[error("Swarm error: {0}")]
    Swarm(#[from] SwarmError),

    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SpindriftError {
    /// Returns a user-friendly error message suitable for display.
    pub fn user_message(&self) -> String {
        match self {
            SpindriftError::Descriptor(e) => match e {
                DescriptorError::NotMagnet { .. } => {
                    "Not a magnet link (expected a magnet:?xt=urn:btih:... URI)".to_string()
                }
                _ => format!("Invalid magnet link: {e}"),
            },
            SpindriftError::Media(e) => match e {
                MediaError::NoVideoFile { .. } => {
                    "No video file found in this torrent (use --file-index to pick one)".to_string()
                }
                MediaError::IndexOutOfBounds {
                    index,
                    member_count,
                } => {
                    format!("File index {index} does not exist ({member_count} files; see --list)")
                }
            },
            SpindriftError::Swarm(e) => match e {
                SwarmError::JoinFailed { reason } => {
                    format!("Could not join the swarm: {reason}")
                }
                _ => "Swarm error occurred".to_string(),
            },
            SpindriftError::Stream(e) => match e {
                StreamError::BindFailed { address, .. } => {
                    format!("Could not listen on {address} (is the port in use? try --port)")
                }
                _ => "Streaming error occurred".to_string(),
            },
            SpindriftError::Io(_) => "File system error occurred".to_string(),
        }
    }

    /// Checks if this error is due to user input validation.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            SpindriftError::Descriptor(_) | SpindriftError::Media(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, SpindriftError>;
