//! Centralized configuration for Spindrift.
//!
//! All tunable parameters and settings are defined here to avoid
//! hard-coded values scattered throughout the codebase.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Central configuration for all Spindrift components.
///
/// Groups related configuration settings into logical sections.
/// Supports environment variable overrides for runtime customization.
#[derive(Debug, Clone, Default)]
pub struct SpindriftConfig {
    pub http: HttpConfig,
    pub progress: ProgressConfig,
    pub player: PlayerConfig,
    pub shutdown: ShutdownConfig,
    pub storage: StorageConfig,
}

/// Stream server configuration.
///
/// Controls the local HTTP endpoint that media players read from.
/// The server always binds to loopback; only the port is tunable.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// TCP port for the stream server (0 selects an ephemeral port)
    pub port: u16,
    /// Bytes served per body chunk
    pub chunk_size: usize,
    /// Per-chunk swarm read deadline (None = wait indefinitely)
    pub read_timeout: Option<Duration>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            port: 8888,
            chunk_size: 262_144, // 256 KiB
            read_timeout: None,  // Sparse swarms can stall for minutes
        }
    }
}

impl HttpConfig {
    /// Returns the loopback socket address the stream server binds to.
    pub fn bind_address(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::LOCALHOST, self.port))
    }
}

/// Download progress reporting configuration.
#[derive(Debug, Clone)]
pub struct ProgressConfig {
    /// Interval between progress samples
    pub interval: Duration,
    /// Deadline for a single stats query before the sample is skipped
    pub stats_deadline: Duration,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            stats_deadline: Duration::from_secs(2),
        }
    }
}

/// Media player launch configuration.
///
/// Candidates are tried in order; the first binary found on PATH wins.
#[derive(Debug, Clone)]
pub struct PlayerConfig {
    /// Player commands to probe, in preference order
    pub candidates: Vec<String>,
    /// Whether to launch a player at all
    pub enabled: bool,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            candidates: vec![
                "mpv".to_string(),
                "vlc".to_string(),
                "mplayer".to_string(),
            ],
            enabled: true,
        }
    }
}

/// Teardown grace periods.
///
/// Each teardown step waits at most this long before the session
/// moves on to the next step.
#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    /// Grace period for the stream server to close its listener
    pub http_grace: Duration,
    /// Grace period for the swarm engine to release its resources
    pub swarm_grace: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            http_grace: Duration::from_secs(3),
            swarm_grace: Duration::from_secs(5),
        }
    }
}

/// Scratch storage configuration.
#[derive(Debug, Clone, Default)]
pub struct StorageConfig {
    /// Scratch directory for downloaded pieces (None = per-hash dir under the OS temp dir)
    pub scratch_dir: Option<PathBuf>,
}

impl SpindriftConfig {
    /// Creates configuration with environment variable overrides.
    ///
    /// Allows runtime configuration via environment variables while
    /// maintaining sensible defaults. Command-line flags are applied
    /// on top of this and take precedence.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(port) = std::env::var("SPINDRIFT_PORT") {
            if let Ok(port) = port.parse::<u16>() {
                config.http.port = port;
            }
        }

        if let Ok(timeout) = std::env::var("SPINDRIFT_READ_TIMEOUT") {
            if let Ok(seconds) = timeout.parse::<u64>() {
                config.http.read_timeout = Some(Duration::from_secs(seconds));
            }
        }

        if let Ok(interval) = std::env::var("SPINDRIFT_PROGRESS_INTERVAL") {
            if let Ok(seconds) = interval.parse::<u64>() {
                config.progress.interval = Duration::from_secs(seconds);
            }
        }

        config
    }

    /// Creates a configuration optimized for testing.
    ///
    /// Uses an ephemeral port, fast progress sampling, and short grace
    /// periods so lifecycle tests finish quickly.
    pub fn for_testing() -> Self {
        Self {
            http: HttpConfig {
                port: 0, // Ephemeral port avoids collisions between tests
                ..HttpConfig::default()
            },
            progress: ProgressConfig {
                interval: Duration::from_millis(50),
                stats_deadline: Duration::from_millis(100),
            },
            player: PlayerConfig {
                candidates: Vec::new(),
                enabled: false,
            },
            shutdown: ShutdownConfig {
                http_grace: Duration::from_millis(500),
                swarm_grace: Duration::from_millis(500),
            },
            storage: StorageConfig::default(),
        }
    }
}
