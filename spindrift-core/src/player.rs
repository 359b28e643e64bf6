//! External media player launching.

use std::path::PathBuf;

use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::PlayerConfig;
use crate::lifecycle::ShutdownTrigger;

/// How the stream URL was handed to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerLaunch {
    /// A player process was spawned; its exit feeds the lifecycle.
    Spawned { binary: String },
    /// No player binary found; the URL was opened in the default browser.
    Browser,
    /// Launching disabled; the URL was only printed.
    Disabled,
}

/// Launches the first available player binary against the stream URL.
pub struct PlayerLauncher {
    config: PlayerConfig,
}

impl PlayerLauncher {
    pub fn new(config: PlayerConfig) -> Self {
        Self { config }
    }

    /// Starts a player (or fallback) for `url`.
    ///
    /// A spawned player gets an exit watcher that reports its exit code as
    /// a shutdown trigger. The browser fallback and disabled mode register
    /// no watcher; those sessions end via interrupt or download completion.
    pub async fn launch(&self, url: &str, triggers: mpsc::Sender<ShutdownTrigger>) -> PlayerLaunch {
        if !self.config.enabled {
            info!("Player launch disabled; stream available at {url}");
            return PlayerLaunch::Disabled;
        }

        for candidate in &self.config.candidates {
            let Some(binary) = locate_binary(candidate) else {
                debug!("Player candidate not found: {candidate}");
                continue;
            };

            match Command::new(&binary).arg(url).spawn() {
                Ok(mut child) => {
                    info!("Launched player: {}", binary.display());
                    let triggers = triggers.clone();
                    tokio::spawn(async move {
                        let code = match child.wait().await {
                            // Killed by a signal carries no code; treat as clean.
                            Ok(status) => status.code().unwrap_or(0),
                            Err(e) => {
                                warn!("Failed to observe player exit: {e}");
                                0
                            }
                        };
                        let _ = triggers.send(ShutdownTrigger::PlayerExited { code }).await;
                    });
                    return PlayerLaunch::Spawned {
                        binary: candidate.clone(),
                    };
                }
                Err(e) => {
                    warn!("Failed to launch {}: {e}", binary.display());
                }
            }
        }

        info!("No player binary found; opening {url} in the default browser");
        open_browser(url);
        PlayerLaunch::Browser
    }
}

/// Resolves a candidate to a runnable path.
///
/// Candidates containing a path separator are taken as given; bare names
/// are searched on `PATH`.
fn locate_binary(candidate: &str) -> Option<PathBuf> {
    if candidate.contains(['/', '\\']) {
        let path = PathBuf::from(candidate);
        return path.is_file().then_some(path);
    }
    find_in_path(candidate)
}

fn find_in_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}

/// Fire-and-forget browser open; failure only logs.
fn open_browser(url: &str) {
    #[cfg(target_os = "macos")]
    let result = Command::new("open").arg(url).spawn();
    #[cfg(target_os = "windows")]
    let result = Command::new("cmd").args(["/C", "start", url]).spawn();
    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    let result = Command::new("xdg-open").arg(url).spawn();

    if let Err(e) = result {
        warn!("Failed to open browser: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn test_find_in_path_locates_shell() {
        assert!(find_in_path("sh").is_some());
    }

    #[test]
    fn test_find_in_path_misses_unknown_binary() {
        assert!(find_in_path("definitely-not-a-real-media-player").is_none());
    }

    #[test]
    fn test_locate_binary_with_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("player");
        std::fs::write(&script, "#!/bin/sh\n").unwrap();

        let found = locate_binary(script.to_str().unwrap());
        assert_eq!(found, Some(script));

        let missing = dir.path().join("absent");
        assert!(locate_binary(missing.to_str().unwrap()).is_none());
    }

    #[tokio::test]
    async fn test_disabled_launcher_registers_nothing() {
        let launcher = PlayerLauncher::new(PlayerConfig {
            candidates: vec!["mpv".to_string()],
            enabled: false,
        });
        let (tx, mut rx) = mpsc::channel(1);

        let launch = launcher.launch("http://127.0.0.1:8888", tx).await;

        assert_eq!(launch, PlayerLaunch::Disabled);
        assert!(rx.try_recv().is_err());
    }
}
