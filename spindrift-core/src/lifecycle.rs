//! Session lifecycle: startup ordering and exactly-once teardown.
//!
//! Three independent subsystems can end a session: the swarm engine, the
//! spawned player, and the operator. All terminal events funnel through
//! one channel; the first one received drives a single teardown run, and
//! an atomic state cell guarantees later triggers are no-ops.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::SpindriftError;
use crate::config::SpindriftConfig;
use crate::media::TargetFile;
use crate::player::PlayerLauncher;
use crate::progress::ProgressReporter;
use crate::scratch::ScratchDir;
use crate::streaming::StreamServer;
use crate::swarm::{SwarmClient, SwarmEvent};

/// Terminal events that end a streaming session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownTrigger {
    /// The swarm engine hit a fatal error.
    SwarmFailed { reason: String },
    /// The download finished.
    DownloadComplete,
    /// The foreground player process exited.
    PlayerExited { code: i32 },
    /// Ctrl-C, or SIGTERM on unix.
    Interrupted,
}

impl ShutdownTrigger {
    /// Process exit status for a session ended by this trigger.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::SwarmFailed { .. } => 1,
            Self::DownloadComplete | Self::Interrupted => 0,
            Self::PlayerExited { code } => *code,
        }
    }
}

impl fmt::Display for ShutdownTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SwarmFailed { reason } => write!(f, "swarm failure: {reason}"),
            Self::DownloadComplete => write!(f, "download complete"),
            Self::PlayerExited { code } => write!(f, "player exited with code {code}"),
            Self::Interrupted => write!(f, "interrupted"),
        }
    }
}

/// Session lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Running,
    ShuttingDown,
    Terminated,
}

const RUNNING: u8 = 0;
const SHUTTING_DOWN: u8 = 1;
const TERMINATED: u8 = 2;

/// Atomic cell enforcing the one-way Running -> ShuttingDown -> Terminated
/// progression.
#[derive(Debug, Default)]
pub struct StateCell {
    state: AtomicU8,
}

impl StateCell {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(RUNNING),
        }
    }

    /// Attempts Running -> ShuttingDown. Only the first caller wins.
    pub fn begin_shutdown(&self) -> bool {
        self.state
            .compare_exchange(RUNNING, SHUTTING_DOWN, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Marks teardown complete.
    pub fn finish(&self) {
        self.state.store(TERMINATED, Ordering::Release);
    }

    pub fn current(&self) -> LifecycleState {
        match self.state.load(Ordering::Acquire) {
            RUNNING => LifecycleState::Running,
            SHUTTING_DOWN => LifecycleState::ShuttingDown,
            _ => LifecycleState::Terminated,
        }
    }
}

/// One end-to-end streaming session.
///
/// Owns every resource with a teardown obligation: the swarm handle, the
/// stream server socket, the progress timer, and the scratch directory.
pub struct StreamSession {
    config: SpindriftConfig,
    swarm: Arc<dyn SwarmClient>,
    target: TargetFile,
    server: StreamServer,
    progress: ProgressReporter,
    scratch: ScratchDir,
    state: Arc<StateCell>,
    triggers_tx: mpsc::Sender<ShutdownTrigger>,
    triggers_rx: mpsc::Receiver<ShutdownTrigger>,
}

impl StreamSession {
    /// Binds the stream server and starts progress reporting.
    ///
    /// On failure the resources acquired before the call (swarm join,
    /// scratch directory) are released before the error returns, so the
    /// caller never has to unwind a half-built session.
    ///
    /// # Errors
    ///
    /// - `SpindriftError::Stream` - Listening socket could not be bound
    pub async fn start(
        config: SpindriftConfig,
        swarm: Arc<dyn SwarmClient>,
        target: TargetFile,
        scratch: ScratchDir,
    ) -> Result<Self, SpindriftError> {
        let server =
            match StreamServer::bind(config.http.clone(), Arc::clone(&swarm), target.clone()).await
            {
                Ok(server) => server,
                Err(e) => {
                    release_swarm_and_scratch(&swarm, &scratch).await;
                    return Err(e.into());
                }
            };

        let progress =
            ProgressReporter::spawn(Arc::clone(&swarm), target.index, config.progress.clone());

        let (triggers_tx, triggers_rx) = mpsc::channel(4);

        Ok(Self {
            config,
            swarm,
            target,
            server,
            progress,
            scratch,
            state: Arc::new(StateCell::new()),
            triggers_tx,
            triggers_rx,
        })
    }

    /// URL the stream is served on.
    pub fn url(&self) -> String {
        self.server.url()
    }

    pub fn target(&self) -> &TargetFile {
        &self.target
    }

    pub fn state(&self) -> LifecycleState {
        self.state.current()
    }

    /// Runs the session to completion and returns the process exit code.
    ///
    /// Launches the player, then waits for the first terminal trigger
    /// (player exit, swarm failure, download completion, interrupt) and
    /// tears everything down.
    pub async fn run(mut self) -> i32 {
        self.watch_interrupts();
        self.watch_swarm_events();

        let launcher = PlayerLauncher::new(self.config.player.clone());
        let launch = launcher.launch(&self.url(), self.triggers_tx.clone()).await;
        debug!("Player launch outcome: {launch:?}");

        let trigger = self
            .triggers_rx
            .recv()
            .await
            .unwrap_or(ShutdownTrigger::Interrupted);

        info!("Session ending ({trigger})");
        self.teardown(trigger).await
    }

    fn watch_interrupts(&self) {
        let triggers = self.triggers_tx.clone();
        tokio::spawn(async move {
            wait_for_interrupt().await;
            let _ = triggers.send(ShutdownTrigger::Interrupted).await;
        });
    }

    fn watch_swarm_events(&self) {
        let mut events = self.swarm.subscribe();
        let triggers = self.triggers_tx.clone();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(SwarmEvent::Complete) => {
                        let _ = triggers.send(ShutdownTrigger::DownloadComplete).await;
                        break;
                    }
                    Ok(SwarmEvent::Failed { reason }) => {
                        let _ = triggers.send(ShutdownTrigger::SwarmFailed { reason }).await;
                        break;
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    /// Teardown sequence: progress timer, server socket, swarm handle,
    /// scratch directory. Step failures log at warn and the sequence
    /// continues; nothing runs twice.
    async fn teardown(self, trigger: ShutdownTrigger) -> i32 {
        if !self.state.begin_shutdown() {
            return trigger.exit_code();
        }

        let Self {
            config,
            swarm,
            mut server,
            progress,
            scratch,
            state,
            ..
        } = self;

        progress.stop().await;

        if let Err(e) = server.shutdown(config.shutdown.http_grace).await {
            warn!("Stream server teardown: {e}");
        }

        match tokio::time::timeout(config.shutdown.swarm_grace, swarm.shutdown()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Swarm teardown: {e}"),
            Err(_) => warn!(
                "Swarm teardown did not finish within {:?}",
                config.shutdown.swarm_grace
            ),
        }

        if let Err(e) = scratch.remove().await {
            warn!("Scratch directory removal: {e}");
        }

        state.finish();
        info!("Session terminated");

        trigger.exit_code()
    }
}

/// Best-effort release of the swarm join and scratch directory.
///
/// For exit paths that never built a full session: startup failures and
/// the list-members flow.
pub async fn release_swarm_and_scratch(swarm: &Arc<dyn SwarmClient>, scratch: &ScratchDir) {
    if let Err(e) = swarm.shutdown().await {
        warn!("Swarm release: {e}");
    }
    if let Err(e) = scratch.remove().await {
        warn!("Scratch directory removal: {e}");
    }
}

#[cfg(unix)]
async fn wait_for_interrupt() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            warn!("Failed to install SIGTERM handler: {e}");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_interrupt() {
    let _ = tokio::signal::ctrl_c().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        let failed = ShutdownTrigger::SwarmFailed {
            reason: "tracker unreachable".to_string(),
        };
        assert_eq!(failed.exit_code(), 1);
        assert_eq!(ShutdownTrigger::DownloadComplete.exit_code(), 0);
        assert_eq!(ShutdownTrigger::Interrupted.exit_code(), 0);
        assert_eq!(ShutdownTrigger::PlayerExited { code: 0 }.exit_code(), 0);
        assert_eq!(ShutdownTrigger::PlayerExited { code: 3 }.exit_code(), 3);
    }

    #[test]
    fn test_trigger_display() {
        assert_eq!(
            ShutdownTrigger::PlayerExited { code: 2 }.to_string(),
            "player exited with code 2"
        );
        assert_eq!(ShutdownTrigger::Interrupted.to_string(), "interrupted");
    }

    #[test]
    fn test_state_cell_transitions_once() {
        let cell = StateCell::new();
        assert_eq!(cell.current(), LifecycleState::Running);

        assert!(cell.begin_shutdown());
        assert_eq!(cell.current(), LifecycleState::ShuttingDown);

        assert!(!cell.begin_shutdown());
        assert_eq!(cell.current(), LifecycleState::ShuttingDown);

        cell.finish();
        assert_eq!(cell.current(), LifecycleState::Terminated);
    }

    #[test]
    fn test_concurrent_triggers_one_winner() {
        let cell = Arc::new(StateCell::new());
        let mut handles = Vec::new();

        for _ in 0..8 {
            let cell = Arc::clone(&cell);
            handles.push(std::thread::spawn(move || {
                usize::from(cell.begin_shutdown())
            }));
        }

        let wins: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(wins, 1);
    }
}
