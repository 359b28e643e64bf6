//! Integration tests for the session lifecycle.
//!
//! Each test runs a complete session against the simulation swarm and
//! checks the teardown contract: whichever terminal event fires first
//! decides the exit code, every resource is released, and nothing is
//! released twice.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use reqwest::StatusCode;
use spindrift_core::SpindriftError;
use spindrift_core::config::SpindriftConfig;
use spindrift_core::lifecycle::{LifecycleState, StreamSession};
use spindrift_core::media::TargetFile;
use spindrift_core::scratch::ScratchDir;
use spindrift_core::swarm::SwarmClient;
use spindrift_sim::InMemorySwarm;
use tempfile::TempDir;

const CONTENT_LEN: u64 = 10_000;

fn content() -> Bytes {
    Bytes::from(vec![7u8; CONTENT_LEN as usize])
}

/// Starts a session over `swarm` with its scratch directory under a
/// fresh temp dir. The temp dir guard must outlive the session.
async fn session_fixture(
    swarm: InMemorySwarm,
    config: SpindriftConfig,
) -> (StreamSession, TempDir, PathBuf) {
    let base = tempfile::tempdir().expect("tempdir");
    let scratch_path = base.path().join("scratch");
    let scratch = ScratchDir::create(scratch_path.clone())
        .await
        .expect("scratch dir");

    let swarm: Arc<dyn SwarmClient> = Arc::new(swarm);
    let target = TargetFile {
        index: 0,
        name: "movie.mp4".to_string(),
        length: CONTENT_LEN,
    };

    let session = StreamSession::start(config, swarm, target, scratch)
        .await
        .expect("session must start");
    (session, base, scratch_path)
}

#[cfg(unix)]
fn executable_script(dir: &TempDir, name: &str, body: &str) -> String {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.path().join(name);
    std::fs::write(&path, body).expect("write script");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
        .expect("mark script executable");
    path.to_str().expect("utf-8 path").to_string()
}

#[tokio::test]
async fn test_download_completion_tears_down_exactly_once() {
    let swarm = InMemorySwarm::new("movie.mp4", content());
    let (session, _base, scratch_path) =
        session_fixture(swarm.clone(), SpindriftConfig::for_testing()).await;

    assert_eq!(session.state(), LifecycleState::Running);
    assert!(scratch_path.is_dir());

    let url = session.url();
    let run = tokio::spawn(session.run());

    // The stream is live while the session runs.
    let response = reqwest::get(url).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.bytes().await.unwrap().len() as u64, CONTENT_LEN);

    swarm.complete();

    let code = tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("completion must end the session")
        .unwrap();

    assert_eq!(code, 0);
    assert_eq!(swarm.shutdown_count(), 1);
    assert!(!scratch_path.exists());
}

#[tokio::test]
async fn test_swarm_failure_ends_session_with_exit_code_one() {
    let swarm = InMemorySwarm::new("movie.mp4", content());
    let (session, _base, scratch_path) =
        session_fixture(swarm.clone(), SpindriftConfig::for_testing()).await;

    let run = tokio::spawn(session.run());

    // The event watcher must be subscribed before the failure fires.
    tokio::time::sleep(Duration::from_millis(50)).await;
    swarm.fail("tracker unreachable");

    let code = tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("failure must end the session")
        .unwrap();

    assert_eq!(code, 1);
    assert_eq!(swarm.shutdown_count(), 1);
    assert!(!scratch_path.exists());
}

#[tokio::test]
async fn test_competing_terminal_events_tear_down_once() {
    let swarm = InMemorySwarm::new("movie.mp4", content());
    let (session, _base, scratch_path) =
        session_fixture(swarm.clone(), SpindriftConfig::for_testing()).await;

    let run = tokio::spawn(session.run());
    tokio::time::sleep(Duration::from_millis(50)).await;

    // The first event wins; the rest must be absorbed without a second
    // teardown.
    swarm.complete();
    swarm.fail("late failure");
    swarm.complete();

    let code = tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("session must end")
        .unwrap();

    assert_eq!(code, 0);
    assert_eq!(swarm.shutdown_count(), 1);
    assert!(!scratch_path.exists());
}

#[tokio::test]
async fn test_open_body_does_not_block_teardown() {
    // A frontier at zero parks every body read indefinitely.
    let swarm = InMemorySwarm::new("movie.mp4", content()).with_availability(0);
    let (session, _base, scratch_path) =
        session_fixture(swarm.clone(), SpindriftConfig::for_testing()).await;

    let url = session.url();
    let run = tokio::spawn(session.run());

    // Open a response whose body can never progress.
    let response = reqwest::get(url).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    swarm.complete();

    let code = tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("teardown must cut off the open body after its grace period")
        .unwrap();

    assert_eq!(code, 0);
    assert_eq!(swarm.shutdown_count(), 1);
    assert!(!scratch_path.exists());

    drop(response);
}

#[cfg(unix)]
#[tokio::test]
async fn test_player_exit_code_becomes_session_exit_code() {
    let dir = tempfile::tempdir().unwrap();
    let script = executable_script(&dir, "fake-player", "#!/bin/sh\nexit 3\n");

    let mut config = SpindriftConfig::for_testing();
    config.player.enabled = true;
    // A candidate with a path separator skips the PATH probe.
    config.player.candidates = vec![script];

    let swarm = InMemorySwarm::new("movie.mp4", content());
    let (session, _base, scratch_path) = session_fixture(swarm.clone(), config).await;

    let code = tokio::time::timeout(Duration::from_secs(5), session.run())
        .await
        .expect("player exit must end the session");

    assert_eq!(code, 3);
    assert_eq!(swarm.shutdown_count(), 1);
    assert!(!scratch_path.exists());
}

#[cfg(unix)]
#[tokio::test]
async fn test_killed_player_counts_as_clean_exit() {
    let dir = tempfile::tempdir().unwrap();
    let script = executable_script(&dir, "doomed-player", "#!/bin/sh\nkill -9 $$\n");

    let mut config = SpindriftConfig::for_testing();
    config.player.enabled = true;
    config.player.candidates = vec![script];

    let swarm = InMemorySwarm::new("movie.mp4", content());
    let (session, _base, scratch_path) = session_fixture(swarm.clone(), config).await;

    let code = tokio::time::timeout(Duration::from_secs(5), session.run())
        .await
        .expect("killed player must end the session");

    assert_eq!(code, 0);
    assert_eq!(swarm.shutdown_count(), 1);
    assert!(!scratch_path.exists());
}

#[tokio::test]
async fn test_failed_bind_releases_swarm_and_scratch() {
    // Occupy a port so the session's bind attempt collides.
    let blocker = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = blocker.local_addr().unwrap().port();

    let mut config = SpindriftConfig::for_testing();
    config.http.port = port;

    let swarm = InMemorySwarm::new("movie.mp4", content());
    let base = tempfile::tempdir().unwrap();
    let scratch_path = base.path().join("scratch");
    let scratch = ScratchDir::create(scratch_path.clone()).await.unwrap();

    let swarm_handle: Arc<dyn SwarmClient> = Arc::new(swarm.clone());
    let target = TargetFile {
        index: 0,
        name: "movie.mp4".to_string(),
        length: CONTENT_LEN,
    };

    let result = StreamSession::start(config, swarm_handle, target, scratch).await;

    assert!(matches!(result, Err(SpindriftError::Stream(_))));
    assert_eq!(swarm.shutdown_count(), 1);
    assert!(!scratch_path.exists());
}
