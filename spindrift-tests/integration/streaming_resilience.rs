//! Integration tests for stream delivery under swarm trouble.
//!
//! Stalled availability, injected read failures, and clients that walk
//! away mid-body all hit a live server here. One request's trouble must
//! never leak into the next request.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use reqwest::{Client, StatusCode, header};
use spindrift_core::config::HttpConfig;
use spindrift_core::media::TargetFile;
use spindrift_core::streaming::StreamServer;
use spindrift_core::swarm::SwarmClient;
use spindrift_sim::InMemorySwarm;

fn patterned(len: usize) -> Bytes {
    Bytes::from((0..len).map(|i| (i % 251) as u8).collect::<Vec<_>>())
}

fn target(index: usize, name: &str, length: u64) -> TargetFile {
    TargetFile {
        index,
        name: name.to_string(),
        length,
    }
}

async fn serve_with_config(
    config: HttpConfig,
    swarm: &InMemorySwarm,
    target: TargetFile,
) -> StreamServer {
    let swarm: Arc<dyn SwarmClient> = Arc::new(swarm.clone());
    StreamServer::bind(config, swarm, target)
        .await
        .expect("stream server must bind an ephemeral port")
}

async fn serve(swarm: &InMemorySwarm, target: TargetFile) -> StreamServer {
    let config = HttpConfig {
        port: 0,
        ..HttpConfig::default()
    };
    serve_with_config(config, swarm, target).await
}

#[tokio::test]
async fn test_headers_arrive_before_bytes_are_available() {
    let swarm = InMemorySwarm::new("movie.mp4", patterned(50_000)).with_availability(0);
    let server = serve(&swarm, target(0, "movie.mp4", 50_000)).await;

    // Nothing is downloaded yet; the status line and headers must still
    // come back immediately so the player can set up its pipeline.
    let response = tokio::time::timeout(
        Duration::from_secs(1),
        Client::new().get(server.url()).send(),
    )
    .await
    .expect("headers must not wait for the swarm")
    .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_LENGTH).unwrap(),
        "50000"
    );
}

#[tokio::test]
async fn test_body_waits_for_availability_frontier() {
    let content = patterned(100_000);
    let swarm = InMemorySwarm::new("movie.mp4", content.clone()).with_availability(10_000);
    let server = serve(&swarm, target(0, "movie.mp4", 100_000)).await;

    let fetch = {
        let url = server.url();
        tokio::spawn(async move { reqwest::get(url).await.unwrap().bytes().await.unwrap() })
    };

    // Only a prefix is downloaded; the body must still be in flight.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!fetch.is_finished());

    swarm.advance_availability(100_000);
    let body = tokio::time::timeout(Duration::from_secs(5), fetch)
        .await
        .expect("body must complete once the frontier covers the file")
        .unwrap();
    assert_eq!(body, content);
}

#[tokio::test]
async fn test_seek_past_frontier_completes_after_download_catches_up() {
    let content = patterned(200_000);
    let swarm = InMemorySwarm::new("movie.mp4", content.clone()).with_availability(50_000);
    let server = serve(&swarm, target(0, "movie.mp4", 200_000)).await;

    let fetch = {
        let url = server.url();
        tokio::spawn(async move {
            Client::new()
                .get(url)
                .header(header::RANGE, "bytes=150000-159999")
                .send()
                .await
                .unwrap()
                .bytes()
                .await
                .unwrap()
        })
    };

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!fetch.is_finished());

    // The priority hint for the seek went out while the read was parked.
    assert_eq!(swarm.prioritized_ranges(), vec![(0, 150_000..160_000)]);

    swarm.advance_availability(160_000);
    let body = tokio::time::timeout(Duration::from_secs(5), fetch)
        .await
        .expect("seek must be satisfied once its pieces arrive")
        .unwrap();
    assert_eq!(body, content.slice(150_000..160_000));
}

#[tokio::test]
async fn test_playback_keeps_pace_with_a_progressing_download() {
    let content = patterned(120_000);
    let swarm = InMemorySwarm::new("movie.mp4", content.clone()).with_availability(0);
    let config = HttpConfig {
        port: 0,
        chunk_size: 30_000,
        ..HttpConfig::default()
    };
    let server = serve_with_config(config, &swarm, target(0, "movie.mp4", 120_000)).await;

    // Feed the frontier in slices while the body is being read.
    let feeder = {
        let swarm = swarm.clone();
        tokio::spawn(async move {
            for end in [30_000u64, 60_000, 90_000, 120_000] {
                tokio::time::sleep(Duration::from_millis(20)).await;
                swarm.advance_availability(end);
            }
        })
    };

    let body = reqwest::get(server.url()).await.unwrap().bytes().await.unwrap();
    feeder.await.unwrap();

    assert_eq!(body, content);
}

#[tokio::test]
async fn test_aborted_download_leaves_server_healthy() {
    let content = patterned(256_000);
    let swarm =
        InMemorySwarm::new("movie.mp4", content.clone()).with_read_delay(Duration::from_millis(5));
    let config = HttpConfig {
        port: 0,
        chunk_size: 8192,
        ..HttpConfig::default()
    };
    let server = serve_with_config(config, &swarm, target(0, "movie.mp4", 256_000)).await;

    // Read one chunk, then hang up mid-body like a seeking player.
    let client = Client::new();
    let mut response = client.get(server.url()).send().await.unwrap();
    let first = response.chunk().await.unwrap();
    assert!(first.is_some());
    drop(response);

    // The next request streams the whole file.
    let body = client
        .get(server.url())
        .send()
        .await
        .unwrap()
        .bytes()
        .await
        .unwrap();
    assert_eq!(body, content);
}

#[tokio::test]
async fn test_failed_read_truncates_body_but_not_the_server() {
    let content = patterned(64_000);
    let swarm = InMemorySwarm::new("movie.mp4", content.clone());
    let config = HttpConfig {
        port: 0,
        chunk_size: 16_000,
        ..HttpConfig::default()
    };
    let server = serve_with_config(config, &swarm, target(0, "movie.mp4", 64_000)).await;

    swarm.fail_next_read();

    // The injected failure lands on the first chunk. Depending on flush
    // timing the client sees it on the response head or mid-body; either
    // way the transfer must not succeed.
    let client = Client::new();
    let failed = match client.get(server.url()).send().await {
        Ok(response) => response.bytes().await.is_err(),
        Err(_) => true,
    };
    assert!(failed);

    // Recovery needs no restart.
    let body = client
        .get(server.url())
        .send()
        .await
        .unwrap()
        .bytes()
        .await
        .unwrap();
    assert_eq!(body, content);

    // One failed read, then four clean chunks.
    assert_eq!(swarm.read_count(), 5);
}

#[tokio::test]
async fn test_stalled_swarm_read_times_out_when_configured() {
    let swarm = InMemorySwarm::new("movie.mp4", patterned(10_000)).with_availability(0);
    let config = HttpConfig {
        port: 0,
        read_timeout: Some(Duration::from_millis(100)),
        ..HttpConfig::default()
    };
    let server = serve_with_config(config, &swarm, target(0, "movie.mp4", 10_000)).await;

    let result = reqwest::get(server.url()).await.unwrap().bytes().await;
    assert!(result.is_err());
}
