//! Integration tests for progressive HTTP range serving.
//!
//! Every test binds the real stream server on an ephemeral loopback port
//! and drives it with a real HTTP client, so status codes, headers, and
//! body bytes are verified exactly as a media player would see them.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::future::join_all;
use reqwest::{Client, StatusCode, header};
use spindrift_core::config::HttpConfig;
use spindrift_core::media::{TargetFile, resolve_target};
use spindrift_core::streaming::StreamServer;
use spindrift_core::swarm::{SwarmClient, SwarmFile};
use spindrift_sim::InMemorySwarm;

/// Deterministic content where every byte encodes its own offset.
///
/// The period 251 is coprime to every power-of-two chunk size, so a
/// misaligned read shows up as a content mismatch, not just a bad length.
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

async fn serve(swarm: &InMemorySwarm, target: TargetFile) -> StreamServer {
    let config = HttpConfig {
        port: 0,
        ..HttpConfig::default()
    };
    serve_with_config(config, swarm, target).await
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

#[tokio::test]
async fn test_full_file_request_serves_exact_content() {
    let content = patterned(100_000);
    let swarm = InMemorySwarm::new("movie.mp4", content.clone());
    let server = serve(&swarm, target(0, "movie.mp4", 100_000)).await;

    let response = reqwest::get(server.url()).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "video/mp4"
    );
    assert_eq!(
        response.headers().get(header::CONTENT_LENGTH).unwrap(),
        "100000"
    );
    assert_eq!(
        response.headers().get(header::ACCEPT_RANGES).unwrap(),
        "bytes"
    );

    let body = response.bytes().await.unwrap();
    assert_eq!(body, content);
}

#[tokio::test]
async fn test_range_request_targets_correct_member() {
    // Typical release layout: clutter next to one big video member.
    let content = patterned(5_000_000);
    let files = vec![
        SwarmFile {
            index: 0,
            name: "readme.txt".to_string(),
            length: 100,
        },
        SwarmFile {
            index: 1,
            name: "movie.mkv".to_string(),
            length: 5_000_000,
        },
    ];
    let swarm = InMemorySwarm::with_files(files.clone(), 1, content.clone());

    let target = resolve_target(&files, None).unwrap();
    assert_eq!(target.index, 1);

    let server = serve(&swarm, target).await;
    let response = Client::new()
        .get(server.url())
        .header(header::RANGE, "bytes=1000-1999")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(
        response.headers().get(header::CONTENT_RANGE).unwrap(),
        "bytes 1000-1999/5000000"
    );
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "video/x-matroska"
    );

    let body = response.bytes().await.unwrap();
    assert_eq!(body.len(), 1000);
    assert_eq!(body, content.slice(1000..2000));

    // The seek also nudged the swarm toward the requested bytes.
    assert_eq!(swarm.prioritized_ranges(), vec![(1, 1000..2000)]);
}

#[tokio::test]
async fn test_suffix_range_serves_file_tail() {
    let content = patterned(100_000);
    let swarm = InMemorySwarm::new("movie.mp4", content.clone());
    let server = serve(&swarm, target(0, "movie.mp4", 100_000)).await;

    let response = Client::new()
        .get(server.url())
        .header(header::RANGE, "bytes=-500")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(
        response.headers().get(header::CONTENT_RANGE).unwrap(),
        "bytes 99500-99999/100000"
    );
    assert_eq!(
        response.bytes().await.unwrap(),
        content.slice(99_500..100_000)
    );
}

#[tokio::test]
async fn test_open_ended_range_runs_to_end_of_file() {
    let content = patterned(100_000);
    let swarm = InMemorySwarm::new("movie.mp4", content.clone());
    let server = serve(&swarm, target(0, "movie.mp4", 100_000)).await;

    let response = Client::new()
        .get(server.url())
        .header(header::RANGE, "bytes=60000-")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(
        response.headers().get(header::CONTENT_RANGE).unwrap(),
        "bytes 60000-99999/100000"
    );
    assert_eq!(response.bytes().await.unwrap(), content.slice(60_000..));
}

#[tokio::test]
async fn test_range_end_clamped_to_file_length() {
    let content = patterned(100_000);
    let swarm = InMemorySwarm::new("movie.mp4", content.clone());
    let server = serve(&swarm, target(0, "movie.mp4", 100_000)).await;

    // Players probe with huge end positions; the reply covers what exists.
    let response = Client::new()
        .get(server.url())
        .header(header::RANGE, "bytes=99000-200000")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(
        response.headers().get(header::CONTENT_RANGE).unwrap(),
        "bytes 99000-99999/100000"
    );
    assert_eq!(response.bytes().await.unwrap(), content.slice(99_000..));
}

#[tokio::test]
async fn test_range_past_end_of_file_rejected() {
    let swarm = InMemorySwarm::new("movie.mp4", patterned(100_000));
    let server = serve(&swarm, target(0, "movie.mp4", 100_000)).await;

    let response = Client::new()
        .get(server.url())
        .header(header::RANGE, "bytes=100000-")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
    assert_eq!(
        response.headers().get(header::CONTENT_RANGE).unwrap(),
        "bytes */100000"
    );
}

#[tokio::test]
async fn test_malformed_range_header_falls_back_to_full_file() {
    let content = patterned(50_000);
    let swarm = InMemorySwarm::new("movie.mp4", content.clone());
    let server = serve(&swarm, target(0, "movie.mp4", 50_000)).await;

    let response = Client::new()
        .get(server.url())
        .header(header::RANGE, "bytes=oops")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.bytes().await.unwrap(), content);
}

#[tokio::test]
async fn test_non_get_methods_rejected() {
    let swarm = InMemorySwarm::new("movie.mp4", patterned(1_000));
    let server = serve(&swarm, target(0, "movie.mp4", 1_000)).await;
    let client = Client::new();

    let response = client.post(server.url()).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);

    let response = client.put(server.url()).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn test_zero_length_file() {
    let swarm = InMemorySwarm::new("empty.mp4", Bytes::new());
    let server = serve(&swarm, target(0, "empty.mp4", 0)).await;

    let response = reqwest::get(server.url()).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get(header::CONTENT_LENGTH).unwrap(), "0");
    assert!(response.bytes().await.unwrap().is_empty());

    // No byte of an empty file is addressable.
    let response = Client::new()
        .get(server.url())
        .header(header::RANGE, "bytes=0-")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
    assert_eq!(
        response.headers().get(header::CONTENT_RANGE).unwrap(),
        "bytes */0"
    );
}

#[tokio::test]
async fn test_every_path_serves_the_target() {
    // Some players re-request with a path appended to the base URL.
    let content = patterned(10_000);
    let swarm = InMemorySwarm::new("movie.mp4", content.clone());
    let server = serve(&swarm, target(0, "movie.mp4", 10_000)).await;

    let url = format!("{}/some/subdir/movie.mp4", server.url());
    let response = reqwest::get(url).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.bytes().await.unwrap(), content);
}

#[tokio::test]
async fn test_multi_chunk_body_arrives_intact() {
    let content = patterned(100_000);
    let swarm = InMemorySwarm::new("movie.mp4", content.clone());
    let config = HttpConfig {
        port: 0,
        chunk_size: 4096,
        ..HttpConfig::default()
    };
    let server = serve_with_config(config, &swarm, target(0, "movie.mp4", 100_000)).await;

    let body = reqwest::get(server.url()).await.unwrap().bytes().await.unwrap();

    assert_eq!(body, content);
    // 100_000 bytes in 4 KiB chunks: 24 full reads plus the remainder.
    assert_eq!(swarm.read_count(), 25);
}

#[tokio::test]
async fn test_concurrent_overlapping_range_requests() {
    let content = patterned(1_000_000);
    let swarm = InMemorySwarm::new("movie.mp4", content.clone());
    let server = serve(&swarm, target(0, "movie.mp4", 1_000_000)).await;

    let client = Client::new();
    let ranges = [
        (0u64, 299_999u64),
        (250_000, 599_999),
        (500_000, 999_999),
        (0, 999_999),
    ];

    let requests = ranges.map(|(start, end)| {
        let client = client.clone();
        let url = server.url();
        async move {
            let response = client
                .get(url)
                .header(header::RANGE, format!("bytes={start}-{end}"))
                .send()
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
            response.bytes().await.unwrap()
        }
    });

    let bodies = join_all(requests).await;

    for (body, (start, end)) in bodies.iter().zip(ranges) {
        assert_eq!(
            *body,
            content.slice(start as usize..=end as usize),
            "range {start}-{end} must match the source bytes"
        );
    }
}

#[tokio::test]
async fn test_shutdown_closes_the_listener() {
    let swarm = InMemorySwarm::new("movie.mp4", patterned(1_000));
    let mut server = serve(&swarm, target(0, "movie.mp4", 1_000)).await;
    let url = server.url();

    let response = reqwest::get(url.clone()).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    server.shutdown(Duration::from_secs(1)).await.unwrap();

    // A fresh client avoids connection reuse; the port must now refuse.
    let result = Client::new().get(url).send().await;
    assert!(result.is_err());
}
