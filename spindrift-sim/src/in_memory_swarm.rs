//! In-memory swarm client for deterministic testing.
//!
//! Serves file bytes from a buffer with a movable availability frontier,
//! enabling offline testing of the full streaming pipeline: reads past
//! the frontier wait exactly like swarm reads waiting for pieces.

use std::ops::Range;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use spindrift_core::swarm::{SwarmClient, SwarmError, SwarmEvent, SwarmFile, SwarmStats};
use tokio::sync::{Notify, broadcast};

/// Swarm client backed by an in-memory buffer.
///
/// One designated member (the content file) is backed by real bytes;
/// reads validate against that buffer. Availability, failures, delays,
/// peer count, and terminal events are all controllable, and teardown
/// calls are counted for exactly-once assertions.
#[derive(Clone)]
pub struct InMemorySwarm {
    files: Vec<SwarmFile>,
    content_index: usize,
    content: Bytes,
    /// Frontier of the content file's downloaded bytes.
    available: Arc<AtomicU64>,
    advance: Arc<Notify>,
    read_delay: Duration,
    fail_on_read: Arc<AtomicBool>,
    read_count: Arc<AtomicU64>,
    prioritized: Arc<Mutex<Vec<(usize, Range<u64>)>>>,
    peer_count: Arc<AtomicUsize>,
    events: broadcast::Sender<SwarmEvent>,
    shut_down: Arc<AtomicBool>,
    shutdown_count: Arc<AtomicU64>,
}

impl InMemorySwarm {
    /// Creates a single-member swarm with the whole content available.
    pub fn new(name: &str, content: Bytes) -> Self {
        let length = content.len() as u64;
        let files = vec![SwarmFile {
            index: 0,
            name: name.to_string(),
            length,
        }];
        Self::with_files(files, 0, content)
    }

    /// Creates a multi-member swarm; `content_index` names the member the
    /// buffer backs. Reads against other members fail.
    ///
    /// # Panics
    ///
    /// Panics if `content_index` is not a valid index into `files`.
    pub fn with_files(files: Vec<SwarmFile>, content_index: usize, content: Bytes) -> Self {
        assert!(content_index < files.len(), "content_index out of bounds");
        let available = content.len() as u64;
        let (events, _) = broadcast::channel(4);

        Self {
            files,
            content_index,
            content,
            available: Arc::new(AtomicU64::new(available)),
            advance: Arc::new(Notify::new()),
            read_delay: Duration::ZERO,
            fail_on_read: Arc::new(AtomicBool::new(false)),
            read_count: Arc::new(AtomicU64::new(0)),
            prioritized: Arc::new(Mutex::new(Vec::new())),
            peer_count: Arc::new(AtomicUsize::new(1)),
            events,
            shut_down: Arc::new(AtomicBool::new(false)),
            shutdown_count: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Sets a delay applied to every read, simulating slow peers.
    pub fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = delay;
        self
    }

    /// Starts the availability frontier at `bytes` instead of the full
    /// content length.
    pub fn with_availability(self, bytes: u64) -> Self {
        self.available.store(bytes, Ordering::Release);
        self
    }

    /// Moves the availability frontier and wakes waiting reads.
    pub fn advance_availability(&self, bytes: u64) {
        self.available.store(bytes, Ordering::Release);
        self.advance.notify_waiters();
    }

    /// Configures the swarm to fail the next read. Cleared after one
    /// attempt.
    pub fn fail_next_read(&self) {
        self.fail_on_read.store(true, Ordering::Release);
    }

    /// Sets the peer count reported by stats.
    pub fn set_peer_count(&self, peers: usize) {
        self.peer_count.store(peers, Ordering::Release);
    }

    /// Emits a download-complete event to subscribers.
    pub fn complete(&self) {
        let _ = self.events.send(SwarmEvent::Complete);
    }

    /// Emits a fatal-failure event to subscribers.
    pub fn fail(&self, reason: &str) {
        let _ = self.events.send(SwarmEvent::Failed {
            reason: reason.to_string(),
        });
    }

    /// Number of read operations performed, failed reads included.
    pub fn read_count(&self) -> u64 {
        self.read_count.load(Ordering::Acquire)
    }

    /// Number of times shutdown was called.
    pub fn shutdown_count(&self) -> u64 {
        self.shutdown_count.load(Ordering::Acquire)
    }

    /// Priority hints recorded so far, in call order.
    pub fn prioritized_ranges(&self) -> Vec<(usize, Range<u64>)> {
        self.prioritized.lock().clone()
    }

    fn ensure_live(&self) -> Result<(), SwarmError> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(SwarmError::EngineShutdown);
        }
        Ok(())
    }
}

#[async_trait]
impl SwarmClient for InMemorySwarm {
    async fn files(&self) -> Result<Vec<SwarmFile>, SwarmError> {
        self.ensure_live()?;
        Ok(self.files.clone())
    }

    async fn stats(&self, file_index: usize) -> Result<SwarmStats, SwarmError> {
        self.ensure_live()?;
        let file = self
            .files
            .get(file_index)
            .ok_or_else(|| SwarmError::MetadataUnavailable {
                reason: format!("no member at index {file_index}"),
            })?;

        let downloaded_bytes = if file_index == self.content_index {
            self.available.load(Ordering::Acquire).min(file.length)
        } else {
            file.length
        };

        Ok(SwarmStats {
            downloaded_bytes,
            total_bytes: file.length,
            peer_count: self.peer_count.load(Ordering::Acquire),
        })
    }

    async fn read_at(
        &self,
        file_index: usize,
        offset: u64,
        length: usize,
    ) -> Result<Bytes, SwarmError> {
        self.read_count.fetch_add(1, Ordering::AcqRel);

        if !self.read_delay.is_zero() {
            tokio::time::sleep(self.read_delay).await;
        }

        if file_index != self.content_index {
            return Err(SwarmError::ReadFailed {
                offset,
                reason: format!("no content backing member {file_index}"),
            });
        }

        if self.fail_on_read.swap(false, Ordering::AcqRel) {
            return Err(SwarmError::ReadFailed {
                offset,
                reason: "simulated piece failure".to_string(),
            });
        }

        let file_size = self.content.len() as u64;
        let end = offset + length as u64;
        if end > file_size {
            return Err(SwarmError::ReadFailed {
                offset,
                reason: format!("range {offset}..{end} beyond file length {file_size}"),
            });
        }

        // Wait for the frontier to cover the range. The permit is
        // registered before the checks so a concurrent advance or
        // shutdown cannot slip between check and await.
        loop {
            let notified = self.advance.notified();
            if self.shut_down.load(Ordering::Acquire) {
                return Err(SwarmError::EngineShutdown);
            }
            if self.available.load(Ordering::Acquire) >= end {
                break;
            }
            notified.await;
        }

        let start = offset as usize;
        Ok(self.content.slice(start..start + length))
    }

    async fn prioritize(&self, file_index: usize, range: Range<u64>) -> Result<(), SwarmError> {
        self.ensure_live()?;
        self.prioritized.lock().push((file_index, range));
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<SwarmEvent> {
        self.events.subscribe()
    }

    async fn shutdown(&self) -> Result<(), SwarmError> {
        self.shut_down.store(true, Ordering::Release);
        self.shutdown_count.fetch_add(1, Ordering::AcqRel);
        self.advance.notify_waiters();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ten_bytes() -> Bytes {
        Bytes::from((0..10u8).collect::<Vec<_>>())
    }

    #[tokio::test]
    async fn swarm_serves_correct_bytes() {
        let swarm = InMemorySwarm::new("movie.mp4", ten_bytes());

        let result = swarm.read_at(0, 3, 4).await.unwrap();
        assert_eq!(result, vec![3, 4, 5, 6]);

        let result = swarm.read_at(0, 0, 3).await.unwrap();
        assert_eq!(result, vec![0, 1, 2]);

        let result = swarm.read_at(0, 7, 3).await.unwrap();
        assert_eq!(result, vec![7, 8, 9]);
    }

    #[tokio::test]
    async fn swarm_validates_read_range() {
        let swarm = InMemorySwarm::new("movie.mp4", Bytes::from(vec![0u8; 10]));

        assert!(swarm.read_at(0, 0, 10).await.is_ok());

        let err = swarm.read_at(0, 5, 10).await.unwrap_err();
        assert!(matches!(err, SwarmError::ReadFailed { offset: 5, .. }));
    }

    #[tokio::test]
    async fn read_waits_for_availability_frontier() {
        let swarm = InMemorySwarm::new("movie.mp4", ten_bytes()).with_availability(5);

        let reader = {
            let swarm = swarm.clone();
            tokio::spawn(async move { swarm.read_at(0, 0, 10).await })
        };

        // Frontier is short of the range; the read must still be pending.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!reader.is_finished());

        swarm.advance_availability(10);
        let bytes = reader.await.unwrap().unwrap();
        assert_eq!(bytes, ten_bytes());
    }

    #[tokio::test]
    async fn reads_within_frontier_do_not_wait() {
        let swarm = InMemorySwarm::new("movie.mp4", ten_bytes()).with_availability(5);

        let result = swarm.read_at(0, 0, 5).await.unwrap();
        assert_eq!(result, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn one_time_failure_clears_after_read() {
        let swarm = InMemorySwarm::new("movie.mp4", Bytes::from(vec![0u8; 100]));

        swarm.fail_next_read();
        assert!(swarm.read_at(0, 0, 10).await.is_err());
        assert!(swarm.read_at(0, 0, 10).await.is_ok());
        assert_eq!(swarm.read_count(), 2);
    }

    #[tokio::test]
    async fn priority_hints_are_recorded_in_order() {
        let swarm = InMemorySwarm::new("movie.mp4", Bytes::from(vec![0u8; 100]));

        swarm.prioritize(0, 10..20).await.unwrap();
        swarm.prioritize(0, 0..100).await.unwrap();

        assert_eq!(swarm.prioritized_ranges(), vec![(0, 10..20), (0, 0..100)]);
    }

    #[tokio::test]
    async fn completion_event_reaches_subscribers() {
        let swarm = InMemorySwarm::new("movie.mp4", Bytes::new());
        let mut events = swarm.subscribe();

        swarm.complete();
        assert!(matches!(events.recv().await, Ok(SwarmEvent::Complete)));
    }

    #[tokio::test]
    async fn failure_event_carries_reason() {
        let swarm = InMemorySwarm::new("movie.mp4", Bytes::new());
        let mut events = swarm.subscribe();

        swarm.fail("tracker unreachable");
        match events.recv().await {
            Ok(SwarmEvent::Failed { reason }) => assert_eq!(reason, "tracker unreachable"),
            other => panic!("expected failure event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn shutdown_wakes_pending_reads() {
        let swarm = InMemorySwarm::new("movie.mp4", ten_bytes()).with_availability(0);

        let reader = {
            let swarm = swarm.clone();
            tokio::spawn(async move { swarm.read_at(0, 0, 10).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        swarm.shutdown().await.unwrap();
        let result = tokio::time::timeout(Duration::from_secs(1), reader)
            .await
            .expect("pending read must observe shutdown")
            .unwrap();
        assert!(matches!(result, Err(SwarmError::EngineShutdown)));
        assert_eq!(swarm.shutdown_count(), 1);
    }

    #[tokio::test]
    async fn calls_after_shutdown_are_rejected() {
        let swarm = InMemorySwarm::new("movie.mp4", ten_bytes());
        swarm.shutdown().await.unwrap();

        assert!(matches!(
            swarm.files().await,
            Err(SwarmError::EngineShutdown)
        ));
        assert!(matches!(
            swarm.read_at(0, 0, 1).await,
            Err(SwarmError::EngineShutdown)
        ));
    }

    #[tokio::test]
    async fn multi_member_swarm_reports_files_and_stats() {
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
        let swarm =
            InMemorySwarm::with_files(files, 1, Bytes::from(vec![0u8; 64])).with_availability(32);
        swarm.set_peer_count(7);

        assert_eq!(swarm.files().await.unwrap().len(), 2);

        let stats = swarm.stats(1).await.unwrap();
        assert_eq!(stats.downloaded_bytes, 32);
        assert_eq!(stats.total_bytes, 5_000_000);
        assert_eq!(stats.peer_count, 7);
    }
}
