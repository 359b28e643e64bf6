//! Periodic download progress logging.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::ProgressConfig;
use crate::swarm::SwarmClient;

/// Formats a byte count into a human-readable size.
pub fn format_bytes(bytes: u64) -> String {
    if bytes == 0 {
        return "0 B".to_string();
    }

    const UNITS: &[&str] = &["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit_index = 0;

    while value >= 1024.0 && unit_index < UNITS.len() - 1 {
        value /= 1024.0;
        unit_index += 1;
    }

    if value >= 10.0 {
        format!("{:.0} {}", value, UNITS[unit_index])
    } else {
        format!("{:.1} {}", value, UNITS[unit_index])
    }
}

/// Background task logging swarm progress at a fixed interval.
///
/// Stats polls are bounded by a deadline so a wedged engine cannot stall
/// the reporter; a missed sample is skipped, not retried.
pub struct ProgressReporter {
    handle: JoinHandle<()>,
    stop_tx: oneshot::Sender<()>,
}

impl ProgressReporter {
    /// Spawns the reporting task for one target file.
    pub fn spawn(swarm: Arc<dyn SwarmClient>, file_index: usize, config: ProgressConfig) -> Self {
        let (stop_tx, stop_rx) = oneshot::channel();
        let handle = tokio::spawn(report_loop(swarm, file_index, config, stop_rx));
        Self { handle, stop_tx }
    }

    /// Stops the reporter and waits for the task to finish.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(());
        let _ = self.handle.await;
    }
}

async fn report_loop(
    swarm: Arc<dyn SwarmClient>,
    file_index: usize,
    config: ProgressConfig,
    mut stop_rx: oneshot::Receiver<()>,
) {
    let mut tick_interval = tokio::time::interval(config.interval);
    let mut last_downloaded = 0u64;
    let mut last_sample = Instant::now();

    loop {
        tokio::select! {
            _ = tick_interval.tick() => {
                let stats = match tokio::time::timeout(
                    config.stats_deadline,
                    swarm.stats(file_index),
                )
                .await
                {
                    Ok(Ok(stats)) => stats,
                    Ok(Err(e)) => {
                        debug!("Skipping progress sample: {e}");
                        continue;
                    }
                    Err(_) => {
                        debug!(
                            "Skipping progress sample: no stats within {:?}",
                            config.stats_deadline
                        );
                        continue;
                    }
                };

                let now = Instant::now();
                let elapsed = now.duration_since(last_sample).as_secs_f64();
                let delta = stats.downloaded_bytes.saturating_sub(last_downloaded);
                let rate = if elapsed > 0.0 {
                    delta as f64 / elapsed
                } else {
                    0.0
                };

                let percent = if stats.total_bytes == 0 {
                    100.0
                } else {
                    let downloaded = stats.downloaded_bytes.min(stats.total_bytes);
                    (downloaded as f64 / stats.total_bytes as f64) * 100.0
                };

                info!(
                    "Progress: {:.1}% | {:.1} KB/s | peers: {}",
                    percent,
                    rate / 1024.0,
                    stats.peer_count
                );

                last_downloaded = stats.downloaded_bytes;
                last_sample = now;
            }

            _ = &mut stop_rx => {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::ops::Range;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use bytes::Bytes;
    use tokio::sync::broadcast;

    use super::*;
    use crate::swarm::{SwarmError, SwarmEvent, SwarmFile, SwarmStats};

    struct StatsSwarm {
        stats_calls: AtomicUsize,
        stall: bool,
        events: broadcast::Sender<SwarmEvent>,
    }

    impl StatsSwarm {
        fn new(stall: bool) -> Self {
            let (events, _) = broadcast::channel(1);
            Self {
                stats_calls: AtomicUsize::new(0),
                stall,
                events,
            }
        }
    }

    #[async_trait::async_trait]
    impl SwarmClient for StatsSwarm {
        async fn files(&self) -> Result<Vec<SwarmFile>, SwarmError> {
            Ok(Vec::new())
        }

        async fn stats(&self, _file_index: usize) -> Result<SwarmStats, SwarmError> {
            self.stats_calls.fetch_add(1, Ordering::AcqRel);
            if self.stall {
                std::future::pending::<()>().await;
            }
            Ok(SwarmStats {
                downloaded_bytes: 500,
                total_bytes: 1000,
                peer_count: 3,
            })
        }

        async fn read_at(
            &self,
            _file_index: usize,
            _offset: u64,
            _length: usize,
        ) -> Result<Bytes, SwarmError> {
            Ok(Bytes::new())
        }

        async fn prioritize(
            &self,
            _file_index: usize,
            _range: Range<u64>,
        ) -> Result<(), SwarmError> {
            Ok(())
        }

        fn subscribe(&self) -> broadcast::Receiver<SwarmEvent> {
            self.events.subscribe()
        }

        async fn shutdown(&self) -> Result<(), SwarmError> {
            Ok(())
        }
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(10 * 1024 * 1024), "10 MB");
        assert_eq!(format_bytes(3 * 1024 * 1024 * 1024), "3.0 GB");
    }

    #[tokio::test]
    async fn test_reporter_polls_stats_and_stops() {
        let swarm = Arc::new(StatsSwarm::new(false));
        let config = ProgressConfig {
            interval: Duration::from_millis(10),
            stats_deadline: Duration::from_millis(100),
        };

        let reporter = ProgressReporter::spawn(Arc::clone(&swarm) as _, 0, config);
        tokio::time::sleep(Duration::from_millis(50)).await;
        reporter.stop().await;

        assert!(swarm.stats_calls.load(Ordering::Acquire) >= 1);
    }

    #[tokio::test]
    async fn test_stop_returns_despite_stalled_stats() {
        let swarm = Arc::new(StatsSwarm::new(true));
        let config = ProgressConfig {
            interval: Duration::from_millis(10),
            stats_deadline: Duration::from_millis(20),
        };

        let reporter = ProgressReporter::spawn(swarm as _, 0, config);
        tokio::time::sleep(Duration::from_millis(15)).await;

        // Deadline bounds the in-flight poll; stop must not hang on it.
        tokio::time::timeout(Duration::from_secs(1), reporter.stop())
            .await
            .expect("stop should complete once the stats deadline fires");
    }
}
