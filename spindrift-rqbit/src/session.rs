//! librqbit session wrapper.
//!
//! One session serves one swarm. The session directory is the scratch
//! directory, so removing it after shutdown leaves nothing behind. A swarm
//! is joined with [`RqbitSwarm::join`], which blocks until metadata has
//! resolved; a constructed value therefore always knows its member files.

use std::io::SeekFrom;
use std::ops::Range;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use librqbit::api::TorrentIdOrHash;
use librqbit::{AddTorrent, AddTorrentOptions, Api, ManagedTorrent, Session, SessionOptions};

/// Alias matching librqbit's unexported `ManagedTorrentHandle`.
type ManagedTorrentHandle = Arc<ManagedTorrent>;
use spindrift_core::descriptor::Descriptor;
use spindrift_core::swarm::{SwarmClient, SwarmError, SwarmEvent, SwarmFile, SwarmStats};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt};
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Production [`SwarmClient`] backed by a `librqbit` session.
pub struct RqbitSwarm {
    session: Arc<Session>,
    api: Api,
    handle: ManagedTorrentHandle,
    files: Vec<SwarmFile>,
    events: broadcast::Sender<SwarmEvent>,
    shut_down: Arc<AtomicBool>,
}

impl RqbitSwarm {
    /// Joins the swarm described by `descriptor`, storing pieces under
    /// `download_dir`.
    ///
    /// Returns once swarm metadata has resolved and the member files are
    /// known. Magnet resolution can take a while on a quiet swarm.
    ///
    /// # Errors
    ///
    /// - `SwarmError::JoinFailed` - Session creation, magnet resolution,
    ///   or torrent initialization failed
    /// - `SwarmError::MetadataUnavailable` - The engine produced no usable
    ///   file list
    pub async fn join(descriptor: &Descriptor, download_dir: PathBuf) -> Result<Self, SwarmError> {
        debug!("Creating swarm session in {}", download_dir.display());

        let opts = SessionOptions {
            // All session state lives inside the scratch directory.
            disable_dht_persistence: true,
            ..Default::default()
        };

        let session = Session::new_with_opts(download_dir, opts)
            .await
            .map_err(|e| SwarmError::JoinFailed {
                reason: e.to_string(),
            })?;
        let api = Api::new(Arc::clone(&session), None);

        info!("Resolving swarm metadata for {descriptor}");
        let response = session
            .add_torrent(
                AddTorrent::from_url(descriptor.as_str()),
                Some(AddTorrentOptions {
                    overwrite: true,
                    ..Default::default()
                }),
            )
            .await
            .map_err(|e| SwarmError::JoinFailed {
                reason: e.to_string(),
            })?;

        let handle = response.into_handle().ok_or_else(|| SwarmError::JoinFailed {
            reason: "engine returned no torrent handle".to_string(),
        })?;

        handle
            .wait_until_initialized()
            .await
            .map_err(|e| SwarmError::JoinFailed {
                reason: e.to_string(),
            })?;

        let files = member_files(&handle)?;
        debug!("Swarm joined: {} member files", files.len());

        let (events, _) = broadcast::channel(4);
        let shut_down = Arc::new(AtomicBool::new(false));
        spawn_completion_watcher(handle.clone(), events.clone(), Arc::clone(&shut_down));

        Ok(Self {
            session,
            api,
            handle,
            files,
            events,
            shut_down,
        })
    }

    fn ensure_live(&self) -> Result<(), SwarmError> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(SwarmError::EngineShutdown);
        }
        Ok(())
    }

    /// Opens an engine read cursor positioned at `offset`.
    ///
    /// The engine prioritizes pieces around open cursor positions, so
    /// creating one doubles as a fetch hint.
    async fn cursor_at(
        &self,
        file_index: usize,
        offset: u64,
    ) -> Result<impl AsyncRead + Unpin, SwarmError> {
        let mut stream = self
            .api
            .api_stream(TorrentIdOrHash::Id(self.handle.id()), file_index)
            .map_err(|e| SwarmError::ReadFailed {
                offset,
                reason: e.to_string(),
            })?;

        stream
            .seek(SeekFrom::Start(offset))
            .await
            .map_err(|e| SwarmError::ReadFailed {
                offset,
                reason: e.to_string(),
            })?;

        Ok(stream)
    }
}

#[async_trait::async_trait]
impl SwarmClient for RqbitSwarm {
    async fn files(&self) -> Result<Vec<SwarmFile>, SwarmError> {
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

        let stats = self.handle.stats();
        let downloaded = stats.file_progress.get(file_index).copied().unwrap_or(0);
        let peer_count = stats
            .live
            .as_ref()
            .map_or(0, |live| live.snapshot.peer_stats.live as usize);

        Ok(SwarmStats {
            downloaded_bytes: downloaded.min(file.length),
            total_bytes: file.length,
            peer_count,
        })
    }

    async fn read_at(
        &self,
        file_index: usize,
        offset: u64,
        length: usize,
    ) -> Result<Bytes, SwarmError> {
        self.ensure_live()?;

        let mut cursor = self.cursor_at(file_index, offset).await?;
        let mut buffer = vec![0u8; length];
        cursor
            .read_exact(&mut buffer)
            .await
            .map_err(|e| SwarmError::ReadFailed {
                offset,
                reason: e.to_string(),
            })?;

        Ok(Bytes::from(buffer))
    }

    async fn prioritize(&self, file_index: usize, range: Range<u64>) -> Result<(), SwarmError> {
        self.ensure_live()?;

        // The cursor is dropped immediately; the read path re-opens one at
        // the same offset and keeps it there while the body streams.
        self.cursor_at(file_index, range.start).await?;
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<SwarmEvent> {
        self.events.subscribe()
    }

    async fn shutdown(&self) -> Result<(), SwarmError> {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        debug!("Releasing swarm session");
        let deleted = self
            .session
            .delete(TorrentIdOrHash::Id(self.handle.id()), false)
            .await;
        self.session.stop().await;

        deleted.map_err(|e| SwarmError::ShutdownFailed {
            reason: e.to_string(),
        })
    }
}

/// Builds the member file table from resolved torrent metadata.
fn member_files(handle: &ManagedTorrentHandle) -> Result<Vec<SwarmFile>, SwarmError> {
    let metadata = handle.metadata.load();
    let meta = metadata
        .as_ref()
        .ok_or_else(|| SwarmError::MetadataUnavailable {
            reason: "metadata missing after initialization".to_string(),
        })?;

    let details = meta
        .info
        .iter_file_details()
        .map_err(|e| SwarmError::MetadataUnavailable {
            reason: e.to_string(),
        })?;

    let mut files = Vec::new();
    for (index, detail) in details.enumerate() {
        let path = detail
            .filename
            .to_string()
            .map_err(|e| SwarmError::MetadataUnavailable {
                reason: e.to_string(),
            })?;

        files.push(SwarmFile {
            index,
            name: base_name(&path).to_string(),
            length: detail.len,
        });
    }

    Ok(files)
}

/// Strips directory components from a torrent-relative path.
fn base_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Forwards the engine's terminal outcome to event subscribers.
fn spawn_completion_watcher(
    handle: ManagedTorrentHandle,
    events: broadcast::Sender<SwarmEvent>,
    shut_down: Arc<AtomicBool>,
) {
    tokio::spawn(async move {
        match handle.wait_until_completed().await {
            Ok(()) => {
                info!("Swarm download complete");
                let _ = events.send(SwarmEvent::Complete);
            }
            // Deleting the torrent during teardown fails the wait.
            Err(_) if shut_down.load(Ordering::Acquire) => {}
            Err(e) => {
                let _ = events.send(SwarmEvent::Failed {
                    reason: e.to_string(),
                });
            }
        }
    });
}
