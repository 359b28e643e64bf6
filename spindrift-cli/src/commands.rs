//! CLI command implementation

use std::sync::Arc;

use spindrift_core::Result;
use spindrift_core::config::SpindriftConfig;
use spindrift_core::descriptor::Descriptor;
use spindrift_core::lifecycle::{StreamSession, release_swarm_and_scratch};
use spindrift_core::media::{TargetFile, resolve_target};
use spindrift_core::progress::format_bytes;
use spindrift_core::scratch::ScratchDir;
use spindrift_core::swarm::{SwarmClient, SwarmFile};
use spindrift_rqbit::RqbitSwarm;
use tracing::warn;

use crate::Cli;

/// Runs the streaming session described by the CLI arguments.
///
/// Returns the process exit code on a clean run. Startup failures surface
/// as errors; the binary maps them to exit code 1.
///
/// # Errors
///
/// - `SpindriftError::Descriptor` - The magnet link does not validate
/// - `SpindriftError::Io` - The scratch directory could not be created
/// - `SpindriftError::Swarm` - Joining the swarm failed
/// - `SpindriftError::Media` - No video member found, or the index
///   override does not name a member
/// - `SpindriftError::Stream` - The listening socket could not be bound
pub async fn run(cli: Cli) -> Result<i32> {
    // Nothing is created until the descriptor validates.
    let descriptor = Descriptor::parse(&cli.magnet)?;
    let config = build_config(&cli);

    let scratch_path =
        ScratchDir::for_info_hash(config.storage.scratch_dir.as_deref(), &descriptor.info_hash());
    let scratch = ScratchDir::create(scratch_path).await?;

    let swarm: Arc<dyn SwarmClient> =
        match RqbitSwarm::join(&descriptor, scratch.path().to_path_buf()).await {
            Ok(swarm) => Arc::new(swarm),
            Err(e) => {
                if let Err(remove_error) = scratch.remove().await {
                    warn!("Scratch directory removal: {remove_error}");
                }
                return Err(e.into());
            }
        };

    let files = match swarm.files().await {
        Ok(files) => files,
        Err(e) => {
            release_swarm_and_scratch(&swarm, &scratch).await;
            return Err(e.into());
        }
    };

    if cli.list {
        // Listing still works when no member matches the allow-list.
        let target = resolve_target(&files, cli.file_index).ok();
        print_members(&files, target.as_ref());
        release_swarm_and_scratch(&swarm, &scratch).await;
        return Ok(0);
    }

    let target = match resolve_target(&files, cli.file_index) {
        Ok(target) => target,
        Err(e) => {
            release_swarm_and_scratch(&swarm, &scratch).await;
            return Err(e.into());
        }
    };

    let session = StreamSession::start(config, swarm, target, scratch).await?;

    println!(
        "Streaming {} ({}) at {}",
        session.target().name,
        format_bytes(session.target().length),
        session.url()
    );

    Ok(session.run().await)
}

/// Builds the runtime configuration from environment and CLI flags.
///
/// Flags win over `SPINDRIFT_*` environment overrides, which win over
/// the built-in defaults.
fn build_config(cli: &Cli) -> SpindriftConfig {
    let mut config = SpindriftConfig::from_env();

    if let Some(port) = cli.port {
        config.http.port = port;
    }
    if let Some(player) = &cli.player {
        config.player.candidates.insert(0, player.clone());
    }
    if cli.no_player {
        config.player.enabled = false;
    }
    if let Some(dir) = &cli.scratch_dir {
        config.storage.scratch_dir = Some(dir.clone());
    }

    config
}

/// Prints the swarm's member files, marking the streaming target.
fn print_members(files: &[SwarmFile], target: Option<&TargetFile>) {
    println!("Swarm members (* = streaming target):");
    for file in files {
        let marker = if target.is_some_and(|t| t.index == file.index) {
            " *"
        } else {
            ""
        };
        println!(
            "{:>4}  {:>10}  {}{marker}",
            file.index,
            format_bytes(file.length),
            file.name
        );
    }
}
