//! Spindrift CLI - stream one video file from a swarm while it downloads
//!
//! Joins the swarm named by a magnet link, picks the video member, serves
//! it over local HTTP, and hands the URL to a media player.

mod commands;

use std::path::PathBuf;

use clap::Parser;
use spindrift_core::tracing_setup::{CliLogLevel, init_tracing};

#[derive(Parser)]
#[command(name = "spindrift")]
#[command(about = "Stream a video file from a torrent swarm while it downloads")]
struct Cli {
    /// Magnet link of the swarm to join
    magnet: String,

    /// HTTP port for the stream server (default: 8888)
    #[arg(short, long)]
    port: Option<u16>,

    /// Serve swarm member N instead of auto-selecting by extension
    #[arg(short = 'i', long)]
    file_index: Option<usize>,

    /// Print the swarm's member files and exit without serving
    #[arg(long)]
    list: bool,

    /// Player command to try before the built-in candidates
    #[arg(long)]
    player: Option<String>,

    /// Never launch a player or browser; only print the stream URL
    #[arg(long)]
    no_player: bool,

    /// Parent directory for the per-swarm scratch dir (default: OS temp dir)
    #[arg(short = 'd', long)]
    scratch_dir: Option<PathBuf>,

    /// Console log level
    #[arg(long, value_enum, default_value_t = CliLogLevel::Info)]
    log_level: CliLogLevel,

    /// Directory for a full debug log of the run
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_tracing(cli.log_level.as_tracing_level(), cli.log_dir.as_deref()) {
        eprintln!("Failed to initialize logging: {e}");
        std::process::exit(1);
    }

    match commands::run(cli).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {}", e.user_message());
            std::process::exit(1);
        }
    }
}
