//! # Vilya BitTorrent Client
//!
//! A command-line BitTorrent client written in Rust.
//!
//! ## Features
//!
//! - Core BitTorrent protocol implementation
//! - HTTP and UDP trackers, announce-list tiers
//! - Single and multi-file torrents
//! - Multi-peer concurrent downloading
//! - Piece verification with SHA-1 hashing
//! - Progress tracking with visual progress bar
//!
//! ## Usage
//!
//! ```bash
//! vilya <torrent_file>
//! vilya <torrent_file> -o <output_dir> --peers 50 --yes
//! ```
//!
//! ## Architecture
//!
//! The client follows a multi-threaded architecture:
//!
//! - **Main thread**: Parses arguments, loads torrent, runs the session
//! - **Worker threads**: Each handles communication with one peer
//! - **UI thread**: Renders session events as a progress bar
//! - **Channels**: Coordinate piece work distribution and result collection

#[macro_use]
extern crate log;

mod bitfield;
mod client;
mod config;
mod error;
mod handshake;
mod message;
mod peer;
mod piece;
mod scheduler;
mod session;
mod storage;
mod torrent;
mod tracker;
mod utils;
mod worker;

#[cfg(test)]
mod fake_peer;

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};

use anyhow::{anyhow, Result};
use clap::builder::RangedU64ValueParser;
use clap::Parser;
use crossbeam_channel::{unbounded, Receiver};
use indicatif::{ProgressBar, ProgressStyle};

use config::Config;
use session::{generate_peer_id, Event, Session};
use torrent::TorrentMetadata;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "A command-line BitTorrent client, written in Rust."
)]
struct Args {
    /// Path to the .torrent file
    torrent: PathBuf,

    /// Output directory (defaults to the current directory)
    #[arg(short = 'o', long, default_value = ".")]
    output: PathBuf,

    /// Stop asking trackers once this many peers are known
    #[arg(
        long,
        default_value_t = config::DEFAULT_TARGET_PEERS,
        value_parser = RangedU64ValueParser::<usize>::new().range(1..)
    )]
    peers: usize,

    /// Port announced to trackers
    #[arg(long, default_value_t = config::DEFAULT_PORT)]
    port: u16,

    /// Overwrite existing files without asking
    #[arg(short = 'y', long)]
    yes: bool,
}

/// Ask before overwriting, returns whether to go on.
fn confirm_overwrite(existing: &[PathBuf]) -> Result<bool> {
    for path in existing {
        println!("Output file '{}' already exists.", path.display());
    }
    print!("Do you want to overwrite it? (y/N): ");
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    let input = input.trim().to_lowercase();

    Ok(input == "y" || input == "yes")
}

/// Render session events until the session drops its sender.
fn spawn_progress_bar(length: u64, events: Receiver<Event>) -> JoinHandle<()> {
    thread::spawn(move || {
        let pb = ProgressBar::new(length);
        match ProgressStyle::default_bar()
            .template("{spinner:.green} {msg} {bytes}/{total_bytes} [{bar:40.cyan/blue}] {percent}%")
        {
            Ok(style) => pb.set_style(style.progress_chars("#>-")),
            Err(e) => warn!("Could not set progress bar style: {}", e),
        }

        let mut peers = 0;
        for event in events {
            match event {
                Event::Name(name) => pb.println(format!("Downloading {:?}", name)),
                Event::TotalSize(size) => pb.println(format!("Total size: {}", size)),
                Event::Status(status) => pb.set_message(status),
                Event::Peers(count) => peers = count,
                Event::ConnectedPeers(connected) => {
                    pb.set_message(format!("{}/{} peers", connected, peers))
                }
                Event::Progress { downloaded, .. } => pb.set_position(downloaded),
            }
        }

        pb.finish();
    })
}

fn run(args: Args) -> Result<()> {
    // Check if torrent file exists
    if !args.torrent.exists() {
        return Err(anyhow!(
            "could not find torrent file: {}",
            args.torrent.display()
        ));
    }

    let torrent = TorrentMetadata::open(&args.torrent)?;
    let output_root: &Path = &args.output;
    let files = torrent.files.clone();

    let existing = storage::existing_outputs(output_root, &files);
    if !existing.is_empty() && !args.yes && !confirm_overwrite(&existing)? {
        println!("Download cancelled.");
        return Ok(());
    }

    let config = Config {
        port: args.port,
        target_peers: args.peers,
        ..Config::default()
    };

    let (events_tx, events_rx) = unbounded();
    let progress_bar = spawn_progress_bar(torrent.length, events_rx);

    // The session owns the only sender, dropping it ends the progress bar
    let data = {
        let session = Session::new(torrent, generate_peer_id(), config, events_tx);
        session.run()
    };
    if progress_bar.join().is_err() {
        warn!("Progress bar thread panicked");
    }
    let data = data?;

    println!("writing file to disk...");
    storage::write_files(output_root, &files, &data)?;

    println!("Saved in \"{}\".", output_root.display());

    Ok(())
}

fn main() {
    // Initialize logger
    pretty_env_logger::init_timed();

    // Parse arguments
    let args = Args::parse();

    // Run program, eventually exit failure
    if let Err(error) = run(args) {
        eprintln!("Error: {}", error);
        std::process::exit(1);
    }

    // Exit success
    std::process::exit(0);
}
