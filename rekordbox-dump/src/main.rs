//! rekordbox-dump: inspect Pioneer USB export databases
//!
//! Reads export.pdb (and optionally exportExt.pdb) and prints the decoded
//! library as a summary, a track table, a playlist tree, or JSON.

use std::fs;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use rekordbox_pdb::{read_library_with_stats, DecodeStats, Library, Playlist};

#[derive(Parser, Debug)]
#[command(name = "rekordbox-dump")]
#[command(about = "Decode and inspect Pioneer DJ export databases")]
struct Args {
    /// Path to export.pdb
    pdb: PathBuf,

    /// Companion exportExt.pdb, merged to fill missing BPM and genre
    #[arg(long)]
    ext: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print decode statistics
    Info,

    /// List decoded tracks
    Tracks,

    /// Print the playlist tree
    Playlists,

    /// Dump the whole library as JSON
    Json,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = if args.verbose { Level::DEBUG } else { Level::WARN };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let data = fs::read(&args.pdb)?;
    let source = args.pdb.display().to_string();
    let (mut library, stats) = read_library_with_stats(&data, &source)?;
    info!("{}: {} tracks", source, library.track_count());

    if let Some(ext_path) = &args.ext {
        let ext_data = fs::read(ext_path)?;
        let ext_source = ext_path.display().to_string();
        let (companion, _) = read_library_with_stats(&ext_data, &ext_source)?;
        library = library.merged_with(&companion);
    }

    match args.command {
        Command::Info => print_info(&stats, &library),
        Command::Tracks => print_tracks(&library),
        Command::Playlists => print_playlists(&library.playlists),
        Command::Json => println!("{}", serde_json::to_string_pretty(&library)?),
    }

    Ok(())
}

fn print_info(stats: &DecodeStats, library: &Library) {
    println!("Library");
    println!("  Tracks: {}", library.track_count());
    println!("  Playlists: {}", library.playlist_count());
    println!();
    println!("Tables");
    println!("  Artists: {}", stats.artist_count);
    println!("  Albums: {}", stats.album_count);
    println!("  Genres: {}", stats.genre_count);
    println!("  Labels: {}", stats.label_count);
    println!("  Keys: {}", stats.key_count);
    println!("  Playlist nodes: {}", stats.playlist_node_count);
    println!("  Playlist entries: {}", stats.playlist_entry_count);
    println!();
    println!("Decode");
    println!("  Pages visited: {}", stats.pages_visited);
    println!("  Pages skipped: {}", stats.pages_skipped);
    println!("  Rows dropped: {}", stats.rows_dropped);
    if stats.cycles_detected > 0 {
        println!("  Page chain cycles: {}", stats.cycles_detected);
    }
    if stats.page_caps_hit > 0 {
        println!("  Page caps hit: {}", stats.page_caps_hit);
    }
}

fn print_tracks(library: &Library) {
    println!(
        "{:<6} {:<30} {:<25} {:<20} {:<7} {:<6}",
        "ID", "Title", "Artist", "Album", "BPM", "Key"
    );
    println!("{}", "-".repeat(98));
    for track in &library.tracks {
        println!(
            "{:<6} {:<30} {:<25} {:<20} {:<7.1} {:<6}",
            track.id,
            truncate(&track.title, 29),
            truncate(&track.artist, 24),
            truncate(&track.album, 19),
            track.bpm,
            track.key,
        );
    }
}

fn print_playlists(playlists: &[Playlist]) {
    // Explicit stack; a hostile database can nest playlists deep enough to
    // overflow a recursive walk.
    let mut stack: Vec<(&Playlist, usize)> =
        playlists.iter().rev().map(|p| (p, 0)).collect();
    while let Some((playlist, depth)) = stack.pop() {
        let marker = if playlist.is_folder { "+" } else { "-" };
        println!(
            "{}{} {} ({} tracks)",
            "  ".repeat(depth),
            marker,
            playlist.name,
            playlist.track_ids.len()
        );
        stack.extend(playlist.children.iter().rev().map(|c| (c, depth + 1)));
    }
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max_len - 1).collect();
        format!("{}…", cut)
    }
}
