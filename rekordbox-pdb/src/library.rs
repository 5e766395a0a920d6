//! Normalized library model
//!
//! The decoder's output: tracks with all lookup references resolved to
//! text, plus the playlist forest. Playlists reference tracks by id only,
//! which keeps the forest acyclic and serializable.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Fallback title for tracks whose title string is missing.
pub const UNKNOWN_TITLE: &str = "Unknown Title";
/// Fallback for unresolved artist references.
pub const UNKNOWN_ARTIST: &str = "Unknown Artist";
/// Fallback for unresolved album references.
pub const UNKNOWN_ALBUM: &str = "Unknown Album";

/// A single track with resolved metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    /// Track id, unique within the library
    pub id: u32,
    pub title: String,
    pub artist: String,
    pub album: String,
    /// Genre, empty when the database has none
    pub genre: String,
    /// Musical key, empty when the database has none
    pub key: String,
    /// Duration in seconds
    pub duration_secs: u16,
    /// Beats per minute
    pub bpm: f64,
    /// Star rating as stored on the device
    pub rating: u8,
    /// Bitrate in kbps
    pub bitrate_kbps: u32,
    /// Path of the audio file on the medium
    pub file_path: String,
    /// Date the track was added, kept as opaque text
    pub date_added: String,
}

/// A playlist or playlist folder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Playlist {
    pub id: u32,
    pub name: String,
    /// Containing folder; `None` for roots
    pub parent_id: Option<u32>,
    pub is_folder: bool,
    /// Child playlists and folders, in database order
    pub children: Vec<Playlist>,
    /// Member tracks, ordered by stored position. Entries may reference
    /// tracks the database no longer contains.
    pub track_ids: Vec<u32>,
}

/// The decoded library.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Library {
    /// Tracks in decode order
    pub tracks: Vec<Track>,
    /// Roots of the playlist forest, ordered by sort order
    pub playlists: Vec<Playlist>,
}

impl Library {
    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    /// Count playlists and folders across the whole forest.
    pub fn playlist_count(&self) -> usize {
        let mut count = 0;
        let mut stack: Vec<&Playlist> = self.playlists.iter().collect();
        while let Some(node) = stack.pop() {
            count += 1;
            stack.extend(node.children.iter());
        }
        count
    }

    /// Merge a companion library (`exportExt.pdb`) into this one, filling
    /// fields the primary database leaves blank: BPM when zero, genre when
    /// empty. Tracks only present in the companion are ignored and the
    /// playlists always come from the primary.
    pub fn merged_with(mut self, other: &Library) -> Library {
        let by_id: HashMap<u32, &Track> = other.tracks.iter().map(|t| (t.id, t)).collect();
        for track in &mut self.tracks {
            if let Some(companion) = by_id.get(&track.id) {
                if track.bpm <= 0.0 {
                    track.bpm = companion.bpm;
                }
                if track.genre.is_empty() {
                    track.genre = companion.genre.clone();
                }
            }
        }
        self
    }
}
