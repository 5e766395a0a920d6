//! Database decoding
//!
//! `read_library` turns a loaded `export.pdb` image into a normalized
//! `Library`. The decode runs four sequential passes over the table list so
//! that every foreign-key target exists before anything references it:
//! lookup tables first, then the playlist tree, then playlist entries,
//! then tracks. A fifth step assembles the playlist forest.
//!
//! Only the file header can fail the decode. Bad pages, bad rows and bad
//! strings are skipped where they are found and tallied in `DecodeStats`.

use std::collections::HashMap;
use std::collections::HashSet;

use tracing::{debug, warn};

use crate::bytes::{ByteView, ShortRead};
use crate::error::{Error, Result};
use crate::library::{Library, Playlist, Track, UNKNOWN_ALBUM, UNKNOWN_ARTIST, UNKNOWN_TITLE};
use crate::page::{PageType, PageWalker, TablePointer, WalkStats};
use crate::rows::{
    decode_album, decode_artist, decode_genre_or_label, decode_key, decode_playlist_entry,
    decode_playlist_tree, decode_track, NameRow, PlaylistTreeRow, TrackRow,
};

/// Input larger than this is refused outright.
const MAX_INPUT_LEN: usize = 500 * 1024 * 1024;
/// Input larger than this decodes, with a warning.
const LARGE_INPUT_LEN: usize = 100 * 1024 * 1024;
/// Byte length of the file header before the table pointers.
const FILE_HEADER_LEN: usize = 28;
/// Bytes per table pointer.
const TABLE_POINTER_LEN: usize = 16;
/// Accepted page length range.
const MIN_PAGE_LEN: u32 = 512;
const MAX_PAGE_LEN: u32 = 1024 * 1024;
/// Ceiling on the table count the header may claim.
const MAX_TABLES: u32 = 1000;

/// Row counts and anomaly counters from one decode.
#[derive(Debug, Default, Clone)]
pub struct DecodeStats {
    pub track_count: u32,
    pub artist_count: u32,
    pub album_count: u32,
    pub genre_count: u32,
    pub label_count: u32,
    pub key_count: u32,
    pub playlist_node_count: u32,
    pub playlist_entry_count: u32,
    pub pages_visited: u32,
    pub pages_skipped: u32,
    pub rows_dropped: u32,
    pub cycles_detected: u32,
    pub page_caps_hit: u32,
}

impl DecodeStats {
    fn absorb(&mut self, walk: WalkStats) {
        self.pages_visited += walk.pages_visited;
        self.pages_skipped += walk.pages_skipped;
        self.rows_dropped += walk.rows_dropped;
        self.cycles_detected += walk.cycle_detected as u32;
        self.page_caps_hit += walk.page_cap_hit as u32;
    }
}

/// Decode a database image into a `Library`.
///
/// `source` is a display name for log messages only; no I/O happens here.
pub fn read_library(data: &[u8], source: &str) -> Result<Library> {
    read_library_with_stats(data, source).map(|(library, _)| library)
}

/// Decode a database image, also returning the decode counters.
pub fn read_library_with_stats(data: &[u8], source: &str) -> Result<(Library, DecodeStats)> {
    let view = ByteView::new(data);
    let layout = read_file_layout(&view, source)?;
    let mut stats = DecodeStats::default();

    let lookups = decode_lookups(&view, &layout, &mut stats);
    let nodes = decode_playlist_nodes(&view, &layout, &mut stats);
    let entries = decode_playlist_entries(&view, &layout, &mut stats);
    let tracks = decode_tracks(&view, &layout, &lookups, &mut stats);

    stats.track_count = tracks.len() as u32;
    stats.playlist_node_count = nodes.len() as u32;

    let playlists = assemble_playlists(nodes, entries);
    debug!(
        "{}: decoded {} tracks, {} playlist nodes",
        source, stats.track_count, stats.playlist_node_count
    );

    Ok((Library { tracks, playlists }, stats))
}

struct FileLayout {
    page_len: usize,
    tables: Vec<TablePointer>,
}

fn read_file_layout(view: &ByteView<'_>, source: &str) -> Result<FileLayout> {
    let len = view.len();
    if len > MAX_INPUT_LEN {
        return Err(Error::TooLarge {
            len,
            max: MAX_INPUT_LEN,
        });
    }
    if len < FILE_HEADER_LEN {
        return Err(Error::TooSmall {
            len,
            min: FILE_HEADER_LEN,
        });
    }
    if len > LARGE_INPUT_LEN {
        warn!("{}: {} MiB input, decode may be slow", source, len >> 20);
    }

    let truncated = |_: ShortRead| Error::InvalidHeader("truncated file header".into());
    let page_len = view.u32le_at(4).map_err(truncated)?;
    let num_tables = view.u32le_at(8).map_err(truncated)?;

    if !(MIN_PAGE_LEN..=MAX_PAGE_LEN).contains(&page_len) {
        return Err(Error::InvalidHeader(format!(
            "page length {} outside [{}, {}]",
            page_len, MIN_PAGE_LEN, MAX_PAGE_LEN
        )));
    }
    if num_tables > MAX_TABLES {
        return Err(Error::InvalidHeader(format!(
            "table count {} exceeds {}",
            num_tables, MAX_TABLES
        )));
    }
    let needed = FILE_HEADER_LEN + num_tables as usize * TABLE_POINTER_LEN;
    if len < needed {
        return Err(Error::InvalidHeader(format!(
            "{} table pointers need {} bytes, file has {}",
            num_tables, needed, len
        )));
    }

    let mut tables = Vec::with_capacity(num_tables as usize);
    for i in 0..num_tables as usize {
        let pointer = TablePointer::read(view, FILE_HEADER_LEN + i * TABLE_POINTER_LEN)
            .map_err(truncated)?;
        tables.push(pointer);
    }

    Ok(FileLayout {
        page_len: page_len as usize,
        tables,
    })
}

/// The five id -> name maps tracks resolve against.
#[derive(Default)]
struct Lookups {
    artists: HashMap<u32, String>,
    albums: HashMap<u32, String>,
    genres: HashMap<u32, String>,
    labels: HashMap<u32, String>,
    keys: HashMap<u32, String>,
}

fn decode_lookups(view: &ByteView<'_>, layout: &FileLayout, stats: &mut DecodeStats) -> Lookups {
    let mut lookups = Lookups::default();
    for table in &layout.tables {
        match PageType::from_raw(table.table_type) {
            Some(PageType::Artists) => {
                decode_name_table(view, table, layout.page_len, stats, decode_artist, &mut lookups.artists)
            }
            Some(PageType::Albums) => {
                decode_name_table(view, table, layout.page_len, stats, decode_album, &mut lookups.albums)
            }
            Some(PageType::Genres) => {
                decode_name_table(view, table, layout.page_len, stats, decode_genre_or_label, &mut lookups.genres)
            }
            Some(PageType::Labels) => {
                decode_name_table(view, table, layout.page_len, stats, decode_genre_or_label, &mut lookups.labels)
            }
            Some(PageType::Keys) => {
                decode_name_table(view, table, layout.page_len, stats, decode_key, &mut lookups.keys)
            }
            _ => {}
        }
    }
    stats.artist_count = lookups.artists.len() as u32;
    stats.album_count = lookups.albums.len() as u32;
    stats.genre_count = lookups.genres.len() as u32;
    stats.label_count = lookups.labels.len() as u32;
    stats.key_count = lookups.keys.len() as u32;
    lookups
}

fn decode_name_table(
    view: &ByteView<'_>,
    table: &TablePointer,
    page_len: usize,
    stats: &mut DecodeStats,
    decode: fn(&ByteView<'_>, usize) -> Option<NameRow>,
    into: &mut HashMap<u32, String>,
) {
    let mut walker = PageWalker::new(*view, table, page_len);
    for row_base in walker.by_ref() {
        match decode(view, row_base) {
            Some(row) => {
                into.insert(row.id, row.name);
            }
            None => stats.rows_dropped += 1,
        }
    }
    stats.absorb(walker.stats());
}

/// Playlist tree rows in decode order. A repeated id replaces the earlier
/// row in place.
fn decode_playlist_nodes(
    view: &ByteView<'_>,
    layout: &FileLayout,
    stats: &mut DecodeStats,
) -> Vec<PlaylistTreeRow> {
    let mut nodes: Vec<PlaylistTreeRow> = Vec::new();
    let mut index_by_id: HashMap<u32, usize> = HashMap::new();
    for table in &layout.tables {
        if PageType::from_raw(table.table_type) != Some(PageType::PlaylistTree) {
            continue;
        }
        let mut walker = PageWalker::new(*view, table, layout.page_len);
        for row_base in walker.by_ref() {
            match decode_playlist_tree(view, row_base) {
                Some(node) => {
                    if let Some(&at) = index_by_id.get(&node.id) {
                        nodes[at] = node;
                    } else {
                        index_by_id.insert(node.id, nodes.len());
                        nodes.push(node);
                    }
                }
                None => stats.rows_dropped += 1,
            }
        }
        stats.absorb(walker.stats());
    }
    nodes
}

/// Entry lists keyed by playlist id, in decode order.
fn decode_playlist_entries(
    view: &ByteView<'_>,
    layout: &FileLayout,
    stats: &mut DecodeStats,
) -> HashMap<u32, Vec<(u32, u32)>> {
    let mut entries: HashMap<u32, Vec<(u32, u32)>> = HashMap::new();
    for table in &layout.tables {
        if PageType::from_raw(table.table_type) != Some(PageType::PlaylistEntries) {
            continue;
        }
        let mut walker = PageWalker::new(*view, table, layout.page_len);
        for row_base in walker.by_ref() {
            match decode_playlist_entry(view, row_base) {
                Some(entry) => {
                    stats.playlist_entry_count += 1;
                    entries
                        .entry(entry.playlist_id)
                        .or_default()
                        .push((entry.position, entry.track_id));
                }
                None => stats.rows_dropped += 1,
            }
        }
        stats.absorb(walker.stats());
    }
    entries
}

/// Tracks in decode order with foreign keys resolved. A repeated id keeps
/// its first position but carries the last row's data.
fn decode_tracks(
    view: &ByteView<'_>,
    layout: &FileLayout,
    lookups: &Lookups,
    stats: &mut DecodeStats,
) -> Vec<Track> {
    let mut tracks: Vec<Track> = Vec::new();
    let mut index_by_id: HashMap<u32, usize> = HashMap::new();
    for table in &layout.tables {
        if PageType::from_raw(table.table_type) != Some(PageType::Tracks) {
            continue;
        }
        let mut walker = PageWalker::new(*view, table, layout.page_len);
        for row_base in walker.by_ref() {
            match decode_track(view, row_base) {
                Some(row) => {
                    let track = resolve_track(row, lookups);
                    if let Some(&at) = index_by_id.get(&track.id) {
                        tracks[at] = track;
                    } else {
                        index_by_id.insert(track.id, tracks.len());
                        tracks.push(track);
                    }
                }
                None => stats.rows_dropped += 1,
            }
        }
        stats.absorb(walker.stats());
    }
    tracks
}

fn resolve_track(row: TrackRow, lookups: &Lookups) -> Track {
    let title = if row.title.is_empty() {
        UNKNOWN_TITLE.to_string()
    } else {
        row.title
    };
    let artist = lookups
        .artists
        .get(&row.artist_id)
        .cloned()
        .unwrap_or_else(|| UNKNOWN_ARTIST.to_string());
    let album = lookups
        .albums
        .get(&row.album_id)
        .cloned()
        .unwrap_or_else(|| UNKNOWN_ALBUM.to_string());
    let genre = lookups.genres.get(&row.genre_id).cloned().unwrap_or_default();
    let key = lookups.keys.get(&row.key_id).cloned().unwrap_or_default();

    Track {
        id: row.id,
        title,
        artist,
        album,
        genre,
        key,
        duration_secs: row.duration_secs,
        bpm: row.tempo_centi_bpm as f64 / 100.0,
        rating: row.rating,
        bitrate_kbps: row.bitrate_kbps,
        file_path: row.file_path,
        date_added: row.date_added,
    }
}

/// Build the playlist forest from the flat node list.
///
/// The disk model has child -> parent edges only. Children attach to their
/// parent in table order; a node whose parent id is zero or references no
/// decoded node becomes a root. Roots sort by their stored sort order.
/// Nodes caught in a parent cycle are unreachable from any root and drop
/// out silently.
fn assemble_playlists(
    nodes: Vec<PlaylistTreeRow>,
    mut entries: HashMap<u32, Vec<(u32, u32)>>,
) -> Vec<Playlist> {
    let ids: HashSet<u32> = nodes.iter().map(|node| node.id).collect();

    let mut children_of: HashMap<u32, Vec<usize>> = HashMap::new();
    let mut roots: Vec<usize> = Vec::new();
    for (idx, node) in nodes.iter().enumerate() {
        if node.parent_id != 0 && ids.contains(&node.parent_id) {
            children_of.entry(node.parent_id).or_default().push(idx);
        } else {
            roots.push(idx);
        }
    }
    roots.sort_by_key(|&idx| nodes[idx].sort_order);

    // Iterative post-order build; parent chains in hostile input can be
    // deep enough to overflow a recursive version.
    struct Frame {
        playlist: Playlist,
        remaining: std::vec::IntoIter<usize>,
    }

    let mut shell = |idx: usize, parent_id: Option<u32>| -> Frame {
        let node = &nodes[idx];
        let mut members = entries.remove(&node.id).unwrap_or_default();
        members.sort_by_key(|&(position, _)| position);
        Frame {
            playlist: Playlist {
                id: node.id,
                name: node.name.clone(),
                parent_id,
                is_folder: node.is_folder,
                children: Vec::new(),
                track_ids: members.into_iter().map(|(_, track_id)| track_id).collect(),
            },
            remaining: children_of.remove(&node.id).unwrap_or_default().into_iter(),
        }
    };

    let mut forest = Vec::with_capacity(roots.len());
    for root_idx in roots {
        let mut stack = vec![shell(root_idx, None)];
        while let Some(mut frame) = stack.pop() {
            if let Some(child_idx) = frame.remaining.next() {
                let parent_id = frame.playlist.id;
                stack.push(frame);
                stack.push(shell(child_idx, Some(parent_id)));
            } else if let Some(parent) = stack.last_mut() {
                parent.playlist.children.push(frame.playlist);
            } else {
                forest.push(frame.playlist);
            }
        }
    }
    forest
}
