//! Row decoders for the table kinds the reader cares about
//!
//! Each decoder reads one row at `row_base` and either produces a typed
//! record or drops the row. Field offsets are relative to the row start.
//! Artist and album rows are self-describing: bit 0x04 of the leading
//! subtype word switches between a one-byte "near" and a two-byte "far"
//! name offset.

use crate::bytes::ByteView;
use crate::string::decode_string;

/// Subtype bit selecting the far (u16) name offset form. Other subtype
/// bits are not interpreted.
const SUBTYPE_FAR_NAME: u16 = 0x0004;

/// Number of entries in the track row's string offset table.
const TRACK_STRING_SLOTS: usize = 21;
/// Start of the string offset table within a track row.
const TRACK_STRING_TABLE: usize = 0x5E;
/// Semantic slots of the string table.
const SLOT_DATE_ADDED: usize = 10;
const SLOT_TITLE: usize = 17;
const SLOT_FILE_PATH: usize = 20;
/// Minimum bytes a track row occupies.
const TRACK_ROW_MIN_LEN: usize = 0x86;
/// String offsets beyond this are treated as garbage.
const MAX_STRING_OFFSET: u16 = 10_000;

/// Sanity ceilings; rows exceeding them are dropped.
const MAX_TEMPO_CENTI_BPM: u32 = 50_000;
const MAX_DURATION_SECS: u16 = 36_000;
const MAX_BITRATE_KBPS: u32 = 10_000;

/// A lookup-table row (artist, album, genre, label, key).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameRow {
    pub id: u32,
    pub name: String,
}

/// One node of the playlist tree.
#[derive(Debug, Clone)]
pub struct PlaylistTreeRow {
    pub id: u32,
    pub parent_id: u32,
    pub sort_order: u32,
    pub is_folder: bool,
    pub name: String,
}

/// One playlist membership record.
#[derive(Debug, Clone, Copy)]
pub struct PlaylistEntryRow {
    pub playlist_id: u32,
    pub track_id: u32,
    pub position: u32,
}

/// A raw track row, foreign keys unresolved.
#[derive(Debug, Clone)]
pub struct TrackRow {
    pub id: u32,
    pub title: String,
    pub artist_id: u32,
    pub album_id: u32,
    pub genre_id: u32,
    pub key_id: u32,
    pub duration_secs: u16,
    pub tempo_centi_bpm: u32,
    pub rating: u8,
    pub bitrate_kbps: u32,
    pub file_path: String,
    pub date_added: String,
}

fn keep_named(id: u32, name: String) -> Option<NameRow> {
    if id == 0 || name.is_empty() {
        return None;
    }
    Some(NameRow { id, name })
}

/// Artist row: `subtype u16 @0`, `id u32 @4`, name offset `u8 @9` (near)
/// or `u16 @0x0A` (far).
pub fn decode_artist(view: &ByteView<'_>, row_base: usize) -> Option<NameRow> {
    let subtype = view.u16le_at(row_base).ok()?;
    let id = view.u32le_at(row_base + 4).ok()?;
    let name_ofs = if subtype & SUBTYPE_FAR_NAME != 0 {
        view.u16le_at(row_base + 0x0A).ok()? as usize
    } else {
        view.u8_at(row_base + 9).ok()? as usize
    };
    keep_named(id, decode_string(view, row_base + name_ofs))
}

/// Album row: `subtype u16 @0`, `id u32 @12`, name offset `u8 @17` (near)
/// or `u16 @0x16` (far).
pub fn decode_album(view: &ByteView<'_>, row_base: usize) -> Option<NameRow> {
    let subtype = view.u16le_at(row_base).ok()?;
    let id = view.u32le_at(row_base + 12).ok()?;
    let name_ofs = if subtype & SUBTYPE_FAR_NAME != 0 {
        view.u16le_at(row_base + 0x16).ok()? as usize
    } else {
        view.u8_at(row_base + 17).ok()? as usize
    };
    keep_named(id, decode_string(view, row_base + name_ofs))
}

/// Genre and label rows share one layout: `id u32 @0`, name at `+4`.
pub fn decode_genre_or_label(view: &ByteView<'_>, row_base: usize) -> Option<NameRow> {
    let id = view.u32le_at(row_base).ok()?;
    keep_named(id, decode_string(view, row_base + 4))
}

/// Key row: `id u32 @0`, a second id at `+4` with no known meaning,
/// name at `+8`.
pub fn decode_key(view: &ByteView<'_>, row_base: usize) -> Option<NameRow> {
    let id = view.u32le_at(row_base).ok()?;
    keep_named(id, decode_string(view, row_base + 8))
}

/// Playlist tree row: `parent_id u32 @0`, `sort_order u32 @8`,
/// `id u32 @12`, `raw_is_folder u32 @16`, name at `+20`.
pub fn decode_playlist_tree(view: &ByteView<'_>, row_base: usize) -> Option<PlaylistTreeRow> {
    let parent_id = view.u32le_at(row_base).ok()?;
    let sort_order = view.u32le_at(row_base + 8).ok()?;
    let id = view.u32le_at(row_base + 12).ok()?;
    let raw_is_folder = view.u32le_at(row_base + 16).ok()?;
    let name = decode_string(view, row_base + 20);
    if id == 0 || name.is_empty() {
        return None;
    }
    Some(PlaylistTreeRow {
        id,
        parent_id,
        sort_order,
        is_folder: raw_is_folder != 0,
        name,
    })
}

/// Playlist entry row: `position u32 @0`, `track_id u32 @4`,
/// `playlist_id u32 @8`.
pub fn decode_playlist_entry(view: &ByteView<'_>, row_base: usize) -> Option<PlaylistEntryRow> {
    let position = view.u32le_at(row_base).ok()?;
    let track_id = view.u32le_at(row_base + 4).ok()?;
    let playlist_id = view.u32le_at(row_base + 8).ok()?;
    if track_id == 0 || playlist_id == 0 {
        return None;
    }
    Some(PlaylistEntryRow {
        playlist_id,
        track_id,
        position,
    })
}

/// Track row. Fixed fields live at known offsets; the strings hang off a
/// 21-slot table of u16 heap offsets at 0x5E.
pub fn decode_track(view: &ByteView<'_>, row_base: usize) -> Option<TrackRow> {
    view.slice(row_base, TRACK_ROW_MIN_LEN).ok()?;

    let key_id = view.u32le_at(row_base + 0x20).ok()?;
    let bitrate_kbps = view.u32le_at(row_base + 0x30).ok()?;
    let tempo_centi_bpm = view.u32le_at(row_base + 0x38).ok()?;
    let genre_id = view.u32le_at(row_base + 0x3C).ok()?;
    let album_id = view.u32le_at(row_base + 0x40).ok()?;
    let artist_id = view.u32le_at(row_base + 0x44).ok()?;
    let id = view.u32le_at(row_base + 0x48).ok()?;
    let duration_secs = view.u16le_at(row_base + 0x54).ok()?;
    let rating = view.u8_at(row_base + 0x59).ok()?;

    if id == 0
        || tempo_centi_bpm > MAX_TEMPO_CENTI_BPM
        || duration_secs > MAX_DURATION_SECS
        || bitrate_kbps > MAX_BITRATE_KBPS
    {
        return None;
    }

    Some(TrackRow {
        id,
        title: track_string(view, row_base, SLOT_TITLE),
        artist_id,
        album_id,
        genre_id,
        key_id,
        duration_secs,
        tempo_centi_bpm,
        rating,
        bitrate_kbps,
        file_path: track_string(view, row_base, SLOT_FILE_PATH),
        date_added: track_string(view, row_base, SLOT_DATE_ADDED),
    })
}

/// Resolve one entry of the string offset table. A zero slot means "no
/// string"; implausibly large offsets are treated the same way.
fn track_string(view: &ByteView<'_>, row_base: usize, slot: usize) -> String {
    debug_assert!(slot < TRACK_STRING_SLOTS);
    let ofs = match view.u16le_at(row_base + TRACK_STRING_TABLE + 2 * slot) {
        Ok(ofs) => ofs,
        Err(_) => return String::new(),
    };
    if ofs == 0 || ofs > MAX_STRING_OFFSET {
        return String::new();
    }
    decode_string(view, row_base + ofs as usize)
}
