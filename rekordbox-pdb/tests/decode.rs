//! End-to-end decode tests against synthetic database images.
//!
//! The fixture builder below writes bit-exact pdb images: a header page with
//! table pointers, and one data page per table with the backward-growing row
//! index. Each table is a single-page chain unless a test wires the chain
//! differently.

use rekordbox_pdb::{read_library, read_library_with_stats, Library};

const PAGE_LEN: usize = 4096;
const HEAP_START: usize = 0x28;
const ROW_GROUP_SIZE: usize = 0x24;
const ROWS_PER_GROUP: usize = 16;

const TYPE_TRACKS: u32 = 0;
const TYPE_GENRES: u32 = 1;
const TYPE_ARTISTS: u32 = 2;
const TYPE_KEYS: u32 = 5;
const TYPE_PLAYLIST_TREE: u32 = 7;
const TYPE_PLAYLIST_ENTRIES: u32 = 8;

// ---- fixture builder ----

fn put_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

fn short_ascii(s: &str) -> Vec<u8> {
    let mut out = vec![(((s.len() + 1) as u8) << 1) | 1];
    out.extend_from_slice(s.as_bytes());
    out
}

fn utf16_string(s: &str) -> Vec<u8> {
    let units: Vec<u16> = s.encode_utf16().collect();
    let total = 4 + units.len() * 2;
    let mut out = vec![0x90, (total & 0xFF) as u8, (total >> 8) as u8, 0x00];
    for unit in units {
        out.extend_from_slice(&unit.to_le_bytes());
    }
    out
}

struct PageImage {
    data: Vec<u8>,
    heap_pos: usize,
    row_offsets: Vec<u16>,
    page_type: u32,
}

impl PageImage {
    fn new(page_type: u32) -> Self {
        Self {
            data: vec![0u8; PAGE_LEN],
            heap_pos: HEAP_START,
            row_offsets: Vec::new(),
            page_type,
        }
    }

    fn write_row(&mut self, row: &[u8]) {
        let offset = (self.heap_pos - HEAP_START) as u16;
        self.data[self.heap_pos..self.heap_pos + row.len()].copy_from_slice(row);
        self.heap_pos += row.len();
        self.row_offsets.push(offset);
    }

    fn finalize(mut self, next_page: u32, flags: u8) -> Vec<u8> {
        self.data[8..12].copy_from_slice(&self.page_type.to_le_bytes());
        self.data[12..16].copy_from_slice(&next_page.to_le_bytes());
        let packed = self.row_offsets.len() as u32 & 0x1FFF;
        self.data[24..28].copy_from_slice(&packed.to_le_bytes());
        self.data[27] = flags;

        for (group, chunk) in self.row_offsets.chunks(ROWS_PER_GROUP).enumerate() {
            let group_base = PAGE_LEN - group * ROW_GROUP_SIZE;
            let presence = ((1u32 << chunk.len()) - 1) as u16;
            self.data[group_base - 4..group_base - 2].copy_from_slice(&presence.to_le_bytes());
            for (i, &ofs) in chunk.iter().enumerate() {
                let pos = group_base - 6 - 2 * i;
                self.data[pos..pos + 2].copy_from_slice(&ofs.to_le_bytes());
            }
        }
        self.data
    }
}

struct PdbImage {
    pages: Vec<Vec<u8>>,
    tables: Vec<(u32, u32, u32)>,
}

impl PdbImage {
    fn new() -> Self {
        // Page 0 is the file header.
        Self {
            pages: vec![vec![0u8; PAGE_LEN]],
            tables: Vec::new(),
        }
    }

    /// Append a one-page table holding the given rows.
    fn add_table(&mut self, page_type: u32, rows: &[Vec<u8>]) {
        let index = self.pages.len() as u32;
        let mut page = PageImage::new(page_type);
        for row in rows {
            page.write_row(row);
        }
        self.pages.push(page.finalize(0, 0x34));
        self.tables.push((page_type, index, index));
    }

    /// Append a one-page table whose next-page link points back at itself
    /// and whose table pointer never ends the chain.
    fn add_self_cycling_table(&mut self, page_type: u32, rows: &[Vec<u8>]) {
        let index = self.pages.len() as u32;
        let mut page = PageImage::new(page_type);
        for row in rows {
            page.write_row(row);
        }
        self.pages.push(page.finalize(index, 0x34));
        self.tables.push((page_type, index, u32::MAX));
    }

    fn build(mut self) -> Vec<u8> {
        let num_tables = self.tables.len() as u32;
        let header = &mut self.pages[0];
        put_u32(header, 4, PAGE_LEN as u32);
        put_u32(header, 8, num_tables);
        for (i, &(table_type, first_page, last_page)) in self.tables.iter().enumerate() {
            let ofs = 28 + i * 16;
            put_u32(header, ofs, table_type);
            put_u32(header, ofs + 8, first_page);
            put_u32(header, ofs + 12, last_page);
        }
        self.pages.concat()
    }
}

// ---- row builders ----

fn artist_row(id: u32, name: &str) -> Vec<u8> {
    let mut row = vec![0u8; 10];
    row[0..2].copy_from_slice(&0x0060u16.to_le_bytes());
    put_u32(&mut row, 4, id);
    row[8] = 0x03;
    row[9] = 10;
    row.extend_from_slice(&short_ascii(name));
    row
}

fn genre_row(id: u32, name: &str) -> Vec<u8> {
    let mut row = id.to_le_bytes().to_vec();
    row.extend_from_slice(&short_ascii(name));
    row
}

fn key_row(id: u32, name: &str) -> Vec<u8> {
    let mut row = Vec::new();
    row.extend_from_slice(&id.to_le_bytes());
    row.extend_from_slice(&id.to_le_bytes());
    row.extend_from_slice(&short_ascii(name));
    row
}

fn tree_row(id: u32, parent_id: u32, sort_order: u32, is_folder: bool, name: &str) -> Vec<u8> {
    let mut row = vec![0u8; 20];
    put_u32(&mut row, 0, parent_id);
    put_u32(&mut row, 8, sort_order);
    put_u32(&mut row, 12, id);
    put_u32(&mut row, 16, is_folder as u32);
    row.extend_from_slice(&short_ascii(name));
    row
}

fn entry_row(position: u32, track_id: u32, playlist_id: u32) -> Vec<u8> {
    let mut row = vec![0u8; 12];
    put_u32(&mut row, 0, position);
    put_u32(&mut row, 4, track_id);
    put_u32(&mut row, 8, playlist_id);
    row
}

struct TrackFixture {
    id: u32,
    title: Vec<u8>,
    artist_id: u32,
    album_id: u32,
    genre_id: u32,
    key_id: u32,
    tempo_centi_bpm: u32,
    duration_secs: u16,
    bitrate_kbps: u32,
    rating: u8,
    file_path: String,
    date_added: String,
}

impl Default for TrackFixture {
    fn default() -> Self {
        Self {
            id: 1,
            title: short_ascii("Untitled"),
            artist_id: 0,
            album_id: 0,
            genre_id: 0,
            key_id: 0,
            tempo_centi_bpm: 12_000,
            duration_secs: 200,
            bitrate_kbps: 320,
            rating: 0,
            file_path: "/Contents/a.mp3".into(),
            date_added: "2024-01-01".into(),
        }
    }
}

fn track_row(fixture: &TrackFixture) -> Vec<u8> {
    const HEADER_LEN: usize = 0x5E + 21 * 2;
    let mut row = vec![0u8; HEADER_LEN];
    put_u32(&mut row, 0x20, fixture.key_id);
    put_u32(&mut row, 0x30, fixture.bitrate_kbps);
    put_u32(&mut row, 0x38, fixture.tempo_centi_bpm);
    put_u32(&mut row, 0x3C, fixture.genre_id);
    put_u32(&mut row, 0x40, fixture.album_id);
    put_u32(&mut row, 0x44, fixture.artist_id);
    put_u32(&mut row, 0x48, fixture.id);
    row[0x54..0x56].copy_from_slice(&fixture.duration_secs.to_le_bytes());
    row[0x59] = fixture.rating;

    if !fixture.date_added.is_empty() {
        set_slot(&mut row, 10, &short_ascii(&fixture.date_added));
    }
    set_slot(&mut row, 17, &fixture.title);
    if !fixture.file_path.is_empty() {
        set_slot(&mut row, 20, &short_ascii(&fixture.file_path));
    }
    row
}

fn set_slot(row: &mut Vec<u8>, slot: usize, encoded: &[u8]) {
    if encoded.is_empty() {
        return;
    }
    let ofs = row.len() as u16;
    row[0x5E + slot * 2..0x5E + slot * 2 + 2].copy_from_slice(&ofs.to_le_bytes());
    row.extend_from_slice(encoded);
}

fn decode(image: PdbImage) -> Library {
    read_library(&image.build(), "fixture").expect("fixture must decode")
}

// ---- scenarios ----

#[test]
fn minimal_empty_library() {
    let library = decode(PdbImage::new());
    assert!(library.tracks.is_empty());
    assert!(library.playlists.is_empty());
}

#[test]
fn two_artists_one_track() {
    let mut image = PdbImage::new();
    image.add_table(TYPE_ARTISTS, &[artist_row(1, "DJ A"), artist_row(2, "DJ B")]);
    image.add_table(
        TYPE_TRACKS,
        &[track_row(&TrackFixture {
            id: 100,
            title: short_ascii("Intro"),
            artist_id: 2,
            tempo_centi_bpm: 12_800,
            duration_secs: 180,
            ..Default::default()
        })],
    );

    let library = decode(image);
    assert_eq!(library.tracks.len(), 1);
    let track = &library.tracks[0];
    assert_eq!(track.id, 100);
    assert_eq!(track.title, "Intro");
    assert_eq!(track.artist, "DJ B");
    assert_eq!(track.bpm, 128.0);
    assert_eq!(track.duration_secs, 180);
    assert_eq!(track.album, "Unknown Album");
}

#[test]
fn playlist_tree_with_ordered_entries() {
    let mut image = PdbImage::new();
    image.add_table(
        TYPE_PLAYLIST_TREE,
        &[
            tree_row(1, 0, 0, true, "Sets"),
            tree_row(2, 1, 1, false, "Warmup"),
            tree_row(3, 1, 2, false, "Peak"),
        ],
    );
    image.add_table(
        TYPE_PLAYLIST_ENTRIES,
        &[entry_row(2, 10, 2), entry_row(1, 11, 2)],
    );

    let library = decode(image);
    assert_eq!(library.playlists.len(), 1);
    let root = &library.playlists[0];
    assert_eq!(root.name, "Sets");
    assert!(root.is_folder);
    assert_eq!(root.parent_id, None);

    let names: Vec<&str> = root.children.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["Warmup", "Peak"]);

    let warmup = &root.children[0];
    assert_eq!(warmup.parent_id, Some(1));
    // Positions 1 and 2 put track 11 before track 10, whether or not the
    // library knows those tracks.
    assert_eq!(warmup.track_ids, vec![11, 10]);
}

#[test]
fn utf16_title() {
    let mut image = PdbImage::new();
    image.add_table(
        TYPE_TRACKS,
        &[track_row(&TrackFixture {
            id: 1,
            title: utf16_string("ナイト"),
            ..Default::default()
        })],
    );

    let library = decode(image);
    assert_eq!(library.tracks[0].title, "ナイト");
}

#[test]
fn self_referential_page_chain_terminates() {
    let mut image = PdbImage::new();
    image.add_self_cycling_table(
        TYPE_TRACKS,
        &[track_row(&TrackFixture {
            id: 5,
            ..Default::default()
        })],
    );

    let (library, stats) =
        read_library_with_stats(&image.build(), "fixture").expect("decode must succeed");
    assert_eq!(library.tracks.len(), 1);
    assert_eq!(library.tracks[0].id, 5);
    assert_eq!(stats.cycles_detected, 1);
    assert_eq!(stats.pages_visited, 1);
}

#[test]
fn merge_fills_bpm_and_genre() {
    let mut primary = PdbImage::new();
    primary.add_table(
        TYPE_TRACKS,
        &[track_row(&TrackFixture {
            id: 7,
            title: short_ascii("Primary"),
            tempo_centi_bpm: 0,
            ..Default::default()
        })],
    );

    let mut companion = PdbImage::new();
    companion.add_table(TYPE_GENRES, &[genre_row(5, "House")]);
    companion.add_table(
        TYPE_TRACKS,
        &[track_row(&TrackFixture {
            id: 7,
            title: short_ascii("Companion"),
            genre_id: 5,
            tempo_centi_bpm: 12_400,
            ..Default::default()
        })],
    );

    let merged = decode(primary).merged_with(&decode(companion));
    assert_eq!(merged.tracks.len(), 1);
    let track = &merged.tracks[0];
    assert_eq!(track.bpm, 124.0);
    assert_eq!(track.genre, "House");
    // Everything else keeps the primary's values.
    assert_eq!(track.title, "Primary");
}

// ---- universal properties ----

#[test]
fn unresolved_references_fall_back() {
    let mut image = PdbImage::new();
    image.add_table(TYPE_KEYS, &[key_row(2, "Am")]);
    image.add_table(
        TYPE_TRACKS,
        &[track_row(&TrackFixture {
            id: 1,
            title: Vec::new(),
            artist_id: 99,
            album_id: 42,
            genre_id: 13,
            key_id: 2,
            ..Default::default()
        })],
    );

    let library = decode(image);
    let track = &library.tracks[0];
    assert_eq!(track.title, "Unknown Title");
    assert_eq!(track.artist, "Unknown Artist");
    assert_eq!(track.album, "Unknown Album");
    assert_eq!(track.genre, "");
    assert_eq!(track.key, "Am");
}

#[test]
fn duplicate_track_id_last_row_wins() {
    let mut image = PdbImage::new();
    image.add_table(
        TYPE_TRACKS,
        &[
            track_row(&TrackFixture {
                id: 42,
                title: short_ascii("First"),
                ..Default::default()
            }),
            track_row(&TrackFixture {
                id: 42,
                title: short_ascii("Second"),
                ..Default::default()
            }),
        ],
    );

    let library = decode(image);
    assert_eq!(library.tracks.len(), 1);
    assert_eq!(library.tracks[0].title, "Second");
}

#[test]
fn child_of_dropped_parent_becomes_root() {
    let mut image = PdbImage::new();
    image.add_table(
        TYPE_PLAYLIST_TREE,
        &[
            // Parent 9 never decodes: its name is empty.
            tree_row(9, 0, 0, true, ""),
            tree_row(2, 9, 1, false, "Stranded"),
        ],
    );

    let library = decode(image);
    assert_eq!(library.playlists.len(), 1);
    assert_eq!(library.playlists[0].name, "Stranded");
    assert_eq!(library.playlists[0].parent_id, None);
}

#[test]
fn root_playlists_sorted_by_sort_order() {
    let mut image = PdbImage::new();
    image.add_table(
        TYPE_PLAYLIST_TREE,
        &[
            tree_row(1, 0, 7, false, "Late"),
            tree_row(2, 0, 3, false, "Early"),
            tree_row(3, 0, 5, false, "Middle"),
        ],
    );

    let library = decode(image);
    let names: Vec<&str> = library.playlists.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["Early", "Middle", "Late"]);
}

#[test]
fn no_zero_ids_emitted() {
    let mut image = PdbImage::new();
    image.add_table(
        TYPE_TRACKS,
        &[
            track_row(&TrackFixture {
                id: 0,
                ..Default::default()
            }),
            track_row(&TrackFixture {
                id: 3,
                ..Default::default()
            }),
        ],
    );
    image.add_table(
        TYPE_PLAYLIST_TREE,
        &[tree_row(0, 0, 0, false, "Ghost"), tree_row(4, 0, 1, false, "Real")],
    );

    let library = decode(image);
    assert_eq!(library.tracks.len(), 1);
    assert_eq!(library.tracks[0].id, 3);
    assert_eq!(library.playlists.len(), 1);
    assert_eq!(library.playlists[0].id, 4);
}

#[test]
fn decode_is_deterministic() {
    let mut image = PdbImage::new();
    image.add_table(TYPE_ARTISTS, &[artist_row(1, "DJ A")]);
    image.add_table(
        TYPE_PLAYLIST_TREE,
        &[tree_row(1, 0, 0, false, "All"), tree_row(2, 1, 1, false, "Sub")],
    );
    image.add_table(TYPE_PLAYLIST_ENTRIES, &[entry_row(1, 9, 1)]);
    image.add_table(
        TYPE_TRACKS,
        &[track_row(&TrackFixture {
            id: 9,
            artist_id: 1,
            ..Default::default()
        })],
    );
    let data = image.build();

    let first = read_library(&data, "fixture").unwrap();
    let second = read_library(&data, "fixture").unwrap();
    assert_eq!(first, second);
}

/// xorshift64, deterministic fuzz without pulling in a RNG crate.
struct XorShift(u64);

impl XorShift {
    fn next(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }
}

#[test]
fn random_bytes_never_panic() {
    let mut rng = XorShift(0x9E37_79B9_7F4A_7C15);
    for &len in &[0usize, 1, 27, 28, 100, 512, 4096, 16384] {
        for _ in 0..8 {
            let data: Vec<u8> = (0..len).map(|_| rng.next() as u8).collect();
            // Any outcome is fine as long as it returns.
            let _ = read_library(&data, "fuzz");
        }
    }
}

#[test]
fn valid_header_with_garbage_pages_terminates() {
    let mut rng = XorShift(0xDEAD_BEEF_CAFE_F00D);
    let mut data: Vec<u8> = (0..PAGE_LEN * 8).map(|_| rng.next() as u8).collect();
    put_u32(&mut data, 4, PAGE_LEN as u32);
    put_u32(&mut data, 8, 12);
    let _ = read_library(&data, "fuzz");
}
