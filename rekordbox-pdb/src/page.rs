//! Page-level structure of the database file
//!
//! The file is a sequence of `page_len`-byte pages. Each data page has a
//! 40-byte header, a heap growing forward from offset 0x28, and a row index
//! growing backward from the page end in groups of 16 rows (2 bytes padding,
//! 2 bytes presence flags, 16 x 2-byte heap offsets per group).
//!
//! `PageWalker` follows a table's `next_page` chain and yields the base
//! offset of every live row. The chain comes from untrusted input: a visited
//! set catches cycles, an absolute page cap bounds the walk, and any offset
//! that escapes its page is dropped.

use std::collections::HashSet;

use tracing::warn;

use crate::bytes::{ByteView, ShortRead};

/// Offset of the heap within a page.
pub const HEAP_START: usize = 0x28;

/// Size of one backward-growing row index group:
/// 2 (padding) + 2 (presence flags) + 16 x 2 (offsets).
pub const ROW_GROUP_SIZE: usize = 0x24;

/// Maximum rows per index group.
pub const ROWS_PER_GROUP: usize = 16;

/// Hard cap on pages followed per table.
pub const MAX_PAGES_PER_TABLE: u32 = 10_000;

/// Hard cap on the row count a page header may claim.
pub const MAX_ROWS_PER_PAGE: usize = 2_000;

/// Page flag marking an index page (no rows).
const PAGE_FLAG_INDEX: u8 = 0x40;

/// Table types the reader decodes.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PageType {
    Tracks = 0,
    Genres = 1,
    Artists = 2,
    Albums = 3,
    Labels = 4,
    Keys = 5,
    PlaylistTree = 7,
    PlaylistEntries = 8,
}

impl PageType {
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(PageType::Tracks),
            1 => Some(PageType::Genres),
            2 => Some(PageType::Artists),
            3 => Some(PageType::Albums),
            4 => Some(PageType::Labels),
            5 => Some(PageType::Keys),
            7 => Some(PageType::PlaylistTree),
            8 => Some(PageType::PlaylistEntries),
            _ => None,
        }
    }
}

/// Table pointer from the file header: 16 bytes per table starting at
/// byte 28 (`type @0`, empty candidate `@4` unused when reading,
/// `first_page @8`, `last_page @12`).
#[derive(Debug, Clone, Copy)]
pub struct TablePointer {
    pub table_type: u32,
    pub first_page: u32,
    pub last_page: u32,
}

impl TablePointer {
    pub fn read(view: &ByteView<'_>, offset: usize) -> Result<Self, ShortRead> {
        Ok(Self {
            table_type: view.u32le_at(offset)?,
            first_page: view.u32le_at(offset + 8)?,
            last_page: view.u32le_at(offset + 12)?,
        })
    }
}

/// Parsed page header fields the walker needs.
#[derive(Debug, Clone, Copy)]
struct PageHeader {
    page_type: u32,
    next_page: u32,
    num_row_offsets: usize,
    flags: u8,
}

impl PageHeader {
    fn read(view: &ByteView<'_>, page_offset: usize) -> Result<Self, ShortRead> {
        // The low 13 bits of the packed u32 at +24 carry the row count.
        let packed = view.u32le_at(page_offset + 24)?;
        Ok(Self {
            page_type: view.u32le_at(page_offset + 8)?,
            next_page: view.u32le_at(page_offset + 12)?,
            num_row_offsets: (packed & 0x1FFF) as usize,
            flags: view.u8_at(page_offset + 27)?,
        })
    }

    fn is_index_page(&self) -> bool {
        self.flags & PAGE_FLAG_INDEX != 0
    }
}

/// Counters describing how a table walk went.
#[derive(Debug, Default, Clone, Copy)]
pub struct WalkStats {
    pub pages_visited: u32,
    pub pages_skipped: u32,
    pub rows_dropped: u32,
    pub cycle_detected: bool,
    pub page_cap_hit: bool,
}

/// Lazy iterator over the live rows of one table. Yields the absolute base
/// offset of each row whose page type matches the table type, in ascending
/// row order within each page and `next_page` chain order across pages.
pub struct PageWalker<'a> {
    view: ByteView<'a>,
    page_len: usize,
    table_type: u32,
    last_page: u32,
    next_page: Option<u32>,
    visited: HashSet<u32>,
    pending: std::vec::IntoIter<usize>,
    stats: WalkStats,
}

impl<'a> PageWalker<'a> {
    pub fn new(view: ByteView<'a>, table: &TablePointer, page_len: usize) -> Self {
        Self {
            view,
            page_len,
            table_type: table.table_type,
            last_page: table.last_page,
            next_page: Some(table.first_page),
            visited: HashSet::new(),
            pending: Vec::new().into_iter(),
            stats: WalkStats::default(),
        }
    }

    pub fn stats(&self) -> WalkStats {
        self.stats
    }

    /// Load the next page of the chain, buffering its live rows. Returns
    /// `None` once the walk is over.
    fn advance_page(&mut self) -> Option<()> {
        let page_index = self.next_page.take()?;

        // Page 0 is the file header, so a zero link ends the chain.
        if page_index == 0 {
            return None;
        }
        let page_offset = (page_index as usize).checked_mul(self.page_len)?;
        if page_offset.checked_add(self.page_len)? > self.view.len() {
            return None;
        }

        if self.stats.pages_visited >= MAX_PAGES_PER_TABLE {
            self.stats.page_cap_hit = true;
            warn!(
                "table type {} chain exceeds {} pages, stopping walk",
                self.table_type, MAX_PAGES_PER_TABLE
            );
            return None;
        }
        if !self.visited.insert(page_index) {
            self.stats.cycle_detected = true;
            warn!(
                "table type {} chain revisits page {}, stopping walk",
                self.table_type, page_index
            );
            return None;
        }
        self.stats.pages_visited += 1;

        let header = match PageHeader::read(&self.view, page_offset) {
            Ok(header) => header,
            Err(ShortRead) => return None,
        };

        // Schedule the next hop before touching the rows; the table's last
        // page ends the chain regardless of its link.
        if page_index != self.last_page {
            self.next_page = Some(header.next_page);
        }

        if header.is_index_page() || header.page_type != self.table_type {
            self.stats.pages_skipped += 1;
        } else {
            self.pending = self.collect_rows(page_offset, &header).into_iter();
        }
        Some(())
    }

    /// Decode the backward-growing row index of one data page.
    fn collect_rows(&mut self, page_offset: usize, header: &PageHeader) -> Vec<usize> {
        let num_rows = header.num_row_offsets;
        if num_rows == 0 {
            return Vec::new();
        }
        if num_rows > MAX_ROWS_PER_PAGE {
            self.stats.pages_skipped += 1;
            return Vec::new();
        }

        let heap_start = page_offset + HEAP_START;
        let page_end = page_offset + self.page_len;
        let num_groups = (num_rows + ROWS_PER_GROUP - 1) / ROWS_PER_GROUP;
        let mut rows = Vec::with_capacity(num_rows);

        for group in 0..num_groups {
            // The whole group slot must fit between the heap start and the
            // page end; once it would cross the header, the index is bogus.
            let group_base = match page_end.checked_sub(group * ROW_GROUP_SIZE) {
                Some(base) if base >= heap_start + ROW_GROUP_SIZE => base,
                _ => {
                    self.stats.rows_dropped += (num_rows - group * ROWS_PER_GROUP) as u32;
                    break;
                }
            };

            let presence = match self.view.u16le_at(group_base - 4) {
                Ok(bits) => bits,
                Err(ShortRead) => break,
            };
            let rows_in_group = (num_rows - group * ROWS_PER_GROUP).min(ROWS_PER_GROUP);
            for i in 0..rows_in_group {
                if presence & (1 << i) == 0 {
                    continue;
                }
                let heap_ofs = match self.view.u16le_at(group_base - 6 - 2 * i) {
                    Ok(ofs) => ofs as usize,
                    Err(ShortRead) => continue,
                };
                let row_base = heap_start + heap_ofs;
                if row_base >= page_end {
                    self.stats.rows_dropped += 1;
                    continue;
                }
                rows.push(row_base);
            }
        }
        rows
    }
}

impl Iterator for PageWalker<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        loop {
            if let Some(row) = self.pending.next() {
                return Some(row);
            }
            self.advance_page()?;
        }
    }
}
