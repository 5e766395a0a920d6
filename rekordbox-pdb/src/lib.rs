//! rekordbox-pdb: reader for Pioneer DeviceSQL (export.pdb) databases
//!
//! Decodes the page-oriented export database into a normalized library:
//! tracks with resolved text metadata plus the playlist tree. The companion
//! exportExt.pdb can be merged in afterwards to fill missing BPM and genre
//! fields.
//!
//! The decoder works on a caller-supplied byte buffer, performs no I/O, and
//! tolerates malformed or hostile input: bad rows and pages are skipped,
//! page chains are cycle-checked, and nothing is ever read out of bounds.
//!
//! Based on Deep Symmetry's reverse engineering documentation:
//! https://djl-analysis.deepsymmetry.org/rekordbox-export-analysis/

pub mod bytes;
pub mod error;
pub mod library;
pub mod page;
pub mod pdb;
pub mod rows;
pub mod string;

// Re-exports for convenience
pub use error::{Error, Result};
pub use library::{Library, Playlist, Track};
pub use pdb::{read_library, read_library_with_stats, DecodeStats};
