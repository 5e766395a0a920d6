//! Error types for rekordbox-pdb

use thiserror::Error;

/// Fatal decode errors. Everything local (a bad row, a bad page, a bad
/// string) is skipped at the site that found it and never surfaces here.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Database too large: {len} bytes (limit {max})")]
    TooLarge { len: usize, max: usize },

    #[error("Database too small: {len} bytes ({min} needed for the file header)")]
    TooSmall { len: usize, min: usize },

    #[error("Invalid file header: {0}")]
    InvalidHeader(String),
}

pub type Result<T> = std::result::Result<T, Error>;
