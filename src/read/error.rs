use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReadError {
    #[error("Couldn't open '{file}': {err}")]
    Open { file: PathBuf, err: std::io::Error },

    #[error("Error reading '{file}': {err}")]
    IO { file: PathBuf, err: std::io::Error },

    #[error("'{file}' is {len} bytes, which is too small to hold a single {record_bytes}-byte record; is the station type right?")]
    NoRecords {
        file: PathBuf,
        len: u64,
        record_bytes: u64,
    },

    #[error("'{file}' shrank to {len} bytes while being read (already read {cursor} bytes)")]
    Truncated { file: PathBuf, len: u64, cursor: u64 },

    #[error("Can't read records with {0} RCUs")]
    BadRcuCount(usize),
}
