use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StationError {
    #[error("RCU mode {0} is not valid; expected a mode between 1 and 7")]
    InvalidRcuMode(u8),

    #[error("Couldn't parse '{0}' as an RCU mode")]
    UnparsableRcuMode(String),

    #[error("Station name '{0}' is too short; expected something like 'LV614' or 'CS002LBA'")]
    BadStationName(String),

    #[error("Station file '{file}' has no antenna positions")]
    NoAntennas { file: PathBuf },

    #[error("Station file '{file}' couldn't be parsed: {err}")]
    Toml { file: PathBuf, err: toml::de::Error },

    #[error("Couldn't read station file '{file}': {err}")]
    IO { file: PathBuf, err: std::io::Error },
}
