use thiserror::Error;

use crate::{
    calibration::CalibrationError, freq::SelectError, imaging::ImagerError, read::ReadError,
    recording::RecordingError, session::SessionError, station::StationError,
    write::FrameWriteError,
};

/// Everything that can stop a run.
#[derive(Error, Debug)]
pub enum XstError {
    #[error("The station layout has {layout} RCUs, but station {station} records {expected}")]
    LayoutMismatch {
        station: String,
        layout: usize,
        expected: usize,
    },

    #[error("Couldn't parse subband range '{0}'; expected something like '51:461'")]
    BadSubbandRange(String),

    #[error("The stall timeout must be a finite number of seconds no shorter than the poll interval ({poll_interval_ms} ms); got {secs}")]
    BadStallTimeout { secs: f64, poll_interval_ms: u128 },

    #[error("Another thread hit an error")]
    OtherThread,

    #[error(transparent)]
    Read(#[from] ReadError),

    #[error(transparent)]
    Select(#[from] SelectError),

    #[error(transparent)]
    Imager(#[from] ImagerError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Station(#[from] StationError),

    #[error(transparent)]
    Calibration(#[from] CalibrationError),

    #[error(transparent)]
    FrameWrite(#[from] FrameWriteError),

    #[error(transparent)]
    Recording(#[from] RecordingError),

    #[error(transparent)]
    IO(#[from] std::io::Error),
}
