use thiserror::Error;

use crate::{calibration::CalibrationError, freq::BandPlan};

#[derive(Error, Debug)]
pub enum ImagerError {
    #[error("Subband {subband} isn't in record {record_index}, which holds {band}")]
    OutOfRange {
        subband: u32,
        band: BandPlan,
        record_index: usize,
    },

    #[error("Record {0} is all zeros; nothing to image")]
    AllZeros(usize),

    #[error("Record {record_index} has {got} RCUs, but the station layout has {expected}")]
    RcuMismatch {
        expected: usize,
        got: usize,
        record_index: usize,
    },

    #[error("Sky images need at least 2 pixels per side, not {0}")]
    BadNpix(usize),

    #[error(transparent)]
    Calibration(#[from] CalibrationError),
}
