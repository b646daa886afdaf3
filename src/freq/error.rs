use thiserror::Error;

use super::BandPlan;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SelectError {
    #[error("{freq_mhz} MHz is subband {subband}, which isn't in the recorded band ({band})")]
    OutsideBand {
        freq_mhz: f64,
        subband: i64,
        band: BandPlan,
    },

    #[error("{0} MHz is not a usable frequency")]
    NotFinite(f64),

    #[error("The recording is pinned to subband {0}; 'increasing' continuation would image subbands that were never recorded")]
    IncreasingOnPinnedBand(u32),

    #[error("Subband range {first}:{last} is empty")]
    EmptyRange { first: u32, last: u32 },

    #[error("The increasing-frequency step must be at least 1 subband")]
    ZeroStep,

    #[error("Couldn't parse '{0}' as a continuation mode; expected 'fixed', 'same' or 'increasing'")]
    UnknownContinuation(String),
}
