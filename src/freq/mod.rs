//! Mapping between frequencies and station subbands, and the user's choice
//! of which subband to image.

mod error;

pub use error::SelectError;

use std::{fmt::Display, str::FromStr};

use crate::{
    constants::{DEFAULT_FIRST_SUBBAND, DEFAULT_LAST_SUBBAND},
    station::RcuMode,
};

/// Convert a frequency \[Hz\] into the (nearest) subband number. Negative or
/// otherwise silly subbands are allowed here; it's up to the caller to check
/// them against what was recorded.
pub fn sb_from_freq(freq_hz: f64, mode: RcuMode) -> i64 {
    ((freq_hz - mode.freq_offset_hz()) / mode.subband_width_hz()).round() as i64
}

/// The central frequency of a subband \[Hz\].
pub fn freq_from_sb(subband: u32, mode: RcuMode) -> f64 {
    f64::from(subband) * mode.subband_width_hz() + mode.freq_offset_hz()
}

/// An inclusive range of subbands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubbandRange {
    first: u32,
    last: u32,
}

impl SubbandRange {
    pub fn new(first: u32, last: u32) -> Result<SubbandRange, SelectError> {
        if first > last {
            return Err(SelectError::EmptyRange { first, last });
        }
        Ok(SubbandRange { first, last })
    }

    /// The subbands recorded by default in the LBA modes.
    pub fn default_lba() -> SubbandRange {
        SubbandRange {
            first: DEFAULT_FIRST_SUBBAND,
            last: DEFAULT_LAST_SUBBAND,
        }
    }

    pub fn first(&self) -> u32 {
        self.first
    }

    pub fn last(&self) -> u32 {
        self.last
    }

    pub fn contains(&self, subband: i64) -> bool {
        (i64::from(self.first)..=i64::from(self.last)).contains(&subband)
    }

    pub fn len(&self) -> usize {
        (self.last - self.first) as usize + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }
}

/// What the station was told to record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BandPlan {
    /// Every record holds this one subband (`rspctl --xcsubband=N`).
    Pinned(u32),

    /// Records were taken while stepping through these subbands
    /// (`--subbands=A:B`).
    Range(SubbandRange),
}

impl BandPlan {
    /// A band plan for `first..=last`. A single-subband range is pinned.
    pub fn new(first: u32, last: u32) -> Result<BandPlan, SelectError> {
        let range = SubbandRange::new(first, last)?;
        if range.len() == 1 {
            Ok(BandPlan::Pinned(first))
        } else {
            Ok(BandPlan::Range(range))
        }
    }

    pub fn is_pinned(&self) -> bool {
        matches!(self, BandPlan::Pinned(_))
    }

    pub fn range(&self) -> SubbandRange {
        match *self {
            BandPlan::Pinned(sb) => SubbandRange {
                first: sb,
                last: sb,
            },
            BandPlan::Range(r) => r,
        }
    }

    pub fn contains(&self, subband: i64) -> bool {
        self.range().contains(subband)
    }
}

impl Display for BandPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BandPlan::Pinned(sb) => write!(f, "subband {sb}"),
            BandPlan::Range(r) => write!(f, "subbands {}:{}", r.first, r.last),
        }
    }
}

/// What to do with the records after the one imaged for a fresh selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Continuation {
    /// Image one record, then wait for the user.
    #[default]
    Fixed,

    /// Keep imaging every record at the same subband.
    Same,

    /// Step the subband up after every record.
    Increasing,
}

impl FromStr for Continuation {
    type Err = SelectError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "fixed" | "f" => Ok(Continuation::Fixed),
            "same" | "s" => Ok(Continuation::Same),
            "increasing" | "incr" | "i" => Ok(Continuation::Increasing),
            _ => Err(SelectError::UnknownContinuation(s.to_string())),
        }
    }
}

impl Display for Continuation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Continuation::Fixed => "fixed",
            Continuation::Same => "same",
            Continuation::Increasing => "increasing",
        };
        write!(f, "{s}")
    }
}

/// The user's current intent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrequencySelection {
    /// The frequency that was asked for \[MHz\]. After stepping in
    /// increasing mode this is the centre of the new subband.
    pub freq_mhz: f64,

    /// The subband that `freq_mhz` maps to.
    pub subband: u32,

    pub continuation: Continuation,
}

/// Turns user frequencies into validated [`FrequencySelection`]s for one
/// recording.
#[derive(Debug, Clone)]
pub struct FrequencySelector {
    mode: RcuMode,
    band: BandPlan,
    step: u32,
}

impl FrequencySelector {
    pub fn new(mode: RcuMode, band: BandPlan, step: u32) -> Result<FrequencySelector, SelectError> {
        if step == 0 {
            return Err(SelectError::ZeroStep);
        }
        Ok(FrequencySelector { mode, band, step })
    }

    pub fn mode(&self) -> RcuMode {
        self.mode
    }

    pub fn band(&self) -> BandPlan {
        self.band
    }

    pub fn step(&self) -> u32 {
        self.step
    }

    /// The subband containing `freq_mhz`, provided it was recorded.
    pub fn subband_for(&self, freq_mhz: f64) -> Result<u32, SelectError> {
        if !freq_mhz.is_finite() {
            return Err(SelectError::NotFinite(freq_mhz));
        }
        let subband = sb_from_freq(freq_mhz * 1e6, self.mode);
        if !self.band.contains(subband) {
            return Err(SelectError::OutsideBand {
                freq_mhz,
                subband,
                band: self.band,
            });
        }
        // Checked against the band above, so this fits.
        Ok(subband as u32)
    }

    /// Can `continuation` be used with this recording?
    pub fn check_continuation(&self, continuation: Continuation) -> Result<(), SelectError> {
        match (continuation, self.band) {
            (Continuation::Increasing, BandPlan::Pinned(sb)) => {
                Err(SelectError::IncreasingOnPinnedBand(sb))
            }
            _ => Ok(()),
        }
    }

    pub fn select(
        &self,
        freq_mhz: f64,
        continuation: Continuation,
    ) -> Result<FrequencySelection, SelectError> {
        self.check_continuation(continuation)?;
        let subband = self.subband_for(freq_mhz)?;
        Ok(FrequencySelection {
            freq_mhz,
            subband,
            continuation,
        })
    }

    /// A "same" selection at the pinned subband, if the recording is pinned.
    pub fn pinned_selection(&self) -> Option<FrequencySelection> {
        match self.band {
            BandPlan::Pinned(subband) => Some(FrequencySelection {
                freq_mhz: freq_from_sb(subband, self.mode) / 1e6,
                subband,
                continuation: Continuation::Same,
            }),
            BandPlan::Range(_) => None,
        }
    }

    /// The subband after `subband` in increasing mode. Steps that would run
    /// past the top of the band start again at the bottom.
    pub fn next_subband(&self, subband: u32) -> u32 {
        let range = self.band.range();
        match subband.checked_add(self.step) {
            Some(next) if next <= range.last() => next,
            _ => range.first(),
        }
    }

    /// Step `selection` to the next subband, keeping its continuation.
    pub fn advance(&self, selection: FrequencySelection) -> FrequencySelection {
        let subband = self.next_subband(selection.subband);
        FrequencySelection {
            freq_mhz: freq_from_sb(subband, self.mode) / 1e6,
            subband,
            continuation: selection.continuation,
        }
    }
}
