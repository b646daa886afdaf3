//! The user's side of an imaging session: which frequency to image, and what
//! to do once an image has been made.
//!
//! ```text
//!                     submit
//!  AwaitingSelection ────────► Processing ◄──────┐
//!                              │    ▲            │ continue same /
//!                record done   │    │ submit     │ continue increasing
//!                (fixed)       ▼    │            │
//!                              Paused ───────────┘
//!
//!  Processing/Paused ──► Finished   on stop, or when a finished
//!                                   recording runs out of records
//! ```

mod error;

pub use error::SessionError;

use std::fmt::Display;

use log::{debug, info};

use crate::freq::{Continuation, FrequencySelection, FrequencySelector};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitingSelection,
    Processing,
    Paused,
    Finished,
}

impl Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionState::AwaitingSelection => "awaiting a frequency",
            SessionState::Processing => "processing",
            SessionState::Paused => "paused",
            SessionState::Finished => "finished",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Stopped,
    Exhausted,
}

#[derive(Debug, Clone)]
pub struct Session {
    selector: FrequencySelector,
    realtime: bool,
    state: SessionState,
    selection: Option<FrequencySelection>,
    finish_reason: Option<FinishReason>,
}

impl Session {
    pub fn new(selector: FrequencySelector, realtime: bool) -> Session {
        Session {
            selector,
            realtime,
            state: SessionState::AwaitingSelection,
            selection: None,
            finish_reason: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn selection(&self) -> Option<FrequencySelection> {
        self.selection
    }

    pub fn selector(&self) -> &FrequencySelector {
        &self.selector
    }

    pub fn is_realtime(&self) -> bool {
        self.realtime
    }

    pub fn finish_reason(&self) -> Option<FinishReason> {
        self.finish_reason
    }

    pub fn is_finished(&self) -> bool {
        self.state == SessionState::Finished
    }

    /// Select a frequency \[MHz\], imaging one record before pausing.
    pub fn submit_frequency(&mut self, freq_mhz: f64) -> Result<FrequencySelection, SessionError> {
        self.submit_with(freq_mhz, Continuation::Fixed)
    }

    /// Select a frequency \[MHz\] with an explicit continuation. A new
    /// selection replaces the old one whatever state the session is in, but
    /// an invalid one leaves the session untouched.
    pub fn submit_with(
        &mut self,
        freq_mhz: f64,
        continuation: Continuation,
    ) -> Result<FrequencySelection, SessionError> {
        self.ensure_not_finished()?;
        let selection = self.selector.select(freq_mhz, continuation)?;
        info!(
            "Imaging {:.3} MHz (subband {}, {continuation})",
            selection.freq_mhz, selection.subband
        );
        self.selection = Some(selection);
        self.state = SessionState::Processing;
        Ok(selection)
    }

    /// Start at the pinned subband, if the recording has one.
    pub fn select_pinned(&mut self) -> Option<FrequencySelection> {
        if self.is_finished() {
            return None;
        }
        let selection = self.selector.pinned_selection()?;
        info!(
            "Recording is pinned to subband {}; imaging {:.3} MHz",
            selection.subband, selection.freq_mhz
        );
        self.selection = Some(selection);
        self.state = SessionState::Processing;
        Some(selection)
    }

    pub fn continue_same(&mut self) -> Result<FrequencySelection, SessionError> {
        let selection = self.paused_selection()?;
        let selection = FrequencySelection {
            continuation: Continuation::Same,
            ..selection
        };
        debug!("Continuing at subband {}", selection.subband);
        self.selection = Some(selection);
        self.state = SessionState::Processing;
        Ok(selection)
    }

    /// Resume, stepping the subband up first.
    pub fn continue_increasing(&mut self) -> Result<FrequencySelection, SessionError> {
        let selection = self.paused_selection()?;
        self.selector.check_continuation(Continuation::Increasing)?;
        let selection = self.selector.advance(FrequencySelection {
            continuation: Continuation::Increasing,
            ..selection
        });
        debug!("Continuing upwards from subband {}", selection.subband);
        self.selection = Some(selection);
        self.state = SessionState::Processing;
        Ok(selection)
    }

    /// The selection to apply to a record that has just been read, or `None`
    /// if no record should be imaged right now.
    pub fn selection_for_record(&self) -> Option<FrequencySelection> {
        match self.state {
            SessionState::Processing => self.selection,
            _ => None,
        }
    }

    /// An image has been made with the current selection.
    pub fn record_processed(&mut self) {
        if self.state != SessionState::Processing {
            return;
        }
        let selection = match self.selection {
            Some(s) => s,
            None => return,
        };
        match selection.continuation {
            Continuation::Fixed => self.state = SessionState::Paused,
            Continuation::Same => (),
            Continuation::Increasing => self.selection = Some(self.selector.advance(selection)),
        }
    }

    pub fn stop(&mut self) {
        if !self.is_finished() {
            debug!("Session stopped");
            self.state = SessionState::Finished;
            self.finish_reason = Some(FinishReason::Stopped);
        }
    }

    /// The recording has no more records. A real-time session ignores this;
    /// more data may yet arrive. Returns whether the session finished.
    pub fn stream_exhausted(&mut self) -> bool {
        if self.realtime {
            return false;
        }
        if !self.is_finished() {
            debug!("No more records; session finished");
            self.state = SessionState::Finished;
            self.finish_reason = Some(FinishReason::Exhausted);
        }
        true
    }

    fn ensure_not_finished(&self) -> Result<(), SessionError> {
        if self.is_finished() {
            Err(SessionError::Finished)
        } else {
            Ok(())
        }
    }

    fn paused_selection(&self) -> Result<FrequencySelection, SessionError> {
        self.ensure_not_finished()?;
        match (self.state, self.selection) {
            (SessionState::Paused, Some(s)) => Ok(s),
            (state, _) => Err(SessionError::NotPaused(state)),
        }
    }
}
