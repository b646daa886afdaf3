//! Following a `.dat` file that the station is still writing.

use std::time::{Duration, Instant};

use log::{debug, warn};

use super::{Fetch, Poll, ReadError, RecordSource, XstReader};
use crate::cancel::CancelToken;

/// Wraps an [`XstReader`] so that running out of data means "wait" rather
/// than "finished". The wait is a sequence of sleeps of `poll_interval`, any
/// of which is cut short by cancellation. If `stall_timeout` passes without
/// a new record, [`Fetch::Stalled`] is returned so the caller can report it;
/// calling again resumes waiting.
pub struct FollowReader {
    reader: XstReader,
    poll_interval: Duration,
    stall_timeout: Duration,
}

impl FollowReader {
    pub fn new(reader: XstReader, poll_interval: Duration, stall_timeout: Duration) -> FollowReader {
        FollowReader {
            reader,
            poll_interval,
            stall_timeout,
        }
    }

    pub fn reader(&self) -> &XstReader {
        &self.reader
    }
}

impl RecordSource for FollowReader {
    fn fetch(&mut self, cancel: &CancelToken) -> Result<Fetch, ReadError> {
        let start = Instant::now();
        let mut last_partial = 0;
        loop {
            if cancel.is_cancelled() {
                return Ok(Fetch::Cancelled);
            }
            match self.reader.poll() {
                Ok(Poll::Record(r)) => return Ok(Fetch::Record(r)),
                Ok(Poll::Pending { partial_bytes }) => {
                    if partial_bytes != last_partial {
                        debug!(
                            "{partial_bytes}/{} bytes of the next record are present",
                            self.reader.record_bytes()
                        );
                        last_partial = partial_bytes;
                    }
                }
                // The station may be rotating or replacing files; treat this
                // like missing data.
                Err(ReadError::IO { file, err }) => {
                    warn!("Problem reading {}: {err}; will retry", file.display());
                }
                Err(e) => return Err(e),
            }

            let waited = start.elapsed();
            if waited >= self.stall_timeout {
                return Ok(Fetch::Stalled { waited });
            }
            let nap = self.poll_interval.min(self.stall_timeout - waited);
            if cancel.wait(nap) {
                return Ok(Fetch::Cancelled);
            }
        }
    }

    fn is_realtime(&self) -> bool {
        true
    }

    fn bytes_read(&self) -> u64 {
        self.reader.cursor()
    }

    fn bytes_expected(&self) -> Option<u64> {
        None
    }

    fn has_records(&self) -> Result<bool, ReadError> {
        Ok(true)
    }
}
