//! Reading XST `.dat` files.
//!
//! A `.dat` file is nothing but a sequence of records, each a
//! `num_rcu × num_rcu` correlation matrix of little-endian complex128
//! values in row-major order. There's no header, so the number of RCUs (and
//! so the record size) must come from the station type.

mod error;
mod follow;

pub use error::ReadError;
pub use follow::FollowReader;

use std::{
    collections::VecDeque,
    fs::File,
    io::{ErrorKind, Read, Seek, SeekFrom},
    path::{Path, PathBuf},
};

use byteorder::{ByteOrder, LittleEndian};
use hifitime::{Duration, Epoch};
use log::{debug, trace, warn};
use ndarray::Array2;
use num_complex::Complex64;

use crate::{cancel::CancelToken, constants::BYTES_PER_CORRELATION, freq::BandPlan};

/// One correlation matrix from a `.dat` file.
#[derive(Debug, Clone)]
pub struct ObservationRecord {
    /// The file this record came from.
    pub source: PathBuf,

    /// The index of the record within its file.
    pub index: usize,

    /// The byte offset of the record within its file.
    pub offset: u64,

    pub timestamp: Epoch,

    /// The subbands the station was recording when this record was taken.
    pub band: BandPlan,

    /// The `num_rcu × num_rcu` correlation matrix.
    pub data: Array2<Complex64>,
}

/// Everything about a recording needed to turn bytes into
/// [`ObservationRecord`]s.
#[derive(Debug, Clone)]
pub struct ReaderParams {
    pub num_rcus: usize,

    /// The time of the first record.
    pub start: Epoch,

    /// The time between consecutive records.
    pub integration: Duration,

    pub band: BandPlan,
}

impl ReaderParams {
    pub fn record_bytes(&self) -> u64 {
        let n = self.num_rcus as u64;
        n * n * BYTES_PER_CORRELATION
    }
}

/// The result of asking a [`RecordSource`] for another record.
#[derive(Debug)]
pub enum Fetch {
    Record(ObservationRecord),

    /// No complete record turned up within the stall timeout. Only
    /// real-time sources produce this.
    Stalled { waited: std::time::Duration },

    /// There are no more records. Real-time sources never produce this.
    EndOfStream,

    Cancelled,
}

/// Something that produces [`ObservationRecord`]s in order.
pub trait RecordSource: Send {
    /// Get the next record. Blocking is bounded, and cancellation via `cancel`
    /// is noticed promptly.
    fn fetch(&mut self, cancel: &CancelToken) -> Result<Fetch, ReadError>;

    /// Is this source following a file that's still being written?
    fn is_realtime(&self) -> bool;

    /// The total number of bytes consumed so far.
    fn bytes_read(&self) -> u64;

    /// The total number of bytes expected, if known.
    fn bytes_expected(&self) -> Option<u64>;

    /// Is there a complete record waiting to be fetched? This never blocks.
    /// Real-time sources always say yes; more data may be on its way.
    fn has_records(&self) -> Result<bool, ReadError>;
}

/// The outcome of a single non-blocking look at the file.
#[derive(Debug)]
pub enum Poll {
    Record(ObservationRecord),

    /// There isn't a complete record after the cursor yet; `partial_bytes` of
    /// the next one are present.
    Pending { partial_bytes: u64 },
}

/// Reads records from a single `.dat` file, remembering where it's up to.
/// The cursor only ever moves by whole records, so a partially-written tail
/// is simply re-examined on the next [`XstReader::poll`].
pub struct XstReader {
    path: PathBuf,
    file: File,
    params: ReaderParams,
    record_bytes: u64,
    cursor: u64,
    next_index: usize,
    buf: Vec<u8>,
}

impl XstReader {
    pub fn open<P: AsRef<Path>>(path: P, params: ReaderParams) -> Result<XstReader, ReadError> {
        let path = path.as_ref().to_path_buf();
        if params.num_rcus == 0 {
            return Err(ReadError::BadRcuCount(params.num_rcus));
        }
        let file = File::open(&path).map_err(|err| ReadError::Open {
            file: path.clone(),
            err,
        })?;
        let record_bytes = params.record_bytes();
        debug!(
            "Opened {} ({} RCUs, {record_bytes} bytes per record)",
            path.display(),
            params.num_rcus
        );
        Ok(XstReader {
            path,
            file,
            params,
            record_bytes,
            cursor: 0,
            next_index: 0,
            buf: vec![0; record_bytes as usize],
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn params(&self) -> &ReaderParams {
        &self.params
    }

    pub fn record_bytes(&self) -> u64 {
        self.record_bytes
    }

    /// The offset of the next unread record.
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    pub fn file_len(&self) -> Result<u64, ReadError> {
        self.file
            .metadata()
            .map(|m| m.len())
            .map_err(|err| self.io_err(err))
    }

    /// Check that a finished recording holds at least one complete record.
    /// Returns the number of complete records.
    pub fn ensure_records(&self) -> Result<u64, ReadError> {
        let len = self.file_len()?;
        let num_records = len / self.record_bytes;
        if num_records == 0 {
            return Err(ReadError::NoRecords {
                file: self.path.clone(),
                len,
                record_bytes: self.record_bytes,
            });
        }
        let tail = len % self.record_bytes;
        if tail != 0 {
            warn!(
                "{} ends with {tail} bytes that don't make a whole record; they will be ignored",
                self.path.display()
            );
        }
        Ok(num_records)
    }

    /// Read the next record if it's completely present.
    pub fn poll(&mut self) -> Result<Poll, ReadError> {
        let len = self.file_len()?;
        if len < self.cursor {
            return Err(ReadError::Truncated {
                file: self.path.clone(),
                len,
                cursor: self.cursor,
            });
        }
        let available = len - self.cursor;
        if available < self.record_bytes {
            return Ok(Poll::Pending {
                partial_bytes: available,
            });
        }

        self.file
            .seek(SeekFrom::Start(self.cursor))
            .map_err(|err| self.io_err(err))?;
        match self.file.read_exact(&mut self.buf) {
            Ok(()) => (),
            // The file changed under us; try again later from the same place.
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                return Ok(Poll::Pending {
                    partial_bytes: available,
                })
            }
            Err(err) => return Err(self.io_err(err)),
        }

        let record = ObservationRecord {
            source: self.path.clone(),
            index: self.next_index,
            offset: self.cursor,
            timestamp: self.params.start + self.params.integration * self.next_index as f64,
            band: self.params.band,
            data: decode_correlations(&self.buf, self.params.num_rcus),
        };
        trace!(
            "Read record {} at offset {} of {}",
            record.index,
            record.offset,
            self.path.display()
        );
        self.cursor += self.record_bytes;
        self.next_index += 1;
        Ok(Poll::Record(record))
    }

    fn io_err(&self, err: std::io::Error) -> ReadError {
        ReadError::IO {
            file: self.path.clone(),
            err,
        }
    }
}

impl RecordSource for XstReader {
    fn fetch(&mut self, cancel: &CancelToken) -> Result<Fetch, ReadError> {
        if cancel.is_cancelled() {
            return Ok(Fetch::Cancelled);
        }
        match self.poll()? {
            Poll::Record(r) => Ok(Fetch::Record(r)),
            Poll::Pending { partial_bytes } => {
                if partial_bytes > 0 {
                    debug!(
                        "Stopping at a partial record ({partial_bytes} bytes) at the end of {}",
                        self.path.display()
                    );
                }
                Ok(Fetch::EndOfStream)
            }
        }
    }

    fn is_realtime(&self) -> bool {
        false
    }

    fn bytes_read(&self) -> u64 {
        self.cursor
    }

    fn bytes_expected(&self) -> Option<u64> {
        self.file_len().ok()
    }

    fn has_records(&self) -> Result<bool, ReadError> {
        let len = self.file_len()?;
        Ok(len.saturating_sub(self.cursor) >= self.record_bytes)
    }
}

/// Reads several finished recordings back to back.
pub struct FileSequence {
    current: Option<XstReader>,
    pending: VecDeque<(PathBuf, ReaderParams)>,
    bytes_done: u64,
    bytes_total: u64,
}

impl FileSequence {
    /// Open every file up front so that a bad one is noticed before any
    /// imaging starts.
    pub fn new(files: Vec<(PathBuf, ReaderParams)>) -> Result<FileSequence, ReadError> {
        let mut bytes_total = 0;
        for (path, params) in &files {
            let reader = XstReader::open(path, params.clone())?;
            let num_records = reader.ensure_records()?;
            bytes_total += num_records * reader.record_bytes();
        }
        Ok(FileSequence {
            current: None,
            pending: files.into(),
            bytes_done: 0,
            bytes_total,
        })
    }
}

impl RecordSource for FileSequence {
    fn fetch(&mut self, cancel: &CancelToken) -> Result<Fetch, ReadError> {
        loop {
            if let Some(reader) = self.current.as_mut() {
                match reader.fetch(cancel)? {
                    Fetch::EndOfStream => {
                        self.bytes_done += reader.cursor();
                        self.current = None;
                    }
                    other => return Ok(other),
                }
            }
            match self.pending.pop_front() {
                Some((path, params)) => self.current = Some(XstReader::open(path, params)?),
                None => return Ok(Fetch::EndOfStream),
            }
        }
    }

    fn is_realtime(&self) -> bool {
        false
    }

    fn bytes_read(&self) -> u64 {
        self.bytes_done + self.current.as_ref().map(|r| r.cursor()).unwrap_or(0)
    }

    fn bytes_expected(&self) -> Option<u64> {
        Some(self.bytes_total)
    }

    fn has_records(&self) -> Result<bool, ReadError> {
        // Every pending file was checked for records when the sequence was
        // made.
        if !self.pending.is_empty() {
            return Ok(true);
        }
        match self.current.as_ref() {
            Some(reader) => reader.has_records(),
            None => Ok(false),
        }
    }
}

/// Turn `num_rcus² × 16` bytes of little-endian complex128 into a matrix.
/// Panics if `bytes` is shorter than that.
pub fn decode_correlations(bytes: &[u8], num_rcus: usize) -> Array2<Complex64> {
    let width = BYTES_PER_CORRELATION as usize;
    Array2::from_shape_fn((num_rcus, num_rcus), |(i, j)| {
        let start = (i * num_rcus + j) * width;
        let c = &bytes[start..start + width];
        Complex64::new(LittleEndian::read_f64(&c[..8]), LittleEndian::read_f64(&c[8..]))
    })
}

/// The inverse of [`decode_correlations`].
pub fn encode_correlations(data: &Array2<Complex64>) -> Vec<u8> {
    let mut out = vec![0; data.len() * BYTES_PER_CORRELATION as usize];
    for (chunk, v) in out
        .chunks_exact_mut(BYTES_PER_CORRELATION as usize)
        .zip(data.iter())
    {
        LittleEndian::write_f64(&mut chunk[..8], v.re);
        LittleEndian::write_f64(&mut chunk[8..], v.im);
    }
    out
}
