//! Station calibration tables.
//!
//! A caltable is an optional text header (`key = value` lines ending with a
//! `HeaderStop` line) followed by `512 × num_rcu` complex128 gains,
//! subband-major.

use std::{
    collections::BTreeMap,
    fs::File,
    io::{BufRead, BufReader, Read},
    path::{Path, PathBuf},
};

use byteorder::{ByteOrder, LittleEndian};
use log::{debug, info, warn};
use ndarray::prelude::*;
use num_complex::Complex64;
use thiserror::Error;

use crate::{
    constants::{BYTES_PER_CORRELATION, NUM_SUBBANDS},
    station::RcuMode,
};

#[derive(Error, Debug)]
pub enum CalibrationError {
    #[error("Caltable '{file}' has a header without a 'HeaderStop' line")]
    MissingHeaderStop { file: PathBuf },

    #[error("Caltable '{file}' has {len} bytes of gains, which isn't a whole number of complex values for {NUM_SUBBANDS} subbands")]
    BadSize { file: PathBuf, len: usize },

    #[error("Caltable '{file}' has gains for {got} RCUs, but the station has {expected}")]
    RcuMismatch {
        file: PathBuf,
        expected: usize,
        got: usize,
    },

    #[error("Can't calibrate a {got}-RCU correlation matrix with a {expected}-RCU caltable")]
    MatrixMismatch { expected: usize, got: usize },

    #[error("Subband {0} isn't in a caltable")]
    SubbandOutOfRange(u32),

    #[error("Couldn't read caltable '{file}': {err}")]
    IO { file: PathBuf, err: std::io::Error },
}

/// Where a station's caltable for `mode` would be, e.g.
/// `<dir>/DE603/CalTable-603-LBA_INNER-10_90.dat`. Both a flat directory and
/// one subdirectory per station are searched.
pub fn find_caltable(dir: &Path, station_name: &str, mode: RcuMode) -> Option<PathBuf> {
    let station = station_name.get(..5)?.to_uppercase();
    let filename = format!("CalTable-{}-{}.dat", &station[2..], mode.caltable_suffix());
    [dir.join(&filename), dir.join(&station).join(&filename)]
        .into_iter()
        .find(|p| p.is_file())
}

#[derive(Debug, Clone)]
pub struct CalTable {
    pub path: PathBuf,
    pub header: BTreeMap<String, String>,

    /// Gains with shape `(512, num_rcus)`.
    pub gains: Array2<Complex64>,
}

impl CalTable {
    pub fn read<P: AsRef<Path>>(path: P) -> Result<CalTable, CalibrationError> {
        let path = path.as_ref();
        let io_err = |err| CalibrationError::IO {
            file: path.to_path_buf(),
            err,
        };
        let mut bytes = vec![];
        File::open(path)
            .and_then(|f| BufReader::new(f).read_to_end(&mut bytes))
            .map_err(io_err)?;

        let (header, data_start) = parse_header(&bytes, path)?;
        let data = &bytes[data_start..];
        let per_subband = NUM_SUBBANDS as usize * BYTES_PER_CORRELATION as usize;
        if data.is_empty() || data.len() % per_subband != 0 {
            return Err(CalibrationError::BadSize {
                file: path.to_path_buf(),
                len: data.len(),
            });
        }
        let num_rcus = data.len() / per_subband;
        let gains = Array2::from_shape_fn((NUM_SUBBANDS as usize, num_rcus), |(sb, rcu)| {
            let start = (sb * num_rcus + rcu) * BYTES_PER_CORRELATION as usize;
            Complex64::new(
                LittleEndian::read_f64(&data[start..start + 8]),
                LittleEndian::read_f64(&data[start + 8..start + 16]),
            )
        });
        debug!(
            "Read caltable {} ({num_rcus} RCUs, {} header entries)",
            path.display(),
            header.len()
        );
        Ok(CalTable {
            path: path.to_path_buf(),
            header,
            gains,
        })
    }

    /// Find and read the caltable for a station. A missing table isn't an
    /// error; the images just won't be calibrated.
    pub fn for_station(
        dir: &Path,
        station_name: &str,
        mode: RcuMode,
        num_rcus: usize,
    ) -> Result<Option<CalTable>, CalibrationError> {
        let path = match find_caltable(dir, station_name, mode) {
            Some(p) => p,
            None => {
                warn!(
                    "No caltable for {station_name} in mode {mode} under {}; images will be uncalibrated",
                    dir.display()
                );
                return Ok(None);
            }
        };
        let table = CalTable::read(&path)?;
        if table.num_rcus() != num_rcus {
            return Err(CalibrationError::RcuMismatch {
                file: path,
                expected: num_rcus,
                got: table.num_rcus(),
            });
        }
        info!("Using caltable {}", path.display());
        Ok(Some(table))
    }

    pub fn num_rcus(&self) -> usize {
        self.gains.len_of(Axis(1))
    }

    pub fn gains_for(&self, subband: u32) -> Result<ArrayView1<Complex64>, CalibrationError> {
        if subband >= NUM_SUBBANDS {
            return Err(CalibrationError::SubbandOutOfRange(subband));
        }
        Ok(self.gains.row(subband as usize))
    }

    /// Divide each visibility `V[i, j]` by `g[j] · conj(g[i])`.
    pub fn apply(
        &self,
        mut vis: ArrayViewMut2<Complex64>,
        subband: u32,
    ) -> Result<(), CalibrationError> {
        let gains = self.gains_for(subband)?;
        if vis.dim() != (gains.len(), gains.len()) {
            return Err(CalibrationError::MatrixMismatch {
                expected: gains.len(),
                got: vis.nrows(),
            });
        }
        vis.indexed_iter_mut()
            .for_each(|((i, j), v)| *v /= gains[j] * gains[i].conj());
        Ok(())
    }
}

/// Returns the header entries and where the gains start. A file that doesn't
/// start with text has no header.
fn parse_header(
    bytes: &[u8],
    path: &Path,
) -> Result<(BTreeMap<String, String>, usize), CalibrationError> {
    let mut header = BTreeMap::new();
    let mut cursor = bytes;
    let mut consumed = 0;
    let mut first = true;
    loop {
        let mut line = vec![];
        let n = cursor
            .read_until(b'\n', &mut line)
            .map_err(|err| CalibrationError::IO {
                file: path.to_path_buf(),
                err,
            })?;
        if n == 0 {
            return Err(CalibrationError::MissingHeaderStop {
                file: path.to_path_buf(),
            });
        }
        let line = match std::str::from_utf8(&line) {
            Ok(l) => l.trim(),
            Err(_) if first => return Ok((header, 0)),
            Err(_) => {
                return Err(CalibrationError::MissingHeaderStop {
                    file: path.to_path_buf(),
                })
            }
        };
        first = false;
        consumed += n;
        if line.contains("HeaderStop") {
            return Ok((header, consumed));
        }
        if let Some((key, value)) = line.split_once(" = ") {
            header.insert(key.trim().to_string(), value.trim().to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use approx::assert_abs_diff_eq;
    use tempfile::TempDir;

    use super::*;

    fn gain(sb: usize, rcu: usize) -> Complex64 {
        Complex64::new(1.0 + rcu as f64 * 0.5, sb as f64 * 0.001)
    }

    fn write_caltable(path: &Path, num_rcus: usize, with_header: bool) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let mut f = File::create(path).unwrap();
        if with_header {
            writeln!(f, "HeaderStart").unwrap();
            writeln!(f, "CalTableHeader.Observation.Station = DE603").unwrap();
            writeln!(f, "CalTableHeader.Observation.Mode = 3").unwrap();
            writeln!(f, "HeaderStop").unwrap();
        }
        let mut buf = [0; 16];
        for sb in 0..NUM_SUBBANDS as usize {
            for rcu in 0..num_rcus {
                let g = gain(sb, rcu);
                LittleEndian::write_f64(&mut buf[..8], g.re);
                LittleEndian::write_f64(&mut buf[8..], g.im);
                f.write_all(&buf).unwrap();
            }
        }
    }

    #[test]
    fn test_find_caltable_layouts() {
        let dir = TempDir::new().unwrap();
        let mode = RcuMode::new(3).unwrap();
        assert!(find_caltable(dir.path(), "DE603", mode).is_none());

        let nested = dir.path().join("DE603/CalTable-603-LBA_INNER-10_90.dat");
        write_caltable(&nested, 4, true);
        assert_eq!(find_caltable(dir.path(), "de603lba", mode), Some(nested));

        let flat = dir.path().join("CalTable-603-LBA_INNER-10_90.dat");
        write_caltable(&flat, 4, true);
        assert_eq!(find_caltable(dir.path(), "DE603", mode), Some(flat));

        assert!(find_caltable(dir.path(), "DE603", RcuMode::new(5).unwrap()).is_none());
        assert!(find_caltable(dir.path(), "DE", mode).is_none());
    }

    #[test]
    fn test_read_with_and_without_header() {
        let dir = TempDir::new().unwrap();
        for with_header in [true, false] {
            let path = dir.path().join(format!("cal_{with_header}.dat"));
            write_caltable(&path, 6, with_header);
            let table = CalTable::read(&path).unwrap();
            assert_eq!(table.num_rcus(), 6);
            assert_eq!(table.gains[(300, 5)], gain(300, 5));
            if with_header {
                assert_eq!(
                    table.header["CalTableHeader.Observation.Station"],
                    "DE603"
                );
            } else {
                assert!(table.header.is_empty());
            }
        }
    }

    #[test]
    fn test_bad_tables() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("short.dat");
        std::fs::write(&path, "HeaderStart\nHeaderStop\n0123456789").unwrap();
        assert!(matches!(
            CalTable::read(&path),
            Err(CalibrationError::BadSize { len: 10, .. })
        ));

        std::fs::write(&path, "HeaderStart\nno stop here\n").unwrap();
        assert!(matches!(
            CalTable::read(&path),
            Err(CalibrationError::MissingHeaderStop { .. })
        ));

        let path = dir.path().join("DE603/CalTable-603-LBA_INNER-10_90.dat");
        write_caltable(&path, 4, true);
        assert!(matches!(
            CalTable::for_station(dir.path(), "DE603", RcuMode::new(3).unwrap(), 192),
            Err(CalibrationError::RcuMismatch {
                expected: 192,
                got: 4,
                ..
            })
        ));
        assert!(
            CalTable::for_station(dir.path(), "DE603", RcuMode::new(6).unwrap(), 4)
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn test_apply_undoes_gains() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cal.dat");
        write_caltable(&path, 4, true);
        let table = CalTable::read(&path).unwrap();

        let sb = 297;
        let truth = Array2::from_shape_fn((4, 4), |(i, j)| {
            Complex64::new(i as f64 + 1.0, j as f64 - 1.5)
        });
        let mut observed = Array2::from_shape_fn((4, 4), |(i, j)| {
            truth[(i, j)] * gain(sb, j) * gain(sb, i).conj()
        });
        table.apply(observed.view_mut(), sb as u32).unwrap();
        for (o, t) in observed.iter().zip(truth.iter()) {
            assert_abs_diff_eq!(o.re, t.re, epsilon = 1e-12);
            assert_abs_diff_eq!(o.im, t.im, epsilon = 1e-12);
        }

        assert!(matches!(
            table.apply(observed.view_mut(), 512),
            Err(CalibrationError::SubbandOutOfRange(512))
        ));
        let mut wrong = Array2::<Complex64>::zeros((3, 3));
        assert!(table.apply(wrong.view_mut(), 1).is_err());
    }
}
