//! Metadata about a recording that isn't in the `.dat` file itself.
//!
//! The station is driven by a shell script of `rspctl`/`beamctl` calls that
//! either pins the correlator to one subband (`--xcsubband=N`) or steps it
//! through a range (`--subbands=A:B`). Older recordings instead come with a
//! `.h` header next to the data. The observation start time is encoded in
//! the data filename.

use std::{
    fs,
    path::{Path, PathBuf},
    time::UNIX_EPOCH,
};

use hifitime::Epoch;
use lazy_static::lazy_static;
use log::{debug, info, warn};
use regex::Regex;
use thiserror::Error;

use crate::{
    freq::{BandPlan, SelectError, SubbandRange},
    station::{RcuMode, StationError},
};

lazy_static! {
    static ref RSPCTL_XCSUBBAND: Regex = Regex::new(r"rspctl\s+--xcsubband=(\d+)").unwrap();
    static ref XCSUBBAND: Regex = Regex::new(r"--xcsubband=(\d+)").unwrap();
    static ref SUBBANDS: Regex = Regex::new(r#"--subbands=['"]?(\d+):(\d+)"#).unwrap();
    static ref RCUMODE: Regex = Regex::new(r"--rcumode=(\d)").unwrap();
    static ref FILENAME_TIME: Regex =
        Regex::new(r"^(\d{4})(\d{2})(\d{2})_(\d{2})(\d{2})(\d{2})").unwrap();
}

#[derive(Error, Debug)]
pub enum RecordingError {
    #[error("Input '{0}' doesn't exist")]
    Missing(PathBuf),

    #[error("No .dat files were found in '{0}'")]
    NoDatFiles(PathBuf),

    #[error("Recording script '{file}' has a bad subband range: {err}")]
    BadSubbands { file: PathBuf, err: SelectError },

    #[error("Recording script '{file}' has an out-of-range number '{value}'")]
    BadNumber { file: PathBuf, value: String },

    #[error("Recording script '{file}' has a bad RCU mode: {err}")]
    BadRcuMode { file: PathBuf, err: StationError },

    #[error("Couldn't read '{file}': {err}")]
    IO { file: PathBuf, err: std::io::Error },
}

/// What a recording script told us.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScriptInfo {
    pub band: Option<BandPlan>,
    pub rcu_mode: Option<RcuMode>,
}

/// Pull the band plan and RCU mode out of a recording script. The first line
/// mentioning either `rspctl --xcsubband=` or `--subbands=` decides the band.
pub fn parse_script(contents: &str, file: &Path) -> Result<ScriptInfo, RecordingError> {
    let mut info = ScriptInfo::default();
    for line in contents.lines() {
        if info.band.is_none() {
            if let Some(caps) = RSPCTL_XCSUBBAND.captures(line) {
                let sb = parse_u32(&caps[1], file)?;
                info.band = Some(BandPlan::Pinned(sb));
            } else if let Some(caps) = SUBBANDS.captures(line) {
                let first = parse_u32(&caps[1], file)?;
                let last = parse_u32(&caps[2], file)?;
                let band = BandPlan::new(first, last).map_err(|err| RecordingError::BadSubbands {
                    file: file.to_path_buf(),
                    err,
                })?;
                info.band = Some(band);
            }
        }
        if info.rcu_mode.is_none() {
            if let Some(caps) = RCUMODE.captures(line) {
                let mode = caps[1]
                    .parse::<RcuMode>()
                    .map_err(|err| RecordingError::BadRcuMode {
                        file: file.to_path_buf(),
                        err,
                    })?;
                info.rcu_mode = Some(mode);
            }
        }
    }
    Ok(info)
}

fn parse_u32(s: &str, file: &Path) -> Result<u32, RecordingError> {
    // The regexes only capture digits, so this only fails on overflow.
    s.parse().map_err(|_| RecordingError::BadNumber {
        file: file.to_path_buf(),
        value: s.to_string(),
    })
}

pub fn read_script(file: &Path) -> Result<ScriptInfo, RecordingError> {
    let contents = fs::read_to_string(file).map_err(|err| RecordingError::IO {
        file: file.to_path_buf(),
        err,
    })?;
    parse_script(&contents, file)
}

/// The pinned subband written into a `.h` header, if there is one.
pub fn parse_header(contents: &str) -> Option<u32> {
    XCSUBBAND
        .captures(contents)
        .and_then(|caps| caps[1].parse().ok())
}

/// The first shell script (alphabetically) in `dir`.
pub fn find_script(dir: &Path) -> Option<PathBuf> {
    files_with_extension(dir, "sh").ok()?.into_iter().next()
}

/// All `.dat` files in `dir`, sorted by name (and so by start time).
pub fn find_dat_files(dir: &Path) -> Result<Vec<PathBuf>, RecordingError> {
    let files = files_with_extension(dir, "dat")?;
    if files.is_empty() {
        return Err(RecordingError::NoDatFiles(dir.to_path_buf()));
    }
    Ok(files)
}

fn files_with_extension(dir: &Path, ext: &str) -> Result<Vec<PathBuf>, RecordingError> {
    let read_dir = fs::read_dir(dir).map_err(|err| RecordingError::IO {
        file: dir.to_path_buf(),
        err,
    })?;
    let mut files = read_dir
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && p.extension().and_then(|e| e.to_str()) == Some(ext))
        .collect::<Vec<_>>();
    files.sort_unstable();
    Ok(files)
}

/// Resolve the user's input into the `.dat` files to image. A directory
/// yields every `.dat` file inside it, except in real-time mode, where only
/// the newest recording can still be growing.
pub fn resolve_inputs(input: &Path, realtime: bool) -> Result<Vec<PathBuf>, RecordingError> {
    if !input.exists() {
        return Err(RecordingError::Missing(input.to_path_buf()));
    }
    if input.is_dir() {
        let mut files = find_dat_files(input)?;
        if realtime {
            let newest = files.split_off(files.len() - 1);
            if !files.is_empty() {
                info!(
                    "Real-time mode follows only the newest recording; ignoring {} older file(s)",
                    files.len()
                );
            }
            return Ok(newest);
        }
        return Ok(files);
    }
    Ok(vec![input.to_path_buf()])
}

/// The observation start time encoded in a filename like
/// `20170720_095816_mode_3_xst_sb297.dat`.
pub fn obstime_from_filename(file: &Path) -> Option<Epoch> {
    let name = file.file_name()?.to_str()?;
    let caps = FILENAME_TIME.captures(name)?;
    let year: i32 = caps[1].parse().ok()?;
    let field = |i: usize| caps[i].parse::<u8>().ok();
    Epoch::maybe_from_gregorian_utc(
        year,
        field(2)?,
        field(3)?,
        field(4)?,
        field(5)?,
        field(6)?,
        0,
    )
    .ok()
}

/// The start time of a recording: from the filename if possible, otherwise
/// the file's modification time.
pub fn obstime(file: &Path) -> Result<Epoch, RecordingError> {
    if let Some(t) = obstime_from_filename(file) {
        return Ok(t);
    }
    warn!(
        "Couldn't get a start time from the name of '{}'; using its modification time",
        file.display()
    );
    let io_err = |err| RecordingError::IO {
        file: file.to_path_buf(),
        err,
    };
    let modified = fs::metadata(file).and_then(|m| m.modified()).map_err(io_err)?;
    let since_epoch = modified.duration_since(UNIX_EPOCH).unwrap_or_default();
    Ok(Epoch::from_unix_seconds(since_epoch.as_secs_f64()))
}

/// Where a piece of recording metadata came from.
#[derive(Debug, Clone, PartialEq)]
pub enum MetaSource {
    CommandLine,
    Script(PathBuf),
    Header(PathBuf),
    Layout(PathBuf),
    Default,
}

#[derive(Debug, Clone)]
pub struct RecordingMeta {
    pub band: BandPlan,
    pub band_source: MetaSource,
    pub rcu_mode: RcuMode,
    pub rcu_mode_source: MetaSource,
}

impl RecordingMeta {
    /// Work out the band plan and RCU mode of `dat_file`. Anything given on
    /// the command line wins; then the recording script (`script`, or the
    /// first `.sh` beside the data); then a `.h` header with the same stem;
    /// then the defaults.
    pub fn resolve(
        dat_file: &Path,
        script: Option<&Path>,
        band: Option<BandPlan>,
        rcu_mode: Option<RcuMode>,
    ) -> Result<RecordingMeta, RecordingError> {
        let script = script.map(Path::to_path_buf).or_else(|| {
            dat_file
                .parent()
                .map(|p| if p.as_os_str().is_empty() { Path::new(".") } else { p })
                .and_then(find_script)
        });
        let script_info = match script.as_deref() {
            Some(s) => {
                debug!("Reading recording script {}", s.display());
                read_script(s)?
            }
            None => ScriptInfo::default(),
        };

        let (band, band_source) = match (band, script_info.band) {
            (Some(b), _) => (b, MetaSource::CommandLine),
            (None, Some(b)) => (b, script_source(&script)),
            (None, None) => {
                let header = dat_file.with_extension("h");
                match fs::read_to_string(&header).ok().and_then(|c| parse_header(&c)) {
                    Some(sb) => (BandPlan::Pinned(sb), MetaSource::Header(header)),
                    None => (
                        BandPlan::Range(SubbandRange::default_lba()),
                        MetaSource::Default,
                    ),
                }
            }
        };

        let (rcu_mode, rcu_mode_source) = match (rcu_mode, script_info.rcu_mode) {
            (Some(m), _) => (m, MetaSource::CommandLine),
            (None, Some(m)) => (m, script_source(&script)),
            (None, None) => (RcuMode::default(), MetaSource::Default),
        };

        Ok(RecordingMeta {
            band,
            band_source,
            rcu_mode,
            rcu_mode_source,
        })
    }
}

fn script_source(script: &Option<PathBuf>) -> MetaSource {
    match script {
        Some(s) => MetaSource::Script(s.clone()),
        None => MetaSource::Default,
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::TempDir;

    use super::*;

    const PINNED_SCRIPT: &str = "#!/bin/bash
rspctl --rcumode=3 --sel=0:191
sleep 2
rspctl --xcsubband=167
rspctl --xcstatistics --duration=60 --integration=1 --directory=/data
";

    const RANGE_SCRIPT: &str = "#!/bin/bash
rspctl --rcumode=5
beamctl --antennaset=HBA_JOINED --rcus=0:191 --subbands=150:271 --beamlets=0:121
";

    #[test]
    fn test_pinned_script() {
        let info = parse_script(PINNED_SCRIPT, Path::new("test.sh")).unwrap();
        assert_eq!(info.band, Some(BandPlan::Pinned(167)));
        assert_eq!(info.rcu_mode, Some(RcuMode::new(3).unwrap()));
    }

    #[test]
    fn test_range_script() {
        let info = parse_script(RANGE_SCRIPT, Path::new("test.sh")).unwrap();
        assert_eq!(info.band, Some(BandPlan::new(150, 271).unwrap()));
        assert_eq!(info.rcu_mode, Some(RcuMode::new(5).unwrap()));

        let quoted = "beamctl --subbands='150:271'";
        let info = parse_script(quoted, Path::new("test.sh")).unwrap();
        assert_eq!(info.band, Some(BandPlan::new(150, 271).unwrap()));
        assert_eq!(info.rcu_mode, None);
    }

    #[test]
    fn test_bad_script_values() {
        let backwards = "beamctl --subbands=300:200";
        assert!(matches!(
            parse_script(backwards, Path::new("test.sh")),
            Err(RecordingError::BadSubbands { .. })
        ));
        let bad_mode = "rspctl --rcumode=9";
        assert!(matches!(
            parse_script(bad_mode, Path::new("test.sh")),
            Err(RecordingError::BadRcuMode { .. })
        ));
    }

    #[test]
    fn test_header() {
        assert_eq!(
            parse_header("rspctl --xcstatistics --xcsubband=297 --integration=1"),
            Some(297)
        );
        assert_eq!(parse_header("nothing to see"), None);
    }

    #[test]
    fn test_obstime_from_filename() {
        let t = obstime_from_filename(Path::new("/data/20170720_095816_mode_3_xst_sb297.dat"))
            .unwrap();
        assert_eq!(t, Epoch::from_gregorian_utc_hms(2017, 7, 20, 9, 58, 16));
        assert!(obstime_from_filename(Path::new("xst.dat")).is_none());
        // Not a real date.
        assert!(obstime_from_filename(Path::new("20171345_095816_xst.dat")).is_none());
    }

    #[test]
    fn test_resolve_prefers_cli_then_script_then_header() {
        let dir = TempDir::new().unwrap();
        let dat = dir.path().join("20240101_120000_xst.dat");
        fs::File::create(&dat).unwrap();

        // Nothing around: defaults.
        let meta = RecordingMeta::resolve(&dat, None, None, None).unwrap();
        assert_eq!(meta.band, BandPlan::new(51, 461).unwrap());
        assert_eq!(meta.band_source, MetaSource::Default);
        assert_eq!(meta.rcu_mode.get(), 3);

        // A header.
        let mut h = fs::File::create(dir.path().join("20240101_120000_xst.h")).unwrap();
        writeln!(h, "--xcsubband=300").unwrap();
        let meta = RecordingMeta::resolve(&dat, None, None, None).unwrap();
        assert_eq!(meta.band, BandPlan::Pinned(300));
        assert!(matches!(meta.band_source, MetaSource::Header(_)));

        // A script beside the data beats the header.
        fs::write(dir.path().join("record.sh"), RANGE_SCRIPT).unwrap();
        let meta = RecordingMeta::resolve(&dat, None, None, None).unwrap();
        assert_eq!(meta.band, BandPlan::new(150, 271).unwrap());
        assert_eq!(meta.rcu_mode.get(), 5);
        assert!(matches!(meta.rcu_mode_source, MetaSource::Script(_)));

        // The command line beats everything.
        let meta = RecordingMeta::resolve(
            &dat,
            None,
            Some(BandPlan::Pinned(167)),
            Some(RcuMode::new(1).unwrap()),
        )
        .unwrap();
        assert_eq!(meta.band, BandPlan::Pinned(167));
        assert_eq!(meta.rcu_mode.get(), 1);
        assert_eq!(meta.band_source, MetaSource::CommandLine);
    }

    #[test]
    fn test_resolve_inputs() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            resolve_inputs(&dir.path().join("nope.dat"), false),
            Err(RecordingError::Missing(_))
        ));
        assert!(matches!(
            resolve_inputs(dir.path(), false),
            Err(RecordingError::NoDatFiles(_))
        ));

        for name in ["20240101_120100_xst.dat", "20240101_120000_xst.dat", "notes.txt"] {
            fs::File::create(dir.path().join(name)).unwrap();
        }
        let all = resolve_inputs(dir.path(), false).unwrap();
        assert_eq!(all.len(), 2);
        assert!(all[0].ends_with("20240101_120000_xst.dat"));
        let newest = resolve_inputs(dir.path(), true).unwrap();
        assert_eq!(newest.len(), 1);
        assert!(newest[0].ends_with("20240101_120100_xst.dat"));
    }
}
