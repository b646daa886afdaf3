//! Station metadata: RCU modes, station types and antenna layouts.

mod error;

pub use error::StationError;

use std::{
    f64::consts::PI,
    fmt::Display,
    path::{Path, PathBuf},
    str::FromStr,
};

use log::{debug, trace};
use serde::Deserialize;
use vec1::Vec1;

use crate::constants::{CLOCK_160_HZ, CLOCK_200_HZ, DEFAULT_RCU_MODE, NUM_SUBBANDS};

/// The receiver mode of the station's RCUs. This determines the sampling
/// clock and the frequency offset of subband 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RcuMode(u8);

impl RcuMode {
    pub fn new(mode: u8) -> Result<RcuMode, StationError> {
        if (1..=7).contains(&mode) {
            Ok(RcuMode(mode))
        } else {
            Err(StationError::InvalidRcuMode(mode))
        }
    }

    pub fn get(self) -> u8 {
        self.0
    }

    /// The sampling clock \[Hz\].
    pub fn clock_hz(self) -> f64 {
        if self.0 == 6 {
            CLOCK_160_HZ
        } else {
            CLOCK_200_HZ
        }
    }

    /// The frequency of subband 0 \[Hz\]. The HBA modes sample in the second,
    /// third and fourth Nyquist zones.
    pub fn freq_offset_hz(self) -> f64 {
        match self.0 {
            5 => 100e6,
            6 => 160e6,
            7 => 200e6,
            _ => 0.0,
        }
    }

    /// The width of a single subband \[Hz\].
    pub fn subband_width_hz(self) -> f64 {
        0.5 * self.clock_hz() / f64::from(NUM_SUBBANDS)
    }

    /// Is this mode using the low-band antennas?
    pub fn is_lba(self) -> bool {
        self.0 <= 4
    }

    /// The caltable filename suffix for this mode.
    pub(crate) fn caltable_suffix(self) -> &'static str {
        match self.0 {
            1 | 2 => "LBA_OUTER-10_90",
            3 | 4 => "LBA_INNER-10_90",
            5 => "HBA-110_190",
            6 => "HBA-170_230",
            _ => "HBA-210_250",
        }
    }
}

impl Default for RcuMode {
    fn default() -> Self {
        RcuMode(DEFAULT_RCU_MODE)
    }
}

impl FromStr for RcuMode {
    type Err = StationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mode = match s.trim() {
            "outer" => 1,
            "inner" => 3,
            s => s
                .parse()
                .map_err(|_| StationError::UnparsableRcuMode(s.to_string()))?,
        };
        RcuMode::new(mode)
    }
}

impl Display for RcuMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StationType {
    Core,
    Remote,
    International,
}

impl StationType {
    /// Work out the kind of station from its name, e.g. "CS002" is a core
    /// station and "DE603" is international.
    pub fn from_name(station_name: &str) -> StationType {
        if station_name.starts_with('C') {
            StationType::Core
        } else if station_name.starts_with('R') || station_name.starts_with("PL611") {
            StationType::Remote
        } else {
            StationType::International
        }
    }

    /// The number of RCUs (two per dual-polarisation antenna) in a station of
    /// this type.
    pub fn num_rcus(self) -> usize {
        match self {
            StationType::Core | StationType::Remote => 96,
            StationType::International => 192,
        }
    }
}

/// Append the antenna field to a short station name, e.g. "DE603" in mode 3
/// becomes "DE603LBA". Names that already carry a field are returned as-is.
pub fn full_station_name(station_name: &str, mode: RcuMode) -> Result<String, StationError> {
    if station_name.len() < 5 {
        return Err(StationError::BadStationName(station_name.to_string()));
    }
    if station_name.len() > 5 {
        return Ok(station_name.to_string());
    }
    let field = if mode.is_lba() { "LBA" } else { "HBA" };
    Ok(format!("{station_name}{field}"))
}

/// The on-disk format of a station layout file.
#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields)]
struct StationFile {
    name: String,
    rcu_mode: Option<u8>,
    #[serde(default)]
    rotation_deg: f64,
    antenna_pqr: Vec<[f64; 3]>,
}

/// The positions of a station's antennas in a local, north-aligned frame
/// \[metres\].
#[derive(Debug, Clone)]
pub struct StationLayout {
    /// The station name, e.g. "LV614".
    pub name: String,

    /// The RCU mode given by the layout file, if any.
    pub rcu_mode: Option<RcuMode>,

    /// The rotation of the station's PQR frame from north \[radians\].
    pub rotation_rad: f64,

    /// The antenna positions after rotating PQR to point north. There is one
    /// entry per dual-polarisation antenna, so there are half as many
    /// positions as RCUs.
    pub antenna_xyz: Vec1<[f64; 3]>,

    /// Where the layout came from; `None` for synthetic layouts.
    pub source: Option<PathBuf>,
}

impl StationLayout {
    pub fn from_pqr(
        name: &str,
        rcu_mode: Option<RcuMode>,
        rotation_rad: f64,
        antenna_pqr: Vec1<[f64; 3]>,
    ) -> StationLayout {
        // The XYZ frame is PQR rotated about R so that the second axis points
        // at local north.
        let (s, c) = (-rotation_rad).sin_cos();
        let antenna_xyz = antenna_pqr.mapped(|[p, q, r]| [c * p - s * q, s * p + c * q, r]);
        StationLayout {
            name: name.to_string(),
            rcu_mode,
            rotation_rad,
            antenna_xyz,
            source: None,
        }
    }

    pub fn from_toml_file<P: AsRef<Path>>(file: P) -> Result<StationLayout, StationError> {
        let file = file.as_ref();
        debug!("Reading station layout from {}", file.display());
        let contents = std::fs::read_to_string(file).map_err(|err| StationError::IO {
            file: file.to_path_buf(),
            err,
        })?;
        let mut layout = StationLayout::from_toml_str(&contents, file)?;
        layout.source = Some(file.to_path_buf());
        Ok(layout)
    }

    fn from_toml_str(contents: &str, file: &Path) -> Result<StationLayout, StationError> {
        let station: StationFile = toml::from_str(contents).map_err(|err| StationError::Toml {
            file: file.to_path_buf(),
            err,
        })?;
        let rcu_mode = station.rcu_mode.map(RcuMode::new).transpose()?;
        let antenna_pqr =
            Vec1::try_from_vec(station.antenna_pqr).map_err(|_| StationError::NoAntennas {
                file: file.to_path_buf(),
            })?;
        trace!(
            "Station {} has {} antennas",
            station.name,
            antenna_pqr.len()
        );
        Ok(StationLayout::from_pqr(
            &station.name,
            rcu_mode,
            station.rotation_deg.to_radians(),
            antenna_pqr,
        ))
    }

    /// A deterministic stand-in layout: antennas on a sunflower spiral out to
    /// a 35 m radius. Good enough to see point sources move, but not a real
    /// station.
    pub fn synthetic(name: &str, num_antennas: usize) -> StationLayout {
        let golden_angle = PI * (3.0 - 5.0_f64.sqrt());
        let radius = 35.0;
        let n = num_antennas.max(1);
        let positions = (0..n)
            .map(|k| {
                let r = radius * ((k as f64 + 0.5) / n as f64).sqrt();
                let (s, c) = (k as f64 * golden_angle).sin_cos();
                [r * c, r * s, 0.0]
            })
            .collect::<Vec<_>>();
        let antenna_pqr = Vec1::try_from_vec(positions).expect("n is at least 1");
        StationLayout::from_pqr(name, None, 0.0, antenna_pqr)
    }

    pub fn num_antennas(&self) -> usize {
        self.antenna_xyz.len()
    }

    /// Two RCUs (X and Y) per antenna.
    pub fn num_rcus(&self) -> usize {
        2 * self.num_antennas()
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use vec1::vec1;

    use super::*;

    #[test]
    fn rcu_modes_parse() {
        assert_eq!("3".parse::<RcuMode>().unwrap().get(), 3);
        assert_eq!("inner".parse::<RcuMode>().unwrap().get(), 3);
        assert_eq!("outer".parse::<RcuMode>().unwrap().get(), 1);
        assert!(matches!(
            "8".parse::<RcuMode>(),
            Err(StationError::InvalidRcuMode(8))
        ));
        assert!(matches!(
            "sparse".parse::<RcuMode>(),
            Err(StationError::UnparsableRcuMode(_))
        ));
    }

    #[test]
    fn subband_width_depends_on_clock() {
        assert_abs_diff_eq!(RcuMode::new(3).unwrap().subband_width_hz(), 195312.5);
        assert_abs_diff_eq!(RcuMode::new(6).unwrap().subband_width_hz(), 156250.0);
    }

    #[test]
    fn station_types() {
        assert_eq!(StationType::from_name("CS002"), StationType::Core);
        assert_eq!(StationType::from_name("RS509"), StationType::Remote);
        assert_eq!(StationType::from_name("PL611"), StationType::Remote);
        assert_eq!(StationType::from_name("DE603"), StationType::International);
        assert_eq!(StationType::from_name("LV614").num_rcus(), 192);
        assert_eq!(StationType::from_name("RS509").num_rcus(), 96);
    }

    #[test]
    fn full_station_names() {
        let lba = RcuMode::new(3).unwrap();
        let hba = RcuMode::new(5).unwrap();
        assert_eq!(full_station_name("DE603", lba).unwrap(), "DE603LBA");
        assert_eq!(full_station_name("LV614", hba).unwrap(), "LV614HBA");
        assert_eq!(full_station_name("CS013LBA", hba).unwrap(), "CS013LBA");
        assert!(full_station_name("CS", lba).is_err());
    }

    #[test]
    fn rotation_points_q_north() {
        let layout = StationLayout::from_pqr(
            "TEST1",
            None,
            std::f64::consts::FRAC_PI_2,
            vec1![[1.0, 0.0, 0.0], [0.0, 1.0, 2.0]],
        );
        let [x, y, z] = layout.antenna_xyz[0];
        assert_abs_diff_eq!(x, 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(y, -1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(z, 0.0);
        assert_abs_diff_eq!(layout.antenna_xyz[1][0], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(layout.antenna_xyz[1][2], 2.0);
        assert_eq!(layout.num_rcus(), 4);
    }

    #[test]
    fn layout_from_toml() {
        let contents = r#"
name = "LV614"
rcu_mode = 3
rotation_deg = 0.0
antenna_pqr = [[0.0, 0.0, 0.0], [10.0, 0.0, 0.0], [0.0, 10.0, 0.0]]
"#;
        let layout = StationLayout::from_toml_str(contents, Path::new("mem.toml")).unwrap();
        assert_eq!(layout.name, "LV614");
        assert_eq!(layout.rcu_mode, Some(RcuMode::new(3).unwrap()));
        assert_eq!(layout.num_antennas(), 3);
        assert_eq!(layout.antenna_xyz[1], [10.0, 0.0, 0.0]);
    }

    #[test]
    fn layout_without_antennas_is_rejected() {
        let contents = "name = \"LV614\"\nantenna_pqr = []\n";
        let result = StationLayout::from_toml_str(contents, Path::new("mem.toml"));
        assert!(matches!(result, Err(StationError::NoAntennas { .. })));
    }

    #[test]
    fn synthetic_layout_is_deterministic() {
        let a = StationLayout::synthetic("LV614", 96);
        let b = StationLayout::synthetic("LV614", 96);
        assert_eq!(a.num_rcus(), 192);
        assert_eq!(a.antenna_xyz, b.antenna_xyz);
        for [x, y, _] in a.antenna_xyz.iter() {
            assert!((x * x + y * y).sqrt() <= 35.0);
        }
    }
}
