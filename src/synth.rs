//! Synthetic XST data, for testing and for rehearsing real-time runs
//! without a station.

use std::{f64::consts::TAU, fs::OpenOptions, io::Write, path::Path, str::FromStr};

use itertools::iproduct;
use ndarray::Array2;
use num_complex::Complex64;

use crate::{constants::VEL_C, read::encode_correlations, station::StationLayout};

/// A point source at direction cosines `(l, m)` with Stokes I flux `flux`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointSource {
    pub l: f64,
    pub m: f64,
    pub flux: f64,
}

impl FromStr for PointSource {
    type Err = String;

    /// Parse "l,m" or "l,m,flux"; the flux defaults to 1.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let values = s
            .split(',')
            .map(|v| v.trim().parse::<f64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| format!("couldn't parse '{s}' as a source: {e}"))?;
        let (l, m, flux) = match values.as_slice() {
            [l, m] => (*l, *m, 1.0),
            [l, m, flux] => (*l, *m, *flux),
            _ => return Err(format!("expected 'l,m' or 'l,m,flux', got '{s}'")),
        };
        if l * l + m * m > 1.0 {
            return Err(format!("source at l={l}, m={m} is below the horizon"));
        }
        Ok(PointSource { l, m, flux })
    }
}

/// The correlation matrix a station would see of `sources` at `freq_hz`.
/// Flux is split evenly between the X and Y RCUs of each antenna; the
/// cross-polarisation terms are zero.
pub fn point_source_matrix(
    layout: &StationLayout,
    freq_hz: f64,
    sources: &[PointSource],
) -> Array2<Complex64> {
    let num_rcus = layout.num_rcus();
    let xyz = &layout.antenna_xyz;
    let k = TAU * freq_hz / VEL_C;
    let mut data = Array2::zeros((num_rcus, num_rcus));
    for (a, b) in iproduct!(0..xyz.len(), 0..xyz.len()) {
        let bx = xyz[a][0] - xyz[b][0];
        let by = xyz[a][1] - xyz[b][1];
        let v: Complex64 = sources
            .iter()
            .map(|s| Complex64::from_polar(0.5 * s.flux, k * (bx * s.l + by * s.m)))
            .sum();
        data[(2 * a, 2 * b)] = v;
        data[(2 * a + 1, 2 * b + 1)] = v;
    }
    data
}

/// Append `data` as one record to `file`, creating it if necessary.
pub fn append_record(file: &Path, data: &Array2<Complex64>) -> std::io::Result<()> {
    let mut f = OpenOptions::new().create(true).append(true).open(file)?;
    f.write_all(&encode_correlations(data))?;
    f.flush()
}
