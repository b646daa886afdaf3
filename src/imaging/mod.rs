//! Making sky images from correlation matrices.
//!
//! Images are a direct Fourier transform of the Stokes I visibilities onto
//! an `npix × npix` grid of direction cosines covering the whole sky. Row
//! `m_ix` and column `l_ix` of an image are at
//!
//! ```text
//! l =  1 - 2 l_ix / npix
//! m = -1 + 2 m_ix / npix
//! ```
//!
//! so east is on the left when the image is drawn with north up.

mod error;

pub use error::ImagerError;

use std::{f64::consts::TAU, path::PathBuf};

use hifitime::Epoch;
use itertools::iproduct;
use log::trace;
use ndarray::prelude::*;
use num_complex::Complex64;
use rayon::prelude::*;

use crate::{
    calibration::CalTable,
    constants::VEL_C,
    freq::freq_from_sb,
    read::ObservationRecord,
    station::{RcuMode, StationLayout},
};

/// The `l` direction cosine of image column `l_ix`.
pub fn pixel_l(l_ix: usize, npix: usize) -> f64 {
    1.0 - 2.0 * l_ix as f64 / npix as f64
}

/// The `m` direction cosine of image row `m_ix`.
pub fn pixel_m(m_ix: usize, npix: usize) -> f64 {
    -1.0 + 2.0 * m_ix as f64 / npix as f64
}

#[derive(Debug, Clone)]
pub struct SkyImage {
    /// Brightness, indexed `[m_ix, l_ix]`.
    pub pixels: Array2<f64>,

    pub subband: u32,
    pub freq_hz: f64,
    pub timestamp: Epoch,

    /// The file holding the imaged record.
    pub source: PathBuf,

    /// The byte offset of the imaged record within `source`.
    pub source_offset: u64,

    pub record_index: usize,

    pub calibrated: bool,
}

impl SkyImage {
    pub fn npix(&self) -> usize {
        self.pixels.nrows()
    }

    pub fn freq_mhz(&self) -> f64 {
        self.freq_hz / 1e6
    }

    /// Is pixel `[m_ix, l_ix]` inside the unit circle, i.e. above the horizon?
    pub fn is_above_horizon(&self, m_ix: usize, l_ix: usize) -> bool {
        let l = pixel_l(l_ix, self.npix());
        let m = pixel_m(m_ix, self.npix());
        l * l + m * m <= 1.0
    }

    /// The brightest pixel above the horizon as `(m_ix, l_ix, value)`.
    pub fn peak(&self) -> Option<(usize, usize, f64)> {
        self.pixels
            .indexed_iter()
            .filter(|((m_ix, l_ix), v)| v.is_finite() && self.is_above_horizon(*m_ix, *l_ix))
            .map(|((m_ix, l_ix), v)| (m_ix, l_ix, *v))
            .reduce(|best, p| if p.2 > best.2 { p } else { best })
    }

    /// The minimum and maximum of the pixels above the horizon.
    pub fn range(&self) -> Option<(f64, f64)> {
        self.pixels
            .indexed_iter()
            .filter(|((m_ix, l_ix), v)| v.is_finite() && self.is_above_horizon(*m_ix, *l_ix))
            .fold(None, |acc, (_, &v)| match acc {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            })
    }
}

pub struct Imager {
    layout: StationLayout,
    mode: RcuMode,
    npix: usize,
    calibration: Option<CalTable>,

    /// East and north baseline components for every antenna pair, in the
    /// same order as the visibilities given to [`Imager::dft`].
    bx: Vec<f64>,
    by: Vec<f64>,
}

impl Imager {
    pub fn new(
        layout: StationLayout,
        mode: RcuMode,
        npix: usize,
        calibration: Option<CalTable>,
    ) -> Result<Imager, ImagerError> {
        if npix < 2 {
            return Err(ImagerError::BadNpix(npix));
        }
        let xyz = &layout.antenna_xyz;
        let (bx, by) = iproduct!(0..xyz.len(), 0..xyz.len())
            .map(|(a, b)| (xyz[a][0] - xyz[b][0], xyz[a][1] - xyz[b][1]))
            .unzip();
        Ok(Imager {
            layout,
            mode,
            npix,
            calibration,
            bx,
            by,
        })
    }

    pub fn layout(&self) -> &StationLayout {
        &self.layout
    }

    pub fn mode(&self) -> RcuMode {
        self.mode
    }

    pub fn npix(&self) -> usize {
        self.npix
    }

    pub fn is_calibrated(&self) -> bool {
        self.calibration.is_some()
    }

    /// Image `subband` of `record`. The subband must be one that the record
    /// actually holds.
    pub fn image(
        &self,
        record: &ObservationRecord,
        subband: u32,
    ) -> Result<SkyImage, ImagerError> {
        if !record.band.contains(i64::from(subband)) {
            return Err(ImagerError::OutOfRange {
                subband,
                band: record.band,
                record_index: record.index,
            });
        }
        let num_rcus = self.layout.num_rcus();
        if record.data.dim() != (num_rcus, num_rcus) {
            return Err(ImagerError::RcuMismatch {
                expected: num_rcus,
                got: record.data.nrows(),
                record_index: record.index,
            });
        }
        if record.data.iter().all(|v| v.re == 0.0 && v.im == 0.0) {
            return Err(ImagerError::AllZeros(record.index));
        }

        let calibrated;
        let vis = match &self.calibration {
            Some(cal) => {
                let mut v = record.data.clone();
                cal.apply(v.view_mut(), subband)?;
                calibrated = v;
                calibrated.view()
            }
            None => record.data.view(),
        };

        let num_antennas = self.layout.num_antennas();
        let stokes_i = iproduct!(0..num_antennas, 0..num_antennas)
            .map(|(a, b)| vis[(2 * a, 2 * b)] + vis[(2 * a + 1, 2 * b + 1)])
            .collect::<Vec<_>>();

        let freq_hz = freq_from_sb(subband, self.mode);
        trace!(
            "Imaging record {} at subband {subband} ({:.3} MHz)",
            record.index,
            freq_hz / 1e6
        );
        Ok(SkyImage {
            pixels: self.dft(&stokes_i, freq_hz),
            subband,
            freq_hz,
            timestamp: record.timestamp,
            source: record.source.clone(),
            source_offset: record.offset,
            record_index: record.index,
            calibrated: self.calibration.is_some(),
        })
    }

    /// The real part of the mean of `vis · exp(−2πi f (bx l + by m) / c)` for
    /// every pixel. The exponential is separable in `l` and `m`, so the `l`
    /// phases are computed once and reused by every row.
    fn dft(&self, vis: &[Complex64], freq_hz: f64) -> Array2<f64> {
        let npix = self.npix;
        let k = -TAU * freq_hz / VEL_C;
        let n = vis.len() as f64;

        let l_phases = (0..npix)
            .into_par_iter()
            .map(|l_ix| {
                let l = pixel_l(l_ix, npix);
                self.bx
                    .iter()
                    .map(|bx| Complex64::from_polar(1.0, k * bx * l))
                    .collect::<Vec<_>>()
            })
            .collect::<Vec<_>>();

        let mut pixels = Array2::zeros((npix, npix));
        pixels
            .axis_iter_mut(Axis(0))
            .into_par_iter()
            .enumerate()
            .for_each(|(m_ix, mut row)| {
                let m = pixel_m(m_ix, npix);
                let weighted = vis
                    .iter()
                    .zip(self.by.iter())
                    .map(|(v, by)| v * Complex64::from_polar(1.0, k * by * m))
                    .collect::<Vec<_>>();
                for (pixel, phases) in row.iter_mut().zip(l_phases.iter()) {
                    let sum: Complex64 = weighted.iter().zip(phases).map(|(w, p)| w * p).sum();
                    *pixel = sum.re / n;
                }
            });
        pixels
    }
}
