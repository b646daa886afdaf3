//! Writing sky images out as PNG frames.
//!
//! Frames for each frequency go into their own directory, named so that a
//! video tool can glob them in time order, e.g.
//!
//! ```text
//! <output>/58.0MHz/20170720_095816_LV614_SB297_sky_calibrated_58.0MHz.png
//! ```

mod error;

pub use error::FrameWriteError;

use std::path::{Path, PathBuf};

use log::{debug, trace};
use plotters::prelude::*;

use crate::imaging::SkyImage;

/// The colours of the map, from faintest to brightest.
const COLOUR_STOPS: [(u8, u8, u8); 11] = [
    (94, 79, 162),
    (50, 136, 189),
    (102, 194, 165),
    (171, 221, 164),
    (230, 245, 152),
    (255, 255, 191),
    (254, 224, 139),
    (253, 174, 97),
    (244, 109, 67),
    (213, 62, 79),
    (158, 1, 66),
];

/// The colour of a pixel that is `frac` of the way from the faintest to the
/// brightest pixel. `frac` is clamped to `[0, 1]`.
pub fn colour(frac: f64) -> RGBColor {
    let frac = if frac.is_finite() {
        frac.clamp(0.0, 1.0)
    } else {
        0.0
    };
    let pos = frac * (COLOUR_STOPS.len() - 1) as f64;
    let i = (pos.floor() as usize).min(COLOUR_STOPS.len() - 2);
    let t = pos - i as f64;
    let (a, b) = (COLOUR_STOPS[i], COLOUR_STOPS[i + 1]);
    let lerp = |x: u8, y: u8| (f64::from(x) + t * (f64::from(y) - f64::from(x))).round() as u8;
    RGBColor(lerp(a.0, b.0), lerp(a.1, b.1), lerp(a.2, b.2))
}

/// The name of the directory holding frames at `freq_mhz`.
pub fn frequency_label(freq_mhz: f64) -> String {
    format!("{freq_mhz:.1}MHz")
}

/// The file name of the frame for `image`, without any de-duplicating
/// suffix.
pub fn frame_name(image: &SkyImage, station: &str) -> String {
    let (y, mo, d, h, mi, s, _) = image.timestamp.to_gregorian_utc();
    format!(
        "{y:04}{mo:02}{d:02}_{h:02}{mi:02}{s:02}_{station}_SB{}_sky_calibrated_{}.png",
        image.subband,
        frequency_label(image.freq_mhz())
    )
}

pub struct FrameWriter {
    out_dir: PathBuf,
    station: String,

    /// Output pixels per image pixel.
    scale: u32,

    /// Fixed colour scale limits; each image is scaled to its own range if
    /// these aren't set.
    limits: Option<(f64, f64)>,

    num_written: usize,
}

impl FrameWriter {
    pub fn new<P: AsRef<Path>>(out_dir: P, station: &str, scale: u32) -> FrameWriter {
        FrameWriter {
            out_dir: out_dir.as_ref().to_path_buf(),
            station: station.to_string(),
            scale: scale.max(1),
            limits: None,
            num_written: 0,
        }
    }

    pub fn with_limits(self, limits: Option<(f64, f64)>) -> FrameWriter {
        FrameWriter { limits, ..self }
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    pub fn num_written(&self) -> usize {
        self.num_written
    }

    pub fn frame_dir(&self, freq_mhz: f64) -> PathBuf {
        self.out_dir.join(frequency_label(freq_mhz))
    }

    /// A path for `image` that doesn't clobber an existing frame.
    fn unused_path(&self, image: &SkyImage) -> PathBuf {
        let dir = self.frame_dir(image.freq_mhz());
        let name = frame_name(image, &self.station);
        let path = dir.join(&name);
        if !path.exists() {
            return path;
        }
        let stem = name.trim_end_matches(".png");
        (1..)
            .map(|i| dir.join(format!("{stem}_{i}.png")))
            .find(|p| !p.exists())
            .unwrap_or(path)
    }

    /// Draw `image` and save it. Pixels below the horizon are white.
    pub fn write(&mut self, image: &SkyImage) -> Result<PathBuf, FrameWriteError> {
        let dir = self.frame_dir(image.freq_mhz());
        std::fs::create_dir_all(&dir).map_err(|err| FrameWriteError::CreateDir {
            dir: dir.clone(),
            err,
        })?;
        let path = self.unused_path(image);

        let (vmin, vmax) = match self.limits.or_else(|| image.range()) {
            Some((lo, hi)) if hi > lo => (lo, hi),
            Some((lo, _)) => (lo, lo + 1.0),
            None => (0.0, 1.0),
        };
        trace!("Colour scale for {}: {vmin} to {vmax}", path.display());

        let npix = image.npix();
        let scale = self.scale;
        let side = npix as u32 * scale;
        let root = BitMapBackend::new(&path, (side, side)).into_drawing_area();
        root.fill(&WHITE).map_err(|e| FrameWriteError::Draw(e.to_string()))?;
        for ((m_ix, l_ix), &v) in image.pixels.indexed_iter() {
            if !image.is_above_horizon(m_ix, l_ix) {
                continue;
            }
            // North (larger m) is up.
            let x = (l_ix as u32 * scale) as i32;
            let y = ((npix - 1 - m_ix) as u32 * scale) as i32;
            let c = colour((v - vmin) / (vmax - vmin));
            root.draw(&Rectangle::new(
                [(x, y), (x + scale as i32, y + scale as i32)],
                c.filled(),
            ))
            .map_err(|e| FrameWriteError::Draw(e.to_string()))?;
        }
        root.present()
            .map_err(|e| FrameWriteError::Draw(e.to_string()))?;
        drop(root);

        debug!("Wrote {}", path.display());
        self.num_written += 1;
        Ok(path)
    }
}
