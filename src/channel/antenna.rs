//! Uniform planar antenna array on the y-z plane.
//!
//! Element spacing is expressed in wavelengths, so element locations feed
//! phase terms directly without a division by lambda.

use num_complex::Complex64;

use crate::config::{AntennaConfig, ElementPattern};
use crate::error::{Error, Result};

const FRONT_BACK_RATIO_DB: f64 = 25.0;
const SIDE_LOBE_FLOOR_DB: f64 = 25.0;
const HPBW_DEG: f64 = 65.0;

/// One vehicle's antenna panel.
#[derive(Debug, Clone)]
pub struct AntennaArray {
    rows: u16,
    cols: u16,
    spacing: f64,
    pattern: ElementPattern,
    max_gain_db: f64,
}

impl AntennaArray {
    pub fn new(cfg: &AntennaConfig) -> Result<Self> {
        if cfg.rows == 0 || cfg.cols == 0 {
            return Err(Error::EmptyAntennaArray {
                rows: cfg.rows,
                cols: cfg.cols,
            });
        }
        Ok(Self {
            rows: cfg.rows,
            cols: cfg.cols,
            spacing: cfg.spacing_wavelengths,
            pattern: cfg.pattern,
            max_gain_db: cfg.max_gain_db,
        })
    }

    pub fn num_elements(&self) -> usize {
        self.rows as usize * self.cols as usize
    }

    /// Element location in wavelengths. The panel sits on the y-z plane
    /// with element 0 at the origin, filling rows bottom-up.
    pub fn element_location(&self, index: usize) -> [f64; 3] {
        let col = (index % self.cols as usize) as f64;
        let row = (index / self.cols as usize) as f64;
        [0.0, self.spacing * col, self.spacing * row]
    }

    /// Field factor (amplitude, linear) of one element toward the given
    /// direction. `zenith` in [0, pi], `azimuth` wrapped into [-pi, pi).
    pub fn radiation_pattern(&self, zenith: f64, azimuth: f64) -> f64 {
        match self.pattern {
            ElementPattern::Isotropic => 1.0,
            ElementPattern::ThreeGppV2v => {
                let mut h = azimuth;
                while h >= std::f64::consts::PI {
                    h -= 2.0 * std::f64::consts::PI;
                }
                while h < -std::f64::consts::PI {
                    h += 2.0 * std::f64::consts::PI;
                }
                let v_deg = zenith.to_degrees();
                let h_deg = h.to_degrees();

                let a_v = -SIDE_LOBE_FLOOR_DB
                    .min(12.0 * ((v_deg - 90.0) / HPBW_DEG).powi(2));
                let a_h = -FRONT_BACK_RATIO_DB.min(12.0 * (h_deg / HPBW_DEG).powi(2));
                let a_db = self.max_gain_db - FRONT_BACK_RATIO_DB.min(-a_v - a_h);
                10f64.powf(a_db / 20.0)
            }
        }
    }

    /// Conjugate steering vector pointing the panel at (`zenith`,
    /// `azimuth`), normalized to unit power.
    pub fn steering_vector(&self, zenith: f64, azimuth: f64) -> Vec<Complex64> {
        let n = self.num_elements();
        let scale = 1.0 / (n as f64).sqrt();
        (0..n)
            .map(|index| {
                let loc = self.element_location(index);
                let phase = -2.0
                    * std::f64::consts::PI
                    * (zenith.sin() * azimuth.cos() * loc[0]
                        + zenith.sin() * azimuth.sin() * loc[1]
                        + zenith.cos() * loc[2]);
                Complex64::from_polar(scale, phase)
            })
            .collect()
    }
}
