//! Source directivity lookup.
//!
//! The engine never owns directivity data; it asks a provider for the
//! per-band correction of a ray leaving a source at the given horizontal and
//! vertical angles in the emission frame. Databases, interpolation schemes
//! and file formats live behind the trait.

use crate::spectrum::{Spectrum, ZERO_SPECTRUM};

/// Resolves directivity patterns to per-band level corrections.
///
/// `phi` is the horizontal emission angle in radians, `[0, 2*PI)`,
/// counterclockwise with 0 at the frame's forward axis; `theta` the vertical
/// angle in radians, `[-PI/2, PI/2]`, positive upward. The returned spectrum
/// is added to the emitted level (so directional losses are negative).
pub trait DirectivityProvider: Send + Sync {
    /// Correction spectrum for the given pattern and ray angles.
    ///
    /// Unknown pattern ids must fall back to zero correction.
    fn attenuation(&self, pattern: u32, phi: f64, theta: f64) -> Spectrum;
}

/// Uniform radiation in every direction.
#[derive(Debug, Clone, Copy, Default)]
pub struct Omnidirectional;

impl DirectivityProvider for Omnidirectional {
    fn attenuation(&self, _pattern: u32, _phi: f64, _theta: f64) -> Spectrum {
        ZERO_SPECTRUM
    }
}

/// One measured direction of a tabulated pattern.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct DirectivityRecord {
    /// Horizontal angle, radians in `[0, 2*PI)`.
    pub phi: f64,
    /// Vertical angle, radians in `[-PI/2, PI/2]`.
    pub theta: f64,
    /// Correction spectrum for this direction.
    pub attenuation: Spectrum,
}

/// Nearest-direction lookup over a table of measured corrections.
#[derive(Debug, Clone, Default)]
pub struct TabulatedDirectivity {
    patterns: std::collections::HashMap<u32, Vec<DirectivityRecord>>,
}

impl TabulatedDirectivity {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the records of one pattern.
    pub fn insert(&mut self, pattern: u32, records: Vec<DirectivityRecord>) {
        self.patterns.insert(pattern, records);
    }
}

impl DirectivityProvider for TabulatedDirectivity {
    fn attenuation(&self, pattern: u32, phi: f64, theta: f64) -> Spectrum {
        let Some(records) = self.patterns.get(&pattern) else {
            return ZERO_SPECTRUM;
        };
        // Nearest direction on the unit sphere.
        let target = unit(phi, theta);
        records
            .iter()
            .min_by(|a, b| {
                let da = dist2(unit(a.phi, a.theta), target);
                let db = dist2(unit(b.phi, b.theta), target);
                da.total_cmp(&db)
            })
            .map_or(ZERO_SPECTRUM, |r| r.attenuation)
    }
}

fn unit(phi: f64, theta: f64) -> [f64; 3] {
    [
        theta.cos() * phi.cos(),
        theta.cos() * phi.sin(),
        theta.sin(),
    ]
}

fn dist2(a: [f64; 3], b: [f64; 3]) -> f64 {
    (a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2) + (a[2] - b[2]).powi(2)
}
