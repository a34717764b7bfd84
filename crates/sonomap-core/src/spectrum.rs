//! Octave-band spectra and decibel arithmetic.
//!
//! The engine works in the eight octave bands from 63 Hz to 8 kHz. Exact
//! (base-ten) centre frequencies drive the physics, the nominal values label
//! outputs. Levels combine energetically: convert to watts, sum, convert
//! back.

/// Number of octave bands carried end to end.
pub const SPECTRUM_SIZE: usize = 8;

/// Nominal octave-band centre frequencies, Hz.
pub const NOMINAL_FREQUENCIES: [u32; SPECTRUM_SIZE] =
    [63, 125, 250, 500, 1000, 2000, 4000, 8000];

/// Exact base-ten octave-band centre frequencies, Hz. Used in every
/// frequency-dependent formula.
pub const EXACT_FREQUENCIES: [f64; SPECTRUM_SIZE] = [
    63.095_734_4,
    125.892_541,
    251.188_643,
    501.187_234,
    1000.0,
    1995.262_31,
    3981.071_71,
    7943.282_35,
];

/// A-weighting corrections per octave band, dB.
pub const A_WEIGHTING: [f64; SPECTRUM_SIZE] =
    [-26.2, -16.1, -8.6, -3.2, 0.0, 1.2, 1.0, -1.1];

/// Per-band values (levels in dB or factors, depending on context).
pub type Spectrum = [f64; SPECTRUM_SIZE];

/// A spectrum of zeros.
pub const ZERO_SPECTRUM: Spectrum = [0.0; SPECTRUM_SIZE];

/// Convert a level in dB to linear power.
#[must_use]
pub fn db_to_w(db: f64) -> f64 {
    10.0_f64.powf(db / 10.0)
}

/// Convert linear power to a level in dB. Zero or negative power yields
/// negative infinity; callers clamp where a floor is needed.
#[must_use]
pub fn w_to_db(w: f64) -> f64 {
    10.0 * w.log10()
}

/// Energetic sum of two levels in dB.
#[must_use]
pub fn sum_db(a: f64, b: f64) -> f64 {
    w_to_db(db_to_w(a) + db_to_w(b))
}

/// Element-wise energetic sum of two level spectra.
#[must_use]
pub fn sum_db_spectra(a: &Spectrum, b: &Spectrum) -> Spectrum {
    let mut out = ZERO_SPECTRUM;
    for (i, slot) in out.iter_mut().enumerate() {
        *slot = sum_db(a[i], b[i]);
    }
    out
}

/// Element-wise sum of plain (non-logarithmic) spectra.
#[must_use]
pub fn sum_spectra(a: &Spectrum, b: &Spectrum) -> Spectrum {
    let mut out = ZERO_SPECTRUM;
    for (i, slot) in out.iter_mut().enumerate() {
        *slot = a[i] + b[i];
    }
    out
}

/// Total level of a spectrum, energetic sum over bands.
#[must_use]
pub fn total_level(spectrum: &Spectrum) -> f64 {
    w_to_db(spectrum.iter().map(|&db| db_to_w(db)).sum())
}

/// Apply A-weighting to a level spectrum.
#[must_use]
pub fn a_weighted(spectrum: &Spectrum) -> Spectrum {
    sum_spectra(spectrum, &A_WEIGHTING)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_w_round_trip() {
        for db in [-40.0, 0.0, 35.0, 93.5] {
            assert!((w_to_db(db_to_w(db)) - db).abs() < 1e-10);
        }
    }

    #[test]
    fn test_doubling_energy_adds_3_db() {
        assert!((sum_db(60.0, 60.0) - 63.010_299_956_639_81).abs() < 1e-9);
    }

    #[test]
    fn test_unequal_sum_dominated_by_louder() {
        let sum = sum_db(80.0, 50.0);
        assert!(sum > 80.0 && sum < 80.01);
    }

    #[test]
    fn test_total_level_flat_spectrum() {
        let spectrum = [70.0; SPECTRUM_SIZE];
        // 8 equal bands: +10*log10(8) ~ 9.03 dB
        assert!((total_level(&spectrum) - 79.030_899_869_919_43).abs() < 1e-9);
    }

    #[test]
    fn test_exact_frequencies_track_nominal() {
        for (exact, nominal) in EXACT_FREQUENCIES.iter().zip(NOMINAL_FREQUENCIES) {
            let ratio = exact / f64::from(nominal);
            assert!((0.98..1.02).contains(&ratio), "{exact} vs {nominal}");
        }
    }
}
