//! Meteorological state: atmospheric absorption, sound celerity and the
//! favourable-condition wind rose.

use glam::DVec2;

use crate::spectrum::{Spectrum, EXACT_FREQUENCIES, SPECTRUM_SIZE};

/// Absolute zero in Celsius.
pub const K_0: f64 = 273.15;
/// Standard atmospheric pressure, Pa.
pub const P_REF: f64 = 101_325.0;
/// Reference ambient temperature, K.
pub const K_REF: f64 = 293.15;

/// Number of wind-rose sectors.
pub const ROSE_SECTORS: usize = 16;

const ANGLE_SECTION: f64 = 2.0 * std::f64::consts::PI / ROSE_SECTORS as f64;

/// Meteorological inputs of an attenuation computation, with the derived
/// per-band absorption cached.
///
/// The wind rose holds, per 22.5 degree bearing sector, the yearly occurrence
/// probability of propagation-favourable conditions (downward refraction) in
/// that direction. Sector 0 is centred slightly east of north; see
/// [`AttenuationParameters::rose_index`].
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AttenuationParameters {
    /// Air temperature, degrees Celsius.
    pub temperature: f64,
    /// Atmospheric pressure, Pa.
    pub pressure: f64,
    /// Relative humidity, percent.
    pub humidity: f64,
    /// Per-sector probability of favourable conditions, each in `[0, 1]`.
    pub wind_rose: [f64; ROSE_SECTORS],
    /// Accept ground-coefficient discontinuities in the ground effect.
    pub g_disc: bool,
    /// Use the primed distances in the ground-effect w/cf evaluation.
    pub prime_2520: bool,
    /// Cached atmospheric absorption per band, dB/km.
    alpha_atmo: Spectrum,
    /// Cached sound celerity, m/s.
    celerity: f64,
}

impl Default for AttenuationParameters {
    fn default() -> Self {
        Self::new(15.0, P_REF, 70.0)
    }
}

impl AttenuationParameters {
    /// Build parameters from temperature (Celsius), pressure (Pa) and
    /// relative humidity (%), with a uniform 50% wind rose.
    #[must_use]
    pub fn new(temperature: f64, pressure: f64, humidity: f64) -> Self {
        let mut params = Self {
            temperature,
            pressure,
            humidity,
            wind_rose: [0.5; ROSE_SECTORS],
            g_disc: true,
            prime_2520: false,
            alpha_atmo: [0.0; SPECTRUM_SIZE],
            celerity: 0.0,
        };
        params.refresh();
        params
    }

    /// Replace the wind rose.
    #[must_use]
    pub fn with_wind_rose(mut self, wind_rose: [f64; ROSE_SECTORS]) -> Self {
        self.wind_rose = wind_rose;
        self
    }

    /// Change the temperature and refresh the derived values.
    #[must_use]
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self.refresh();
        self
    }

    /// Change the relative humidity and refresh the derived values.
    #[must_use]
    pub fn with_humidity(mut self, humidity: f64) -> Self {
        self.humidity = humidity;
        self.refresh();
        self
    }

    fn refresh(&mut self) {
        let kelvin = self.temperature + K_0;
        self.celerity = celerity(kelvin);
        for (band, freq) in EXACT_FREQUENCIES.iter().enumerate() {
            self.alpha_atmo[band] =
                absorption_coefficient(*freq, self.humidity, self.pressure, kelvin);
        }
    }

    /// Atmospheric absorption per band, dB/km.
    #[must_use]
    pub fn alpha_atmo(&self) -> &Spectrum {
        &self.alpha_atmo
    }

    /// Sound celerity, m/s.
    #[must_use]
    pub fn celerity(&self) -> f64 {
        self.celerity
    }

    /// Probability of favourable conditions along the receiver-to-source
    /// direction.
    #[must_use]
    pub fn favourable_probability(&self, receiver: DVec2, source: DVec2) -> f64 {
        self.wind_rose[Self::rose_index_between(receiver, source)]
    }

    /// Wind-rose sector of the direction from `receiver` to `source`.
    #[must_use]
    pub fn rose_index_between(receiver: DVec2, source: DVec2) -> usize {
        let d = source - receiver;
        Self::rose_index(d.y.atan2(d.x))
    }

    /// Wind-rose sector of a planar angle (radians, counterclockwise from
    /// east).
    ///
    /// The north sector is the last index: for 22.5 degree sectors, index 0
    /// covers bearings centred on 22.5 degrees and index 15 covers the
    /// sector wrapping over true north.
    #[must_use]
    pub fn rose_index(angle: f64) -> usize {
        let mut angle_rad = -(angle - std::f64::consts::PI);
        angle_rad -= std::f64::consts::FRAC_PI_2 - ANGLE_SECTION / 2.0;
        let angle_rad = angle_rad.rem_euclid(2.0 * std::f64::consts::PI);
        let index = (angle_rad / ANGLE_SECTION) as isize - 1;
        if index < 0 {
            ROSE_SECTORS - 1
        } else {
            index as usize
        }
    }
}

/// Sound celerity in air at the given temperature (ISO 9613-1).
#[must_use]
pub fn celerity(kelvin: f64) -> f64 {
    343.2 * (kelvin / K_REF).sqrt()
}

/// Atmospheric absorption coefficient in dB/km (ISO 9613-1, section 6.2).
#[must_use]
pub fn absorption_coefficient(frequency: f64, humidity: f64, pressure: f64, kelvin: f64) -> f64 {
    const KELVIN: f64 = 273.15;
    const E: f64 = 2.718_282;

    let t_ref = KELVIN + 20.0;
    let t_rel = kelvin / t_ref;
    let t_01 = KELVIN + 0.01;
    let p_ref = 101.325;
    let p_rel = (pressure / 1e3) / p_ref;

    // Molecular concentration of water vapour (annex B, B.1).
    let p_sat_over_p_ref = 10.0_f64.powf(-6.8346 * (t_01 / kelvin).powf(1.261) + 4.6151);
    let h = humidity * (p_sat_over_p_ref / p_rel);

    // Relaxation frequencies of oxygen (eq. 3) and nitrogen (eq. 4).
    let fro = p_rel * (24.0 + 40_400.0 * h * (0.02 + h) / (0.391 + h));
    let frn = p_rel / t_rel.sqrt()
        * (9.0 + 280.0 * h * E.powf(-4.17 * (t_rel.powf(-1.0 / 3.0) - 1.0)));

    // Classical plus rotational, oxygen and nitrogen terms of eq. 5.
    let xc = 1.84e-11 / p_rel * t_rel.sqrt();
    let xo = 0.012_75 * E.powf(-2239.1 / kelvin) / (fro + frequency * frequency / fro);
    let xn = 0.1068 * E.powf(-3352.0 / kelvin) / (frn + frequency * frequency / frn);

    let alpha =
        20.0 * E.log10() * frequency * frequency * (xc + t_rel.powf(-5.0 / 2.0) * (xo + xn));
    alpha * 1000.0
}
