pub(crate) const DEG_TO_RAD: f64 = std::f64::consts::PI / 180.0;
pub(crate) const RAD_TO_DEG: f64 = 180.0 / std::f64::consts::PI;

/// Exponent of the power law between specific attenuation and reflectivity.
pub const ZPHI_EXPONENT: f64 = 0.78;

/// 0.2 ln(10), converts two-way dB into the Hitschfeld-Bordan integral scale.
pub(crate) const HB_SCALE: f64 = 0.46;
/// 0.1 ln(10), converts dB into nepers.
pub(crate) const DB_TO_NEPER: f64 = 0.23;
