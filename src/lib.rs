//! Quality control of polarimetric weather radar sweeps.
//!
//! The differential phase of each radial is unfolded, split into rain cells, and rebuilt into a
//! smooth non-decreasing profile together with its range derivative (specific differential
//! phase). The rebuilt phase then drives a Z-PHI attenuation correction of reflectivity.
//!
//! The stages are available on their own under [`phase`] and [`attenuation`], and chained over
//! a whole [`sweep::Sweep`] by [`pipeline::quality_control`] and
//! [`pipeline::par_quality_control`].
pub mod attenuation;
pub mod error;
pub mod phase;
pub mod pipeline;
pub mod sweep;
pub mod utils;

#[cfg(feature = "python")]
mod python;

pub use error::QcError;
pub use pipeline::{par_quality_control, quality_control, QcConfig, RadialReport, SweepReport};
pub use sweep::{RadialProfile, Sweep};
