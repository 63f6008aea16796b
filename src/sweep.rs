use crate::error::QcError;
use itertools::izip;
use ndarray::{Array1, Array2, ArrayView1, ArrayViewMut1};

/// One sweep of polarimetric moments, shaped `[num_radial, num_gate]`.
///
/// Distances are in kilometres, phase in degrees, reflectivity in linear units. The
/// reconstruction stages overwrite `differential_phase`, `rate` and `reflectivity`.
#[derive(Debug, Clone)]
pub struct Sweep {
    /// Gate spacing per radial, shape `[num_radial]`
    pub gate_width: Array1<f64>,
    pub reflectivity: Array2<f64>,
    pub differential_reflectivity: Array2<f64>,
    pub differential_phase: Array2<f64>,
    pub correlation: Array2<f64>,
    /// Specific differential phase, degrees per kilometre
    pub rate: Array2<f64>,
    pub temperature: Array2<f64>,
    /// Optional external clutter classification, `true` marks clutter
    pub clutter_mask: Option<Array2<bool>>,
}

impl Sweep {
    /// Builds a sweep from the archive arrays. The rate and temperature fields start at zero.
    ///
    /// # Errors
    /// Will return `Err` if any gate array disagrees in shape with `differential_phase`, or if
    /// `gate_width` does not hold one entry per radial.
    pub fn new(
        gate_width: Array1<f64>,
        reflectivity: Array2<f64>,
        differential_reflectivity: Array2<f64>,
        differential_phase: Array2<f64>,
        correlation: Array2<f64>,
    ) -> Result<Sweep, QcError> {
        let dim = differential_phase.dim();
        let sweep = Sweep {
            gate_width,
            reflectivity: standard_layout(reflectivity),
            differential_reflectivity: standard_layout(differential_reflectivity),
            differential_phase: standard_layout(differential_phase),
            correlation: standard_layout(correlation),
            rate: Array2::zeros(dim),
            temperature: Array2::zeros(dim),
            clutter_mask: None,
        };
        sweep.validate()?;
        Ok(sweep)
    }

    /// Replaces the rate field, e.g. with the archive's own estimate.
    pub fn with_rate(mut self, rate: Array2<f64>) -> Result<Sweep, QcError> {
        self.rate = standard_layout(rate);
        self.validate()?;
        Ok(self)
    }

    pub fn with_temperature(mut self, temperature: Array2<f64>) -> Result<Sweep, QcError> {
        self.temperature = standard_layout(temperature);
        self.validate()?;
        Ok(self)
    }

    /// Attaches a clutter mask that replaces the native dispersion thresholds during
    /// segmentation.
    pub fn with_clutter_mask(mut self, mask: Array2<bool>) -> Result<Sweep, QcError> {
        self.clutter_mask = Some(mask);
        self.validate()?;
        Ok(self)
    }

    pub fn num_radials(&self) -> usize {
        self.differential_phase.nrows()
    }

    pub fn num_gates(&self) -> usize {
        self.differential_phase.ncols()
    }

    /// Checks that every array agrees with the phase array's shape.
    pub fn validate(&self) -> Result<(), QcError> {
        let dim = self.differential_phase.dim();
        let fields = [
            ("reflectivity", self.reflectivity.dim()),
            ("differential_reflectivity", self.differential_reflectivity.dim()),
            ("correlation", self.correlation.dim()),
            ("rate", self.rate.dim()),
            ("temperature", self.temperature.dim()),
        ];
        for (name, field_dim) in fields {
            if field_dim != dim {
                Err(QcError::InvalidInput(format!(
                    "{name} has shape {field_dim:?}, expected {dim:?}"
                )))?
            }
        }
        if let Some(mask) = &self.clutter_mask {
            if mask.dim() != dim {
                Err(QcError::InvalidInput(format!(
                    "clutter mask has shape {:?}, expected {dim:?}",
                    mask.dim()
                )))?
            }
        }
        if self.gate_width.len() != dim.0 {
            Err(QcError::InvalidInput(format!(
                "gate_width has {} entries for {} radials",
                self.gate_width.len(),
                dim.0
            )))?
        }
        Ok(())
    }

    /// Splits the sweep into disjoint per-radial views.
    pub fn radials_mut(&mut self) -> Vec<RadialProfile<'_>> {
        let num_radials = self.num_radials();
        let masks: Vec<Option<ArrayView1<bool>>> = match &self.clutter_mask {
            Some(mask) => mask.rows().into_iter().map(Some).collect(),
            None => vec![None; num_radials],
        };
        izip!(
            0..num_radials,
            self.gate_width.iter(),
            self.reflectivity.rows_mut(),
            self.differential_reflectivity.rows(),
            self.differential_phase.rows_mut(),
            self.correlation.rows(),
            self.rate.rows_mut(),
            self.temperature.rows(),
            masks
        )
        .map(
            |(index, &gate_width, reflectivity, zdr, phase, correlation, rate, temperature, mask)| {
                RadialProfile {
                    index,
                    gate_width,
                    reflectivity,
                    differential_reflectivity: zdr,
                    differential_phase: phase,
                    correlation,
                    rate,
                    temperature,
                    clutter_mask: mask,
                }
            },
        )
        .collect()
    }
}

fn standard_layout(array: Array2<f64>) -> Array2<f64> {
    if array.is_standard_layout() {
        array
    } else {
        array.as_standard_layout().into_owned()
    }
}

/// Mutable view of one radial of a [`Sweep`].
pub struct RadialProfile<'a> {
    pub index: usize,
    pub gate_width: f64,
    pub reflectivity: ArrayViewMut1<'a, f64>,
    pub differential_reflectivity: ArrayView1<'a, f64>,
    pub differential_phase: ArrayViewMut1<'a, f64>,
    pub correlation: ArrayView1<'a, f64>,
    pub rate: ArrayViewMut1<'a, f64>,
    pub temperature: ArrayView1<'a, f64>,
    pub clutter_mask: Option<ArrayView1<'a, bool>>,
}

impl<'a> RadialProfile<'a> {
    pub fn num_gates(&self) -> usize {
        self.differential_phase.len()
    }

    /// Cumulative range of each gate centre, `gate_width * (i + 1)`.
    pub fn range(&self) -> Vec<f64> {
        cumulative_range(self.gate_width, self.num_gates())
    }
}

pub(crate) fn cumulative_range(gate_width: f64, num_gates: usize) -> Vec<f64> {
    (1..=num_gates).map(|i| gate_width * i as f64).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn sweep(num_radials: usize, num_gates: usize) -> Sweep {
        let zeros = Array2::<f64>::zeros((num_radials, num_gates));
        Sweep::new(
            Array1::from_elem(num_radials, 0.25),
            zeros.clone(),
            zeros.clone(),
            zeros.clone(),
            zeros,
        )
        .expect("valid sweep")
    }

    #[test]
    fn rejects_mismatched_shapes() {
        let res = Sweep::new(
            Array1::from_elem(3, 0.25),
            Array2::zeros((3, 10)),
            Array2::zeros((3, 10)),
            Array2::zeros((3, 11)),
            Array2::zeros((3, 10)),
        );
        assert!(matches!(res, Err(QcError::InvalidInput(_))));

        let res = Sweep::new(
            Array1::from_elem(2, 0.25),
            Array2::zeros((3, 10)),
            Array2::zeros((3, 10)),
            Array2::zeros((3, 10)),
            Array2::zeros((3, 10)),
        );
        assert!(matches!(res, Err(QcError::InvalidInput(_))));
        assert!(sweep(3, 10).with_clutter_mask(Array2::from_elem((3, 9), false)).is_err());
    }

    #[test]
    fn radial_views_are_disjoint_rows() {
        let mut sweep = sweep(4, 6);
        for mut radial in sweep.radials_mut() {
            let value = radial.index as f64;
            radial.differential_phase.fill(value);
            assert_eq!(radial.range().last().copied(), Some(1.5));
        }
        for (r, row) in sweep.differential_phase.rows().into_iter().enumerate() {
            assert!(row.iter().all(|&v| v == r as f64));
        }
    }

    #[test]
    fn column_major_input_becomes_contiguous_rows() {
        let phase = Array2::<f64>::zeros((5, 3)).reversed_axes();
        let zeros = Array2::<f64>::zeros((3, 5));
        let mut sweep = Sweep::new(
            Array1::from_elem(3, 0.25),
            zeros.clone(),
            zeros.clone(),
            phase,
            zeros,
        )
        .expect("valid sweep");
        for mut radial in sweep.radials_mut() {
            assert!(radial.differential_phase.as_slice_mut().is_some());
        }
    }
}
