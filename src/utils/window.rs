//! Sliding-window statistics over range-gate traces.
use itertools::Itertools;

pub(crate) fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation.
pub(crate) fn std_dev(values: &[f64]) -> f64 {
    let mu = mean(values);
    let var = values.iter().map(|v| (v - mu) * (v - mu)).sum::<f64>() / values.len() as f64;
    var.sqrt()
}

/// Circular dispersion `var(cos) + var(sin)` of a set of angles in radians.
///
/// Equal to `1 - R^2` where `R` is the mean resultant length, so 0 for a perfectly
/// coherent set and 1 for a uniformly spread one.
pub(crate) fn circular_dispersion(angles: &[f64]) -> f64 {
    let (cos, sin): (Vec<f64>, Vec<f64>) = angles.iter().map(|a| (a.cos(), a.sin())).unzip();
    let var = |x: &[f64]| {
        let mu = mean(x);
        x.iter().map(|v| (v - mu) * (v - mu)).sum::<f64>() / x.len() as f64
    };
    var(&cos) + var(&sin)
}

/// Least-squares slope of `y` against `x`, i.e. `cov(x, y) / var(x)`.
///
/// Returns NaN when `x` has no spread.
pub(crate) fn regression_slope(x: &[f64], y: &[f64]) -> f64 {
    let (x_mean, y_mean) = (mean(x), mean(y));
    let (num, den) = x
        .iter()
        .zip(y.iter())
        .fold((0.0, 0.0), |(num, den), (xi, yi)| {
            let dx = xi - x_mean;
            (num + dx * (yi - y_mean), den + dx * dx)
        });
    num / den
}

/// Applies `stat` to every full window of length `window`.
pub(crate) fn rolling<T, F>(data: &[T], window: usize, stat: F) -> Vec<f64>
where
    F: Fn(&[T]) -> f64,
{
    if window == 0 || data.len() < window {
        return vec![];
    }
    data.windows(window).map(stat).collect()
}

/// Pads a rolling statistic back to `len` samples by repeating its first value `lead` times
/// and its last value until the length is reached.
pub(crate) fn hold_edges(values: &[f64], lead: usize, len: usize) -> Vec<f64> {
    match (values.first(), values.last()) {
        (Some(&first), Some(&last)) => {
            let mut out = Vec::with_capacity(len);
            out.extend(std::iter::repeat(first).take(lead));
            out.extend_from_slice(values);
            if out.len() < len {
                out.resize(len, last);
            }
            out.truncate(len);
            out
        }
        _ => vec![],
    }
}

/// Applies a 5-tap kernel centred on each interior sample. The output has `len - 4` samples.
pub(crate) fn convolve5(data: &[f64], kernel: &[f64; 5]) -> Vec<f64> {
    data.iter()
        .tuple_windows()
        .map(|(a, b, c, d, e)| {
            kernel[0] * a + kernel[1] * b + kernel[2] * c + kernel[3] * d + kernel[4] * e
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn dispersion_of_coherent_angles_is_zero() {
        assert_abs_diff_eq!(circular_dispersion(&[0.3; 8]), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn dispersion_of_opposite_angles_is_one() {
        let angles = [0.0, std::f64::consts::PI, 0.0, std::f64::consts::PI];
        assert_abs_diff_eq!(circular_dispersion(&angles), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn slope_of_line() {
        let x = [1.0, 2.0, 3.0, 4.0, 5.0];
        let y: Vec<f64> = x.iter().map(|v| 3.0 * v - 1.0).collect();
        assert_abs_diff_eq!(regression_slope(&x, &y), 3.0, epsilon = 1e-12);
        assert!(regression_slope(&[2.0; 5], &y).is_nan());
    }

    #[test]
    fn edges_are_held() {
        let padded = hold_edges(&[1.0, 2.0, 3.0], 2, 7);
        assert_eq!(padded, vec![1.0, 1.0, 1.0, 2.0, 3.0, 3.0, 3.0]);
        assert_eq!(hold_edges(&[4.0, 5.0], 0, 4), vec![4.0, 5.0, 5.0, 5.0]);
    }

    #[test]
    fn kernel_preserves_linear_trend() {
        let data: Vec<f64> = (0..10).map(|i| 2.0 * i as f64).collect();
        let smoothed = convolve5(&data, &[0.1, 0.25, 0.3, 0.25, 0.1]);
        assert_eq!(smoothed.len(), 6);
        for (i, v) in smoothed.iter().enumerate() {
            assert_abs_diff_eq!(*v, data[i + 2], epsilon = 1e-12);
        }
    }
}
