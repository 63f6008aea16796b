//! Composite quadrature over uniformly spaced range gates.

/// Running integral of `y` sampled with spacing `dx`.
///
/// Element `k` holds the integral from the first sample to sample `k`. Even numbers of
/// intervals use composite Simpson; an odd trailing interval is closed with the trapezoid
/// rule. The first element is always 0.
pub(crate) fn cumulative_simpson(y: &[f64], dx: f64) -> Vec<f64> {
    let mut out = vec![0.0; y.len()];
    let mut simpson = 0.0;
    for k in 1..y.len() {
        if k % 2 == 0 {
            simpson += dx / 3.0 * (y[k - 2] + 4.0 * y[k - 1] + y[k]);
            out[k] = simpson;
        } else {
            out[k] = simpson + dx / 2.0 * (y[k - 1] + y[k]);
        }
    }
    out
}
