//! A direct (O(n^2)) DCT-II / DCT-III pair. Timbre vectors are short
//! (`binsPerOctave * octaveCount`, typically under 100 entries), so the
//! quadratic cost is negligible and avoids pulling in a dedicated DCT crate
//! the rest of the stack has no other use for.

/// The orthogonality-unnormalised DCT-II: `X_k = 2 * sum_i x_i cos(pi/N (i+1/2) k)`.
#[must_use]
pub fn dct2(input: &[f64]) -> Vec<f64> {
    let n = input.len();
    if n == 0 {
        return Vec::new();
    }
    let factor = std::f64::consts::PI / n as f64;
    (0..n)
        .map(|k| {
            2.0 * (0..n)
                .map(|i| input[i] * (factor * (i as f64 + 0.5) * k as f64).cos())
                .sum::<f64>()
        })
        .collect()
}

/// The exact inverse of [`dct2`] (a scaled DCT-III): reproduces the
/// original input to floating-point tolerance.
#[must_use]
pub fn idct2(input: &[f64]) -> Vec<f64> {
    let n = input.len();
    if n == 0 {
        return Vec::new();
    }
    let factor = std::f64::consts::PI / n as f64;
    (0..n)
        .map(|i| {
            let mut sum = 0.5 * input[0];
            for (k, &coeff) in input.iter().enumerate().skip(1) {
                sum += coeff * (factor * (i as f64 + 0.5) * k as f64).cos();
            }
            2.0 * sum / n as f64
        })
        .collect()
}
