//! Histogram math used by the LBPH recognizer

/// Alternative chi-square distance, `sum(2 * (a - b)^2 / (a + b))`
///
/// Same measure OpenCV's LBPH uses (`HISTCMP_CHISQR_ALT`). Bins empty in
/// both histograms contribute nothing.
pub fn chi_square_alt(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() {
        return f64::MAX;
    }

    a.iter()
        .zip(b.iter())
        .map(|(&x, &y)| {
            let sum = x as f64 + y as f64;
            if sum > 0.0 {
                let diff = x as f64 - y as f64;
                2.0 * diff * diff / sum
            } else {
                0.0
            }
        })
        .sum()
}

/// Scale a histogram so its bins sum to 1
pub fn normalize_histogram(hist: &mut [f32]) {
    let total: f32 = hist.iter().sum();
    if total > 0.0 {
        for bin in hist.iter_mut() {
            *bin /= total;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chi_square_identical() {
        let a = vec![0.25, 0.25, 0.5];
        assert!(chi_square_alt(&a, &a).abs() < 1e-12);
    }

    #[test]
    fn test_chi_square_disjoint() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        // 2 * 1 / 1 per bin
        assert!((chi_square_alt(&a, &b) - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_chi_square_length_mismatch() {
        assert_eq!(chi_square_alt(&[1.0], &[1.0, 0.0]), f64::MAX);
    }

    #[test]
    fn test_normalize_histogram() {
        let mut h = vec![1.0, 3.0, 0.0];
        normalize_histogram(&mut h);
        assert!((h[0] - 0.25).abs() < 1e-6);
        assert!((h[1] - 0.75).abs() < 1e-6);
        assert_eq!(h[2], 0.0);

        let mut empty = vec![0.0, 0.0];
        normalize_histogram(&mut empty);
        assert_eq!(empty, vec![0.0, 0.0]);
    }
}
