//! Two-sided normal p-values

use statrs::distribution::{ContinuousCDF, Normal};

/// Two-sided p-value for a Wald z-statistic; NaN for non-finite input
pub fn wald_pvalue(z: f64) -> f64 {
    if !z.is_finite() {
        return f64::NAN;
    }
    Normal::new(0.0, 1.0).map_or(f64::NAN, |normal| 2.0 * normal.cdf(-z.abs()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pvalue_symmetric() {
        assert!((wald_pvalue(2.0) - wald_pvalue(-2.0)).abs() < 1e-12);
    }

    #[test]
    fn test_pvalue_known_values() {
        assert!((wald_pvalue(0.0) - 1.0).abs() < 1e-12);
        assert!((wald_pvalue(1.959964) - 0.05).abs() < 1e-5);
        assert!(wald_pvalue(f64::NAN).is_nan());
    }
}
