//! Statistical utility functions shared across modules

/// Scale factor that makes the MAD a consistent estimator of the standard deviation
pub const MAD_CONSTANT: f64 = 1.4826;

/// Sample quantile, linear interpolation between order statistics (type 7)
///
/// `sorted_x` must be sorted ascending and free of NaN.
pub fn quantile_type7(sorted_x: &[f64], p: f64) -> f64 {
    let n = sorted_x.len();
    match n {
        0 => f64::NAN,
        1 => sorted_x[0],
        _ => {
            let h = (n as f64 - 1.0) * p.clamp(0.0, 1.0);
            let lo = (h.floor() as usize).min(n - 1);
            let hi = (h.ceil() as usize).min(n - 1);
            sorted_x[lo] + (h - lo as f64) * (sorted_x[hi] - sorted_x[lo])
        }
    }
}

/// Median of the finite values, NaN when there are none
pub fn median(values: &[f64]) -> f64 {
    let mut v: Vec<f64> = values.iter().copied().filter(|x| x.is_finite()).collect();
    if v.is_empty() {
        return f64::NAN;
    }
    v.sort_by(|a, b| a.total_cmp(b));
    quantile_type7(&v, 0.5)
}

/// Median absolute deviation, scaled by [`MAD_CONSTANT`]
pub fn mad(values: &[f64]) -> f64 {
    let center = median(values);
    let deviations: Vec<f64> = values
        .iter()
        .filter(|x| x.is_finite())
        .map(|&x| (x - center).abs())
        .collect();
    MAD_CONSTANT * median(&deviations)
}

/// Mean after dropping `trim` of the observations from each end
pub fn trimmed_mean(values: &[f64], trim: f64) -> f64 {
    let mut v: Vec<f64> = values.iter().copied().filter(|x| x.is_finite()).collect();
    if v.is_empty() {
        return f64::NAN;
    }
    v.sort_by(|a, b| a.total_cmp(b));
    let cut = ((v.len() as f64) * trim.clamp(0.0, 0.5)).floor() as usize;
    let kept = &v[cut..v.len() - cut];
    if kept.is_empty() {
        return median(&v);
    }
    kept.iter().sum::<f64>() / kept.len() as f64
}

/// Sample mean and variance (n - 1 denominator)
pub fn mean_var(values: &[f64]) -> (f64, f64) {
    let n = values.len();
    if n == 0 {
        return (f64::NAN, f64::NAN);
    }
    let mean = values.iter().sum::<f64>() / n as f64;
    if n < 2 {
        return (mean, 0.0);
    }
    let var = values.iter().map(|&x| (x - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
    (mean, var)
}

/// Trigamma function psi'(x) for x > 0
///
/// Shifts the argument above 6 with the recurrence, then uses the asymptotic series.
pub fn trigamma(x: f64) -> f64 {
    if !(x > 0.0) {
        return f64::NAN;
    }
    let mut x = x;
    let mut acc = 0.0;
    while x < 6.0 {
        acc += 1.0 / (x * x);
        x += 1.0;
    }
    let x2 = 1.0 / (x * x);
    acc + 1.0 / x
        + x2 / 2.0
        + x2 / x * (1.0 / 6.0 - x2 * (1.0 / 30.0 - x2 * (1.0 / 42.0 - x2 / 30.0)))
}

/// Locally weighted scatterplot smoothing
///
/// `x` must be sorted ascending. Each fitted value is a tricube-weighted linear
/// regression over the `ceil(f * n)` nearest neighbours, followed by `iterations`
/// robustness passes with bisquare weights on the residuals.
pub fn lowess(x: &[f64], y: &[f64], f: f64, iterations: usize) -> Vec<f64> {
    let n = x.len();
    if n < 2 {
        return y.to_vec();
    }
    let k = ((f * n as f64).ceil() as usize).clamp(2, n);
    let mut robustness = vec![1.0; n];
    let mut fitted = vec![0.0; n];

    for pass in 0..=iterations {
        for i in 0..n {
            fitted[i] = local_linear(x, y, &robustness, i, k);
        }
        if pass == iterations {
            break;
        }
        let residuals: Vec<f64> = (0..n).map(|i| (y[i] - fitted[i]).abs()).collect();
        let scale = 6.0 * median(&residuals);
        if scale < 1e-12 {
            break;
        }
        for i in 0..n {
            let u = residuals[i] / scale;
            robustness[i] = if u < 1.0 { (1.0 - u * u).powi(2) } else { 0.0 };
        }
    }
    fitted
}

fn local_linear(x: &[f64], y: &[f64], robustness: &[f64], i: usize, k: usize) -> f64 {
    let n = x.len();
    let xi = x[i];
    // Slide a window of k points so it covers the k nearest neighbours of x[i]
    let (mut lo, mut hi) = (i, i);
    while hi - lo + 1 < k {
        if lo == 0 {
            hi += 1;
        } else if hi == n - 1 {
            lo -= 1;
        } else if xi - x[lo - 1] <= x[hi + 1] - xi {
            lo -= 1;
        } else {
            hi += 1;
        }
    }
    let h = (xi - x[lo]).max(x[hi] - xi);

    let mut sw = 0.0;
    let mut sx = 0.0;
    let mut sy = 0.0;
    for j in lo..=hi {
        let d = if h > 0.0 { (x[j] - xi).abs() / h } else { 0.0 };
        let w = if d < 1.0 { (1.0 - d.powi(3)).powi(3) } else { 0.0 } * robustness[j];
        sw += w;
        sx += w * x[j];
        sy += w * y[j];
    }
    if sw <= 0.0 {
        return y[i];
    }
    let xbar = sx / sw;
    let ybar = sy / sw;
    let mut sxx = 0.0;
    let mut sxy = 0.0;
    for j in lo..=hi {
        let d = if h > 0.0 { (x[j] - xi).abs() / h } else { 0.0 };
        let w = if d < 1.0 { (1.0 - d.powi(3)).powi(3) } else { 0.0 } * robustness[j];
        sxx += w * (x[j] - xbar).powi(2);
        sxy += w * (x[j] - xbar) * (y[j] - ybar);
    }
    if sxx > 1e-12 * (h * h).max(1e-300) {
        ybar + sxy / sxx * (xi - xbar)
    } else {
        ybar
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quantile_type7() {
        let x = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(quantile_type7(&x, 0.0), 1.0);
        assert_eq!(quantile_type7(&x, 1.0), 4.0);
        assert!((quantile_type7(&x, 0.5) - 2.5).abs() < 1e-12);
        assert!((quantile_type7(&x, 0.25) - 1.75).abs() < 1e-12);
    }

    #[test]
    fn test_median_and_mad() {
        assert_eq!(median(&[3.0, 1.0, f64::NAN, 2.0]), 2.0);
        assert!((mad(&[1.0, 2.0, 3.0, 4.0, 100.0]) - MAD_CONSTANT).abs() < 1e-12);
    }

    #[test]
    fn test_trimmed_mean() {
        let v = [1.0, 2.0, 3.0, 4.0, 1000.0];
        assert!((trimmed_mean(&v, 0.2) - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_trigamma() {
        // psi'(1) = pi^2 / 6
        let expected = std::f64::consts::PI.powi(2) / 6.0;
        assert!((trigamma(1.0) - expected).abs() < 1e-8);
        assert!((trigamma(0.5) - std::f64::consts::PI.powi(2) / 2.0).abs() < 1e-8);
    }

    #[test]
    fn test_lowess_linear_data() {
        let x: Vec<f64> = (0..20).map(|i| i as f64).collect();
        let y: Vec<f64> = x.iter().map(|&v| 2.0 * v + 1.0).collect();
        let fit = lowess(&x, &y, 0.3, 3);
        for (f, t) in fit.iter().zip(y.iter()) {
            assert!((f - t).abs() < 1e-8);
        }
    }

    #[test]
    fn test_lowess_resists_outlier() {
        let x: Vec<f64> = (0..30).map(|i| i as f64).collect();
        let mut y: Vec<f64> = x
            .iter()
            .enumerate()
            .map(|(i, &v)| 0.1 * v + if i % 2 == 0 { 1.0 } else { -1.0 })
            .collect();
        y[15] = 100.0;
        let fit = lowess(&x, &y, 0.5, 3);
        assert!((fit[15] - 1.5).abs() < 1.0);
    }
}
