//! Small dense linear algebra on row-major `Vec<f64>` matrices
//!
//! The per-gene systems are p x p with p the number of model coefficients
//! (usually 2 to 5), so a plain Cholesky factorization is all that is needed.

use ndarray::Array2;

/// X' diag(w) X for a design matrix X (samples x coefficients)
pub fn xtwx(design: &Array2<f64>, weights: &[f64]) -> Vec<f64> {
    let p = design.ncols();
    let mut out = vec![0.0; p * p];
    for (i, &w) in weights.iter().enumerate().take(design.nrows()) {
        for j in 0..p {
            let xij = design[[i, j]];
            if xij == 0.0 {
                continue;
            }
            for k in 0..p {
                out[j * p + k] += w * xij * design[[i, k]];
            }
        }
    }
    out
}

/// Lower-triangular Cholesky factor. Returns `None` if `a` is not positive definite.
pub fn cholesky(a: &[f64], n: usize) -> Option<Vec<f64>> {
    let mut l = vec![0.0; n * n];
    for i in 0..n {
        for j in 0..=i {
            let mut sum = a[i * n + j];
            for k in 0..j {
                sum -= l[i * n + k] * l[j * n + k];
            }
            if i == j {
                if sum <= 0.0 || !sum.is_finite() {
                    return None;
                }
                l[i * n + j] = sum.sqrt();
            } else {
                l[i * n + j] = sum / l[j * n + j];
            }
        }
    }
    Some(l)
}

fn solve_with_factor(l: &[f64], b: &[f64], n: usize) -> Vec<f64> {
    let mut y = vec![0.0; n];
    for i in 0..n {
        let mut sum = b[i];
        for j in 0..i {
            sum -= l[i * n + j] * y[j];
        }
        y[i] = sum / l[i * n + i];
    }

    let mut x = vec![0.0; n];
    for i in (0..n).rev() {
        let mut sum = y[i];
        for j in (i + 1)..n {
            sum -= l[j * n + i] * x[j];
        }
        x[i] = sum / l[i * n + i];
    }
    x
}

/// Solve `a x = b` for symmetric positive definite `a`
pub fn solve_spd(a: &[f64], b: &[f64], n: usize) -> Option<Vec<f64>> {
    cholesky(a, n).map(|l| solve_with_factor(&l, b, n))
}

/// Inverse of a symmetric positive definite matrix
pub fn invert_spd(a: &[f64], n: usize) -> Option<Vec<f64>> {
    let l = cholesky(a, n)?;
    let mut inv = vec![0.0; n * n];
    let mut e = vec![0.0; n];
    for col in 0..n {
        e.iter_mut().for_each(|v| *v = 0.0);
        e[col] = 1.0;
        let x = solve_with_factor(&l, &e, n);
        for row in 0..n {
            inv[row * n + col] = x[row];
        }
    }
    Some(inv)
}

/// ln det(a) for symmetric positive definite `a`
pub fn log_det_spd(a: &[f64], n: usize) -> Option<f64> {
    cholesky(a, n).map(|l| (0..n).map(|i| 2.0 * l[i * n + i].ln()).sum())
}

/// Product of two n x n matrices
pub fn matmul(a: &[f64], b: &[f64], n: usize) -> Vec<f64> {
    let mut out = vec![0.0; n * n];
    for i in 0..n {
        for k in 0..n {
            let aik = a[i * n + k];
            if aik == 0.0 {
                continue;
            }
            for j in 0..n {
                out[i * n + j] += aik * b[k * n + j];
            }
        }
    }
    out
}

/// Numerical rank via Gram-Schmidt on the columns
pub fn column_rank(m: &Array2<f64>) -> usize {
    let (n, p) = m.dim();
    let mut basis: Vec<Vec<f64>> = Vec::with_capacity(p);
    for j in 0..p {
        let mut v: Vec<f64> = m.column(j).to_vec();
        let scale = v.iter().map(|x| x * x).sum::<f64>().sqrt();
        for q in &basis {
            let dot: f64 = (0..n).map(|i| q[i] * v[i]).sum();
            for i in 0..n {
                v[i] -= dot * q[i];
            }
        }
        let norm = v.iter().map(|x| x * x).sum::<f64>().sqrt();
        if norm > 1e-10 * scale.max(1.0) {
            basis.push(v.into_iter().map(|x| x / norm).collect());
        }
    }
    basis.len()
}
