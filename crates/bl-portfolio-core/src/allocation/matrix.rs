//! Dense `Decimal` linear algebra over `Vec<Vec<Decimal>>`.
//!
//! Ticker universes are capped at a hundred names, so cubic Gauss-Jordan
//! elimination in 128-bit decimal is fast enough and keeps every entry exact
//! to 28 significant digits.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::error::PortfolioError;
use crate::metrics::returns::sqrt_decimal;
use crate::PortfolioResult;

pub type Matrix = Vec<Vec<Decimal>>;

/// Pivots smaller than this are treated as zero.
pub const PIVOT_TOLERANCE: Decimal = dec!(0.0000000001);

pub fn identity(n: usize) -> Matrix {
    let mut m = vec![vec![Decimal::ZERO; n]; n];
    for (i, row) in m.iter_mut().enumerate() {
        row[i] = Decimal::ONE;
    }
    m
}

/// Dot product of two vectors.
pub fn vec_dot(a: &[Decimal], b: &[Decimal]) -> Decimal {
    a.iter().zip(b.iter()).map(|(x, y)| *x * *y).sum()
}

/// Matrix-vector multiplication: result_i = sum_j mat[i][j] * v[j].
pub fn mat_vec_multiply(mat: &[Vec<Decimal>], v: &[Decimal]) -> Vec<Decimal> {
    mat.iter().map(|row| vec_dot(row, v)).collect()
}

/// C = A * B.
#[allow(clippy::needless_range_loop)]
pub fn mat_multiply(a: &[Vec<Decimal>], b: &[Vec<Decimal>]) -> Matrix {
    let m = a.len();
    let inner = if m > 0 { a[0].len() } else { 0 };
    let n_cols = if !b.is_empty() { b[0].len() } else { 0 };
    let mut c = vec![vec![Decimal::ZERO; n_cols]; m];
    for i in 0..m {
        for j in 0..n_cols {
            let mut sum = Decimal::ZERO;
            for k in 0..inner {
                sum += a[i][k] * b[k][j];
            }
            c[i][j] = sum;
        }
    }
    c
}

/// C = A * B'.
pub fn mat_multiply_transpose_right(a: &[Vec<Decimal>], b: &[Vec<Decimal>]) -> Matrix {
    a.iter()
        .map(|row_a| b.iter().map(|row_b| vec_dot(row_a, row_b)).collect())
        .collect()
}

pub fn mat_transpose(mat: &[Vec<Decimal>]) -> Matrix {
    if mat.is_empty() {
        return Vec::new();
    }
    let n = mat[0].len();
    (0..n)
        .map(|j| mat.iter().map(|row| row[j]).collect())
        .collect()
}

/// Element-wise C = A + B.
pub fn mat_add(a: &[Vec<Decimal>], b: &[Vec<Decimal>]) -> Matrix {
    a.iter()
        .zip(b.iter())
        .map(|(row_a, row_b)| {
            row_a
                .iter()
                .zip(row_b.iter())
                .map(|(x, y)| *x + *y)
                .collect()
        })
        .collect()
}

pub fn mat_scale(mat: &[Vec<Decimal>], s: Decimal) -> Matrix {
    mat.iter()
        .map(|row| row.iter().map(|v| *v * s).collect())
        .collect()
}

/// Inverse via Gauss-Jordan with partial pivoting.
///
/// `context` names the matrix in the error raised when it is singular.
#[allow(clippy::needless_range_loop)]
pub fn mat_inverse(mat: &[Vec<Decimal>], context: &str) -> PortfolioResult<Matrix> {
    let n = mat.len();
    if n == 0 {
        return Ok(Vec::new());
    }
    if mat.iter().any(|row| row.len() != n) {
        return Err(PortfolioError::invalid(
            context,
            format!("matrix must be square, got {} rows of unequal width", n),
        ));
    }

    let mut aug: Matrix = Vec::with_capacity(n);
    for i in 0..n {
        let mut row = Vec::with_capacity(2 * n);
        row.extend_from_slice(&mat[i]);
        for j in 0..n {
            row.push(if i == j { Decimal::ONE } else { Decimal::ZERO });
        }
        aug.push(row);
    }

    for col in 0..n {
        let mut max_row = col;
        let mut max_val = aug[col][col].abs();
        for row in (col + 1)..n {
            let val = aug[row][col].abs();
            if val > max_val {
                max_val = val;
                max_row = row;
            }
        }

        if max_val < PIVOT_TOLERANCE {
            return Err(PortfolioError::singular(context));
        }

        if max_row != col {
            aug.swap(col, max_row);
        }

        let pivot = aug[col][col];
        for cell in aug[col].iter_mut() {
            *cell /= pivot;
        }

        let pivot_row = aug[col].clone();
        for row in 0..n {
            if row == col {
                continue;
            }
            let factor = aug[row][col];
            if factor.is_zero() {
                continue;
            }
            for (cell, &pv) in aug[row].iter_mut().zip(pivot_row.iter()) {
                *cell -= factor * pv;
            }
        }
    }

    Ok(aug.iter().map(|row| row[n..].to_vec()).collect())
}

/// Inverse of a diagonal matrix.
pub fn mat_inverse_diagonal(mat: &[Vec<Decimal>]) -> PortfolioResult<Matrix> {
    let n = mat.len();
    let mut inv = vec![vec![Decimal::ZERO; n]; n];
    for i in 0..n {
        if mat[i][i].is_zero() {
            return Err(PortfolioError::DivisionByZero {
                context: format!("diagonal element [{},{}] is zero", i, i),
            });
        }
        inv[i][i] = Decimal::ONE / mat[i][i];
    }
    Ok(inv)
}

/// w' * Sigma * w.
pub fn quadratic_form(w: &[Decimal], sigma: &[Vec<Decimal>]) -> Decimal {
    vec_dot(w, &mat_vec_multiply(sigma, w))
}

/// Portfolio standard deviation: sqrt(w' * Sigma * w).
pub fn portfolio_std(w: &[Decimal], sigma: &[Vec<Decimal>]) -> Decimal {
    sqrt_decimal(quadratic_form(w, sigma))
}
