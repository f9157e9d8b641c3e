//! Small dense linear-algebra helpers shared by the affine, homography, and
//! thin-plate-spline solvers: hand-rolled Gaussian elimination with partial
//! pivoting, since pulling in a full dense-solver crate isn't warranted at
//! this scale.

/// Solves `a * x = b` for a square system via Gaussian elimination with
/// partial pivoting. `a` is row-major, `n x n`.
///
/// Returns `None` if the system is singular (or near-singular) to working
/// precision.
#[must_use]
pub fn solve(a: &[Vec<f64>], b: &[f64]) -> Option<Vec<f64>> {
    let n = b.len();
    debug_assert_eq!(a.len(), n);
    let mut m: Vec<Vec<f64>> = a.to_vec();
    let mut rhs = b.to_vec();

    for col in 0..n {
        let mut pivot_row = col;
        let mut pivot_val = m[col][col].abs();
        for row in (col + 1)..n {
            if m[row][col].abs() > pivot_val {
                pivot_val = m[row][col].abs();
                pivot_row = row;
            }
        }
        if pivot_val < 1e-12 {
            return None;
        }
        if pivot_row != col {
            m.swap(col, pivot_row);
            rhs.swap(col, pivot_row);
        }

        for row in (col + 1)..n {
            let factor = m[row][col] / m[col][col];
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                m[row][k] -= factor * m[col][k];
            }
            rhs[row] -= factor * rhs[col];
        }
    }

    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let mut sum = rhs[row];
        for k in (row + 1)..n {
            sum -= m[row][k] * x[k];
        }
        x[row] = sum / m[row][row];
    }
    Some(x)
}

/// Builds the normal-equations system `(Aᵀ A) x = Aᵀ b` for an
/// overdetermined `a * x = b` least-squares problem, then solves it.
#[must_use]
pub fn least_squares(a: &[Vec<f64>], b: &[f64]) -> Option<Vec<f64>> {
    let rows = a.len();
    let cols = a.first().map_or(0, Vec::len);
    if rows < cols {
        return None;
    }

    let mut ata = vec![vec![0.0; cols]; cols];
    let mut atb = vec![0.0; cols];
    for i in 0..cols {
        for j in 0..cols {
            ata[i][j] = (0..rows).map(|r| a[r][i] * a[r][j]).sum();
        }
        atb[i] = (0..rows).map(|r| a[r][i] * b[r]).sum();
    }
    solve(&ata, &atb)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn solves_identity_system() {
        let a = vec![vec![1.0, 0.0], vec![0.0, 1.0]];
        let b = vec![3.0, 4.0];
        let x = solve(&a, &b).unwrap();
        assert_eq!(x, vec![3.0, 4.0]);
    }

    #[test]
    fn least_squares_recovers_exact_line() {
        // y = 2x + 1, sampled exactly: should recover [2, 1] exactly.
        let a = vec![vec![0.0, 1.0], vec![1.0, 1.0], vec![2.0, 1.0], vec![3.0, 1.0]];
        let b = vec![1.0, 3.0, 5.0, 7.0];
        let x = least_squares(&a, &b).unwrap();
        assert!((x[0] - 2.0).abs() < 1e-9);
        assert!((x[1] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn singular_system_returns_none() {
        let a = vec![vec![1.0, 1.0], vec![1.0, 1.0]];
        let b = vec![1.0, 2.0];
        assert!(solve(&a, &b).is_none());
    }
}
