//! Dense linear solves by Gaussian elimination with partial pivoting.
//!
//! Used for the thin-plate spline system and for exact per-triangle affine
//! fits. A near-zero pivot does not abort the solve: the corresponding unknown
//! is left at zero and elimination continues with the next column.

/// Pivots with magnitude below this are treated as singular.
pub const PIVOT_EPSILON: f64 = 1e-12;

/// Solution of a linear system.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearSolution {
    /// Unknowns; singular columns are left at zero.
    pub x: Vec<f64>,
    /// Number of columns whose pivot fell below [`PIVOT_EPSILON`].
    pub singular_columns: usize,
}

impl LinearSolution {
    pub fn is_exact(&self) -> bool {
        self.singular_columns == 0
    }
}

/// Solve `A x = b` for a square row-major `A`.
///
/// # Panics
/// Panics if `a` is not `n x n` where `n = b.len()`.
#[allow(clippy::needless_range_loop)]
pub fn solve_linear_system(a: &[Vec<f64>], b: &[f64]) -> LinearSolution {
    let n = b.len();
    assert!(
        a.len() == n && a.iter().all(|row| row.len() == n),
        "solve_linear_system: matrix must be {n}x{n}"
    );

    // Augmented matrix [A | b]
    let mut aug: Vec<Vec<f64>> = a
        .iter()
        .zip(b.iter())
        .map(|(row, &bi)| {
            let mut new_row = Vec::with_capacity(n + 1);
            new_row.extend_from_slice(row);
            new_row.push(bi);
            new_row
        })
        .collect();

    let mut singular = vec![false; n];

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

        if max_val < PIVOT_EPSILON {
            singular[col] = true;
            continue;
        }

        if max_row != col {
            aug.swap(col, max_row);
        }

        for row in (col + 1)..n {
            let factor = aug[row][col] / aug[col][col];
            if factor == 0.0 {
                continue;
            }
            for j in col..=n {
                aug[row][j] -= factor * aug[col][j];
            }
        }
    }

    let mut x = vec![0.0; n];
    for i in (0..n).rev() {
        if singular[i] {
            continue;
        }
        let mut value = aug[i][n];
        for j in (i + 1)..n {
            value -= aug[i][j] * x[j];
        }
        x[i] = value / aug[i][i];
    }

    LinearSolution {
        x,
        singular_columns: singular.iter().filter(|&&s| s).count(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_solve_known_3x3() {
        // 2x + y - z = 8, -3x - y + 2z = -11, -2x + y + 2z = -3 -> (2, 3, -1)
        let a = vec![
            vec![2.0, 1.0, -1.0],
            vec![-3.0, -1.0, 2.0],
            vec![-2.0, 1.0, 2.0],
        ];
        let solution = solve_linear_system(&a, &[8.0, -11.0, -3.0]);
        assert!(solution.is_exact());
        let expected = [2.0, 3.0, -1.0];
        for (got, want) in solution.x.iter().zip(expected) {
            assert!((got - want).abs() < 1e-10, "got {got}, want {want}");
        }
    }

    #[test]
    fn test_zero_leading_entry_needs_pivoting() {
        let a = vec![vec![0.0, 1.0], vec![1.0, 0.0]];
        let solution = solve_linear_system(&a, &[5.0, 7.0]);
        assert!(solution.is_exact());
        assert!((solution.x[0] - 7.0).abs() < 1e-12);
        assert!((solution.x[1] - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_singular_column_left_at_zero() {
        // Second unknown never appears
        let a = vec![vec![2.0, 0.0], vec![0.0, 0.0]];
        let solution = solve_linear_system(&a, &[4.0, 0.0]);
        assert_eq!(solution.singular_columns, 1);
        assert!((solution.x[0] - 2.0).abs() < 1e-12);
        assert_eq!(solution.x[1], 0.0);
    }

    #[test]
    fn test_all_zero_matrix_does_not_produce_nan() {
        let a = vec![vec![0.0; 3]; 3];
        let solution = solve_linear_system(&a, &[1.0, 2.0, 3.0]);
        assert_eq!(solution.singular_columns, 3);
        assert!(solution.x.iter().all(|v| *v == 0.0));
    }
}
