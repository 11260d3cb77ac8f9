//! Weight initializers
//!
//! Matrices are returned row-major as `rows x cols`, where `cols` is the fan-in of the
//! layer (one row per output unit).

use rand::Rng;
use rand_distr::{Distribution, StandardNormal};

/// Strategy used to draw the initial weights of a layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Initializer {
    /// Uniform in `[-limit, limit]` with `limit = sqrt(6 / (fan_in + fan_out))`
    GlorotUniform,
    /// A random matrix with orthonormal rows or columns (whichever is shorter)
    Orthogonal,
}

impl Initializer {
    pub fn matrix<R: Rng + ?Sized>(&self, rows: usize, cols: usize, rng: &mut R) -> Vec<Vec<f32>> {
        match self {
            Initializer::GlorotUniform => glorot_uniform(rows, cols, rng),
            Initializer::Orthogonal => orthogonal(rows, cols, rng),
        }
    }
}

fn glorot_uniform<R: Rng + ?Sized>(rows: usize, cols: usize, rng: &mut R) -> Vec<Vec<f32>> {
    let limit = (6.0 / (rows + cols) as f32).sqrt();
    (0..rows)
        .map(|_| (0..cols).map(|_| rng.random_range(-limit..=limit)).collect())
        .collect()
}

/// Gram-Schmidt over the columns of a gaussian matrix. When there are fewer rows than
/// columns the tall transpose is orthogonalized instead, giving orthonormal rows.
fn orthogonal<R: Rng + ?Sized>(rows: usize, cols: usize, rng: &mut R) -> Vec<Vec<f32>> {
    let (m, n, transpose) = if rows >= cols {
        (rows, cols, false)
    } else {
        (cols, rows, true)
    };

    // column-major: q[j] is column j of the m x n matrix
    let mut q: Vec<Vec<f32>> = Vec::with_capacity(n);
    for _ in 0..n {
        let mut v: Vec<f32> = (0..m).map(|_| StandardNormal.sample(rng)).collect();
        for basis in &q {
            let dot: f32 = basis.iter().zip(&v).map(|(b, x)| b * x).sum();
            for (x, b) in v.iter_mut().zip(basis) {
                *x -= dot * b;
            }
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt().max(1e-6);
        v.iter_mut().for_each(|x| *x /= norm);
        q.push(v);
    }

    if transpose {
        // q holds `rows` columns of length `cols`, which are exactly the rows we want
        q
    } else {
        (0..rows)
            .map(|i| (0..cols).map(|j| q[j][i]).collect())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_pcg::Pcg64Mcg;

    use super::*;
    use crate::assert_eq_float;

    fn dot(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[test]
    fn test_glorot_uniform_bounds() {
        let mut rng = Pcg64Mcg::seed_from_u64(0);
        let m = Initializer::GlorotUniform.matrix(8, 4, &mut rng);
        let limit = (6.0f32 / 12.0).sqrt();
        assert_eq!(m.len(), 8);
        assert!(m.iter().all(|row| row.len() == 4));
        assert!(m.iter().flatten().all(|w| w.abs() <= limit));
    }

    #[test]
    fn test_orthogonal_tall_has_orthonormal_columns() {
        let mut rng = Pcg64Mcg::seed_from_u64(1);
        let m = Initializer::Orthogonal.matrix(12, 3, &mut rng);
        assert_eq!(m.len(), 12);
        let column = |j: usize| m.iter().map(|row| row[j]).collect::<Vec<_>>();
        for i in 0..3 {
            for j in 0..3 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert_eq_float!(dot(&column(i), &column(j)), expected, 1e-4);
            }
        }
    }

    #[test]
    fn test_orthogonal_wide_has_orthonormal_rows() {
        let mut rng = Pcg64Mcg::seed_from_u64(2);
        let m = Initializer::Orthogonal.matrix(3, 12, &mut rng);
        assert_eq!(m.len(), 3);
        assert!(m.iter().all(|row| row.len() == 12));
        for i in 0..3 {
            for j in 0..3 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert_eq_float!(dot(&m[i], &m[j]), expected, 1e-4);
            }
        }
    }

    #[test]
    fn test_seeded_is_reproducible() {
        let a = Initializer::Orthogonal.matrix(4, 4, &mut Pcg64Mcg::seed_from_u64(7));
        let b = Initializer::Orthogonal.matrix(4, 4, &mut Pcg64Mcg::seed_from_u64(7));
        assert_eq!(a, b);
    }
}
