//! Distance and similarity primitives over feature and image vectors

use ndarray::{Array1, ArrayView1, ArrayView2, Axis};

use crate::error::{CbirError, Result};

/// Compute Euclidean (L2) distance between two feature vectors
pub fn euclidean_distance(v1: ArrayView1<f32>, v2: ArrayView1<f32>) -> f32 {
    squared_euclidean_distance(v1, v2).sqrt()
}

/// Compute squared Euclidean distance between two feature vectors
pub fn squared_euclidean_distance(v1: ArrayView1<f32>, v2: ArrayView1<f32>) -> f32 {
    v1.iter()
        .zip(v2.iter())
        .map(|(a, b)| (a - b).powi(2))
        .sum()
}

/// Compute dot product of two image vectors
pub fn dot_product(v1: ArrayView1<f64>, v2: ArrayView1<f64>) -> Result<f64> {
    if v1.len() != v2.len() {
        return Err(CbirError::DimensionMismatch {
            expected: v1.len(),
            actual: v2.len(),
        });
    }
    Ok(v1.dot(&v2))
}

/// Sum of absolute values (L1 norm)
pub fn l1_norm(v: ArrayView1<f64>) -> f64 {
    v.iter().map(|x| x.abs()).sum()
}

/// Per-dimension mean of a set of row vectors.
pub fn mean_vector(vectors: ArrayView2<f32>) -> Result<Array1<f32>> {
    vectors
        .mean_axis(Axis(0))
        .ok_or(CbirError::EmptyTrainingSet)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::{array, Array2};

    #[test]
    fn test_euclidean_distance() {
        let v1 = array![1.0f32, 2.0, 3.0];
        let v2 = array![4.0f32, 5.0, 6.0];
        let dist = euclidean_distance(v1.view(), v2.view());
        assert_relative_eq!(dist, 5.196152, epsilon = 1e-5);
    }

    #[test]
    fn test_euclidean_same_vector() {
        let v = array![1.0f32, 2.0, 3.0];
        assert_relative_eq!(euclidean_distance(v.view(), v.view()), 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_dot_product() {
        let v1 = array![1.0, 2.0, 3.0];
        let v2 = array![4.0, 5.0, 6.0];
        assert_relative_eq!(dot_product(v1.view(), v2.view()).unwrap(), 32.0, epsilon = 1e-9);
    }

    #[test]
    fn test_dot_product_dimension_mismatch() {
        let v1 = array![1.0, 2.0];
        let v2 = array![1.0, 2.0, 3.0];
        assert!(matches!(
            dot_product(v1.view(), v2.view()),
            Err(CbirError::DimensionMismatch { expected: 2, actual: 3 })
        ));
    }

    #[test]
    fn test_l1_norm() {
        let v = array![1.0, -2.0, 3.0];
        assert_relative_eq!(l1_norm(v.view()), 6.0, epsilon = 1e-9);
    }

    #[test]
    fn test_mean_vector_is_per_dimension() {
        let vectors = array![[0.0f32, 10.0], [2.0, 20.0]];
        let mean = mean_vector(vectors.view()).unwrap();
        assert_eq!(mean, array![1.0f32, 15.0]);
    }

    #[test]
    fn test_mean_vector_empty() {
        let vectors = Array2::<f32>::zeros((0, 4));
        assert!(matches!(
            mean_vector(vectors.view()),
            Err(CbirError::EmptyTrainingSet)
        ));
    }
}
