//! Clustering oracle used to split the training set at each tree node.
//!
//! The tree builder only depends on [`ClusteringOracle`]; [`MiniBatchKMeans`] is
//! the default implementation.

use std::collections::HashSet;
use std::iter::Cycle;

use ndarray::{Array2, ArrayView1, ArrayView2, Axis};
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::seq::{index, SliceRandom};
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::distance::squared_euclidean_distance;
use crate::error::{CbirError, Result};

/// Output of a clustering step: `k` centroids (one per row) and the cluster of every input vector.
#[derive(Debug, Clone)]
pub struct Clustering {
    pub centroids: Array2<f32>,
    pub assignments: Vec<usize>,
}

impl Clustering {
    /// Number of clusters.
    pub fn k(&self) -> usize {
        self.centroids.nrows()
    }

    /// Row indices of the input vectors assigned to each cluster, in cluster order.
    pub fn groups(&self) -> Vec<Vec<usize>> {
        let mut groups = vec![Vec::new(); self.k()];
        for (i, &c) in self.assignments.iter().enumerate() {
            groups[c].push(i);
        }
        groups
    }
}

/// Partitions a set of vectors into `k` groups.
///
/// Implementations must return exactly `k` centroids and an assignment in `[0, k)` for every
/// input row, or [`CbirError::InsufficientData`] when the input cannot support `k` clusters.
pub trait ClusteringOracle {
    fn cluster(&mut self, vectors: ArrayView2<f32>, k: usize) -> Result<Clustering>;
}

/// Centroid initialization method for k-means.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitializationMethod {
    /// Choose centers randomly from the data set.
    Random,
    /// Choose centers randomly from the data set weighted by distance to other centers.
    KMeansPlusPlus,
}

/// Parameters for mini-batch k-means.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KMeansParams {
    /// Maximum number of mini-batches before exiting, even if the centers have not converged.
    pub iters: usize,
    /// Number of candidate initializations; the one with the lowest inertia wins.
    pub init_iters: usize,
    /// Number of sample vectors per mini-batch.
    pub batch_size: usize,
    /// Converged once every centroid moves less than this between two batches.
    pub epsilon: f64,
    pub initialization: InitializationMethod,
    /// Seed for reproducible trees. `None` draws from entropy.
    pub seed: Option<u64>,
}

impl Default for KMeansParams {
    fn default() -> Self {
        Self {
            iters: 100,
            init_iters: 3,
            batch_size: 1024,
            epsilon: 1e-4,
            initialization: InitializationMethod::KMeansPlusPlus,
            seed: None,
        }
    }
}

/// Mini-batch k-means: centroids are updated from random batches with a per-centroid
/// learning rate of `1 / count`, then every vector is assigned to its nearest centroid.
#[derive(Debug)]
pub struct MiniBatchKMeans {
    params: KMeansParams,
    rng: StdRng,
}

impl MiniBatchKMeans {
    pub fn new(params: KMeansParams) -> Self {
        let rng = match params.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { params, rng }
    }

    pub fn with_seed(seed: u64) -> Self {
        Self::new(KMeansParams {
            seed: Some(seed),
            ..KMeansParams::default()
        })
    }

    pub fn params(&self) -> &KMeansParams {
        &self.params
    }

    fn initialize_centroids(&mut self, vectors: ArrayView2<f32>, k: usize) -> Result<Array2<f32>> {
        let n = vectors.nrows();
        let sample = index::sample(&mut self.rng, n, self.params.batch_size.clamp(k, n)).into_vec();
        let mut training = vectors.select(Axis(0), &sample);
        if count_distinct_rows(training.view(), k) < k {
            training = vectors.to_owned();
        }

        let mut best: Option<(Array2<f32>, f64)> = None;
        for _ in 0..self.params.init_iters.max(1) {
            let centroids = match self.params.initialization {
                InitializationMethod::Random => {
                    let picked = index::sample(&mut self.rng, n, k).into_vec();
                    vectors.select(Axis(0), &picked)
                }
                InitializationMethod::KMeansPlusPlus => {
                    kmeans_plus_plus(training.view(), k, &mut self.rng)?
                }
            };
            let inertia = compute_assignments(training.view(), centroids.view())
                .into_iter()
                .map(|(_, d)| d as f64)
                .sum::<f64>();
            if best.as_ref().map_or(true, |(_, b)| inertia < *b) {
                best = Some((centroids, inertia));
            }
        }
        best.map(|(c, _)| c)
            .ok_or_else(|| CbirError::Clustering("no initialization produced".to_string()))
    }
}

impl ClusteringOracle for MiniBatchKMeans {
    fn cluster(&mut self, vectors: ArrayView2<f32>, k: usize) -> Result<Clustering> {
        if k == 0 {
            return Err(CbirError::InvalidParams {
                reason: "k must be greater than 0".to_string(),
            });
        }
        let distinct = count_distinct_rows(vectors, k);
        if distinct < k {
            return Err(CbirError::InsufficientData {
                available: distinct,
                required: k,
            });
        }

        let mut centroids = self.initialize_centroids(vectors, k)?;
        let mut counts = vec![0.0f32; k];
        let batches = BatchIter::new(vectors.nrows(), self.params.batch_size, &mut self.rng);
        let mut converged = false;
        for batch in batches.take(self.params.iters) {
            let batch_vectors = vectors.select(Axis(0), &batch);
            let assignments = compute_assignments(batch_vectors.view(), centroids.view());
            let mut new_centroids = centroids.clone();
            for (vector, (cluster, _)) in batch_vectors.outer_iter().zip(assignments) {
                counts[cluster] += 1.0;
                let eta = 1.0 / counts[cluster];
                let mut centroid = new_centroids.row_mut(cluster);
                centroid.zip_mut_with(&vector, |c, v| *c += (*v - *c) * eta);
            }

            let shift = centroids
                .outer_iter()
                .zip(new_centroids.outer_iter())
                .map(|(old, new)| squared_euclidean_distance(old, new).sqrt() as f64)
                .fold(0.0, f64::max);
            centroids = new_centroids;
            if shift < self.params.epsilon {
                converged = true;
                break;
            }
        }
        if !converged {
            debug!(k, n = vectors.nrows(), "mini-batch k-means hit max iterations");
        }

        let assignments = compute_assignments(vectors, centroids.view())
            .into_iter()
            .map(|(c, _)| c)
            .collect();
        Ok(Clustering {
            centroids,
            assignments,
        })
    }
}

/// k-means++ seeding: each new center is drawn with probability proportional to its squared
/// distance from the closest center chosen so far.
fn kmeans_plus_plus(training: ArrayView2<f32>, k: usize, rng: &mut impl Rng) -> Result<Array2<f32>> {
    let mut chosen = vec![rng.gen_range(0..training.nrows())];
    let mut nearest: Vec<f32> = training
        .outer_iter()
        .map(|v| squared_euclidean_distance(v, training.row(chosen[0])))
        .collect();
    while chosen.len() < k {
        let next = WeightedIndex::new(nearest.iter().copied())
            .map_err(|e| CbirError::Clustering(e.to_string()))?
            .sample(rng);
        chosen.push(next);
        let center = training.row(next);
        for (d, v) in nearest.iter_mut().zip(training.outer_iter()) {
            *d = d.min(squared_euclidean_distance(v, center));
        }
    }
    Ok(training.select(Axis(0), &chosen))
}

/// For each input vector compute the closest centroid and the squared distance to it.
/// Ties resolve to the lowest centroid index.
pub fn compute_assignments(vectors: ArrayView2<f32>, centroids: ArrayView2<f32>) -> Vec<(usize, f32)> {
    (0..vectors.nrows())
        .into_par_iter()
        .map(|i| nearest_centroid(vectors.row(i), centroids))
        .collect()
}

fn nearest_centroid(v: ArrayView1<f32>, centroids: ArrayView2<f32>) -> (usize, f32) {
    centroids
        .outer_iter()
        .map(|c| squared_euclidean_distance(v, c))
        .enumerate()
        .fold((0, f32::INFINITY), |best, (i, d)| if d < best.1 { (i, d) } else { best })
}

/// Number of distinct rows, counting no further than `limit`. `-0.0` and `0.0` are the same.
fn count_distinct_rows(vectors: ArrayView2<f32>, limit: usize) -> usize {
    let mut seen = HashSet::new();
    for row in vectors.outer_iter() {
        seen.insert(row.iter().map(|x| (x + 0.0).to_bits()).collect::<Vec<u32>>());
        if seen.len() >= limit {
            break;
        }
    }
    seen.len()
}

struct BatchIter {
    indices_iter: Cycle<std::vec::IntoIter<usize>>,
    batch_size: usize,
}

impl BatchIter {
    fn new(len: usize, batch_size: usize, rng: &mut impl Rng) -> Self {
        let mut shuffled_indices = (0..len).collect::<Vec<_>>();
        shuffled_indices.shuffle(rng);
        Self {
            indices_iter: shuffled_indices.into_iter().cycle(),
            batch_size: batch_size.clamp(1, len.max(1)),
        }
    }
}

impl Iterator for BatchIter {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Self::Item> {
        let batch: Vec<usize> = self.indices_iter.by_ref().take(self.batch_size).collect();
        if batch.is_empty() {
            None
        } else {
            Some(batch)
        }
    }
}
