//! Integration tests for building, indexing and querying a vocabulary tree

use std::fs;

use approx::assert_relative_eq;
use ndarray::{array, Array2, ArrayView2, Axis};
use tempfile::TempDir;
use vocabtree::distance::mean_vector;
use vocabtree::{
    index_corpus, score_images, Cbir, CbirConfig, CbirError, Clustering, ClusteringOracle,
    DirectoryFeatureProvider, Encoder, FeatureProvider, InMemoryFeatureProvider, KMeansParams,
    Result, Retriever, RouteMode, TreeBuilder, TreeParams, VocabularyTree,
};

/// Splits rows into a first and second half, in input order.
struct HalvingOracle;

impl ClusteringOracle for HalvingOracle {
    fn cluster(&mut self, vectors: ArrayView2<f32>, k: usize) -> Result<Clustering> {
        assert_eq!(k, 2);
        let n = vectors.nrows();
        let assignments: Vec<usize> = (0..n).map(|i| usize::from(i >= n / 2)).collect();
        let mut centroids = Array2::zeros((2, vectors.ncols()));
        for c in 0..2 {
            let rows: Vec<usize> = (0..n).filter(|&i| assignments[i] == c).collect();
            centroids
                .row_mut(c)
                .assign(&mean_vector(vectors.select(Axis(0), &rows).view())?);
        }
        Ok(Clustering { centroids, assignments })
    }
}

/// 0 -> [1 (-10), 4 (10)], 1 -> [2 (-11), 3 (-9)], 4 -> [5 (9), 6 (11)]
fn line_tree() -> VocabularyTree {
    let features = array![[-11.0f32], [-11.0], [-9.0], [-9.0], [9.0], [9.0], [11.0], [11.0]];
    TreeBuilder::new(TreeParams::new(2, 2), HalvingOracle)
        .fit(features.view())
        .unwrap()
}

#[test]
fn test_two_by_two_tree() {
    let tree = line_tree();

    assert_eq!(tree.len(), 7);
    assert_eq!(tree.root().children(), &[1, 4]);
    assert_eq!(tree.node(1).unwrap().children(), &[2, 3]);
    assert_eq!(tree.node(4).unwrap().children(), &[5, 6]);
    assert_eq!(tree.leaves().count(), 4);
    assert!(tree.leaves().all(|leaf| leaf.depth() == 2));
    assert_eq!(tree.node(1).unwrap().centroid()[0], -10.0);
    assert_eq!(tree.node(6).unwrap().centroid()[0], 11.0);
}

#[test]
fn test_three_image_weights() {
    let mut tree = line_tree();
    let mut provider = InMemoryFeatureProvider::new();
    provider.insert("a", array![[-11.0f32]]);
    provider.insert("b", array![[-9.0f32]]);
    provider.insert("c", array![[9.0f32]]);

    let report = index_corpus(&mut tree, &provider, &provider.all_images()).unwrap();
    assert!(report.is_complete());
    assert!(report.weights_updated);

    assert_eq!(tree.visited_nodes("a"), vec![0, 1, 2]);
    assert_eq!(tree.visited_nodes("b"), vec![0, 1, 3]);
    assert_eq!(tree.visited_nodes("c"), vec![0, 4, 5]);

    assert_relative_eq!(tree.root().weight(), 0.0, epsilon = 1e-12);
    assert_relative_eq!(tree.node(1).unwrap().weight(), 1.5f64.ln(), epsilon = 1e-12);
    assert_relative_eq!(tree.node(2).unwrap().weight(), 3.0f64.ln(), epsilon = 1e-12);
    assert_relative_eq!(tree.node(4).unwrap().weight(), 3.0f64.ln(), epsilon = 1e-12);
}

#[test]
fn test_retrieve_identical_query_ranks_first() {
    let mut provider = InMemoryFeatureProvider::new();
    provider.insert("a", array![[-11.0f32], [-9.0], [-9.5]]);
    provider.insert("b", array![[9.0f32], [11.0], [10.5]]);
    provider.insert("query", array![[-11.0f32], [-9.0], [-9.5]]);

    let mut tree = line_tree();
    let corpus = vec!["a".to_string(), "b".to_string()];
    index_corpus(&mut tree, &provider, &corpus).unwrap();

    let results = Retriever::default()
        .retrieve(&tree, &provider, &"query".to_string(), &corpus)
        .unwrap();

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].image_id, "a");
    assert_relative_eq!(results[0].score, 0.0, epsilon = 1e-9);
    assert_eq!(results[1].image_id, "b");
    assert!(results[1].score > results[0].score);
    // transient queries leave the index alone
    assert_eq!(tree.indexed_image_count(), 2);
}

#[test]
fn test_weighted_and_unweighted_scores() {
    let mut provider = InMemoryFeatureProvider::new();
    provider.insert("a", array![[-11.0f32], [9.0]]);
    provider.insert("b", array![[-9.0f32], [9.0]]);
    provider.insert("c", array![[11.0f32]]);

    let mut tree = line_tree();
    index_corpus(&mut tree, &provider, &provider.all_images()).unwrap();

    let plain = score_images(&tree, Encoder::new(false), "a", "b").unwrap();
    let weighted = score_images(&tree, Encoder::new(true), "a", "b").unwrap();
    assert!(plain > 0.0 && plain < 2.0);
    assert!(weighted > 0.0 && weighted <= 2.0);
    assert_relative_eq!(
        score_images(&tree, Encoder::new(true), "a", "a").unwrap(),
        0.0,
        epsilon = 1e-9
    );
    assert!(matches!(
        score_images(&tree, Encoder::new(false), "a", "missing"),
        Err(CbirError::UnindexedImage { .. })
    ));
}

#[test]
fn test_inspected_route_mode_records_siblings() {
    let mut tree = line_tree();
    let mut provider = InMemoryFeatureProvider::new();
    provider.insert("a", array![[-11.0f32]]);

    let report = vocabtree::Indexer::new(RouteMode::Inspected)
        .index(&mut tree, &provider, &provider.all_images())
        .unwrap();
    assert_eq!(report.indexed, vec!["a".to_string()]);
    assert_eq!(tree.visited_nodes("a"), vec![0, 1, 2, 3, 4]);
}

#[test]
fn test_directory_corpus_end_to_end() {
    let dir = TempDir::new().unwrap();
    let images = [
        ("beach", "0.0,0.1\n0.2,0.0\n0.1,0.1\n0.3,0.2\n"),
        ("forest", "5.0,5.1\n5.2,4.9\n4.8,5.0\n5.1,5.3\n"),
        ("desert", "0.1,5.0\n0.0,5.2\n0.2,4.8\n"),
        ("broken", "1.0,abc\n"),
    ];
    for (name, body) in images {
        fs::write(dir.path().join(format!("{name}.csv")), body).unwrap();
    }

    let provider = DirectoryFeatureProvider::open(dir.path()).unwrap();
    let mut config = CbirConfig::new(2, 2);
    config.kmeans = KMeansParams {
        seed: Some(7),
        ..KMeansParams::default()
    };
    let (mut cbir, report) = Cbir::initialise(provider, config).unwrap();

    assert_eq!(report.indexed.len(), 3);
    assert_eq!(report.failures.len(), 1);
    assert!(!report.is_complete());
    assert!(matches!(
        report.failures[0].error,
        CbirError::FeatureExtraction { .. }
    ));

    let query = cbir.provider().image_path("forest.csv");
    let results = cbir.retrieve(&query, None).unwrap();
    assert_eq!(results.len(), 3);
    assert_relative_eq!(results[0].score, 0.0, epsilon = 1e-9);
    let forest = results.iter().find(|r| r.image_id == "forest").unwrap();
    assert_relative_eq!(forest.score, 0.0, epsilon = 1e-9);
    assert!(results.windows(2).all(|w| w[0].score <= w[1].score));

    let beach = cbir.provider().image_path("beach.csv");
    assert_relative_eq!(cbir.score(&beach, &beach).unwrap(), 0.0, epsilon = 1e-9);
    assert!(cbir.score(&beach, &query).unwrap() > 0.0);
}
