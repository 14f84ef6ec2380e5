//! Benchmarks for corpus ranking

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ndarray::Array2;
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use vocabtree::{
    index_corpus, Encoder, InMemoryFeatureProvider, KMeansParams, Retriever,
    RouteMode, TreeBuilder, TreeParams,
};

fn create_random_features(n: usize, dim: usize) -> Array2<f32> {
    Array2::random((n, dim), Uniform::new(0.0f32, 1.0))
}

fn benchmark_retrieve(c: &mut Criterion) {
    let mut group = c.benchmark_group("retrieve");

    let training = create_random_features(5000, 32);
    let kmeans = KMeansParams {
        iters: 20,
        seed: Some(7),
        ..KMeansParams::default()
    };
    let base = TreeBuilder::with_kmeans(TreeParams::new(8, 3), kmeans)
        .fit(training.view())
        .unwrap();

    for size in [50, 200, 1000].iter() {
        let mut provider = InMemoryFeatureProvider::new();
        for i in 0..*size {
            provider.insert(format!("img{}", i), create_random_features(100, 32));
        }
        provider.insert("query", create_random_features(100, 32));
        let corpus: Vec<String> = (0..*size).map(|i| format!("img{}", i)).collect();

        let mut tree = base.clone();
        index_corpus(&mut tree, &provider, &corpus).unwrap();
        let query = "query".to_string();

        for weighted in [false, true] {
            let retriever = Retriever::new(Encoder::new(weighted), RouteMode::Path).with_limit(10);
            let id = format!("{}/{}", size, if weighted { "weighted" } else { "plain" });
            group.bench_with_input(BenchmarkId::from_parameter(id), size, |b, _| {
                b.iter(|| {
                    retriever
                        .retrieve(&tree, &provider, black_box(&query), &corpus)
                        .unwrap()
                });
            });
        }
    }

    group.finish();
}

criterion_group!(benches, benchmark_retrieve);
criterion_main!(benches);
