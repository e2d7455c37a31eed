// Vector index and recommendation benchmarks
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::prelude::*;
use std::sync::Arc;
use storefront_core::{Distance, Filter, FilterCondition, IndexConfig, Vector, VectorIndex};
use storefront_recommend::HashingEmbedder;

const DIM: usize = 128;
const CATEGORIES: [&str; 4] = ["Audio", "Photo", "Kitchen", "Books"];

fn random_vector(rng: &mut impl Rng, dim: usize) -> Vector {
    let data: Vec<f32> = (0..dim).map(|_| rng.random_range(-1.0f32..1.0f32)).collect();
    Vector::new(data)
}

fn product_metadata(rng: &mut impl Rng, id: usize) -> serde_json::Value {
    serde_json::json!({
        "product_id": id,
        "category": CATEGORIES[id % CATEGORIES.len()],
        "stock": rng.random_range(0..40),
        "is_active": id % 10 != 0,
    })
}

fn populated_index(size: usize) -> Arc<VectorIndex> {
    let mut rng = rand::rng();
    let index = Arc::new(VectorIndex::new(IndexConfig::new("products", DIM, Distance::Cosine)));
    for i in 0..size {
        let metadata = product_metadata(&mut rng, i);
        index
            .upsert(format!("product:{i}"), random_vector(&mut rng, DIM), Some(metadata))
            .unwrap();
    }
    index
}

fn benchmark_upsert(c: &mut Criterion) {
    let mut group = c.benchmark_group("upsert");

    for size in [100, 1000, 10000].iter() {
        group.bench_with_input(BenchmarkId::new("vector_index", size), size, |b, &size| {
            let mut rng = rand::rng();
            let documents: Vec<_> = (0..size)
                .map(|i| (format!("product:{i}"), random_vector(&mut rng, DIM)))
                .collect();
            b.iter(|| {
                let index = VectorIndex::new(IndexConfig::new("products", DIM, Distance::Cosine));
                for (id, vector) in &documents {
                    index.upsert(id.as_str(), vector.clone(), None).unwrap();
                }
                black_box(index.count())
            });
        });
    }

    group.finish();
}

fn benchmark_query(c: &mut Criterion) {
    let mut group = c.benchmark_group("query");
    let index = populated_index(10_000);
    let mut rng = rand::rng();
    let query = random_vector(&mut rng, DIM);

    for k in [1, 10, 50].iter() {
        group.bench_with_input(BenchmarkId::new("unfiltered", k), k, |b, &k| {
            b.iter(|| black_box(index.query(black_box(&query), k, None).unwrap()));
        });
    }

    let available = FilterCondition::available_products();
    for k in [10, 40].iter() {
        group.bench_with_input(BenchmarkId::new("available_products", k), k, |b, &k| {
            b.iter(|| {
                black_box(
                    index
                        .query(black_box(&query), k, Some(&available as &dyn Filter))
                        .unwrap(),
                )
            });
        });
    }

    group.finish();
}

fn benchmark_embedding(c: &mut Criterion) {
    let embedder = HashingEmbedder::new(DIM);
    let text = "Noise cancelling over-ear headphones with 30 hour battery life";

    c.bench_function("hashing_embedder", |b| {
        b.iter(|| black_box(embedder.embed_sync(black_box(text))));
    });
}

criterion_group!(benches, benchmark_upsert, benchmark_query, benchmark_embedding);
criterion_main!(benches);
