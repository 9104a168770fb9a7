use criterion::{Criterion, criterion_group, criterion_main};
use docqa::embeddings::{ChunkingConfig, TextChunker};
use docqa::index::VectorIndex;
use std::hint::black_box;

fn policy_document(sections: usize) -> String {
    (0..sections)
        .map(|i| {
            format!(
                "## Section {i}\n\n\
                 The insurer settles hospital claims within thirty days of receiving the \
                 discharge summary. Pre-existing conditions are covered after a waiting \
                 period of {} months. The insured person must keep every original bill, \
                 prescription and diagnostic report.\n\n\
                 Claims filed after the deadline may be rejected unless the delay was caused \
                 by circumstances outside the insured person's control.",
                12 + i % 36
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn criterion_benchmark(c: &mut Criterion) {
    let document = policy_document(200);
    let chunker = TextChunker::new(ChunkingConfig::default());
    c.bench_function("chunking", |b| {
        b.iter(|| chunker.chunk(black_box(&document), black_box("policy.md")))
    });

    let mut index = VectorIndex::flat(64).expect("can create index");
    let vectors: Vec<Vec<f32>> = (0..2000)
        .map(|i| (0..64).map(|d| ((i * 31 + d * 7) % 97) as f32 / 97.0).collect())
        .collect();
    let texts: Vec<String> = (0..vectors.len()).map(|i| format!("chunk {i}")).collect();
    index
        .add_document_embeddings(&vectors, "bench.txt", "txt", &texts, None)
        .expect("can add vectors");
    let query = vec![0.5_f32; 64];
    c.bench_function("flat_search", |b| {
        b.iter(|| index.similarity_search(black_box(&query), 10, None, None))
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
