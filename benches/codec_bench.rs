use criterion::{black_box, criterion_group, criterion_main, Criterion};
use fmodpack::io_stream::BundleWriter;
use fmodpack::{decode_text, encode_text, CharTable, Classifier, IndexWidth, LabelGenerator, LabelPolicy};

fn sample_text() -> String {
    "function greet(name) { return `Hello, ${name}! Ünïcödé ✓`; }\n".repeat(16 * 1024)
}

fn seeded() -> LabelGenerator {
    LabelGenerator::with_seed(LabelPolicy::default(), 1).unwrap()
}

fn bench_codec(c: &mut Criterion) {
    let text = sample_text();

    c.bench_function("encode_1mb_text", |b| {
        b.iter(|| {
            let mut table = CharTable::new(IndexWidth::U16);
            encode_text(black_box(&text), &mut table, &mut seeded()).unwrap()
        })
    });

    let mut table = CharTable::new(IndexWidth::U16);
    let payload = encode_text(&text, &mut table, &mut seeded()).unwrap();
    c.bench_function("decode_1mb_text", |b| {
        b.iter(|| decode_text(black_box(&payload), &table).unwrap())
    });
}

fn bench_batch(c: &mut Criterion) {
    let files: Vec<(String, Vec<u8>)> = (0..64)
        .map(|i| (format!("src/file_{i}.js"), sample_text().chars().take(32 * 1024).collect::<String>().into_bytes()))
        .collect();

    c.bench_function("add_batch_64_files", |b| {
        b.iter(|| {
            let mut w = BundleWriter::with_options(
                Vec::new(), Classifier::default(), IndexWidth::U16, seeded(),
            );
            w.add_batch(black_box(&files)).unwrap();
            w.finish().unwrap()
        })
    });
}

criterion_group!(benches, bench_codec, bench_batch);
criterion_main!(benches);
