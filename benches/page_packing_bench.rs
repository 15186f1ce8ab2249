use criterion::{Criterion, criterion_group, criterion_main};
use serde_json::json;
use std::hint::black_box;

use sqlmcp::query::{Admission, ResponseBudget, Row, encoded_row_size};

fn sample_rows(count: usize) -> Vec<Row> {
    (0..count)
        .map(|i| {
            let mut row = Row::new();
            row.insert("id".into(), json!(i));
            row.insert("name".into(), json!(format!("customer-{i}")));
            row.insert("balance".into(), json!(i as f64 * 1.25));
            row.insert("note".into(), json!("x".repeat(i % 64)));
            row
        })
        .collect()
}

fn benchmark_row_sizing(c: &mut Criterion) {
    let rows = sample_rows(1_000);

    c.bench_function("encoded_row_size_1000_rows", |b| {
        b.iter(|| {
            for row in &rows {
                black_box(encoded_row_size(row).ok());
            }
        })
    });
}

fn benchmark_page_split(c: &mut Criterion) {
    let sizes: Vec<usize> = sample_rows(10_000)
        .iter()
        .filter_map(|row| encoded_row_size(row).ok())
        .collect();
    let budget = ResponseBudget::new(10_240);

    c.bench_function("split_10000_rows_into_pages", |b| {
        b.iter(|| {
            let mut pages = 0usize;
            let mut packer = budget.start_page();
            for &size in &sizes {
                if packer.offer(size) == Admission::Defer {
                    pages += 1;
                    packer = budget.start_page();
                    packer.offer(size);
                }
            }
            black_box(pages + 1)
        })
    });
}

criterion_group!(benches, benchmark_row_sizing, benchmark_page_split);
criterion_main!(benches);
