use criterion::{Criterion, criterion_group, criterion_main};
use extractor::normalize::{hash_record, normalize};
use extractor::parser::{RawElement, XmlParser};
use extractor::types::DataType;
use flate2::Compression;
use flate2::write::GzEncoder;
use std::hint::black_box;
use std::io::Write;
use tempfile::NamedTempFile;
use tokio::runtime::Runtime;
use tokio::sync::mpsc;

fn gz_fixture(xml: &str) -> NamedTempFile {
    let mut temp_file = NamedTempFile::new().unwrap();
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(xml.as_bytes()).unwrap();
    let compressed = encoder.finish().unwrap();
    temp_file.write_all(&compressed).unwrap();
    temp_file.flush().unwrap();
    temp_file
}

fn artists_fixture(count: usize) -> NamedTempFile {
    let mut xml = String::from("<artists>");
    for i in 0..count {
        xml.push_str(&format!(
            "<artist id=\"{i}\"><name>Artist {i}</name><profile>A representative profile blurb for benchmarking purposes.</profile></artist>"
        ));
    }
    xml.push_str("</artists>");
    gz_fixture(&xml)
}

fn nested_release() -> RawElement {
    let artist = RawElement {
        attributes: vec![],
        children: vec![
            ("id".to_string(), 0, RawElement { attributes: vec![], children: vec![], text: "100".to_string() }),
            ("name".to_string(), 1, RawElement { attributes: vec![], children: vec![], text: "Main Artist".to_string() }),
        ],
        text: String::new(),
    };
    RawElement {
        attributes: vec![("id".to_string(), "1".to_string()), ("status".to_string(), "Accepted".to_string())],
        children: vec![
            ("title".to_string(), 0, RawElement { attributes: vec![], children: vec![], text: "Album".to_string() }),
            (
                "artists".to_string(),
                1,
                RawElement { attributes: vec![], children: vec![("artist".to_string(), 0, artist)], text: String::new() },
            ),
        ],
        text: String::new(),
    }
}

fn parse_fixture_benchmark(c: &mut Criterion) {
    const RECORD_COUNT: usize = 1_000;
    let fixture = artists_fixture(RECORD_COUNT);
    let runtime = Runtime::new().unwrap();

    c.bench_function("parse_1000_artist_records", |b| {
        b.iter(|| {
            runtime.block_on(async {
                // Channel sized to hold every record so parse_file never awaits
                // on a drained receiver; this isolates parsing cost from
                // channel backpressure.
                let (tx, _rx) = mpsc::channel(RECORD_COUNT);
                let parser = XmlParser::new(DataType::Artists, tx);
                black_box(parser.parse_file(black_box(fixture.path())).await.unwrap())
            })
        });
    });
}

fn normalize_and_hash_benchmark(c: &mut Criterion) {
    let element = nested_release();

    c.bench_function("normalize_and_hash_nested_release", |b| {
        b.iter(|| {
            let normalized = normalize(black_box(&element));
            black_box(hash_record(&normalized))
        });
    });
}

criterion_group!(benches, parse_fixture_benchmark, normalize_and_hash_benchmark);
criterion_main!(benches);
