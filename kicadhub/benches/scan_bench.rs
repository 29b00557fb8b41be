use criterion::{black_box, criterion_group, criterion_main, Criterion};
use kicadhub::prelude::*;
use kicadhub::rules::RulesConfig;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

/// Write `libs` libraries of `parts` resistors each.
fn generate_libraries(dir: &Path, libs: usize, parts: usize) {
    for l in 0..libs {
        let mut content = String::from("(kicad_symbol_lib (version 20220914) (generator bench)\n");
        for p in 0..parts {
            content.push_str(&format!(
                "  (symbol \"R_{p}\" (in_bom yes) (on_board yes)\n    (property \"Reference\" \"R\" (at 0 0 0))\n    (property \"Value\" \"{p}k\" (at 0 0 0))\n    (property \"MPN\" \"RC0603-{p}K\" (at 0 0 0))\n    (symbol \"R_{p}_1_1\"\n      (pin passive line (at 0 3.81 270) (length 1.27) (name \"~\") (number \"1\"))\n      (pin passive line (at 0 -3.81 90) (length 1.27) (name \"~\") (number \"2\"))\n    )\n  )\n"
            ));
        }
        content.push_str(")\n");
        std::fs::write(dir.join(format!("Lib{l}.kicad_sym")), content).unwrap();
    }
}

fn bench_scan_libraries(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    generate_libraries(dir.path(), 20, 100);
    let roots = vec![dir.path().to_path_buf()];

    c.bench_function("scan_2000_parts", |b| {
        b.iter(|| {
            let index = LibraryIndex::new();
            index.scan(black_box(&roots)).unwrap()
        });
    });
}

fn bench_validate(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    generate_libraries(dir.path(), 20, 100);
    let index = LibraryIndex::new();
    index.scan(&[dir.path().to_path_buf()]).unwrap();

    let mut config = RulesConfig::default();
    config.global_rules.insert("MPN".into(), "^[A-Z0-9-]+$".into());
    config.global_rules.insert("Datasheet".into(), String::new());
    let engine = RulesEngine::new(config);

    c.bench_function("validate_2000_parts", |b| {
        b.iter(|| engine.validate(black_box(&index.snapshot()), &Scope::All));
    });
}

fn bench_parse_schematic(c: &mut Criterion) {
    c.bench_function("parse_hierarchy", |b| {
        b.iter(|| kicadhub::parse_schematic(black_box(&fixture_path("board/top.kicad_sch"))));
    });
}

criterion_group!(benches, bench_scan_libraries, bench_validate, bench_parse_schematic);
criterion_main!(benches);
