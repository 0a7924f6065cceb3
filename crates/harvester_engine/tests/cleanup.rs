use std::fs;

use harvester_core::{DocumentRecord, SequenceEntry};
use harvester_engine::{prune_unreferenced, CleanupError, CleanupStats, DatasetSink, JsonlSink};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

#[test]
fn only_unreferenced_images_and_sidecars_are_removed() {
    engine_logging::initialize_for_tests();
    let temp = TempDir::new().unwrap();
    let images = temp.path().join("images");
    fs::create_dir_all(&images).unwrap();
    for name in [
        "kept_page_0_xref_3.jpg",
        "kept_page_0_xref_3.json",
        "orphan_page_1_xref_9.png",
        "orphan_page_1_xref_9.json",
    ] {
        fs::write(images.join(name), b"x").unwrap();
    }

    let dataset = temp.path().join("crawl.jsonl");
    let mut sink = Box::new(JsonlSink::create(&dataset).unwrap());
    sink.append_record(&DocumentRecord::new(
        "kept.pdf",
        None,
        vec![
            SequenceEntry::Text("felirat".into()),
            SequenceEntry::Image("kept_page_0_xref_3.jpg".into()),
        ],
    ))
    .unwrap();
    sink.finalize().unwrap();

    let stats = prune_unreferenced(&dataset, &images).unwrap();
    assert_eq!(
        stats,
        CleanupStats {
            referenced: 1,
            kept: 2,
            removed: 2,
        }
    );
    let mut left: Vec<String> = fs::read_dir(&images)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    left.sort();
    assert_eq!(left, vec!["kept_page_0_xref_3.jpg", "kept_page_0_xref_3.json"]);
}

#[test]
fn missing_dataset_is_an_error_and_nothing_is_removed() {
    let temp = TempDir::new().unwrap();
    let images = temp.path().join("images");
    fs::create_dir_all(&images).unwrap();
    fs::write(images.join("a.jpg"), b"x").unwrap();

    assert!(prune_unreferenced(&temp.path().join("missing.jsonl"), &images).is_err());
    assert!(images.join("a.jpg").exists());
}

#[test]
fn truncated_dataset_line_blocks_pruning() {
    engine_logging::initialize_for_tests();
    let temp = TempDir::new().unwrap();
    let images = temp.path().join("images");
    fs::create_dir_all(&images).unwrap();
    fs::write(images.join("a_page_0_xref_1.jpg"), b"x").unwrap();
    fs::write(images.join("b_page_0_xref_2.jpg"), b"x").unwrap();
    let dataset = temp.path().join("crawl.jsonl");
    fs::write(
        &dataset,
        "{\"pdf_name\":\"a.pdf\",\"url\":null,\"texts\":[null,\"t\"],\"images\":[\"a_page_0_xref_1.jpg\",null]}\n\
         {\"pdf_name\":\"b.pdf\",\"url\":null,\"texts\":[null,\"t\"],\"images\":[\"b_page_0",
    )
    .unwrap();

    let err = prune_unreferenced(&dataset, &images).unwrap_err();
    assert!(matches!(err, CleanupError::Malformed { lines: 1, .. }), "{err}");
    assert!(images.join("a_page_0_xref_1.jpg").exists());
    assert!(images.join("b_page_0_xref_2.jpg").exists());
}
