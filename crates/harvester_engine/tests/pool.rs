#![cfg(unix)]

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Child, Command};
use std::sync::Arc;
use std::time::{Duration, Instant};

use harvester_core::{ContentHashIndex, DocumentRecord, ImageRecord, Rect, SequenceEntry};
use harvester_engine::{
    collect_tasks, dataset_path, sidecar_filename, BoundedWorkerPool, ChildReport, ExtractionTask,
    JsonlSink, PoolSettings, TaskRunner, IMAGES_DIR,
};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

/// Stands in for the extraction child: writes a canned report, then runs a
/// trivial command whose behaviour the test picks per document.
struct ScriptedRunner {
    scripts: HashMap<String, Script>,
}

#[derive(Clone)]
enum Script {
    Report(ChildReport),
    Hang,
    Crash,
}

impl TaskRunner for ScriptedRunner {
    fn spawn(&self, task: &ExtractionTask, report_path: &Path) -> io::Result<Child> {
        let name = task.pdf_path.file_name().unwrap().to_string_lossy().into_owned();
        match self.scripts.get(&name) {
            Some(Script::Report(report)) => {
                fs::write(report_path, serde_json::to_vec(report).unwrap())?;
                Command::new("true").spawn()
            }
            Some(Script::Hang) => Command::new("sleep").arg("30").spawn(),
            Some(Script::Crash) | None => Command::new("sh").args(["-c", "exit 3"]).spawn(),
        }
    }
}

fn settings(workers: usize) -> PoolSettings {
    PoolSettings {
        workers,
        per_document_timeout: Duration::from_millis(300),
        queue_capacity: 2,
        poll_interval: Duration::from_millis(10),
    }
}

fn task(dir: &Path, name: &str) -> ExtractionTask {
    ExtractionTask {
        pdf_path: dir.join(name),
        source_url: None,
        output_dir: dir.to_path_buf(),
    }
}

fn report(pdf_name: &str, image: &str, digest: &str) -> ChildReport {
    ChildReport {
        record: Some(DocumentRecord::new(
            pdf_name,
            None,
            vec![
                SequenceEntry::Image(image.to_string()),
                SequenceEntry::Text("kep alatti szoveg".to_string()),
            ],
        )),
        images: vec![ImageRecord {
            page_index: 0,
            bbox: Rect::new(72.0, 142.0, 372.0, 442.0),
            content_hash: digest.to_string(),
            width: 300,
            height: 300,
            file_name: image.to_string(),
        }],
    }
}

fn read_dataset(path: &Path) -> Vec<DocumentRecord> {
    fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

#[test]
fn every_outcome_advances_progress_once() {
    engine_logging::initialize_for_tests();
    let temp = TempDir::new().unwrap();
    let runner = ScriptedRunner {
        scripts: HashMap::from([
            ("a.pdf".to_string(), Script::Report(report("a.pdf", "a_page_0_xref_5.jpg", "aa"))),
            ("b.pdf".to_string(), Script::Hang),
            ("c.pdf".to_string(), Script::Crash),
            (
                "d.pdf".to_string(),
                Script::Report(ChildReport {
                    record: None,
                    images: Vec::new(),
                }),
            ),
        ]),
    };
    let tasks = ["a.pdf", "b.pdf", "c.pdf", "d.pdf"]
        .iter()
        .map(|name| task(temp.path(), name))
        .collect();
    let dataset = temp.path().join("out.jsonl");
    let sink = Box::new(JsonlSink::create(&dataset).unwrap());

    let pool = BoundedWorkerPool::new(settings(2), Arc::new(runner));
    let started = Instant::now();
    let report = pool.run(tasks, sink).unwrap();

    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(report.dispatched, 4);
    assert_eq!(report.progressed, 4);
    assert_eq!(pool.progress(), 4);
    assert_eq!(report.accepted, 1);
    assert_eq!(report.timed_out, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(report.discarded, 1);
    assert_eq!(report.dataset.as_ref().map(|d| d.records), Some(1));

    let records = read_dataset(&dataset);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].pdf_name, "a.pdf");
}

#[test]
fn hanging_task_is_terminated_near_the_deadline() {
    let temp = TempDir::new().unwrap();
    let runner = ScriptedRunner {
        scripts: HashMap::from([("slow.pdf".to_string(), Script::Hang)]),
    };
    let sink = Box::new(JsonlSink::create(&temp.path().join("out.jsonl")).unwrap());
    let pool = BoundedWorkerPool::new(settings(1), Arc::new(runner));

    let started = Instant::now();
    let report = pool.run(vec![task(temp.path(), "slow.pdf")], sink).unwrap();
    let elapsed = started.elapsed();

    assert!(elapsed >= Duration::from_millis(300), "{elapsed:?}");
    assert!(elapsed < Duration::from_secs(5), "{elapsed:?}");
    assert_eq!(report.timed_out, 1);
    assert_eq!(report.progressed, 1);
}

#[test]
fn duplicate_image_is_dropped_with_its_files() {
    let temp = TempDir::new().unwrap();
    let images = temp.path().join(IMAGES_DIR);
    fs::create_dir_all(&images).unwrap();
    for name in ["first_page_0_xref_4.jpg", "second_page_0_xref_4.jpg"] {
        fs::write(images.join(name), b"jpeg").unwrap();
        fs::write(images.join(sidecar_filename(name)), b"{}").unwrap();
    }

    let runner = ScriptedRunner {
        scripts: HashMap::from([
            (
                "first.pdf".to_string(),
                Script::Report(report("first.pdf", "first_page_0_xref_4.jpg", "ABCD")),
            ),
            (
                "second.pdf".to_string(),
                Script::Report(report("second.pdf", "second_page_0_xref_4.jpg", "abcd")),
            ),
        ]),
    };
    let dataset = temp.path().join("out.jsonl");
    let pool = BoundedWorkerPool::new(settings(1), Arc::new(runner))
        .with_reference(ContentHashIndex::with_reference(Vec::<String>::new()));
    let report = pool
        .run(
            vec![task(temp.path(), "first.pdf"), task(temp.path(), "second.pdf")],
            Box::new(JsonlSink::create(&dataset).unwrap()),
        )
        .unwrap();

    assert_eq!(report.accepted, 1);
    assert_eq!(report.discarded, 1);
    assert!(images.join("first_page_0_xref_4.jpg").exists());
    assert!(!images.join("second_page_0_xref_4.jpg").exists());
    assert!(!images.join("second_page_0_xref_4.json").exists());
    assert_eq!(read_dataset(&dataset)[0].pdf_name, "first.pdf");
}

#[test]
fn tasks_pick_up_urls_by_document_index() {
    let temp = TempDir::new().unwrap();
    let input = temp.path().join("crawl.warc");
    fs::create_dir_all(&input).unwrap();
    for name in ["00000000.pdf", "00000002.pdf", "notes.txt", "other.pdf"] {
        fs::write(input.join(name), b"%PDF").unwrap();
    }
    let url_map = temp.path().join("urls.jsonl");
    fs::write(
        &url_map,
        "{\"url\": \"https://a.org/0.pdf\"}\n{\"url\": \"https://a.org/1.pdf\"}\n{\"url\": \"https://a.org/2.pdf\"}\n",
    )
    .unwrap();
    let output: PathBuf = temp.path().join("processed");

    let tasks = collect_tasks(&input, Some(&url_map), &output).unwrap();
    let summary: Vec<(String, Option<String>)> = tasks
        .iter()
        .map(|t| {
            (
                t.pdf_path.file_name().unwrap().to_string_lossy().into_owned(),
                t.source_url.clone(),
            )
        })
        .collect();
    assert_eq!(
        summary,
        vec![
            ("00000000.pdf".to_string(), Some("https://a.org/0.pdf".to_string())),
            ("00000002.pdf".to_string(), Some("https://a.org/2.pdf".to_string())),
            ("other.pdf".to_string(), None),
        ]
    );
    assert_eq!(dataset_path(&output, &input), output.join("crawl.warc.jsonl"));
}
