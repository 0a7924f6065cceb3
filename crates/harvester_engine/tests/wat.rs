use std::fs;
use std::io::Write;

use flate2::write::GzEncoder;
use flate2::Compression;
use harvester_core::{LinkHarvester, MediaClass};
use harvester_engine::{harvest_archive, harvest_records, open_archive, read_url_lines, WarcReader};
use pretty_assertions::assert_eq;
use serde_json::json;
use tempfile::TempDir;

fn metadata_record(page_url: &str, links: &[&str]) -> Vec<u8> {
    let body = json!({
        "Envelope": {
            "Payload-Metadata": {
                "HTTP-Response-Metadata": {
                    "HTML-Metadata": {
                        "Links": links.iter().map(|url| json!({"path": "A@/href", "url": url})).collect::<Vec<_>>()
                    }
                }
            }
        }
    })
    .to_string();
    warc_record("metadata", Some(page_url), body.as_bytes())
}

fn warc_record(kind: &str, target: Option<&str>, body: &[u8]) -> Vec<u8> {
    let mut out = format!("WARC/1.0\r\nWARC-Type: {kind}\r\n");
    if let Some(target) = target {
        out.push_str(&format!("WARC-Target-URI: {target}\r\n"));
    }
    out.push_str(&format!("Content-Length: {}\r\n\r\n", body.len()));
    let mut bytes = out.into_bytes();
    bytes.extend_from_slice(body);
    bytes.extend_from_slice(b"\r\n\r\n");
    bytes
}

fn gzip_member(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

#[test]
fn multi_member_gzip_yields_every_record() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("sample.warc.wat.gz");
    let mut data = gzip_member(&warc_record("warcinfo", None, b"software: test"));
    data.extend(gzip_member(&metadata_record("https://hu.example.org/p", &["a.pdf"])));
    data.extend(gzip_member(&metadata_record("https://hu.example.org/q", &[])));
    fs::write(&path, data).unwrap();

    let records: Vec<_> = open_archive(&path)
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    let kinds: Vec<_> = records.iter().map(|r| r.record_type().unwrap()).collect();
    assert_eq!(kinds, vec!["warcinfo", "metadata", "metadata"]);
    assert_eq!(records[1].target_uri(), Some("https://hu.example.org/p"));
}

#[test]
fn harvest_writes_normalized_unique_links() {
    engine_logging::initialize_for_tests();
    let temp = TempDir::new().unwrap();
    let archive = temp.path().join("crawl.warc.wat.gz");
    let mut data = gzip_member(&metadata_record(
        "https://hu.example.org/p",
        &[
            "./docs/first.pdf",
            "//cdn.example.org/second.PDF",
            "https://hu.example.org/page.html",
            "https://hu.example.org/BANNER/third.pdf",
        ],
    ));
    data.extend(gzip_member(&metadata_record(
        "https://hu.example.org/q",
        &["https://hu.example.org/docs/first.pdf"],
    )));
    fs::write(&archive, data).unwrap();

    let output = temp.path().join("crawl.warc_urls.jsonl");
    let mut harvester = LinkHarvester::new(MediaClass::Document);
    let stats = harvest_archive(&archive, &mut harvester, &output).unwrap();

    assert_eq!(stats.records, 2);
    assert_eq!(stats.metadata_records, 2);
    assert_eq!(stats.links_seen, 5);
    assert_eq!(stats.emitted, 2);
    assert_eq!(
        read_url_lines(&output).unwrap(),
        vec![
            Some("https://hu.example.org/docs/first.pdf".to_string()),
            Some("http://cdn.example.org/second.PDF".to_string()),
        ]
    );
}

#[test]
fn garbled_tail_keeps_earlier_links() {
    engine_logging::initialize_for_tests();
    let temp = TempDir::new().unwrap();
    let archive = temp.path().join("broken.warc.wat");
    let mut data = metadata_record("https://hu.example.org/p", &["x.pdf"]);
    data.extend_from_slice(b"WARC/1.0\r\nWARC-Type: metadata\r\nContent-Length: 9999\r\n\r\n{\"Env");
    fs::write(&archive, data).unwrap();

    let output = temp.path().join("urls.jsonl");
    let mut harvester = LinkHarvester::new(MediaClass::Document);
    let stats = harvest_archive(&archive, &mut harvester, &output).unwrap();

    assert_eq!(stats.emitted, 1);
    assert_eq!(stats.malformed, 1);
    assert_eq!(
        read_url_lines(&output).unwrap(),
        vec![Some("https://hu.example.org/x.pdf".to_string())]
    );
}

#[test]
fn oversized_record_is_skipped_and_reading_continues() {
    engine_logging::initialize_for_tests();
    let mut data = metadata_record("https://hu.example.org/p", &["first.pdf"]);
    data.extend(warc_record("metadata", Some("https://hu.example.org/big"), &[b'x'; 4096]));
    data.extend(metadata_record("https://hu.example.org/q", &["second.pdf"]));
    let reader = WarcReader::new(&data[..]).with_max_record_bytes(1024);

    let mut out = Vec::new();
    let mut harvester = LinkHarvester::new(MediaClass::Document);
    let stats = harvest_records(reader, &mut harvester, &mut out).unwrap();

    assert_eq!(stats.records, 2);
    assert_eq!(stats.malformed, 1);
    assert_eq!(
        String::from_utf8(out).unwrap(),
        "{\"url\":\"https://hu.example.org/first.pdf\"}\n{\"url\":\"https://hu.example.org/second.pdf\"}\n"
    );
}

#[test]
fn absurd_declared_length_ends_the_stream_gracefully() {
    engine_logging::initialize_for_tests();
    let mut data = metadata_record("https://hu.example.org/p", &["first.pdf"]);
    data.extend_from_slice(
        b"WARC/1.0\r\nWARC-Type: metadata\r\nContent-Length: 18446744073709551615\r\n\r\n{}",
    );

    let mut out = Vec::new();
    let mut harvester = LinkHarvester::new(MediaClass::Document);
    let stats = harvest_records(WarcReader::new(&data[..]), &mut harvester, &mut out).unwrap();

    assert_eq!(stats.emitted, 1);
    assert_eq!(stats.malformed, 1);
}

#[test]
fn url_list_keeps_positions_of_bad_lines() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("urls.jsonl");
    fs::write(&path, "{\"url\": \"https://a.org/0.pdf\"}\nnot json\n\n{\"url\": \"https://a.org/3.pdf\"}\n").unwrap();

    assert_eq!(
        read_url_lines(&path).unwrap(),
        vec![
            Some("https://a.org/0.pdf".to_string()),
            None,
            None,
            Some("https://a.org/3.pdf".to_string()),
        ]
    );
}
