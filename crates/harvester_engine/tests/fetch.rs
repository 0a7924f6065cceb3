use std::time::Duration;

use harvester_engine::testing::serve_without_length;
use harvester_engine::{AtomicFileWriter, FailureKind, FetchSettings, Fetcher, ReqwestFetcher};
use pretty_assertions::assert_eq;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn fetcher_returns_body_and_metadata() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/paper.pdf"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("%PDF-1.4 body", "application/pdf"))
        .mount(&server)
        .await;

    let fetcher = ReqwestFetcher::new(FetchSettings::default());
    let url = format!("{}/paper.pdf", server.uri());

    let output = fetcher.fetch(&url).await.expect("fetch ok");
    assert_eq!(output.metadata.original_url, url);
    assert_eq!(output.metadata.final_url, output.metadata.original_url);
    assert_eq!(output.metadata.redirect_count, 0);
    assert_eq!(output.metadata.content_type.as_deref(), Some("application/pdf"));
    assert_eq!(output.metadata.byte_len, 13);
    assert_eq!(output.bytes, b"%PDF-1.4 body");
}

#[tokio::test]
async fn fetcher_follows_redirects_and_counts_them() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/old.pdf"))
        .respond_with(ResponseTemplate::new(302).insert_header("Location", "/new.pdf"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/new.pdf"))
        .respond_with(ResponseTemplate::new(200).set_body_string("moved"))
        .mount(&server)
        .await;

    let fetcher = ReqwestFetcher::new(FetchSettings::default());
    let output = fetcher
        .fetch(&format!("{}/old.pdf", server.uri()))
        .await
        .expect("fetch ok");
    assert_eq!(output.metadata.redirect_count, 1);
    assert!(output.metadata.final_url.ends_with("/new.pdf"));
    assert_eq!(output.bytes, b"moved");
}

#[tokio::test]
async fn fetcher_fails_on_http_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let fetcher = ReqwestFetcher::new(FetchSettings::default());
    let err = fetcher
        .fetch(&format!("{}/missing", server.uri()))
        .await
        .unwrap_err();
    assert_eq!(err.kind, FailureKind::HttpStatus(404));
    assert!(err.kind.is_miss());
}

#[tokio::test]
async fn fetcher_times_out_on_slow_response() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_millis(250))
                .set_body_string("slow"),
        )
        .mount(&server)
        .await;

    let settings = FetchSettings {
        request_timeout: Duration::from_millis(50),
        ..FetchSettings::default()
    };
    let fetcher = ReqwestFetcher::new(settings);
    let err = fetcher
        .fetch(&format!("{}/slow", server.uri()))
        .await
        .unwrap_err();
    assert_eq!(err.kind, FailureKind::Timeout);
}

#[tokio::test]
async fn fetcher_rejects_declared_oversize_response() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/large"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Type", "application/pdf")
                .set_body_string("01234567890"),
        )
        .mount(&server)
        .await;

    let settings = FetchSettings {
        max_bytes: 10,
        ..FetchSettings::default()
    };
    let fetcher = ReqwestFetcher::new(settings);
    let err = fetcher
        .fetch(&format!("{}/large", server.uri()))
        .await
        .unwrap_err();
    assert_eq!(
        err.kind,
        FailureKind::TooLarge {
            max_bytes: 10,
            actual: Some(11)
        }
    );
}

#[tokio::test]
async fn fetcher_rejects_disallowed_content_type() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/page"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("<html></html>", "text/html"))
        .mount(&server)
        .await;

    let settings = FetchSettings {
        allowed_content_types: vec!["application/pdf".to_string()],
        ..FetchSettings::default()
    };
    let fetcher = ReqwestFetcher::new(settings);
    let err = fetcher
        .fetch(&format!("{}/page", server.uri()))
        .await
        .unwrap_err();
    assert_eq!(
        err.kind,
        FailureKind::UnsupportedContentType {
            content_type: "text/html".to_string()
        }
    );
    assert!(!err.kind.is_miss());
}

#[tokio::test]
async fn fetcher_rejects_invalid_url() {
    let fetcher = ReqwestFetcher::new(FetchSettings::default());
    let err = fetcher.fetch("not a url").await.unwrap_err();
    assert_eq!(err.kind, FailureKind::InvalidUrl);
}

#[tokio::test]
async fn fetcher_refuses_response_without_declared_length() {
    let url = serve_without_length(b"%PDF-1.4 unsized".to_vec()).unwrap();
    let fetcher = ReqwestFetcher::new(FetchSettings::default());
    let err = fetcher.fetch(&url).await.unwrap_err();
    assert_eq!(err.kind, FailureKind::UndeclaredLength);
    assert!(!err.kind.is_miss());
}

#[tokio::test]
async fn undeclared_length_can_be_allowed() {
    let url = serve_without_length(b"%PDF-1.4 unsized".to_vec()).unwrap();
    let settings = FetchSettings {
        require_declared_length: false,
        ..FetchSettings::default()
    };
    let output = ReqwestFetcher::new(settings).fetch(&url).await.unwrap();
    assert_eq!(output.metadata.declared_len, None);
    assert_eq!(output.bytes, b"%PDF-1.4 unsized");
}

#[tokio::test]
async fn fetch_to_file_streams_body_to_disk() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/archive.warc.wat.gz"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![7u8; 4096]))
        .mount(&server)
        .await;

    let temp = TempDir::new().unwrap();
    let writer = AtomicFileWriter::new(temp.path().to_path_buf());
    let fetcher = ReqwestFetcher::new(FetchSettings::default());
    let metadata = fetcher
        .fetch_to_file(&format!("{}/archive.warc.wat.gz", server.uri()), &writer, "a.wat.gz")
        .await
        .unwrap();

    assert_eq!(metadata.byte_len, 4096);
    assert_eq!(std::fs::read(temp.path().join("a.wat.gz")).unwrap(), vec![7u8; 4096]);
}

#[tokio::test]
async fn fetch_to_file_leaves_nothing_when_body_is_too_large() {
    let url = serve_without_length(vec![1u8; 2048]).unwrap();
    let temp = TempDir::new().unwrap();
    let writer = AtomicFileWriter::new(temp.path().to_path_buf());
    let settings = FetchSettings {
        max_bytes: 100,
        require_declared_length: false,
        ..FetchSettings::default()
    };
    let err = ReqwestFetcher::new(settings)
        .fetch_to_file(&url, &writer, "a.wat.gz")
        .await
        .unwrap_err();

    assert!(matches!(err.kind, FailureKind::TooLarge { max_bytes: 100, .. }));
    assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 0);
}
