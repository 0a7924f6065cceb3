use std::fs;
use std::path::Path;
use std::sync::Arc;

use harvester_engine::testing::{FixturePage, PdfBuilder};
use harvester_engine::{
    refilter_directory, AdmissionFilter, AdmissionSettings, AdmissionVerdict, LanguageClassifier,
    LanguageVerdict, Rejection, RefilterStats,
};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

/// Calls a page Hungarian when it mentions "magyar", English otherwise.
struct KeywordClassifier;

impl LanguageClassifier for KeywordClassifier {
    fn classify(&self, text: &str) -> Option<LanguageVerdict> {
        let code = if text.contains("magyar") { "HU" } else { "en" };
        Some(LanguageVerdict {
            code: code.to_string(),
            confidence: 0.9,
        })
    }
}

fn filter(settings: AdmissionSettings) -> AdmissionFilter {
    AdmissionFilter::with_classifier(settings, Arc::new(KeywordClassifier))
}

fn save(path: &Path, pages: &[&str]) {
    let mut builder = PdfBuilder::new();
    for text in pages {
        let page = if text.is_empty() {
            FixturePage::new()
        } else {
            FixturePage::new().text(72, 700, 12, text)
        };
        builder = builder.page(page);
    }
    builder.save(path).unwrap();
}

#[test]
fn target_language_on_any_page_admits() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("00000000.pdf");
    save(&path, &["", "plain english words", "egy magyar mondat"]);

    let verdict = filter(AdmissionSettings::default()).check_and_apply(&path);
    assert_eq!(
        verdict,
        AdmissionVerdict::Admitted {
            pages: 3,
            sniffed_type: "application/pdf".to_string()
        }
    );
    assert!(path.exists());
}

#[test]
fn other_language_is_rejected_and_deleted() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("00000001.pdf");
    save(&path, &["plain english words", ""]);

    let verdict = filter(AdmissionSettings::default()).check_and_apply(&path);
    assert_eq!(
        verdict,
        AdmissionVerdict::Rejected(Rejection::NoTargetLanguage { pages_with_text: 1 })
    );
    assert!(!path.exists());
}

#[test]
fn textless_document_is_rejected() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("00000002.pdf");
    save(&path, &[""]);

    let verdict = filter(AdmissionSettings::default()).check(&path);
    assert_eq!(
        verdict,
        AdmissionVerdict::Rejected(Rejection::NoTargetLanguage { pages_with_text: 0 })
    );
    assert!(path.exists(), "check alone never deletes");
}

#[test]
fn low_confidence_does_not_count() {
    struct Unsure;
    impl LanguageClassifier for Unsure {
        fn classify(&self, _text: &str) -> Option<LanguageVerdict> {
            Some(LanguageVerdict {
                code: "hu".to_string(),
                confidence: 0.29,
            })
        }
    }
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("00000003.pdf");
    save(&path, &["egy magyar mondat"]);

    let filter = AdmissionFilter::with_classifier(AdmissionSettings::default(), Arc::new(Unsure));
    assert!(filter.check(&path).is_rejected());
}

#[test]
fn page_ceiling_rejects_but_keeps_file() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("00000004.pdf");
    save(&path, &["egy magyar mondat", "egy magyar mondat", "egy magyar mondat"]);

    let settings = AdmissionSettings {
        max_pages: 2,
        ..AdmissionSettings::default()
    };
    let verdict = filter(settings).check_and_apply(&path);
    assert_eq!(
        verdict,
        AdmissionVerdict::Rejected(Rejection::TooManyPages {
            pages: 3,
            max_pages: 2
        })
    );
    assert!(path.exists());
}

#[test]
fn html_saved_as_pdf_is_unreadable_and_deleted() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("00000005.pdf");
    fs::write(&path, "<!DOCTYPE html><html><body>Not found</body></html>").unwrap();

    let verdict = filter(AdmissionSettings::default()).check_and_apply(&path);
    assert!(matches!(
        verdict,
        AdmissionVerdict::Rejected(Rejection::Unreadable(_))
    ));
    assert!(!path.exists());
}

fn downloaded_dir(root: &Path) -> std::path::PathBuf {
    let dir = root.join("crawl");
    fs::create_dir_all(&dir).unwrap();
    save(&dir.join("00000000.pdf"), &["egy magyar mondat"]);
    save(&dir.join("00000001.pdf"), &["an english page"]);
    save(&dir.join("00000002.pdf"), &["egy magyar mondat", "ketto", "harom"]);
    fs::write(dir.join("00000003.pdf"), b"<!DOCTYPE html><html></html>").unwrap();
    fs::write(dir.join("notes.txt"), b"not a document").unwrap();
    dir
}

fn names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[test]
fn refilter_moves_rejects_to_backup() {
    engine_logging::initialize_for_tests();
    let temp = TempDir::new().unwrap();
    let dir = downloaded_dir(temp.path());
    let backup = temp.path().join("removed");
    let settings = AdmissionSettings {
        max_pages: 2,
        ..AdmissionSettings::default()
    };

    let stats = refilter_directory(&filter(settings), &dir, Some(&backup)).unwrap();

    assert_eq!(
        stats,
        RefilterStats {
            checked: 4,
            kept: 1,
            diverted: 1,
            moved: 2,
            deleted: 0,
        }
    );
    assert_eq!(names(&dir), vec!["00000000.pdf", "00000002.pdf", "notes.txt"]);
    assert_eq!(names(&backup), vec!["00000001.pdf", "00000003.pdf"]);
}

#[test]
fn refilter_without_backup_deletes_rejects() {
    let temp = TempDir::new().unwrap();
    let dir = downloaded_dir(temp.path());

    let stats = refilter_directory(&filter(AdmissionSettings::default()), &dir, None).unwrap();

    assert_eq!(stats.deleted, 2);
    assert_eq!(stats.kept, 2);
    assert_eq!(names(&dir), vec!["00000000.pdf", "00000002.pdf", "notes.txt"]);
}
