use std::cell::RefCell;
use std::fs;
use std::time::Duration;

use harvester_engine::{
    is_completed, run_log_path, submit_pending, JobScheduler, JobSpec, ListError,
    LocalObjectLister, ObjectLister, SchedulerError, SubmitSummary, COMPLETION_MARKER,
};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

#[derive(Default)]
struct RecordingScheduler {
    submitted: RefCell<Vec<String>>,
}

impl JobScheduler for RecordingScheduler {
    fn submit(&self, job: &JobSpec) -> Result<(), SchedulerError> {
        if job.command.is_empty() {
            return Err(SchedulerError::EmptyCommand(job.name.clone()));
        }
        self.submitted.borrow_mut().push(job.name.clone());
        Ok(())
    }
}

fn job(temp: &TempDir, name: &str) -> JobSpec {
    JobSpec {
        name: name.to_string(),
        command: vec!["harvester".into(), "run".into(), name.into()],
        cpus: 4,
        memory_mb: 8192,
        timeout: Duration::from_secs(3600),
        log_file: temp.path().join(format!("{name}.log")),
    }
}

#[test]
fn run_log_sits_next_to_the_log() {
    assert_eq!(
        run_log_path(std::path::Path::new("/logs/crawl-00001.log")),
        std::path::Path::new("/logs/crawl-00001_run.log")
    );
    assert_eq!(
        run_log_path(std::path::Path::new("plain")),
        std::path::Path::new("plain_run.log")
    );
}

#[test]
fn completion_marker_is_found_in_either_log() {
    let temp = TempDir::new().unwrap();
    let main = temp.path().join("a.log");
    let sibling = temp.path().join("b.log");
    fs::write(&main, format!("start\n{COMPLETION_MARKER}\n")).unwrap();
    fs::write(run_log_path(&sibling), format!("x {COMPLETION_MARKER}")).unwrap();

    assert!(is_completed(&main));
    assert!(is_completed(&sibling));
    assert!(!is_completed(&temp.path().join("c.log")));
}

#[test]
fn completed_jobs_are_skipped() {
    let temp = TempDir::new().unwrap();
    let jobs = vec![job(&temp, "one"), job(&temp, "two"), job(&temp, "three")];
    fs::write(&jobs[1].log_file, COMPLETION_MARKER).unwrap();

    let scheduler = RecordingScheduler::default();
    let summary = submit_pending(&scheduler, &jobs).unwrap();

    assert_eq!(summary, SubmitSummary { submitted: 2, skipped: 1 });
    assert_eq!(*scheduler.submitted.borrow(), vec!["one", "three"]);
}

#[test]
fn submission_error_stops_the_batch() {
    let temp = TempDir::new().unwrap();
    let mut broken = job(&temp, "broken");
    broken.command.clear();
    let jobs = vec![job(&temp, "first"), broken, job(&temp, "never")];

    let scheduler = RecordingScheduler::default();
    let err = submit_pending(&scheduler, &jobs).unwrap_err();
    assert!(matches!(err, SchedulerError::EmptyCommand(name) if name == "broken"));
    assert_eq!(*scheduler.submitted.borrow(), vec!["first"]);
}

#[test]
fn local_lister_filters_by_prefix() {
    let temp = TempDir::new().unwrap();
    let bucket = temp.path().join("crawl-data");
    fs::create_dir_all(bucket.join("segments/1/wat")).unwrap();
    fs::create_dir_all(bucket.join("other")).unwrap();
    fs::write(bucket.join("segments/1/wat/a.warc.wat.gz"), b"").unwrap();
    fs::write(bucket.join("segments/1/wat/b.warc.wat.gz"), b"").unwrap();
    fs::write(bucket.join("other/c.txt"), b"").unwrap();

    let lister = LocalObjectLister::new(temp.path().to_path_buf());
    assert_eq!(
        lister.list_prefixes("crawl-data", "segments/").unwrap(),
        vec!["segments/1/wat/a.warc.wat.gz", "segments/1/wat/b.warc.wat.gz"]
    );
    assert!(matches!(
        lister.list_prefixes("missing", ""),
        Err(ListError::NoSuchBucket(_))
    ));
}

#[cfg(unix)]
#[test]
fn local_scheduler_appends_output_to_run_log() {
    use harvester_engine::LocalJobScheduler;

    let temp = TempDir::new().unwrap();
    let mut spec = job(&temp, "echo");
    spec.command = vec!["sh".into(), "-c".into(), format!("echo {COMPLETION_MARKER}")];

    let scheduler = LocalJobScheduler::new();
    scheduler.submit(&spec).unwrap();
    let statuses = scheduler.wait_all();

    assert_eq!(statuses.len(), 1);
    assert!(statuses[0].1.as_ref().unwrap().success());
    assert!(is_completed(&spec.log_file));
}
