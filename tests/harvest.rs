//! End-to-end harvest tests against mock package endpoints.
//!
//! Packages are synthesized in memory (tar + gzip, PNG figures) and served
//! by `wiremock`, so these run offline in CI.
//!
//! Run with:
//!   cargo test --test harvest -- --nocapture

use flate2::write::GzEncoder;
use flate2::Compression;
use image::{DynamicImage, GrayImage, ImageFormat, Luma};
use pmc_captions::{
    HarvestConfig, HarvestError, HarvestProgressCallback, HarvestStats, Harvester, RunPlan,
    SplitJob,
};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ── Test helpers ─────────────────────────────────────────────────────────────

const HEADER: &str = "File\tArticle Citation\tAccession ID\tPMID\tLicense";

const PMC1_ROW: &str = "00/00/PMC1.tar.gz\ttitleX\tPMC1\t1001\tCC0";

const PMC1_NXML: &str = r#"<?xml version="1.0"?>
<article xmlns:xlink="http://www.w3.org/1999/xlink">
  <front><article-meta>
    <article-id pub-id-type="pmid">1001</article-id>
  </article-meta></front>
  <body>
    <fig id="1"><caption><p>A cell.</p></caption><graphic xlink:href="f1"/></fig>
  </body>
</article>"#;

/// Route library logs to the test harness; `RUST_LOG=debug` to see them.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn grayscale_png() -> Vec<u8> {
    let mut buf = Vec::new();
    DynamicImage::ImageLuma8(GrayImage::from_pixel(6, 6, Luma([200])))
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .unwrap();
    buf
}

fn tar_gz(files: &[(&str, &[u8])]) -> Vec<u8> {
    let gz = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(gz);
    for (name, data) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, *data).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}

fn pmc1_package() -> Vec<u8> {
    let png = grayscale_png();
    tar_gz(&[
        ("PMC1/PMC1.nxml", PMC1_NXML.as_bytes()),
        ("PMC1/f1.jpg", png.as_slice()),
    ])
}

fn write_manifest(dir: &Path, name: &str, rows: &[&str]) -> PathBuf {
    let path = dir.join(name);
    let mut body = format!("{HEADER}\n");
    for row in rows {
        body.push_str(row);
        body.push('\n');
    }
    std::fs::write(&path, body).unwrap();
    path
}

async fn serve_package(server: &MockServer, at: &str, body: Vec<u8>) {
    Mock::given(method("GET"))
        .and(path(at))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
        .mount(server)
        .await;
}

fn config_for(primary: &MockServer) -> HarvestConfig {
    HarvestConfig::builder()
        .primary_base(primary.uri())
        .no_fallback()
        .build()
        .unwrap()
}

fn read_lines(path: &Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect()
}

#[derive(Default)]
struct Recorder {
    started: AtomicUsize,
    written: AtomicUsize,
    skipped: Mutex<Vec<String>>,
    completed: Mutex<Option<HarvestStats>>,
}

impl HarvestProgressCallback for Recorder {
    fn on_entry_start(&self, _index: usize, _total: usize, _pmcid: &str) {
        self.started.fetch_add(1, Ordering::SeqCst);
    }

    fn on_entry_written(&self, _index: usize, _total: usize, _pmcid: &str, records: usize) {
        self.written.fetch_add(records, Ordering::SeqCst);
    }

    fn on_entry_skipped(&self, _index: usize, _total: usize, pmcid: &str, _reason: &str) {
        self.skipped.lock().unwrap().push(pmcid.to_string());
    }

    fn on_harvest_complete(&self, _name: &str, stats: &HarvestStats) {
        *self.completed.lock().unwrap() = Some(stats.clone());
    }
}

// ── Scenarios ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn single_package_produces_one_record_and_one_image() {
    init_tracing();
    let server = MockServer::start().await;
    serve_package(&server, "/00/00/PMC1.tar.gz", pmc1_package()).await;

    let tmp = tempfile::tempdir().unwrap();
    let manifest = write_manifest(tmp.path(), "dev.txt", &[PMC1_ROW]);
    let job = SplitJob::new(&manifest, tmp.path().join("dev.jsonl"), tmp.path().join("images"));

    let stats = Harvester::with_jats(config_for(&server))
        .unwrap()
        .harvest(&job)
        .await
        .unwrap();

    assert_eq!(
        read_lines(&job.index_path),
        [r#"{"image":"PMC1/PMC1_fig-1.jpg","caption":"A cell.","pmid":"1001","pmcid":"PMC1","pair_id":"1001_1"}"#]
    );
    let image_path = job.images_dir.join("PMC1/PMC1_fig-1.jpg");
    let image = image::open(&image_path).unwrap();
    assert_eq!(image.color().channel_count(), 3);

    assert_eq!(stats.attempted, 1);
    assert_eq!(stats.written_entries, 1);
    assert_eq!(stats.records_written, 1);
    assert_eq!(stats.summary(&job.name), "[dev.txt] Wrote 1 pairs. Skipped 0.");
}

#[tokio::test]
async fn rerun_resumes_without_duplicates() {
    let server = MockServer::start().await;
    serve_package(&server, "/00/00/PMC1.tar.gz", pmc1_package()).await;

    let tmp = tempfile::tempdir().unwrap();
    let manifest = write_manifest(tmp.path(), "dev.txt", &[PMC1_ROW]);
    let job = SplitJob::new(&manifest, tmp.path().join("dev.jsonl"), tmp.path().join("images"));
    let harvester = Harvester::with_jats(config_for(&server)).unwrap();

    harvester.harvest(&job).await.unwrap();
    let index_before = std::fs::read(&job.index_path).unwrap();
    let image_path = job.images_dir.join("PMC1/PMC1_fig-1.jpg");
    let image_before = std::fs::read(&image_path).unwrap();

    let second = harvester.harvest(&job).await.unwrap();

    assert_eq!(std::fs::read(&job.index_path).unwrap(), index_before);
    assert_eq!(std::fs::read(&image_path).unwrap(), image_before);
    assert_eq!(second.records_written, 0);
    assert_eq!(second.duplicates, 1);
    assert_eq!(second.skipped_entries, 1);
    assert_eq!(second.written_entries + second.skipped_entries, second.attempted);
}

#[tokio::test]
async fn independent_runs_write_identical_output() {
    let server = MockServer::start().await;
    serve_package(&server, "/00/00/PMC1.tar.gz", pmc1_package()).await;
    let harvester = Harvester::with_jats(config_for(&server)).unwrap();

    let mut outputs = Vec::new();
    for _ in 0..2 {
        let tmp = tempfile::tempdir().unwrap();
        let manifest = write_manifest(tmp.path(), "dev.txt", &[PMC1_ROW]);
        let job = SplitJob::new(&manifest, tmp.path().join("dev.jsonl"), tmp.path().join("images"));
        harvester.harvest(&job).await.unwrap();
        outputs.push((
            std::fs::read(&job.index_path).unwrap(),
            std::fs::read(job.images_dir.join("PMC1/PMC1_fig-1.jpg")).unwrap(),
        ));
    }

    assert!(!outputs[0].0.is_empty());
    assert_eq!(outputs[0], outputs[1]);
}

#[tokio::test]
async fn no_resume_refuses_to_clobber_an_existing_index() {
    let server = MockServer::start().await;
    serve_package(&server, "/00/00/PMC1.tar.gz", pmc1_package()).await;

    let tmp = tempfile::tempdir().unwrap();
    let manifest = write_manifest(tmp.path(), "dev.txt", &[PMC1_ROW]);
    let job = SplitJob::new(&manifest, tmp.path().join("dev.jsonl"), tmp.path().join("images"));

    Harvester::with_jats(config_for(&server))
        .unwrap()
        .harvest(&job)
        .await
        .unwrap();
    let before = std::fs::read(&job.index_path).unwrap();

    let fresh = HarvestConfig::builder()
        .primary_base(server.uri())
        .no_fallback()
        .resume(false)
        .build()
        .unwrap();
    let err = Harvester::with_jats(fresh)
        .unwrap()
        .harvest(&job)
        .await
        .unwrap_err();

    assert!(matches!(err, HarvestError::IndexExists { .. }));
    assert_eq!(std::fs::read(&job.index_path).unwrap(), before);
}

#[tokio::test]
async fn no_resume_starts_a_fresh_index() {
    let server = MockServer::start().await;
    serve_package(&server, "/00/00/PMC1.tar.gz", pmc1_package()).await;

    let tmp = tempfile::tempdir().unwrap();
    let manifest = write_manifest(tmp.path(), "dev.txt", &[PMC1_ROW]);
    let job = SplitJob::new(&manifest, tmp.path().join("dev.jsonl"), tmp.path().join("images"));

    Harvester::with_jats(config_for(&server))
        .unwrap()
        .harvest(&job)
        .await
        .unwrap();

    let fresh = HarvestConfig::builder()
        .primary_base(server.uri())
        .no_fallback()
        .resume(false)
        .overwrite_index(true)
        .build()
        .unwrap();
    let stats = Harvester::with_jats(fresh)
        .unwrap()
        .harvest(&job)
        .await
        .unwrap();

    // The image on disk is reused; the record is written again exactly once.
    assert_eq!(stats.records_written, 1);
    assert_eq!(read_lines(&job.index_path).len(), 1);
}

#[tokio::test]
async fn malformed_rows_and_failures_are_accounted() {
    init_tracing();
    let server = MockServer::start().await;
    serve_package(&server, "/00/00/PMC1.tar.gz", pmc1_package()).await;
    serve_package(
        &server,
        "/00/00/PMC2.tar.gz",
        tar_gz(&[("PMC2/readme.txt", &b"no markup here"[..])]),
    )
    .await;

    let tmp = tempfile::tempdir().unwrap();
    let manifest = write_manifest(
        tmp.path(),
        "dev.txt",
        &[
            "only\tfour\tfields\there",
            PMC1_ROW,
            "00/00/PMC2.tar.gz\tt\tPMC2\t2002\tCC0",
            "00/00/PMC3.tar.gz\tt\tPMC3\t3003\tCC0",
        ],
    );
    let job = SplitJob::new(&manifest, tmp.path().join("dev.jsonl"), tmp.path().join("images"));

    let recorder = Arc::new(Recorder::default());
    let config = HarvestConfig::builder()
        .primary_base(server.uri())
        .no_fallback()
        .progress_callback(recorder.clone() as Arc<dyn HarvestProgressCallback>)
        .build()
        .unwrap();
    let stats = Harvester::with_jats(config)
        .unwrap()
        .harvest(&job)
        .await
        .unwrap();

    assert_eq!(stats.dropped_rows, 1);
    assert_eq!(stats.attempted, 3);
    assert_eq!(stats.written_entries, 1);
    assert_eq!(stats.skipped_entries, 2);
    assert_eq!(recorder.started.load(Ordering::SeqCst), 3);
    assert_eq!(recorder.written.load(Ordering::SeqCst), 1);
    assert_eq!(*recorder.skipped.lock().unwrap(), ["PMC2", "PMC3"]);
    assert_eq!(recorder.completed.lock().unwrap().as_ref(), Some(&stats));
}

#[tokio::test]
async fn fallback_endpoint_serves_when_primary_is_down() {
    let primary = MockServer::start().await;
    let fallback = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&primary)
        .await;
    serve_package(&fallback, "/00/00/PMC1.tar.gz", pmc1_package()).await;

    let tmp = tempfile::tempdir().unwrap();
    let manifest = write_manifest(tmp.path(), "dev.txt", &[PMC1_ROW]);
    let job = SplitJob::new(&manifest, tmp.path().join("dev.jsonl"), tmp.path().join("images"));

    let config = HarvestConfig::builder()
        .primary_base(primary.uri())
        .fallback_base(fallback.uri())
        .build()
        .unwrap();
    let stats = Harvester::with_jats(config)
        .unwrap()
        .harvest(&job)
        .await
        .unwrap();

    assert_eq!(stats.records_written, 1);
    assert!(job.images_dir.join("PMC1/PMC1_fig-1.jpg").is_file());
}

#[tokio::test]
async fn subset_cap_limits_attempts() {
    let server = MockServer::start().await;
    serve_package(&server, "/00/00/PMC1.tar.gz", pmc1_package()).await;

    let tmp = tempfile::tempdir().unwrap();
    let manifest = write_manifest(
        tmp.path(),
        "dev.txt",
        &[
            "bad row",
            PMC1_ROW,
            "00/00/PMC2.tar.gz\tt\tPMC2\t2002\tCC0",
        ],
    );
    let job = SplitJob::new(&manifest, tmp.path().join("dev.jsonl"), tmp.path().join("images"));

    let config = HarvestConfig::builder()
        .primary_base(server.uri())
        .no_fallback()
        .subset_size(1)
        .build()
        .unwrap();
    let stats = Harvester::with_jats(config)
        .unwrap()
        .harvest(&job)
        .await
        .unwrap();

    assert_eq!(stats.attempted, 1);
    assert_eq!(stats.records_written, 1);
}

#[tokio::test]
async fn dev_test_plan_writes_both_splits() {
    let server = MockServer::start().await;
    serve_package(&server, "/00/00/PMC1.tar.gz", pmc1_package()).await;

    let tmp = tempfile::tempdir().unwrap();
    let dev = write_manifest(tmp.path(), "dev.txt", &[PMC1_ROW]);
    let test = write_manifest(tmp.path(), "test.txt", &[]);
    let out = tmp.path().join("out");

    let plan = RunPlan::dev_test(&dev, &test, &out);
    let all = Harvester::with_jats(config_for(&server))
        .unwrap()
        .run_plan(&plan)
        .await
        .unwrap();

    assert_eq!(all.len(), 2);
    assert_eq!(all[0].records_written, 1);
    assert_eq!(all[1].attempted, 0);
    assert!(out.join("images/dev/PMC1/PMC1_fig-1.jpg").is_file());
    assert_eq!(read_lines(&out.join("dev.jsonl")).len(), 1);
    assert!(read_lines(&out.join("test.jsonl")).is_empty());
}
