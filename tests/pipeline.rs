use std::cell::Cell;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use faceline::config::Config;
use faceline::dispatch::{Dispatcher, SpoolDispatcher};
use faceline::error::DispatchError;
use faceline::identifier::read_result;
use faceline::matcher::NO_FACE;
use faceline::reference::ReferenceDatabase;
use faceline::store::{LocalStore, ObjectStore};
use faceline::{
    Detection, Embedding, FaceEmbedder, FaceEmbedding, FaceIdentifier, FrameExtractor,
    FrameMessage,
};
use faceline_vision::{DecodeError, FrameDecoder};
use image::DynamicImage;
use serde_json::{json, Value};
use tempfile::TempDir;

/// Writes a small JPEG instead of decoding the video.
struct FakeDecoder;

impl FrameDecoder for FakeDecoder {
    fn extract_first_frame(&self, video: &Path, output: &Path) -> Result<PathBuf, DecodeError> {
        if fs::read(video)?.is_empty() {
            return Err(DecodeError::NoOutput(output.to_path_buf()));
        }
        image::RgbImage::from_pixel(8, 8, image::Rgb([200, 150, 100]))
            .save(output)
            .map_err(|e| DecodeError::Io(std::io::Error::other(e)))?;
        Ok(output.to_path_buf())
    }
}

/// Returns a fixed embedding (or none) for every image.
struct FakeEmbedder {
    embedding: Option<Vec<f32>>,
}

impl FakeEmbedder {
    fn face(v: &[f32]) -> Self {
        Self {
            embedding: Some(v.to_vec()),
        }
    }

    fn no_face() -> Self {
        Self {
            embedding: None,
        }
    }
}

impl FaceEmbedder for FakeEmbedder {
    fn embed_primary(&mut self, _img: &DynamicImage) -> Result<Option<FaceEmbedding>> {
        Ok(self.embedding.as_ref().map(|v| FaceEmbedding {
            detection: Detection {
                bbox: [0.0, 0.0, 8.0, 8.0],
                score: 0.99,
                landmarks: [0.0; 10],
            },
            embedding: Embedding::from_vec(v.clone()),
        }))
    }
}

/// Fails the first `failures` dispatches with an io error.
struct FlakyDispatcher {
    inner: SpoolDispatcher,
    failures: Cell<u32>,
}

impl Dispatcher for FlakyDispatcher {
    fn dispatch(&self, message: &FrameMessage) -> Result<(), DispatchError> {
        if self.failures.get() > 0 {
            self.failures.set(self.failures.get() - 1);
            return Err(DispatchError::Io(std::io::Error::other("queue unavailable")));
        }
        self.inner.dispatch(message)
    }
}

struct Env {
    dir: TempDir,
    cfg: Config,
}

impl Env {
    fn new() -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = Config::default();
        cfg.store_root = dir.path().join("store");
        cfg.spool_dir = dir.path().join("spool");
        cfg.work_dir = dir.path().join("work");
        cfg.retry.initial_interval_ms = 1;
        cfg.retry.maximum_interval_ms = 2;
        Self { dir, cfg }
    }

    fn store(&self) -> LocalStore {
        LocalStore::new(&self.cfg.store_root)
    }

    fn spool(&self) -> SpoolDispatcher {
        SpoolDispatcher::new(&self.cfg.spool_dir)
    }

    fn put_reference(&self, rows: &[(&[f32], &str)]) {
        let db = ReferenceDatabase::new(
            rows.iter().map(|(e, _)| e.to_vec()).collect(),
            rows.iter().map(|(_, l)| l.to_string()).collect(),
        )
        .unwrap();
        self.store()
            .put_bytes(&db.encode().unwrap(), &self.cfg.data_container, &self.cfg.reference_key)
            .unwrap();
    }

    fn put_frame(&self, key: &str) {
        let path = self.dir.path().join(key);
        image::RgbImage::from_pixel(8, 8, image::Rgb([10, 20, 30]))
            .save(&path)
            .unwrap();
        self.store()
            .upload(&path, &self.cfg.frames_container, key)
            .unwrap();
    }

    fn identifier(&self, embedder: FakeEmbedder) -> FaceIdentifier<LocalStore, FakeEmbedder> {
        FaceIdentifier::new(self.store(), embedder, self.cfg.clone())
    }

    fn result(&self, key: &str) -> String {
        read_result(&self.store(), &self.cfg.results_container, key).unwrap()
    }
}

fn trigger(bucket: &str, keys: &[&str]) -> Value {
    json!({
        "Records": keys
            .iter()
            .map(|k| json!({ "s3": { "bucket": { "name": bucket }, "object": { "key": k } } }))
            .collect::<Vec<_>>()
    })
}

fn body(response: &faceline::Response) -> Value {
    response.body_json().unwrap()
}

#[test]
fn closest_reference_is_reported() {
    let env = Env::new();
    env.put_reference(&[(&[0.9, 0.0], "alice"), (&[0.3, 0.0], "bob")]);
    env.put_frame("test_00.jpg");

    let mut stage = env.identifier(FakeEmbedder::face(&[0.0, 0.0]));
    let response = stage.handle(&json!({ "bucket": "frames", "key": "test_00.jpg" }));

    assert!(response.is_success(), "{}", response.body);
    let body = body(&response);
    assert_eq!(body["recName"], "bob");
    assert_eq!(body["output_file"], "test_00.txt");
    assert_eq!(body["message"], "Face recognition completed successfully");
    assert_eq!(env.result("test_00.txt"), "bob");
}

#[test]
fn exact_tie_reports_first_label() {
    let env = Env::new();
    env.put_reference(&[(&[0.5, 0.0], "alice"), (&[0.0, -0.5], "bob")]);
    env.put_frame("test_01.jpg");

    let mut stage = env.identifier(FakeEmbedder::face(&[0.0, 0.0]));
    let response = stage.handle(&json!({ "bucket": "frames", "key": "test_01.jpg" }));

    assert_eq!(body(&response)["recName"], "alice");
    assert_eq!(env.result("test_01.txt"), "alice");
}

#[test]
fn no_face_still_writes_result() {
    let env = Env::new();
    env.put_reference(&[(&[0.5, 0.0], "alice")]);
    env.put_frame("test_02.jpg");

    let mut stage = env.identifier(FakeEmbedder::no_face());
    let response = stage.handle(&json!({ "bucket": "frames", "key": "test_02.jpg" }));

    assert!(response.is_success());
    assert_eq!(body(&response)["recName"], Value::Null);
    assert_eq!(env.result("test_02.txt"), NO_FACE);
}

#[test]
fn wrapped_body_payload_is_accepted() {
    let env = Env::new();
    env.put_reference(&[(&[1.0, 1.0], "carol")]);
    env.put_frame("test_03.jpg");

    let mut stage = env.identifier(FakeEmbedder::face(&[0.9, 1.0]));
    let payload = json!({ "body": "{\"bucket\":\"frames\",\"key\":\"test_03.jpg\"}" });
    let response = stage.handle(&payload);

    assert_eq!(body(&response)["recName"], "carol");
}

#[test]
fn labels_round_trip_unchanged() {
    let env = Env::new();
    let label = "Zoë O'Brien  (ref #2)";
    env.put_reference(&[(&[0.0, 0.0], label)]);
    env.put_frame("test_04.jpg");

    let mut stage = env.identifier(FakeEmbedder::face(&[0.1, 0.1]));
    stage.handle(&json!({ "bucket": "frames", "key": "test_04.jpg" }));

    assert_eq!(env.result("test_04.txt"), label);
}

#[test]
fn identification_is_repeatable() {
    let env = Env::new();
    env.put_reference(&[(&[0.2, 0.8], "alice"), (&[0.7, 0.1], "bob"), (&[0.4, 0.4], "carol")]);
    env.put_frame("test_05.jpg");

    let mut stage = env.identifier(FakeEmbedder::face(&[0.45, 0.35]));
    let msg = FrameMessage {
        bucket: "frames".into(),
        key: "test_05.jpg".into(),
        sequence: None,
    };
    let first = stage.run(&msg).unwrap();
    let second = stage.run(&msg).unwrap();
    assert_eq!(first, second);
    assert_eq!(first.identification.label(), Some("carol"));
}

#[test]
fn missing_reference_database_is_a_transfer_error() {
    let env = Env::new();
    env.put_frame("test_06.jpg");

    let mut stage = env.identifier(FakeEmbedder::face(&[0.0]));
    let response = stage.handle(&json!({ "bucket": "frames", "key": "test_06.jpg" }));

    assert_eq!(response.status_code, 500);
    assert_eq!(body(&response)["kind"], "TransferError");
}

#[test]
fn face_against_empty_database_fails_without_output() {
    let env = Env::new();
    env.put_reference(&[]);
    env.put_frame("test_07.jpg");

    let mut stage = env.identifier(FakeEmbedder::face(&[0.0, 0.0]));
    let response = stage.handle(&json!({ "bucket": "frames", "key": "test_07.jpg" }));

    assert_eq!(body(&response)["kind"], "ReferenceError");
    assert!(read_result(&env.store(), "results", "test_07.txt").is_err());
}

#[test]
fn unreadable_image_is_a_detection_error() {
    let env = Env::new();
    env.put_reference(&[(&[0.0], "alice")]);
    env.store()
        .put_bytes(b"not an image", "frames", "test_08.jpg")
        .unwrap();

    let mut stage = env.identifier(FakeEmbedder::face(&[0.0]));
    let response = stage.handle(&json!({ "bucket": "frames", "key": "test_08.jpg" }));

    assert_eq!(body(&response)["kind"], "DetectionError");
}

#[test]
fn extraction_names_frame_after_video_index() {
    let env = Env::new();
    env.store().put_bytes(b"video", "videos", "clip_07.mp4").unwrap();

    let extractor = FrameExtractor::new(env.store(), env.spool(), FakeDecoder, env.cfg.clone());
    let response = extractor.handle(&trigger("videos", &["clip_07.mp4"]));

    assert!(response.is_success(), "{}", response.body);
    assert_eq!(body(&response)["frames"], json!(["test_07.jpg"]));
    assert!(env.store().get_bytes("frames", "test_07.jpg").is_ok());

    let pending = env.spool().pending().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].message.bucket, "frames");
    assert_eq!(pending[0].message.key, "test_07.jpg");
    assert_eq!(pending[0].message.sequence().unwrap().0, 7);
}

#[test]
fn two_stages_chain_through_the_spool() {
    let env = Env::new();
    env.put_reference(&[(&[1.0, 0.0], "alice"), (&[0.0, 1.0], "bob")]);
    env.store().put_bytes(b"video", "videos", "clip_07.mp4").unwrap();

    let extractor = FrameExtractor::new(env.store(), env.spool(), FakeDecoder, env.cfg.clone());
    assert!(extractor.handle(&trigger("videos", &["clip_07.mp4"])).is_success());

    let mut stage = env.identifier(FakeEmbedder::face(&[0.1, 0.9]));
    for entry in env.spool().pending().unwrap() {
        let response = stage.handle(&serde_json::to_value(&entry.message).unwrap());
        assert!(response.is_success(), "{}", response.body);
        env.spool().complete(&entry).unwrap();
    }

    assert_eq!(env.result("test_07.txt"), "bob");
    assert!(env.spool().pending().unwrap().is_empty());
}

#[test]
fn missing_video_fails_but_other_records_proceed() {
    let env = Env::new();
    env.store().put_bytes(b"video", "videos", "clip_02.mp4").unwrap();

    let extractor = FrameExtractor::new(env.store(), env.spool(), FakeDecoder, env.cfg.clone());
    let response = extractor.handle(&trigger("videos", &["clip_01.mp4", "clip_02.mp4"]));

    assert_eq!(response.status_code, 500);
    let body = body(&response);
    assert_eq!(body["kind"], "TransferError");
    assert_eq!(body["failed"], json!(["clip_01.mp4"]));
    assert_eq!(body["frames"], json!(["test_02.jpg"]));
    assert_eq!(env.spool().pending().unwrap().len(), 1);
}

#[test]
fn decode_failure_is_reported_as_such() {
    let env = Env::new();
    env.store().put_bytes(b"", "videos", "clip_03.mp4").unwrap();

    let extractor = FrameExtractor::new(env.store(), env.spool(), FakeDecoder, env.cfg.clone());
    let response = extractor.handle(&trigger("videos", &["clip_03.mp4"]));

    assert_eq!(body(&response)["kind"], "DecodeError");
    assert!(env.store().get_bytes("frames", "test_03.jpg").is_err());
}

#[test]
fn badly_named_video_is_an_event_error() {
    let env = Env::new();
    env.store().put_bytes(b"video", "videos", "holiday.mp4").unwrap();

    let extractor = FrameExtractor::new(env.store(), env.spool(), FakeDecoder, env.cfg.clone());
    let response = extractor.handle(&trigger("videos", &["holiday.mp4"]));

    assert_eq!(body(&response)["kind"], "EventError");
}

#[test]
fn transient_dispatch_failures_are_retried() {
    let env = Env::new();
    env.store().put_bytes(b"video", "videos", "clip_04.mp4").unwrap();

    let dispatcher = FlakyDispatcher {
        inner: env.spool(),
        failures: Cell::new(2),
    };
    let extractor = FrameExtractor::new(env.store(), dispatcher, FakeDecoder, env.cfg.clone());
    let response = extractor.handle(&trigger("videos", &["clip_04.mp4"]));

    assert!(response.is_success(), "{}", response.body);
    assert_eq!(env.spool().pending().unwrap().len(), 1);
}

#[test]
fn exhausted_dispatch_keeps_uploaded_frame_observable() {
    let env = Env::new();
    env.store().put_bytes(b"video", "videos", "clip_05.mp4").unwrap();

    let dispatcher = FlakyDispatcher {
        inner: env.spool(),
        failures: Cell::new(10),
    };
    let extractor = FrameExtractor::new(env.store(), dispatcher, FakeDecoder, env.cfg.clone());
    let response = extractor.handle(&trigger("videos", &["clip_05.mp4"]));

    assert_eq!(response.status_code, 500);
    let body = body(&response);
    assert_eq!(body["kind"], "DispatchError");
    assert_eq!(body["frames"], json!(["test_05.jpg"]));
    assert_eq!(body["dispatched"], json!([]));
    assert!(env.store().get_bytes("frames", "test_05.jpg").is_ok());
    assert!(env.spool().pending().unwrap().is_empty());
}
