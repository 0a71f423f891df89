//! First stage: pull a video, keep its first frame, hand the frame on.

use std::fs;
use std::path::{Path, PathBuf};

use faceline_vision::FrameDecoder;
use serde_json::{json, Value};

use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::error::{PipelineError, Result};
use crate::event::{FrameMessage, ObjectRef, Response, TriggerEvent};
use crate::naming::SequenceNumber;
use crate::retry::{retry, RetryPolicy};
use crate::store::ObjectStore;

pub struct FrameExtractor<S, D, F> {
    store: S,
    dispatcher: D,
    decoder: F,
    cfg: Config,
    policy: RetryPolicy,
}

/// Per-record outcome; upload and hand-off are observed separately.
#[derive(Debug, Default)]
pub struct ExtractReport {
    pub frames: Vec<String>,
    pub dispatched: Vec<String>,
    pub failures: Vec<(String, PipelineError)>,
}

impl<S, D, F> FrameExtractor<S, D, F>
where
    S: ObjectStore,
    D: Dispatcher,
    F: FrameDecoder,
{
    pub fn new(store: S, dispatcher: D, decoder: F, cfg: Config) -> Self {
        let policy = cfg.retry.policy();
        Self {
            store,
            dispatcher,
            decoder,
            cfg,
            policy,
        }
    }

    /// Invocation entry point: trigger event in, response envelope out.
    pub fn handle(&self, raw: &Value) -> Response {
        log::info!("frame extraction event: {}", raw);
        let objects = match TriggerEvent::parse(raw).and_then(|e| e.objects()) {
            Ok(objects) => objects,
            Err(err) => {
                log::error!("{}: {}", err.kind(), err);
                return Response::error(&err);
            }
        };

        let report = self.run(&objects);
        let failed: Vec<&str> = report.failures.iter().map(|(k, _)| k.as_str()).collect();
        match report.failures.first() {
            None => Response::ok(json!({
                "message": format!(
                    "Successfully processed {} video(s) and uploaded frames to {}",
                    report.frames.len(),
                    self.cfg.frames_container
                ),
                "frames": report.frames,
            })),
            Some((_, err)) => Response::error_with(
                err,
                json!({
                    "frames": report.frames,
                    "dispatched": report.dispatched,
                    "failed": failed,
                }),
            ),
        }
    }

    /// Process every record, carrying on past individual failures.
    pub fn run(&self, objects: &[ObjectRef]) -> ExtractReport {
        let mut report = ExtractReport::default();
        for object in objects {
            let message = match self.extract(object) {
                Ok(message) => message,
                Err(err) => {
                    log::error!("{} processing {}: {}", err.kind(), object.key, err);
                    report.failures.push((object.key.clone(), err));
                    continue;
                }
            };
            report.frames.push(message.key.clone());

            match retry(&self.policy, "dispatch", || self.dispatcher.dispatch(&message)) {
                Ok(()) => report.dispatched.push(message.key.clone()),
                Err(err) => {
                    let err = PipelineError::from(err);
                    log::error!("frame {} uploaded but not dispatched: {}", message.key, err);
                    report.failures.push((object.key.clone(), err));
                }
            }
        }
        report
    }

    /// Download, decode and upload one video's first frame.
    pub fn extract(&self, object: &ObjectRef) -> Result<FrameMessage> {
        let sequence = SequenceNumber::from_key(&object.key)?;
        let frame_key = sequence.frame_key(&self.cfg.frame_prefix);
        log::info!(
            "processing {}/{} as {}",
            object.container,
            object.key,
            frame_key
        );

        let scratch = Scratch::create(&self.cfg.work_dir)?;
        let file_name = Path::new(&object.key)
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "video".into());
        let video = scratch.path().join(file_name);
        let frame = scratch.path().join(&frame_key);

        retry(&self.policy, "video download", || {
            self.store.download(&object.container, &object.key, &video)
        })?;
        self.decoder.extract_first_frame(&video, &frame)?;
        retry(&self.policy, "frame upload", || {
            self.store
                .upload(&frame, &self.cfg.frames_container, &frame_key)
        })?;

        Ok(FrameMessage {
            bucket: self.cfg.frames_container.clone(),
            key: frame_key,
            sequence: Some(sequence),
        })
    }
}

/// Per-invocation working directory, removed on drop.
pub(crate) struct Scratch(PathBuf);

impl Scratch {
    pub(crate) fn create(base: &Path) -> Result<Self> {
        let dir = base.join(uuid::Uuid::new_v4().to_string());
        fs::create_dir_all(&dir).map_err(|e| {
            PipelineError::Config(format!("creating work dir {}: {}", dir.display(), e))
        })?;
        Ok(Self(dir))
    }

    pub(crate) fn path(&self) -> &Path {
        &self.0
    }
}

impl Drop for Scratch {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_dir_all(&self.0) {
            log::debug!("leaving work dir {}: {}", self.0.display(), e);
        }
    }
}
