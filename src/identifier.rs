//! Second stage: name the face in an extracted frame.

use std::io;
use std::path::Path;

use faceline_vision::FaceEmbedder;
use serde_json::{json, Value};

use crate::config::Config;
use crate::error::{PipelineError, Result, TransferError};
use crate::event::{FrameMessage, Response};
use crate::extractor::Scratch;
use crate::matcher::{identify, Identification};
use crate::reference::ReferenceDatabase;
use crate::retry::{retry, RetryPolicy};
use crate::store::ObjectStore;

pub struct FaceIdentifier<S, E> {
    store: S,
    embedder: E,
    cfg: Config,
    policy: RetryPolicy,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IdentifyOutcome {
    pub identification: Identification,
    pub output_file: String,
}

impl<S, E> FaceIdentifier<S, E>
where
    S: ObjectStore,
    E: FaceEmbedder,
{
    pub fn new(store: S, embedder: E, cfg: Config) -> Self {
        let policy = cfg.retry.policy();
        Self {
            store,
            embedder,
            cfg,
            policy,
        }
    }

    /// Invocation entry point: dispatch payload in, response envelope out.
    pub fn handle(&mut self, raw: &Value) -> Response {
        log::info!("face identification event: {}", raw);
        match FrameMessage::parse(raw).and_then(|msg| self.run(&msg)) {
            Ok(outcome) => Response::ok(json!({
                "message": "Face recognition completed successfully",
                "recName": outcome.identification.label(),
                "output_file": outcome.output_file,
            })),
            Err(err) => {
                log::error!("{}: {}", err.kind(), err);
                Response::error(&err)
            }
        }
    }

    pub fn run(&mut self, message: &FrameMessage) -> Result<IdentifyOutcome> {
        let sequence = message.sequence()?;
        let output_file = sequence.result_key(&self.cfg.frame_prefix);

        let db = self.load_reference()?;

        let scratch = Scratch::create(&self.cfg.work_dir)?;
        let file_name = Path::new(&message.key)
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "frame".into());
        let local = scratch.path().join(file_name);
        retry(&self.policy, "frame download", || {
            self.store.download(&message.bucket, &message.key, &local)
        })?;

        let img = image::open(&local).map_err(|e| {
            PipelineError::Detection(anyhow::anyhow!("reading image {}: {}", message.key, e))
        })?;
        let face = self
            .embedder
            .embed_primary(&img)
            .map_err(PipelineError::Detection)?;

        let identification = identify(face.as_ref().map(|f| &f.embedding), &db)?;

        retry(&self.policy, "result upload", || {
            self.store.put_bytes(
                identification.text().as_bytes(),
                &self.cfg.results_container,
                &output_file,
            )
        })?;
        log::info!(
            "wrote {:?} to {}/{}",
            identification.text(),
            self.cfg.results_container,
            output_file
        );

        Ok(IdentifyOutcome {
            identification,
            output_file,
        })
    }

    pub fn load_reference(&self) -> Result<ReferenceDatabase> {
        let bytes = retry(&self.policy, "reference download", || {
            self.store
                .get_bytes(&self.cfg.data_container, &self.cfg.reference_key)
        })?;
        let db = ReferenceDatabase::decode(&bytes)?;
        log::info!(
            "loaded {} reference embedding(s) of dimension {:?}",
            db.len(),
            db.dimension()
        );
        Ok(db)
    }
}

/// Read a result artifact back as text.
pub fn read_result(store: &impl ObjectStore, container: &str, key: &str) -> Result<String> {
    let bytes = store.get_bytes(container, key)?;
    String::from_utf8(bytes).map_err(|e| {
        TransferError::from_io(container, key, io::Error::new(io::ErrorKind::InvalidData, e)).into()
    })
}
