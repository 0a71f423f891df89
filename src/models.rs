use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::Result;
use faceline_vision::{DetectorSettings, EncoderSettings, FaceEmbedder, FaceEmbedding, Pipeline};
use image::DynamicImage;
use once_cell::sync::OnceCell;

use crate::config::Config;

// Sessions are read-only after load and outlive every invocation in the process.
static PIPELINE: OnceCell<Loaded> = OnceCell::new();

#[derive(Debug, Clone, PartialEq)]
struct ModelPaths {
    detector: PathBuf,
    encoder: PathBuf,
}

struct Loaded {
    paths: ModelPaths,
    pipeline: Mutex<Pipeline>,
}

/// Handle to the process-wide detector/encoder, built on first use.
///
/// A failed load leaves nothing behind, so the next call tries again. Every
/// handle must name the model files that were loaded first.
#[derive(Debug, Clone)]
pub struct SharedPipeline {
    paths: ModelPaths,
    detector: DetectorSettings,
    encoder: EncoderSettings,
}

impl SharedPipeline {
    pub fn from_config(cfg: &Config) -> Self {
        Self::new(
            &cfg.detector.model,
            &cfg.encoder.model,
            cfg.detector.settings(),
            cfg.encoder.settings(),
        )
    }

    pub fn new(
        detector_model: &Path,
        encoder_model: &Path,
        detector: DetectorSettings,
        encoder: EncoderSettings,
    ) -> Self {
        Self {
            paths: ModelPaths {
                detector: detector_model.to_path_buf(),
                encoder: encoder_model.to_path_buf(),
            },
            detector,
            encoder,
        }
    }

    fn get(&self) -> Result<&'static Loaded> {
        let loaded = PIPELINE.get_or_try_init(|| {
            log::info!("initialising face models");
            Pipeline::new(
                &self.paths.detector,
                &self.paths.encoder,
                self.detector,
                self.encoder,
            )
            .map(|pipeline| Loaded {
                paths: self.paths.clone(),
                pipeline: Mutex::new(pipeline),
            })
        })?;
        same_models(&loaded.paths, &self.paths)?;
        Ok(loaded)
    }
}

fn same_models(loaded: &ModelPaths, wanted: &ModelPaths) -> Result<()> {
    if loaded != wanted {
        anyhow::bail!(
            "face models already loaded from {} and {}, cannot switch to {} and {}",
            loaded.detector.display(),
            loaded.encoder.display(),
            wanted.detector.display(),
            wanted.encoder.display()
        );
    }
    Ok(())
}

impl FaceEmbedder for SharedPipeline {
    fn embed_primary(&mut self, img: &DynamicImage) -> Result<Option<FaceEmbedding>> {
        let mut pipeline = self
            .get()?
            .pipeline
            .lock()
            .map_err(|_| anyhow::anyhow!("face model state poisoned"))?;
        pipeline.embed_primary(img)
    }
}
