use std::path::Path;

use anyhow::{Context, Result};
use image::DynamicImage;
use ort::session::Session;

use crate::face::{self, Detection, DetectorSettings, Embedding, EncoderSettings};

/// The primary face of an image together with its embedding.
#[derive(Debug, Clone)]
pub struct FaceEmbedding {
    pub detection: Detection,
    pub embedding: Embedding,
}

/// Detect the primary face in an image and embed it.
///
/// `Ok(None)` means the image was processed and contained no usable face.
pub trait FaceEmbedder {
    fn embed_primary(&mut self, img: &DynamicImage) -> Result<Option<FaceEmbedding>>;
}

/// Full pipeline: detect faces → pick primary → align → encode
pub struct Pipeline {
    pub detector: Session,
    pub encoder: Session,
    pub detector_settings: DetectorSettings,
    pub encoder_settings: EncoderSettings,
}

impl Pipeline {
    pub fn new(
        detector_model: &Path,
        encoder_model: &Path,
        detector_settings: DetectorSettings,
        encoder_settings: EncoderSettings,
    ) -> Result<Self> {
        Ok(Self {
            detector: crate::model::detector_session(detector_model)?,
            encoder: crate::model::encoder_session(encoder_model)?,
            detector_settings,
            encoder_settings,
        })
    }
}

impl FaceEmbedder for Pipeline {
    fn embed_primary(&mut self, img: &DynamicImage) -> Result<Option<FaceEmbedding>> {
        let detections = face::detect_faces(&mut self.detector, img, &self.detector_settings)
            .context("detecting faces")?;

        let Some(best) = face::primary_detection(&detections) else {
            log::info!("no face detected");
            return Ok(None);
        };
        log::info!(
            "primary face score {:.3} of {} candidate(s)",
            best.score,
            detections.len()
        );

        let crop = face::align_face(img, best, self.encoder_settings.input_size)
            .context("aligning face")?;
        let embedding = face::encode_face(&mut self.encoder, &crop, &self.encoder_settings)
            .context("encoding face")?;

        Ok(Some(FaceEmbedding {
            detection: best.clone(),
            embedding,
        }))
    }
}
