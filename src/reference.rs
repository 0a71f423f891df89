use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// Index-aligned reference embeddings and their labels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceDatabase {
    embeddings: Vec<Vec<f32>>,
    labels: Vec<String>,
}

impl ReferenceDatabase {
    pub fn new(embeddings: Vec<Vec<f32>>, labels: Vec<String>) -> Result<Self> {
        let db = Self { embeddings, labels };
        db.check()?;
        Ok(db)
    }

    fn check(&self) -> Result<()> {
        if self.embeddings.len() != self.labels.len() {
            return Err(PipelineError::Reference(format!(
                "{} embeddings but {} labels",
                self.embeddings.len(),
                self.labels.len()
            )));
        }
        if let Some(first) = self.embeddings.first() {
            if first.is_empty() {
                return Err(PipelineError::Reference("embeddings have zero length".into()));
            }
            if let Some((i, e)) = self
                .embeddings
                .iter()
                .enumerate()
                .find(|(_, e)| e.len() != first.len())
            {
                return Err(PipelineError::Reference(format!(
                    "embedding {} has dimension {}, expected {}",
                    i,
                    e.len(),
                    first.len()
                )));
            }
            if let Some(i) = self
                .embeddings
                .iter()
                .position(|e| e.iter().any(|v| !v.is_finite()))
            {
                return Err(PipelineError::Reference(format!(
                    "embedding {} has a non-finite component",
                    i
                )));
            }
        }
        Ok(())
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let db: Self = postcard::from_bytes(bytes)
            .map_err(|e| PipelineError::Reference(format!("decoding: {}", e)))?;
        db.check()?;
        Ok(db)
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        postcard::to_allocvec(self).map_err(|e| PipelineError::Reference(format!("encoding: {}", e)))
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Common embedding length, `None` for an empty database.
    pub fn dimension(&self) -> Option<usize> {
        self.embeddings.first().map(Vec::len)
    }

    pub fn embeddings(&self) -> &[Vec<f32>] {
        &self.embeddings
    }

    pub fn label(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(String::as_str)
    }
}
