use faceline_vision::face::euclidean_distance;

use crate::error::{PipelineError, Result};
use crate::reference::ReferenceDatabase;
use crate::Embedding;

/// Text written in place of a label when the image holds no face.
pub const NO_FACE: &str = "No face detected";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Match {
    pub index: usize,
    pub distance: f32,
}

/// Outcome of identifying one image. `NoFace` is a success, not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum Identification {
    Matched {
        label: String,
        index: usize,
        distance: f32,
    },
    NoFace,
}

impl Identification {
    /// Content of the result artifact.
    pub fn text(&self) -> &str {
        match self {
            Self::Matched { label, .. } => label,
            Self::NoFace => NO_FACE,
        }
    }

    pub fn label(&self) -> Option<&str> {
        match self {
            Self::Matched { label, .. } => Some(label),
            Self::NoFace => None,
        }
    }
}

/// Linear scan for the closest reference embedding. Strict `<` keeps the
/// lowest index on exact ties. `None` only for an empty database.
pub fn nearest(db: &ReferenceDatabase, query: &[f32]) -> Result<Option<Match>> {
    if let Some(dim) = db.dimension() {
        if dim != query.len() {
            return Err(PipelineError::Reference(format!(
                "query has dimension {}, database has {}",
                query.len(),
                dim
            )));
        }
    }
    if query.iter().any(|v| !v.is_finite()) {
        return Err(PipelineError::Reference(
            "query embedding has a non-finite component".into(),
        ));
    }

    let mut best: Option<Match> = None;
    for (index, reference) in db.embeddings().iter().enumerate() {
        let distance = euclidean_distance(query, reference);
        if best.map_or(true, |b| distance < b.distance) {
            best = Some(Match { index, distance });
        }
    }
    Ok(best)
}

/// Map a detection outcome onto a label.
///
/// No face yields `NoFace` whatever the database holds; a face with an empty
/// database is a reference error.
pub fn identify(face: Option<&Embedding>, db: &ReferenceDatabase) -> Result<Identification> {
    let Some(embedding) = face else {
        return Ok(Identification::NoFace);
    };

    let query = embedding.to_vec();
    let found = nearest(db, &query)?
        .ok_or_else(|| PipelineError::Reference("database is empty, nothing to match".into()))?;

    let label = db
        .label(found.index)
        .ok_or_else(|| PipelineError::Reference(format!("no label at index {}", found.index)))?;
    log::info!(
        "nearest reference #{} {:?} at distance {:.4} of {}",
        found.index,
        label,
        found.distance,
        db.len()
    );

    Ok(Identification::Matched {
        label: label.to_string(),
        index: found.index,
        distance: found.distance,
    })
}
