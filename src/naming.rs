use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// Index of a video within a batch, carried from extraction to identification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SequenceNumber(pub u32);

impl SequenceNumber {
    /// Parse `<name>_<index>.<ext>`; any directory part of the key is ignored.
    pub fn from_key(key: &str) -> Result<Self> {
        let stem = Path::new(key)
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| PipelineError::Event(format!("key {:?} has no file name", key)))?;

        let (_, index) = stem.split_once('_').ok_or_else(|| {
            PipelineError::Event(format!("key {:?} is not of the form <name>_<index>", key))
        })?;
        let index = index.split('_').next().unwrap_or(index);

        index
            .parse::<u32>()
            .map(SequenceNumber)
            .map_err(|_| PipelineError::Event(format!("key {:?} has non-numeric index {:?}", key, index)))
    }

    /// `<prefix>_<NN>`, zero padded to two digits.
    pub fn stem(&self, prefix: &str) -> String {
        format!("{}_{:02}", prefix, self.0)
    }

    pub fn frame_key(&self, prefix: &str) -> String {
        format!("{}.jpg", self.stem(prefix))
    }

    pub fn result_key(&self, prefix: &str) -> String {
        format!("{}.txt", self.stem(prefix))
    }
}

impl fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}", self.0)
    }
}
