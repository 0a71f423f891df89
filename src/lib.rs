pub mod config;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod extractor;
pub mod identifier;
pub mod matcher;
pub mod models;
pub mod naming;
pub mod reference;
pub mod retry;
pub mod store;

// Re-export vision types for convenience
pub use faceline_vision::{face, frame, pipeline, Detection, Embedding, FaceEmbedder, FaceEmbedding};

pub use error::{PipelineError, Result};
pub use event::{FrameMessage, Response};
pub use extractor::FrameExtractor;
pub use identifier::FaceIdentifier;
