pub mod face;
pub mod frame;
pub mod model;
pub mod pipeline;
pub mod yunet;

// Re-export commonly used types
pub use face::{Detection, DetectorSettings, Embedding, EncoderSettings};
pub use frame::{DecodeError, FfmpegDecoder, FrameDecoder};
pub use pipeline::{FaceEmbedder, FaceEmbedding, Pipeline};
