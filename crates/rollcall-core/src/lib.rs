//! rollcall-core: face extraction, reference set, and identity matching.
//!
//! Uses SCRFD for face detection and ArcFace for embeddings, both running via
//! ONNX Runtime on CPU. Matching is nearest-neighbor with a distance threshold.

pub mod alignment;
pub mod config;
pub mod detector;
pub mod enroll;
pub mod extract;
pub mod matcher;
pub mod preprocess;
pub mod recognizer;
pub mod types;

pub use config::Config;
pub use detector::FaceDetector;
pub use enroll::{build_reference_set, EnrollError, EnrollmentReport, SkipReason, SkippedAsset};
pub use extract::{ExtractError, FaceExtractor, OnnxExtractor};
pub use matcher::{DistanceMetric, Matcher, NearestNeighborMatcher, DEFAULT_THRESHOLD};
pub use preprocess::Preprocess;
pub use recognizer::FaceRecognizer;
pub use types::{BoundingBox, DetectedFace, Embedding, Identity, MatchResult, ReferenceSet};

/// Default directory for the ONNX model files.
pub fn default_model_dir() -> std::path::PathBuf {
    config::data_dir().join("models")
}
