//! Embedding extraction: image in, zero or more (box, embedding) pairs out.

use crate::detector::{DetectorError, FaceDetector};
use crate::preprocess::Preprocess;
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::DetectedFace;
use image::GrayImage;
use std::path::Path;
use thiserror::Error;

/// SCRFD detection model file name inside the model directory.
pub const DETECTOR_MODEL_FILE: &str = "det_10g.onnx";
/// ArcFace recognition model file name inside the model directory.
pub const RECOGNIZER_MODEL_FILE: &str = "w600k_r50.onnx";

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
}

/// Finds faces in an image and embeds each one.
///
/// "No face" is an empty result, never an error. All embeddings produced by
/// one extractor share a single dimension.
pub trait FaceExtractor {
    fn extract(&mut self, image: &GrayImage) -> Result<Vec<DetectedFace>, ExtractError>;
}

/// SCRFD + ArcFace extractor with preprocessing in front.
pub struct OnnxExtractor {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
    preprocess: Preprocess,
}

impl OnnxExtractor {
    /// Load both models from `model_dir`.
    pub fn load(model_dir: &Path, preprocess: Preprocess) -> Result<Self, ExtractError> {
        let detector = FaceDetector::load(&model_dir.join(DETECTOR_MODEL_FILE))?;
        let recognizer = FaceRecognizer::load(&model_dir.join(RECOGNIZER_MODEL_FILE))?;
        Ok(Self {
            detector,
            recognizer,
            preprocess,
        })
    }
}

impl FaceExtractor for OnnxExtractor {
    fn extract(&mut self, image: &GrayImage) -> Result<Vec<DetectedFace>, ExtractError> {
        let prepared = self.preprocess.apply(image);
        let boxes = self.detector.detect(&prepared)?;

        let mut faces = Vec::with_capacity(boxes.len());
        for bbox in boxes {
            if bbox.landmarks.is_none() {
                tracing::debug!(confidence = bbox.confidence, "face without landmarks skipped");
                continue;
            }
            let embedding = self.recognizer.extract(&prepared, &bbox)?;
            faces.push(DetectedFace { bbox, embedding });
        }
        Ok(faces)
    }
}
