use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

/// Face embedding vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn dimension(&self) -> usize {
        self.values.len()
    }

    /// Cosine similarity in [-1, 1]. Zero-norm vectors yield 0.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 { dot / denom } else { 0.0 }
    }

    /// Euclidean (L2) distance between two embeddings.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }

    /// Cosine distance `1 - similarity`, clamped to be non-negative.
    pub fn cosine_distance(&self, other: &Embedding) -> f32 {
        (1.0 - self.similarity(other)).max(0.0)
    }
}

/// A face found in one image: where it is and what it looks like.
///
/// Produced per frame by the extraction collaborator and never persisted.
#[derive(Debug, Clone)]
pub struct DetectedFace {
    pub bbox: BoundingBox,
    pub embedding: Embedding,
}

/// An enrolled person and their reference embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub name: String,
    pub embedding: Embedding,
}

#[derive(Error, Debug, PartialEq)]
pub enum ReferenceSetError {
    #[error("identity {name:?} has a {actual}-dim embedding, expected {expected}")]
    DimensionMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },
}

/// Ordered, immutable collection of enrolled identities.
///
/// Order is significant: when two identities are exactly equidistant from a
/// query, the one that appears first wins.
#[derive(Debug, Clone, Default)]
pub struct ReferenceSet {
    identities: Vec<Identity>,
}

impl ReferenceSet {
    /// Build a reference set; every embedding must share one dimension.
    pub fn new(identities: Vec<Identity>) -> Result<Self, ReferenceSetError> {
        if let Some(first) = identities.first() {
            let expected = first.embedding.dimension();
            if let Some(bad) = identities
                .iter()
                .find(|id| id.embedding.dimension() != expected)
            {
                return Err(ReferenceSetError::DimensionMismatch {
                    name: bad.name.clone(),
                    expected,
                    actual: bad.embedding.dimension(),
                });
            }
        }
        Ok(Self { identities })
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    /// Shared embedding dimension, or `None` for an empty set.
    pub fn dimension(&self) -> Option<usize> {
        self.identities.first().map(|id| id.embedding.dimension())
    }

    pub fn get(&self, index: usize) -> Option<&Identity> {
        self.identities.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Identity> {
        self.identities.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.identities.iter().map(|id| id.name.as_str())
    }
}

impl<'a> IntoIterator for &'a ReferenceSet {
    type Item = &'a Identity;
    type IntoIter = std::slice::Iter<'a, Identity>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Outcome of classifying one query embedding against a reference set.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    /// Name of the accepted identity; `None` means Unknown.
    pub identity: Option<String>,
    /// Distance to the nearest reference identity (+inf when there is none).
    pub distance: f32,
    pub accepted: bool,
    /// Nearest identity regardless of the threshold, for diagnostics.
    pub nearest: Option<String>,
}

impl MatchResult {
    pub fn unknown() -> Self {
        Self {
            identity: None,
            distance: f32::INFINITY,
            accepted: false,
            nearest: None,
        }
    }

    /// Display label: the accepted name or "Unknown".
    pub fn label(&self) -> &str {
        self.identity.as_deref().unwrap_or("Unknown")
    }
}
