//! Nearest-neighbor identity matching.
//!
//! A query is compared against every reference identity, the closest one is
//! selected, and only that candidate is gated by the threshold. A second-best
//! identity is never considered, even when it also falls under the threshold.

use crate::types::{DetectedFace, Embedding, MatchResult, ReferenceSet};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Default acceptance threshold (smaller is stricter).
pub const DEFAULT_THRESHOLD: f32 = 0.5;

/// Distance between two embeddings. Both variants are symmetric and non-negative.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    /// L2 distance.
    #[default]
    #[serde(alias = "l2")]
    Euclidean,
    /// `1 - cosine similarity`, in [0, 2].
    Cosine,
}

impl DistanceMetric {
    pub fn distance(self, a: &Embedding, b: &Embedding) -> f32 {
        match self {
            DistanceMetric::Euclidean => a.euclidean_distance(b),
            DistanceMetric::Cosine => a.cosine_distance(b),
        }
    }
}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DistanceMetric::Euclidean => f.write_str("euclidean"),
            DistanceMetric::Cosine => f.write_str("cosine"),
        }
    }
}

impl FromStr for DistanceMetric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "euclidean" | "l2" => Ok(DistanceMetric::Euclidean),
            "cosine" => Ok(DistanceMetric::Cosine),
            other => Err(format!("unknown distance metric: {other}")),
        }
    }
}

/// Strategy for classifying a query embedding against a reference set.
pub trait Matcher {
    fn compare(&self, query: &Embedding, reference: &ReferenceSet, threshold: f32) -> MatchResult;

    /// Match every face of a frame independently.
    fn compare_all(
        &self,
        faces: &[DetectedFace],
        reference: &ReferenceSet,
        threshold: f32,
    ) -> Vec<MatchResult> {
        faces
            .iter()
            .map(|face| self.compare(&face.embedding, reference, threshold))
            .collect()
    }
}

/// Argmin over the reference set, then a strict `distance < threshold` gate.
///
/// Exact ties go to the identity that appears first. NaN distances never win.
#[derive(Debug, Clone, Copy, Default)]
pub struct NearestNeighborMatcher {
    pub metric: DistanceMetric,
}

impl NearestNeighborMatcher {
    pub fn new(metric: DistanceMetric) -> Self {
        Self { metric }
    }
}

impl Matcher for NearestNeighborMatcher {
    fn compare(&self, query: &Embedding, reference: &ReferenceSet, threshold: f32) -> MatchResult {
        let Some(dim) = reference.dimension() else {
            return MatchResult::unknown();
        };
        if query.dimension() != dim {
            tracing::warn!(
                expected = dim,
                actual = query.dimension(),
                "query embedding dimension mismatch; classifying as unknown"
            );
            return MatchResult::unknown();
        }

        let mut best_dist = f32::INFINITY;
        let mut best_idx: Option<usize> = None;

        for (i, identity) in reference.iter().enumerate() {
            let dist = self.metric.distance(query, &identity.embedding);
            // Strict comparison keeps the earliest identity on exact ties.
            if dist < best_dist {
                best_dist = dist;
                best_idx = Some(i);
            }
        }

        let Some(idx) = best_idx else {
            return MatchResult::unknown();
        };
        let nearest = reference.get(idx).map(|id| id.name.clone());
        let accepted = best_dist < threshold;

        MatchResult {
            identity: if accepted { nearest.clone() } else { None },
            distance: best_dist,
            accepted,
            nearest,
        }
    }
}
