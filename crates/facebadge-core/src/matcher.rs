//! Face matcher seam and roster comparison.

use crate::detector::DetectorError;
use crate::recognizer::RecognizerError;
use crate::types::{BoundingBox, Candidate, Embedding, Identity, MatchOutcome, RecognitionSample};
use image::RgbImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MatcherError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
    #[error("matcher backend: {0}")]
    Backend(String),
}

/// Face detection and embedding capability.
pub trait FaceMatcher {
    /// Find face regions without computing embeddings.
    fn locate(&mut self, frame: &RgbImage) -> Result<Vec<BoundingBox>, MatcherError>;

    /// Find face regions and compute one embedding per region.
    fn samples(&mut self, frame: &RgbImage) -> Result<Vec<RecognitionSample>, MatcherError>;

    /// Distance from `query` to every roster entry, in roster order.
    fn distances(&self, query: &Embedding, roster: &[Identity]) -> Vec<f32> {
        roster.iter().map(|id| query.distance(&id.reference)).collect()
    }
}

/// Pick the closest roster entry; it only counts as a match when the
/// distance is strictly below `tolerance`.
pub fn best_match(distances: &[f32], roster: &[Identity], tolerance: f32) -> MatchOutcome {
    let best = distances
        .iter()
        .copied()
        .enumerate()
        .filter(|(_, d)| !d.is_nan())
        .min_by(|(_, a), (_, b)| a.total_cmp(b));

    match best {
        Some((idx, distance)) if distance < tolerance && idx < roster.len() => MatchOutcome {
            candidate: Candidate::Known(roster[idx].id.clone()),
            distance,
        },
        Some((_, distance)) => MatchOutcome {
            candidate: Candidate::Unknown,
            distance,
        },
        None => MatchOutcome {
            candidate: Candidate::Unknown,
            distance: f32::INFINITY,
        },
    }
}

/// Classify one embedding against the roster using the matcher's metric.
pub fn classify<M: FaceMatcher + ?Sized>(
    matcher: &M,
    query: &Embedding,
    roster: &[Identity],
    tolerance: f32,
) -> MatchOutcome {
    let distances = matcher.distances(query, roster);
    best_match(&distances, roster, tolerance)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn identity(id: &str, values: Vec<f32>) -> Identity {
        Identity {
            id: id.into(),
            reference: Embedding::new(values),
            reference_image: PathBuf::from(format!("{id}.jpg")),
            avatar: None,
        }
    }

    #[test]
    fn test_best_match_picks_minimum() {
        let roster = vec![
            identity("alice", vec![1.0, 0.0]),
            identity("bob", vec![0.0, 1.0]),
        ];
        let outcome = best_match(&[0.9, 0.2], &roster, 0.5);
        assert_eq!(outcome.candidate, Candidate::Known("bob".into()));
        assert!((outcome.distance - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_best_match_tolerance_is_strict() {
        let roster = vec![identity("alice", vec![1.0, 0.0])];
        let outcome = best_match(&[0.5], &roster, 0.5);
        assert_eq!(outcome.candidate, Candidate::Unknown);
        assert!((outcome.distance - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_best_match_empty_roster() {
        let outcome = best_match(&[], &[], 0.5);
        assert_eq!(outcome.candidate, Candidate::Unknown);
        assert!(outcome.distance.is_infinite());
    }

    struct EuclideanOnly;

    impl FaceMatcher for EuclideanOnly {
        fn locate(&mut self, _: &RgbImage) -> Result<Vec<BoundingBox>, MatcherError> {
            Ok(Vec::new())
        }
        fn samples(&mut self, _: &RgbImage) -> Result<Vec<RecognitionSample>, MatcherError> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_classify_uses_euclidean_default() {
        let roster = vec![
            identity("alice", vec![1.0, 0.0, 0.0]),
            identity("bob", vec![0.0, 1.0, 0.0]),
        ];
        let query = Embedding::new(vec![0.9, 0.1, 0.0]);
        let outcome = classify(&EuclideanOnly, &query, &roster, 0.5);
        assert_eq!(outcome.candidate, Candidate::Known("alice".into()));
    }
}
