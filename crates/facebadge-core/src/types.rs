use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Bounding box for a detected face, in source-frame pixel coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

impl BoundingBox {
    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// Intersection-over-Union with another box.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = (self.x + self.width).min(other.x + other.width);
        let y2 = (self.y + self.height).min(other.y + other.height);

        let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        let union = self.area() + other.area() - inter;
        if union > 0.0 {
            inter / union
        } else {
            0.0
        }
    }
}

/// Face embedding vector (512-dimensional and L2-normalized for ArcFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    /// Euclidean distance between two embeddings. Lower = more similar.
    pub fn distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// One face seen in one camera frame. Never persisted.
#[derive(Debug, Clone)]
pub struct RecognitionSample {
    pub embedding: Embedding,
    pub bounding_box: BoundingBox,
}

/// A known person enrolled in the roster.
#[derive(Debug, Clone)]
pub struct Identity {
    pub id: String,
    pub reference: Embedding,
    /// Enrollment photo; sent as the badge image on login.
    pub reference_image: PathBuf,
    pub avatar: Option<PathBuf>,
}

/// Who a scan sample, or a resolved scan cycle, points at.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Candidate {
    Known(String),
    Unknown,
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Candidate::Known(id) => f.write_str(id),
            Candidate::Unknown => f.write_str("UNKNOWN"),
        }
    }
}

/// Result of comparing one embedding against the whole roster.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchOutcome {
    pub candidate: Candidate,
    /// Smallest distance seen, even when it did not pass the tolerance.
    /// Infinite for an empty roster.
    pub distance: f32,
}

impl MatchOutcome {
    pub fn is_match(&self) -> bool {
        matches!(self.candidate, Candidate::Known(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox(x: f32, y: f32, w: f32, h: f32) -> BoundingBox {
        BoundingBox { x, y, width: w, height: h, confidence: 1.0 }
    }

    #[test]
    fn test_distance_identical() {
        let a = Embedding::new(vec![0.6, 0.8]);
        assert!(a.distance(&a).abs() < 1e-6);
    }

    #[test]
    fn test_distance_unit_vectors() {
        let a = Embedding::new(vec![1.0, 0.0]);
        let b = Embedding::new(vec![0.0, 1.0]);
        assert!((a.distance(&b) - 2f32.sqrt()).abs() < 1e-6);
    }

    #[test]
    fn test_iou_identical() {
        let a = bbox(0.0, 0.0, 100.0, 100.0);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_disjoint() {
        let a = bbox(0.0, 0.0, 10.0, 10.0);
        let b = bbox(20.0, 20.0, 10.0, 10.0);
        assert_eq!(a.iou(&b), 0.0);
    }

    #[test]
    fn test_iou_half_overlap() {
        let a = bbox(0.0, 0.0, 10.0, 10.0);
        let b = bbox(5.0, 0.0, 10.0, 10.0);
        assert!((a.iou(&b) - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_candidate_display() {
        assert_eq!(Candidate::Known("alice".into()).to_string(), "alice");
        assert_eq!(Candidate::Unknown.to_string(), "UNKNOWN");
    }
}
