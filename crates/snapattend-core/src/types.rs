use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Length of every face descriptor.
pub const DESCRIPTOR_DIM: usize = 128;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DescriptorError {
    #[error("descriptor must have {DESCRIPTOR_DIM} values, got {0}")]
    InvalidLength(usize),
}

/// Axis-aligned face region in image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn from_corners(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
        }
    }

    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// Intersection-over-union with another box, 0.0 when the union is empty.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let left = self.x.max(other.x);
        let top = self.y.max(other.y);
        let right = (self.x + self.width).min(other.x + other.width);
        let bottom = (self.y + self.height).min(other.y + other.height);

        let overlap = (right - left).max(0.0) * (bottom - top).max(0.0);
        let union = self.area() + other.area() - overlap;
        if union > 0.0 {
            overlap / union
        } else {
            0.0
        }
    }
}

/// A facial keypoint. Detectors that only report 2D positions leave `z` at 0.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point3 {
    pub x: f32,
    pub y: f32,
    #[serde(default)]
    pub z: f32,
}

impl Point3 {
    pub const ORIGIN: Point3 = Point3 { x: 0.0, y: 0.0, z: 0.0 };

    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn planar(x: f32, y: f32) -> Self {
        Self { x, y, z: 0.0 }
    }

    pub fn distance(&self, other: &Point3) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    pub fn midpoint(&self, other: &Point3) -> Point3 {
        Point3 {
            x: (self.x + other.x) / 2.0,
            y: (self.y + other.y) / 2.0,
            z: (self.z + other.z) / 2.0,
        }
    }
}

/// Named facial keypoints. Each point is either present with coordinates or absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Landmarks {
    #[serde(default)]
    pub left_eye: Option<Point3>,
    #[serde(default)]
    pub right_eye: Option<Point3>,
    #[serde(default)]
    pub nose_tip: Option<Point3>,
    #[serde(default)]
    pub mouth: Option<Point3>,
}

/// One face found in an image by a detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BoundingBox,
    /// Detector confidence in [0, 1].
    pub confidence: f32,
    #[serde(default)]
    pub landmarks: Option<Landmarks>,
}

/// Fixed-length geometric signature of a face.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f32>", into = "Vec<f32>")]
pub struct Descriptor {
    values: Vec<f32>,
}

impl Descriptor {
    /// Build a descriptor, rejecting any vector that is not [`DESCRIPTOR_DIM`] long.
    pub fn new(values: Vec<f32>) -> Result<Self, DescriptorError> {
        if values.len() != DESCRIPTOR_DIM {
            return Err(DescriptorError::InvalidLength(values.len()));
        }
        Ok(Self { values })
    }

    /// Build a descriptor from a feature list, zero-padding or truncating it to
    /// [`DESCRIPTOR_DIM`].
    pub fn from_features(features: &[f32]) -> Self {
        let mut values = vec![0.0f32; DESCRIPTOR_DIM];
        let n = features.len().min(DESCRIPTOR_DIM);
        values[..n].copy_from_slice(&features[..n]);
        Self { values }
    }

    pub fn zeros() -> Self {
        Self {
            values: vec![0.0; DESCRIPTOR_DIM],
        }
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn norm(&self) -> f32 {
        self.norm_f64() as f32
    }

    /// Accumulated in `f64`: the square of any finite `f32` fits, so very large
    /// or very small components neither overflow nor vanish.
    fn norm_f64(&self) -> f64 {
        self.values
            .iter()
            .map(|&v| f64::from(v) * f64::from(v))
            .sum::<f64>()
            .sqrt()
    }

    /// True when the descriptor has zero magnitude and can never be compared.
    pub fn is_degenerate(&self) -> bool {
        let norm = self.norm_f64();
        norm == 0.0 || norm.is_nan()
    }

    /// Cosine similarity in [-1, 1].
    ///
    /// Returns `None` when either descriptor has zero magnitude; such a pair is
    /// treated as having no similarity at all. Always processes every dimension.
    pub fn similarity(&self, other: &Descriptor) -> Option<f32> {
        let mut dot = 0.0f64;
        let mut norm_a = 0.0f64;
        let mut norm_b = 0.0f64;

        for (&a, &b) in self.values.iter().zip(other.values.iter()) {
            let (a, b) = (f64::from(a), f64::from(b));
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        let score = dot / denom;
        if denom > 0.0 && score.is_finite() {
            Some(score.clamp(-1.0, 1.0) as f32)
        } else {
            None
        }
    }
}

impl TryFrom<Vec<f32>> for Descriptor {
    type Error = DescriptorError;

    fn try_from(values: Vec<f32>) -> Result<Self, Self::Error> {
        Descriptor::new(values)
    }
}

impl From<Descriptor> for Vec<f32> {
    fn from(descriptor: Descriptor) -> Self {
        descriptor.values
    }
}

impl std::ops::Neg for &Descriptor {
    type Output = Descriptor;

    fn neg(self) -> Descriptor {
        Descriptor {
            values: self.values.iter().map(|v| -v).collect(),
        }
    }
}

/// A roster member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrolledPerson {
    pub id: String,
    pub name: String,
    pub roll_number: String,
    /// Reference descriptor captured at enrollment; never matched when absent.
    #[serde(default)]
    pub reference: Option<Descriptor>,
}

impl EnrolledPerson {
    pub fn new(id: impl Into<String>, name: impl Into<String>, roll_number: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            roll_number: roll_number.into(),
            reference: None,
        }
    }

    pub fn with_reference(mut self, reference: Descriptor) -> Self {
        self.reference = Some(reference);
        self
    }

    pub fn is_enrolled(&self) -> bool {
        self.reference.is_some()
    }
}

/// Outcome of resolving one detection against the roster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    /// Index of the detection in the list handed to the assigner.
    pub detection: usize,
    /// Person the detection was assigned to, if any qualified.
    pub person_id: Option<String>,
    /// Best similarity seen for this detection [-1, 1], if any candidate was comparable.
    pub similarity: Option<f32>,
}

impl MatchResult {
    pub fn matched(&self) -> bool {
        self.person_id.is_some()
    }
}

/// Final attendance result for one roster member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceOutcome {
    pub person_id: String,
    pub is_present: bool,
    /// Similarity of the assigned detection.
    pub confidence: Option<f32>,
    /// Region of the assigned detection, for highlighting.
    pub bbox: Option<BoundingBox>,
}

impl AttendanceOutcome {
    pub fn absent(person_id: impl Into<String>) -> Self {
        Self {
            person_id: person_id.into(),
            is_present: false,
            confidence: None,
            bbox: None,
        }
    }

    pub fn present(person_id: impl Into<String>, confidence: f32, bbox: BoundingBox) -> Self {
        Self {
            person_id: person_id.into(),
            is_present: true,
            confidence: Some(confidence),
            bbox: Some(bbox),
        }
    }
}
