//! Geometric face descriptors built from facial landmarks.
//!
//! Five scalar relationships between the eyes, nose tip and mouth are placed
//! at the head of a zero-filled [`DESCRIPTOR_DIM`](crate::types::DESCRIPTOR_DIM)-long vector.

use crate::types::{Descriptor, Detection, Landmarks, Point3};

/// Number of geometric features written at the head of each descriptor.
pub const GEOMETRIC_FEATURES: usize = 5;

/// Build a descriptor from a face's landmarks.
///
/// Never fails. An absent landmark reads as the origin, and a ratio whose
/// denominator vanishes is reported as 0.0, so partial input yields a
/// degenerate but well-defined descriptor. The output depends only on the input.
pub fn extract(landmarks: Option<&Landmarks>) -> Descriptor {
    Descriptor::from_features(&geometric_features(landmarks))
}

/// Extract descriptors for every detection, in detection order.
pub fn extract_all(detections: &[Detection]) -> Vec<Descriptor> {
    detections
        .iter()
        .map(|d| extract(d.landmarks.as_ref()))
        .collect()
}

/// Feature order: inter-eye distance, nose-to-mouth distance, eye-line angle,
/// nose horizontal ratio, nose vertical ratio.
fn geometric_features(landmarks: Option<&Landmarks>) -> [f32; GEOMETRIC_FEATURES] {
    let left_eye = point_or_origin(landmarks.and_then(|l| l.left_eye));
    let right_eye = point_or_origin(landmarks.and_then(|l| l.right_eye));
    let nose = point_or_origin(landmarks.and_then(|l| l.nose_tip));
    let mouth = point_or_origin(landmarks.and_then(|l| l.mouth));

    let eye_distance = left_eye.distance(&right_eye);
    let nose_mouth_distance = nose.distance(&mouth);
    let eye_angle = (right_eye.y - left_eye.y).atan2(right_eye.x - left_eye.x);

    let nose_horizontal = ratio(nose.x - left_eye.x, right_eye.x - left_eye.x);
    let eye_mid = left_eye.midpoint(&right_eye);
    let nose_vertical = ratio(nose.y - eye_mid.y, mouth.y - eye_mid.y);

    [
        eye_distance,
        nose_mouth_distance,
        eye_angle,
        nose_horizontal,
        nose_vertical,
    ]
    .map(finite_or_zero)
}

fn point_or_origin(point: Option<Point3>) -> Point3 {
    match point {
        Some(p) => p,
        None => Point3::ORIGIN,
    }
}

fn ratio(numerator: f32, denominator: f32) -> f32 {
    if denominator == 0.0 {
        0.0
    } else {
        numerator / denominator
    }
}

fn finite_or_zero(value: f32) -> f32 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}
