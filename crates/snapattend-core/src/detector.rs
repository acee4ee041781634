//! Face detector contract.

use crate::types::Detection;
use image::RgbImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0} — download a SCRFD ONNX export and point SNAPATTEND_MODEL_PATH at it")]
    ModelUnavailable(String),
    #[error("invalid image: {0}")]
    InvalidImage(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Locates faces in an RGB image.
///
/// An image without faces yields an empty list, not an error. Implementations
/// report a missing model or an unusable image as [`DetectorError`] and never
/// swallow it.
pub trait FaceDetector {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<Detection>, DetectorError>;
}

impl<D: FaceDetector + ?Sized> FaceDetector for Box<D> {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<Detection>, DetectorError> {
        (**self).detect(image)
    }
}

/// Reject images a detector cannot work with.
pub(crate) fn ensure_usable(image: &RgbImage) -> Result<(), DetectorError> {
    if image.width() == 0 || image.height() == 0 {
        return Err(DetectorError::InvalidImage(format!(
            "image has no pixels ({}x{})",
            image.width(),
            image.height()
        )));
    }
    Ok(())
}
