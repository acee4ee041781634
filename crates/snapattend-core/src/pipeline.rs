//! Caller-owned attendance pipeline: detect, extract, assign.

use crate::assigner::{Assigner, Assignment};
use crate::detector::{DetectorError, FaceDetector};
use crate::matcher::DEFAULT_SIMILARITY_THRESHOLD;
use crate::types::{AttendanceOutcome, EnrolledPerson};
use image::RgbImage;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    /// The detector could not analyse the image. No outcomes are produced.
    #[error("face detection unavailable: {0}")]
    DetectionUnavailable(#[from] DetectorError),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineOptions {
    pub similarity_threshold: f32,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
        }
    }
}

/// Owns a detector for the lifetime of the context. Nothing is shared between
/// pipelines, and nothing except the detector survives between runs.
pub struct AttendancePipeline<D> {
    detector: D,
    assigner: Assigner,
}

impl<D: FaceDetector> AttendancePipeline<D> {
    pub fn new(detector: D, options: PipelineOptions) -> Self {
        Self {
            detector,
            assigner: Assigner::new(options.similarity_threshold),
        }
    }

    /// Run detection on one image and assign the faces to the roster.
    ///
    /// A detector failure aborts the run; the caller can tell "could not
    /// analyse" apart from "nobody present".
    pub fn run(
        &mut self,
        image: &RgbImage,
        roster: &[EnrolledPerson],
    ) -> Result<Vec<AttendanceOutcome>, PipelineError> {
        Ok(self.run_detailed(image, roster)?.outcomes)
    }

    pub fn run_detailed(
        &mut self,
        image: &RgbImage,
        roster: &[EnrolledPerson],
    ) -> Result<Assignment, PipelineError> {
        let detections = self.detector.detect(image).map_err(|e| {
            tracing::warn!(error = %e, "face detection failed, aborting run");
            e
        })?;
        tracing::debug!(faces = detections.len(), "faces detected");
        Ok(self.assigner.assign_detailed(&detections, roster))
    }

    pub fn detector_mut(&mut self) -> &mut D {
        &mut self.detector
    }

    /// Tear the context down and hand the detector back.
    pub fn into_detector(self) -> D {
        self.detector
    }
}

/// Decode an image file to RGB. Unreadable or corrupt files count as the
/// detector being unable to run.
pub fn open_image(path: impl AsRef<Path>) -> Result<RgbImage, PipelineError> {
    let path = path.as_ref();
    let image = image::open(path).map_err(|e| {
        DetectorError::InvalidImage(format!("{}: {e}", path.display()))
    })?;
    Ok(image.to_rgb8())
}
