//! SCRFD face detector via ONNX Runtime.
//!
//! Loads a pretrained SCRFD export (e.g. `det_10g.onnx`), letterboxes RGB
//! input to 640×640, decodes the three anchor-free stride heads and applies
//! non-maximum suppression. The five SCRFD keypoints are folded into
//! [`Landmarks`], with the mouth taken as the midpoint of its two corners.

use crate::detector::{ensure_usable, DetectorError, FaceDetector};
use crate::types::{BoundingBox, Detection, Landmarks, Point3};
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;

const INPUT_SIZE: u32 = 640;
const PIXEL_MEAN: f32 = 127.5;
const PIXEL_STD: f32 = 128.0;
const STRIDES: [usize; 3] = [8, 16, 32];
const ANCHORS_PER_CELL: usize = 2;
const KEYPOINTS: usize = 5;

/// Post-processing knobs for [`ScrfdDetector`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorOptions {
    /// Minimum face score kept before suppression.
    pub score_threshold: f32,
    /// Overlap above which the weaker of two boxes is suppressed.
    pub iou_threshold: f32,
    /// Upper bound on faces returned per image; 0 disables the bound.
    pub max_faces: usize,
    pub intra_threads: usize,
}

impl Default for DetectorOptions {
    fn default() -> Self {
        Self {
            score_threshold: 0.75,
            iou_threshold: 0.3,
            max_faces: 10,
            intra_threads: 2,
        }
    }
}

/// Scale and offset used to fit an image into the square model input.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Letterbox {
    scale: f32,
    width: u32,
    height: u32,
    offset_x: u32,
    offset_y: u32,
}

impl Letterbox {
    fn fit(width: u32, height: u32, side: u32) -> Self {
        let scale = (side as f32 / width as f32).min(side as f32 / height as f32);
        let scaled = |len: u32| ((len as f32 * scale).round() as u32).clamp(1, side);
        let (w, h) = (scaled(width), scaled(height));
        Self {
            scale,
            width: w,
            height: h,
            offset_x: (side - w) / 2,
            offset_y: (side - h) / 2,
        }
    }

    /// Map a point in model-input space back to source image pixels.
    fn to_image(&self, x: f32, y: f32) -> (f32, f32) {
        (
            (x - self.offset_x as f32) / self.scale,
            (y - self.offset_y as f32) / self.scale,
        )
    }
}

/// Output tensor positions for one stride head.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StrideOutputs {
    score: usize,
    bbox: usize,
    kps: usize,
}

struct StrideTensors<'a> {
    scores: &'a [f32],
    boxes: &'a [f32],
    kps: &'a [f32],
}

/// SCRFD-based implementation of [`FaceDetector`].
///
/// The ONNX session is owned by the value and released when it is dropped.
pub struct ScrfdDetector {
    session: Session,
    options: DetectorOptions,
    outputs: [StrideOutputs; 3],
}

impl ScrfdDetector {
    /// Load the SCRFD ONNX model from the given path.
    pub fn load(model_path: impl AsRef<Path>, options: DetectorOptions) -> Result<Self, DetectorError> {
        let model_path = model_path.as_ref();
        if !model_path.exists() {
            return Err(DetectorError::ModelUnavailable(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(options.intra_threads)?
            .commit_from_file(model_path)?;

        let names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();
        let outputs = resolve_outputs(&names)?;

        tracing::info!(
            path = %model_path.display(),
            outputs = ?names,
            score_threshold = options.score_threshold,
            max_faces = options.max_faces,
            "loaded SCRFD model"
        );

        Ok(Self {
            session,
            options,
            outputs,
        })
    }

    pub fn options(&self) -> &DetectorOptions {
        &self.options
    }
}

impl FaceDetector for ScrfdDetector {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<Detection>, DetectorError> {
        ensure_usable(image)?;
        let (input, letterbox) = to_tensor(image);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (head, &stride) in self.outputs.iter().zip(STRIDES.iter()) {
            let extract = |idx: usize, what: &str| {
                outputs[idx]
                    .try_extract_tensor::<f32>()
                    .map(|(_, data)| data)
                    .map_err(|e| DetectorError::InferenceFailed(format!("{what} stride {stride}: {e}")))
            };
            let tensors = StrideTensors {
                scores: extract(head.score, "scores")?,
                boxes: extract(head.bbox, "boxes")?,
                kps: extract(head.kps, "keypoints")?,
            };
            candidates.extend(decode_stride(&tensors, stride, &letterbox, self.options.score_threshold));
        }

        let raw = candidates.len();
        let faces = suppress(candidates, self.options.iou_threshold, self.options.max_faces);
        tracing::debug!(
            width = image.width(),
            height = image.height(),
            raw,
            kept = faces.len(),
            "SCRFD detection finished"
        );

        Ok(faces)
    }
}

/// Locate the nine SCRFD heads, by name (`score_8`, `bbox_16`, `kps_32`, ...)
/// when the export names them, otherwise by the conventional order
/// `[scores 8/16/32, boxes 8/16/32, kps 8/16/32]`.
fn resolve_outputs(names: &[String]) -> Result<[StrideOutputs; 3], DetectorError> {
    if names.len() < 9 {
        return Err(DetectorError::InferenceFailed(format!(
            "SCRFD needs 9 outputs (score/bbox/kps per stride), model has {}",
            names.len()
        )));
    }

    let position = |head: &str, stride: usize| {
        let wanted = format!("{head}_{stride}");
        names.iter().position(|n| *n == wanted)
    };
    let named: Option<Vec<StrideOutputs>> = STRIDES
        .iter()
        .map(|&s| {
            Some(StrideOutputs {
                score: position("score", s)?,
                bbox: position("bbox", s)?,
                kps: position("kps", s)?,
            })
        })
        .collect();

    match named {
        Some(heads) => Ok([heads[0], heads[1], heads[2]]),
        None => {
            tracing::debug!(?names, "SCRFD output names not recognised, using positional layout");
            Ok(std::array::from_fn(|i| StrideOutputs {
                score: i,
                bbox: i + 3,
                kps: i + 6,
            }))
        }
    }
}

/// Letterbox an RGB image into a normalized 1×3×640×640 tensor.
fn to_tensor(image: &RgbImage) -> (Array4<f32>, Letterbox) {
    let letterbox = Letterbox::fit(image.width(), image.height(), INPUT_SIZE);
    let resized = imageops::resize(image, letterbox.width, letterbox.height, FilterType::Triangle);

    let side = INPUT_SIZE as usize;
    // Padding stays at 0.0, the normalized value of PIXEL_MEAN.
    let mut tensor = Array4::<f32>::zeros((1, 3, side, side));
    let (ox, oy) = (letterbox.offset_x as usize, letterbox.offset_y as usize);
    for (x, y, pixel) in resized.enumerate_pixels() {
        for (c, &value) in pixel.0.iter().enumerate() {
            tensor[[0, c, oy + y as usize, ox + x as usize]] = (value as f32 - PIXEL_MEAN) / PIXEL_STD;
        }
    }

    (tensor, letterbox)
}

/// Decode one stride head into detections in source image coordinates.
fn decode_stride(
    tensors: &StrideTensors<'_>,
    stride: usize,
    letterbox: &Letterbox,
    threshold: f32,
) -> Vec<Detection> {
    let cells = INPUT_SIZE as usize / stride;
    let anchors = cells * cells * ANCHORS_PER_CELL;
    let step = stride as f32;

    (0..anchors)
        .filter_map(|idx| {
            let score = *tensors.scores.get(idx)?;
            if score.is_nan() || score <= threshold {
                return None;
            }

            let cell = idx / ANCHORS_PER_CELL;
            let cx = (cell % cells) as f32 * step;
            let cy = (cell / cells) as f32 * step;

            let b = tensors.boxes.get(idx * 4..idx * 4 + 4)?;
            let (x1, y1) = letterbox.to_image(cx - b[0] * step, cy - b[1] * step);
            let (x2, y2) = letterbox.to_image(cx + b[2] * step, cy + b[3] * step);

            let landmarks = tensors
                .kps
                .get(idx * KEYPOINTS * 2..(idx + 1) * KEYPOINTS * 2)
                .map(|k| {
                    let points: [Point3; KEYPOINTS] = std::array::from_fn(|i| {
                        let (x, y) = letterbox.to_image(cx + k[i * 2] * step, cy + k[i * 2 + 1] * step);
                        Point3::planar(x, y)
                    });
                    landmarks_from_keypoints(&points)
                });

            Some(Detection {
                bbox: BoundingBox::from_corners(x1, y1, x2, y2),
                confidence: score,
                landmarks,
            })
        })
        .collect()
}

/// SCRFD keypoint order: left eye, right eye, nose, left mouth corner, right mouth corner.
fn landmarks_from_keypoints(points: &[Point3; KEYPOINTS]) -> Landmarks {
    Landmarks {
        left_eye: Some(points[0]),
        right_eye: Some(points[1]),
        nose_tip: Some(points[2]),
        mouth: Some(points[3].midpoint(&points[4])),
    }
}

/// Greedy non-maximum suppression, strongest first, capped at `max_faces`.
fn suppress(mut detections: Vec<Detection>, iou_threshold: f32, max_faces: usize) -> Vec<Detection> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<Detection> = Vec::new();
    for det in detections {
        if max_faces > 0 && kept.len() == max_faces {
            break;
        }
        if kept.iter().all(|k| k.bbox.iou(&det.bbox) <= iou_threshold) {
            kept.push(det);
        }
    }
    kept
}
