use image::RgbImage;
use snapattend_core::{
    confidence_order, descriptor, AttendancePipeline, Assignment, Descriptor, EnrolledPerson, FaceDetector, PipelineError,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error("no face detected in the photo")]
    NoFaceDetected,
    #[error("detected face has no landmarks, cannot build a descriptor")]
    NoLandmarks,
    #[error("a newer capture was submitted, result discarded")]
    Superseded,
    #[error("failed to start engine thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Result of an enrollment capture.
#[derive(Debug)]
pub struct EnrollResult {
    pub descriptor: Descriptor,
    /// Detector confidence of the face that was used.
    pub confidence: f32,
    /// Faces found in the portrait.
    pub faces: usize,
}

/// Pending requests the engine queue holds before `submit` waits.
const REQUEST_QUEUE: usize = 4;

/// Messages sent to the engine thread.
enum EngineRequest {
    Mark {
        generation: u64,
        image: RgbImage,
        roster: Vec<EnrolledPerson>,
        reply: oneshot::Sender<Result<Assignment, EngineError>>,
    },
    Enroll {
        image: RgbImage,
        reply: oneshot::Sender<Result<EnrollResult, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
///
/// Attendance runs are last-submitted-wins: each submission takes a new
/// generation number, and a run whose generation is no longer the latest
/// when it starts or finishes is discarded with [`EngineError::Superseded`].
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    latest: Arc<AtomicU64>,
}

/// An attendance run that has been queued on the engine.
pub struct PendingRun {
    generation: u64,
    rx: oneshot::Receiver<Result<Assignment, EngineError>>,
}

impl PendingRun {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub async fn wait(self) -> Result<Assignment, EngineError> {
        self.rx.await.map_err(|_| EngineError::ChannelClosed)?
    }
}

impl EngineHandle {
    /// Queue an attendance run. Any run submitted earlier is superseded as
    /// soon as this is called, before the request is queued.
    pub async fn submit(&self, image: RgbImage, roster: Vec<EnrolledPerson>) -> Result<PendingRun, EngineError> {
        let generation = self.latest.fetch_add(1, Ordering::SeqCst) + 1;
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Mark {
                generation,
                image,
                roster,
                reply,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        Ok(PendingRun { generation, rx })
    }

    /// Discard every run submitted so far.
    pub fn cancel(&self) {
        let superseded = self.latest.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(generation = superseded, "pending attendance runs cancelled");
    }

    /// Detect faces in a portrait and build a descriptor from the most
    /// confident one.
    pub async fn enroll(&self, image: RgbImage) -> Result<EnrollResult, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Enroll { image, reply })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        rx.await.map_err(|_| EngineError::ChannelClosed)?
    }
}

/// Move the pipeline onto a dedicated OS thread and return a handle to it.
///
/// The thread exits, releasing the pipeline and its detector, once every
/// handle has been dropped.
pub fn spawn_engine<D>(mut pipeline: AttendancePipeline<D>) -> Result<EngineHandle, EngineError>
where
    D: FaceDetector + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(REQUEST_QUEUE);
    let latest = Arc::new(AtomicU64::new(0));
    let worker_latest = Arc::clone(&latest);

    std::thread::Builder::new()
        .name("snapattend-engine".into())
        .spawn(move || {
            tracing::debug!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Mark {
                        generation,
                        image,
                        roster,
                        reply,
                    } => {
                        let result = run_mark(&mut pipeline, &worker_latest, generation, image, &roster);
                        let _ = reply.send(result);
                    }
                    EngineRequest::Enroll { image, reply } => {
                        let _ = reply.send(run_enroll(&mut pipeline, image));
                    }
                }
            }
            tracing::debug!("engine thread exiting");
        })?;

    Ok(EngineHandle { tx, latest })
}

fn is_superseded(latest: &AtomicU64, generation: u64) -> bool {
    latest.load(Ordering::SeqCst) != generation
}

/// Run one attendance capture. The image is owned here and released when the
/// function returns, on every path.
fn run_mark<D: FaceDetector>(
    pipeline: &mut AttendancePipeline<D>,
    latest: &AtomicU64,
    generation: u64,
    image: RgbImage,
    roster: &[EnrolledPerson],
) -> Result<Assignment, EngineError> {
    if is_superseded(latest, generation) {
        tracing::debug!(generation, "skipping superseded run");
        return Err(EngineError::Superseded);
    }

    let assignment = pipeline.run_detailed(&image, roster)?;

    if is_superseded(latest, generation) {
        tracing::debug!(generation, "discarding result of superseded run");
        return Err(EngineError::Superseded);
    }
    Ok(assignment)
}

fn run_enroll<D: FaceDetector>(
    pipeline: &mut AttendancePipeline<D>,
    image: RgbImage,
) -> Result<EnrollResult, EngineError> {
    let faces = pipeline
        .detector_mut()
        .detect(&image)
        .map_err(PipelineError::from)?;

    let best = confidence_order(&faces)
        .first()
        .map(|&idx| &faces[idx])
        .ok_or(EngineError::NoFaceDetected)?;

    if faces.len() > 1 {
        tracing::warn!(faces = faces.len(), "several faces in portrait, using the most confident");
    }

    let landmarks = best.landmarks.as_ref().ok_or(EngineError::NoLandmarks)?;
    let descriptor = descriptor::extract(Some(landmarks));
    if descriptor.is_degenerate() {
        return Err(EngineError::NoLandmarks);
    }

    tracing::info!(confidence = best.confidence, faces = faces.len(), "enrollment face selected");
    Ok(EnrollResult {
        descriptor,
        confidence: best.confidence,
        faces: faces.len(),
    })
}
