//! snapattend-core — Face identification for classroom attendance.
//!
//! Turns detected faces into geometric descriptors, compares them with the
//! enrolled roster by cosine similarity and assigns each face to at most one
//! person, greedily from the most confident detection down.

pub mod assigner;
pub mod descriptor;
pub mod detector;
pub mod enrollment;
pub mod matcher;
pub mod pipeline;
pub mod scrfd;
pub mod types;

pub use assigner::{confidence_order, Assigner, Assignment};
pub use detector::{DetectorError, FaceDetector};
pub use enrollment::{hydrate_roster, EnrollmentStore, MemoryStore};
pub use matcher::{BestMatch, CosineMatcher, Matcher, DEFAULT_SIMILARITY_THRESHOLD};
pub use pipeline::{open_image, AttendancePipeline, PipelineError, PipelineOptions};
pub use scrfd::{DetectorOptions, ScrfdDetector};
pub use types::{
    AttendanceOutcome, BoundingBox, Descriptor, DescriptorError, Detection, EnrolledPerson, Landmarks,
    MatchResult, Point3, DESCRIPTOR_DIM,
};
