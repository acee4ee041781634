//! Greedy, confidence-first assignment of detections to roster members.
//!
//! Detections are visited from most to least confident (ties in detection
//! order). Each one claims the best still-unassigned roster member whose
//! similarity strictly exceeds the threshold; a claimed member is withdrawn
//! for the rest of the run, so every detection and every member is used at
//! most once. Unmatched detections are dropped. Output is fully determined by
//! the detections, the roster and the threshold.

use crate::descriptor;
use crate::matcher::{CosineMatcher, Matcher, DEFAULT_SIMILARITY_THRESHOLD};
use crate::types::{AttendanceOutcome, Detection, EnrolledPerson, MatchResult};
use std::cmp::Ordering;

/// Outcomes for the roster plus the per-detection decisions behind them.
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    /// One outcome per roster member, in roster order.
    pub outcomes: Vec<AttendanceOutcome>,
    /// One entry per detection, in the order detections were resolved.
    pub matches: Vec<MatchResult>,
}

impl Assignment {
    pub fn present_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_present).count()
    }
}

#[derive(Debug, Clone)]
pub struct Assigner<M = CosineMatcher> {
    threshold: f32,
    matcher: M,
}

impl Default for Assigner<CosineMatcher> {
    fn default() -> Self {
        Self::new(DEFAULT_SIMILARITY_THRESHOLD)
    }
}

impl Assigner<CosineMatcher> {
    pub fn new(threshold: f32) -> Self {
        Self::with_matcher(threshold, CosineMatcher)
    }
}

impl<M: Matcher> Assigner<M> {
    pub fn with_matcher(threshold: f32, matcher: M) -> Self {
        Self { threshold, matcher }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Attendance outcome for every roster member, in roster order.
    pub fn assign(&self, detections: &[Detection], roster: &[EnrolledPerson]) -> Vec<AttendanceOutcome> {
        self.assign_detailed(detections, roster).outcomes
    }

    pub fn assign_detailed(&self, detections: &[Detection], roster: &[EnrolledPerson]) -> Assignment {
        let mut outcomes: Vec<AttendanceOutcome> =
            roster.iter().map(|p| AttendanceOutcome::absent(&p.id)).collect();

        if detections.is_empty() {
            tracing::debug!(roster = roster.len(), "no detections, everyone absent");
            return Assignment {
                outcomes,
                matches: Vec::new(),
            };
        }

        let descriptors = descriptor::extract_all(detections);
        let order = confidence_order(detections);

        // Roster positions still open for assignment, in roster order.
        let mut available: Vec<usize> = (0..roster.len()).collect();
        let mut matches = Vec::with_capacity(detections.len());

        for det_idx in order {
            let detection = &detections[det_idx];
            let candidates: Vec<&EnrolledPerson> = available.iter().map(|&i| &roster[i]).collect();
            let best = self
                .matcher
                .best_match(&descriptors[det_idx], &candidates, self.threshold);

            let person_id = match (best.index, best.similarity) {
                (Some(slot), Some(similarity)) => {
                    let roster_idx = available.remove(slot);
                    let person = &roster[roster_idx];
                    tracing::debug!(
                        detection = det_idx,
                        person = %person.id,
                        similarity,
                        confidence = detection.confidence,
                        "detection assigned"
                    );
                    outcomes[roster_idx] = AttendanceOutcome::present(&person.id, similarity, detection.bbox);
                    Some(person.id.clone())
                }
                _ => {
                    tracing::debug!(
                        detection = det_idx,
                        best_similarity = ?best.similarity,
                        threshold = self.threshold,
                        "detection unmatched, dropped"
                    );
                    None
                }
            };

            matches.push(MatchResult {
                detection: det_idx,
                person_id,
                similarity: best.similarity,
            });
        }

        let assignment = Assignment { outcomes, matches };
        tracing::info!(
            detections = detections.len(),
            roster = roster.len(),
            present = assignment.present_count(),
            "attendance assigned"
        );
        assignment
    }
}

/// Detection indices by descending confidence; the stable sort keeps equal
/// confidences in detection order, and NaN confidences go last.
pub fn confidence_order(detections: &[Detection]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..detections.len()).collect();
    order.sort_by(|&a, &b| {
        let (ca, cb) = (detections[a].confidence, detections[b].confidence);
        match (ca.is_nan(), cb.is_nan()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => cb.total_cmp(&ca),
        }
    });
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BoundingBox, Descriptor, Landmarks, Point3};

    /// Frontal face landmarks parameterised by eye spacing and nose/mouth drop.
    fn landmarks(eye_gap: f32, nose_drop: f32, mouth_drop: f32, tilt: f32) -> Landmarks {
        Landmarks {
            left_eye: Some(Point3::planar(100.0, 100.0)),
            right_eye: Some(Point3::planar(100.0 + eye_gap, 100.0 + tilt)),
            nose_tip: Some(Point3::planar(100.0 + eye_gap / 2.0, 100.0 + nose_drop)),
            mouth: Some(Point3::planar(100.0 + eye_gap / 2.0, 100.0 + mouth_drop)),
        }
    }

    fn detection(lm: Landmarks, confidence: f32, x: f32) -> Detection {
        Detection {
            bbox: BoundingBox { x, y: 50.0, width: 80.0, height: 80.0 },
            confidence,
            landmarks: Some(lm),
        }
    }

    fn enrolled(id: &str, lm: Option<&Landmarks>) -> EnrolledPerson {
        let p = EnrolledPerson::new(id, id.to_uppercase(), format!("F-{id}"));
        match lm {
            Some(lm) => p.with_reference(descriptor::extract(Some(lm))),
            None => p,
        }
    }

    fn with_ref(id: &str, head: &[f32]) -> EnrolledPerson {
        EnrolledPerson::new(id, id, id).with_reference(Descriptor::from_features(head))
    }

    /// Detection whose descriptor head is exactly `[eye_distance, 0, 0, 0, 0]`.
    fn spaced_detection(eye_gap: f32, confidence: f32) -> Detection {
        Detection {
            bbox: BoundingBox { x: eye_gap, y: 0.0, width: 10.0, height: 10.0 },
            confidence,
            landmarks: Some(Landmarks {
                left_eye: Some(Point3::new(0.0, 0.0, 0.0)),
                right_eye: Some(Point3::new(0.0, 0.0, eye_gap)),
                ..Landmarks::default()
            }),
        }
    }

    /// Detection whose descriptor head is `[first, second, 0, 0, 0]`.
    fn probe_detection(first: f32, second: f32, confidence: f32) -> Detection {
        Detection {
            bbox: BoundingBox { x: first * 100.0, y: second * 100.0, width: 40.0, height: 40.0 },
            confidence,
            landmarks: Some(Landmarks {
                left_eye: Some(Point3::new(0.0, 0.0, 0.0)),
                right_eye: Some(Point3::new(0.0, 0.0, first)),
                nose_tip: Some(Point3::new(0.0, 0.0, second)),
                mouth: None,
            }),
        }
    }

    #[test]
    fn test_empty_detections_everyone_absent() {
        let roster = vec![with_ref("alice", &[1.0]), enrolled("carol", None)];
        let assignment = Assigner::default().assign_detailed(&[], &roster);
        assert_eq!(assignment.outcomes.len(), 2);
        assert!(assignment.outcomes.iter().all(|o| !o.is_present && o.confidence.is_none()));
        assert!(assignment.matches.is_empty());
    }

    #[test]
    fn test_alice_bob_carol_scenario() {
        let roster = vec![
            with_ref("alice", &[1.0, 0.0]),
            with_ref("bob", &[0.0, 1.0]),
            enrolled("carol", None),
        ];
        let d1 = probe_detection(0.92, (1.0f32 - 0.92 * 0.92).sqrt(), 0.97);
        let d2 = probe_detection((1.0f32 - 0.88 * 0.88).sqrt(), 0.88, 0.91);
        let detections = vec![d1, d2];

        let outcomes = Assigner::new(0.6).assign(&detections, &roster);
        assert_eq!(outcomes.len(), 3);

        assert!(outcomes[0].is_present);
        assert!((outcomes[0].confidence.unwrap() - 0.92).abs() < 1e-4);
        assert_eq!(outcomes[0].bbox, Some(detections[0].bbox));

        assert!(outcomes[1].is_present);
        assert!((outcomes[1].confidence.unwrap() - 0.88).abs() < 1e-4);
        assert_eq!(outcomes[1].bbox, Some(detections[1].bbox));

        assert_eq!(outcomes[2], AttendanceOutcome::absent("carol"));
    }

    #[test]
    fn test_enrolled_faces_recognised_from_landmarks() {
        let alice_face = landmarks(40.0, 20.0, 40.0, 0.0);
        let bob_face = landmarks(64.0, 30.0, 52.0, 6.0);
        let roster = vec![
            enrolled("alice", Some(&alice_face)),
            enrolled("bob", Some(&bob_face)),
            enrolled("carol", None),
        ];
        let detections = vec![
            detection(alice_face.clone(), 0.92, 10.0),
            detection(bob_face.clone(), 0.88, 200.0),
        ];

        let outcomes = Assigner::new(0.6).assign(&detections, &roster);
        assert_eq!(outcomes.len(), 3);

        assert_eq!(outcomes[0].person_id, "alice");
        assert!(outcomes[0].is_present);
        assert!((outcomes[0].confidence.unwrap() - 1.0).abs() < 1e-5);
        assert_eq!(outcomes[0].bbox, Some(detections[0].bbox));

        assert_eq!(outcomes[1].person_id, "bob");
        assert!(outcomes[1].is_present);
        assert_eq!(outcomes[1].bbox, Some(detections[1].bbox));

        assert_eq!(outcomes[2], AttendanceOutcome::absent("carol"));
    }

    #[test]
    fn test_sub_threshold_detection_is_dropped() {
        // Probe head [1, 0, ...] against reference [0.55, sqrt(1 - 0.55^2)] scores 0.55.
        let roster = vec![with_ref("dana", &[0.55, (1.0f32 - 0.55 * 0.55).sqrt()])];
        let detections = vec![spaced_detection(1.0, 0.95)];

        let assignment = Assigner::new(0.6).assign_detailed(&detections, &roster);
        assert!(!assignment.outcomes[0].is_present);
        assert_eq!(assignment.matches.len(), 1);
        assert!(assignment.matches[0].person_id.is_none());
        let sim = assignment.matches[0].similarity.unwrap();
        assert!((sim - 0.55).abs() < 1e-4, "got {sim}");
    }

    #[test]
    fn test_most_confident_detection_claims_first() {
        // Both detections resemble the single enrolled person equally.
        let roster = vec![with_ref("erin", &[1.0])];
        let detections = vec![spaced_detection(3.0, 0.70), spaced_detection(5.0, 0.95)];

        let assignment = Assigner::default().assign_detailed(&detections, &roster);
        assert!(assignment.outcomes[0].is_present);
        assert_eq!(assignment.outcomes[0].bbox, Some(detections[1].bbox));
        assert_eq!(assignment.matches[0].detection, 1);
        assert_eq!(assignment.matches[0].person_id.as_deref(), Some("erin"));
        assert_eq!(assignment.matches[1].detection, 0);
        assert!(assignment.matches[1].person_id.is_none());
    }

    #[test]
    fn test_equal_confidence_keeps_detection_order() {
        let roster = vec![with_ref("erin", &[1.0])];
        let detections = vec![spaced_detection(3.0, 0.8), spaced_detection(5.0, 0.8)];

        let outcomes = Assigner::default().assign(&detections, &roster);
        assert_eq!(outcomes[0].bbox, Some(detections[0].bbox));
    }

    #[test]
    fn test_claimed_person_is_withdrawn() {
        // Two identical people; the second detection must take the other one.
        let roster = vec![with_ref("twin_a", &[1.0]), with_ref("twin_b", &[1.0])];
        let detections = vec![spaced_detection(2.0, 0.9), spaced_detection(4.0, 0.8)];

        let outcomes = Assigner::default().assign(&detections, &roster);
        assert!(outcomes.iter().all(|o| o.is_present));
        assert_eq!(outcomes[0].bbox, Some(detections[0].bbox));
        assert_eq!(outcomes[1].bbox, Some(detections[1].bbox));
    }

    #[test]
    fn test_one_to_one_bounds() {
        let roster: Vec<EnrolledPerson> = (0..3).map(|i| with_ref(&format!("p{i}"), &[1.0])).collect();
        let detections: Vec<Detection> = (0..5).map(|i| spaced_detection(1.0 + i as f32, 0.5)).collect();

        let assignment = Assigner::default().assign_detailed(&detections, &roster);
        let present = assignment.present_count();
        assert!(present <= detections.len().min(roster.len()));
        assert_eq!(present, 3);

        let mut used: Vec<usize> = assignment
            .matches
            .iter()
            .filter(|m| m.matched())
            .map(|m| m.detection)
            .collect();
        used.sort_unstable();
        used.dedup();
        assert_eq!(used.len(), present);

        let mut people: Vec<&str> = assignment.matches.iter().filter_map(|m| m.person_id.as_deref()).collect();
        people.sort_unstable();
        people.dedup();
        assert_eq!(people.len(), present);
    }

    #[test]
    fn test_detection_without_landmarks_never_matches() {
        let roster = vec![with_ref("fay", &[1.0])];
        let detections = vec![Detection {
            bbox: BoundingBox { x: 0.0, y: 0.0, width: 5.0, height: 5.0 },
            confidence: 0.99,
            landmarks: None,
        }];
        let assignment = Assigner::new(-1.0).assign_detailed(&detections, &roster);
        assert!(!assignment.outcomes[0].is_present);
        assert_eq!(assignment.matches[0].similarity, None);
    }

    #[test]
    fn test_assign_is_deterministic() {
        let faces = [
            landmarks(40.0, 20.0, 40.0, 0.0),
            landmarks(52.0, 22.0, 47.0, 3.0),
            landmarks(61.0, 35.0, 50.0, -4.0),
        ];
        let roster: Vec<EnrolledPerson> = faces
            .iter()
            .enumerate()
            .map(|(i, f)| enrolled(&format!("s{i}"), Some(f)))
            .chain(std::iter::once(enrolled("late", None)))
            .collect();
        let detections: Vec<Detection> = faces
            .iter()
            .rev()
            .enumerate()
            .map(|(i, f)| detection(f.clone(), 0.8, i as f32 * 90.0))
            .collect();

        let assigner = Assigner::new(0.6);
        let first = serde_json::to_string(&assigner.assign(&detections, &roster)).unwrap();
        let second = serde_json::to_string(&assigner.assign(&detections, &roster)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_confidence_order_puts_nan_last() {
        let detections = vec![
            spaced_detection(1.0, f32::NAN),
            spaced_detection(1.0, 0.3),
            spaced_detection(1.0, 0.9),
            spaced_detection(1.0, 0.3),
        ];
        assert_eq!(confidence_order(&detections), vec![2, 1, 3, 0]);
    }
}
