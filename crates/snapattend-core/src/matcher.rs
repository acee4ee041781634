//! Best-candidate selection over enrolled descriptors.

use crate::types::{Descriptor, EnrolledPerson};

/// Minimum cosine similarity a match must strictly exceed.
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.6;

/// Best candidate found for one probe descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct BestMatch {
    /// Position of the qualifying candidate in the slice that was searched.
    pub index: Option<usize>,
    /// ID of the qualifying candidate.
    pub person_id: Option<String>,
    /// Highest similarity seen, whether or not it qualified. `None` when no
    /// candidate was comparable.
    pub similarity: Option<f32>,
}

impl BestMatch {
    pub fn none() -> Self {
        Self {
            index: None,
            person_id: None,
            similarity: None,
        }
    }

    pub fn matched(&self) -> bool {
        self.index.is_some()
    }
}

/// Strategy for picking the roster member closest to a probe descriptor.
pub trait Matcher {
    fn best_match(
        &self,
        probe: &Descriptor,
        candidates: &[&EnrolledPerson],
        threshold: f32,
    ) -> BestMatch;
}

/// Cosine similarity matcher.
///
/// Every candidate is visited. Candidates without a reference descriptor, and
/// pairs whose similarity is undefined (zero-magnitude descriptors), are
/// skipped. A later candidate only displaces the current best with a strictly
/// greater score, so equal scores resolve to the first candidate enumerated.
/// The best candidate qualifies only when its score is strictly above the
/// threshold.
#[derive(Debug, Clone, Copy, Default)]
pub struct CosineMatcher;

impl Matcher for CosineMatcher {
    fn best_match(
        &self,
        probe: &Descriptor,
        candidates: &[&EnrolledPerson],
        threshold: f32,
    ) -> BestMatch {
        let mut best: Option<(usize, f32)> = None;

        for (i, person) in candidates.iter().enumerate() {
            let Some(reference) = person.reference.as_ref() else {
                tracing::trace!(person = %person.id, "no reference descriptor, skipping");
                continue;
            };
            let Some(sim) = probe.similarity(reference) else {
                tracing::trace!(person = %person.id, "degenerate descriptor pair, skipping");
                continue;
            };
            match best {
                Some((_, best_sim)) if sim <= best_sim => {}
                _ => best = Some((i, sim)),
            }
        }

        match best {
            Some((idx, sim)) if sim > threshold => BestMatch {
                index: Some(idx),
                person_id: Some(candidates[idx].id.clone()),
                similarity: Some(sim),
            },
            Some((_, sim)) => BestMatch {
                similarity: Some(sim),
                ..BestMatch::none()
            },
            None => BestMatch::none(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person(id: &str, head: Option<&[f32]>) -> EnrolledPerson {
        let p = EnrolledPerson::new(id, id, id);
        match head {
            Some(h) => p.with_reference(Descriptor::from_features(h)),
            None => p,
        }
    }

    fn probe(head: &[f32]) -> Descriptor {
        Descriptor::from_features(head)
    }

    #[test]
    fn test_best_match_visits_all_candidates() {
        // Best match is the last entry.
        let roster = [
            person("decoy1", Some(&[0.0, 1.0, 0.0])),
            person("decoy2", Some(&[0.0, 0.0, 1.0])),
            person("match", Some(&[1.0, 0.0, 0.0])),
        ];
        let candidates: Vec<&EnrolledPerson> = roster.iter().collect();

        let result = CosineMatcher.best_match(&probe(&[1.0, 0.0, 0.0]), &candidates, 0.5);
        assert!(result.matched());
        assert_eq!(result.index, Some(2));
        assert_eq!(result.person_id.as_deref(), Some("match"));
        assert!((result.similarity.unwrap() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_best_match_below_threshold() {
        let roster = [person("other", Some(&[0.0, 1.0, 0.0]))];
        let candidates: Vec<&EnrolledPerson> = roster.iter().collect();

        let result = CosineMatcher.best_match(&probe(&[1.0, 0.0, 0.0]), &candidates, 0.5);
        assert!(!result.matched());
        assert!(result.person_id.is_none());
        assert!(result.similarity.unwrap().abs() < 1e-6);
    }

    #[test]
    fn test_best_match_threshold_is_strict() {
        let roster = [person("same", Some(&[1.0, 0.0]))];
        let candidates: Vec<&EnrolledPerson> = roster.iter().collect();

        let at = CosineMatcher.best_match(&probe(&[1.0, 0.0]), &candidates, 1.0);
        assert!(!at.matched(), "score equal to threshold must not qualify");

        let below = CosineMatcher.best_match(&probe(&[1.0, 0.0]), &candidates, 0.999);
        assert!(below.matched());
    }

    #[test]
    fn test_best_match_tie_goes_to_first_enumerated() {
        let roster = [
            person("first", Some(&[2.0, 0.0])),
            person("second", Some(&[5.0, 0.0])),
        ];
        let candidates: Vec<&EnrolledPerson> = roster.iter().collect();

        let result = CosineMatcher.best_match(&probe(&[1.0, 0.0]), &candidates, 0.6);
        assert_eq!(result.person_id.as_deref(), Some("first"));

        let reversed: Vec<&EnrolledPerson> = roster.iter().rev().collect();
        let result = CosineMatcher.best_match(&probe(&[1.0, 0.0]), &reversed, 0.6);
        assert_eq!(result.person_id.as_deref(), Some("second"));
    }

    #[test]
    fn test_best_match_skips_unenrolled() {
        let roster = [person("carol", None), person("bob", Some(&[1.0, 1.0]))];
        let candidates: Vec<&EnrolledPerson> = roster.iter().collect();

        let result = CosineMatcher.best_match(&probe(&[1.0, 1.0]), &candidates, 0.6);
        assert_eq!(result.index, Some(1));
        assert_eq!(result.person_id.as_deref(), Some("bob"));
    }

    #[test]
    fn test_best_match_degenerate_probe_never_matches() {
        let roster = [person("a", Some(&[1.0, 0.0]))];
        let candidates: Vec<&EnrolledPerson> = roster.iter().collect();

        let result = CosineMatcher.best_match(&Descriptor::zeros(), &candidates, -1.0);
        assert_eq!(result, BestMatch::none());
    }

    #[test]
    fn test_best_match_degenerate_reference_is_skipped() {
        let roster = [
            person("zero", Some(&[])),
            person("real", Some(&[0.0, 3.0])),
        ];
        let candidates: Vec<&EnrolledPerson> = roster.iter().collect();

        let result = CosineMatcher.best_match(&probe(&[0.0, 1.0]), &candidates, 0.6);
        assert_eq!(result.person_id.as_deref(), Some("real"));
    }

    #[test]
    fn test_best_match_empty_candidates() {
        let result = CosineMatcher.best_match(&probe(&[1.0]), &[], DEFAULT_SIMILARITY_THRESHOLD);
        assert_eq!(result, BestMatch::none());
    }
}
