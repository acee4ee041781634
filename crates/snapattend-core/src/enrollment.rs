//! Enrollment store contract and an in-memory implementation.

use crate::types::{Descriptor, EnrolledPerson};
use std::collections::HashMap;
use std::convert::Infallible;

/// Holds at most one reference descriptor per enrolled person.
///
/// The attendance pipeline only ever reads from a store; writes happen during
/// enrollment.
pub trait EnrollmentStore {
    type Error: std::error::Error + Send + Sync + 'static;

    fn get_descriptor(&self, person_id: &str) -> Result<Option<Descriptor>, Self::Error>;

    fn set_descriptor(&mut self, person_id: &str, descriptor: Descriptor) -> Result<(), Self::Error>;
}

/// Process-local store, mainly for tests and embedding.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    descriptors: HashMap<String, Descriptor>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

impl EnrollmentStore for MemoryStore {
    type Error = Infallible;

    fn get_descriptor(&self, person_id: &str) -> Result<Option<Descriptor>, Self::Error> {
        Ok(self.descriptors.get(person_id).cloned())
    }

    fn set_descriptor(&mut self, person_id: &str, descriptor: Descriptor) -> Result<(), Self::Error> {
        self.descriptors.insert(person_id.to_string(), descriptor);
        Ok(())
    }
}

/// Attach each person's stored reference descriptor, preserving roster order.
///
/// People the store knows nothing about keep `reference = None` and can never
/// be matched.
pub fn hydrate_roster<S: EnrollmentStore + ?Sized>(
    people: Vec<EnrolledPerson>,
    store: &S,
) -> Result<Vec<EnrolledPerson>, S::Error> {
    people
        .into_iter()
        .map(|mut person| {
            person.reference = store.get_descriptor(&person.id)?;
            if person.reference.is_none() {
                tracing::debug!(person = %person.id, "no reference descriptor enrolled");
            }
            Ok(person)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_roundtrip() {
        let mut store = MemoryStore::new();
        assert!(store.is_empty());
        assert_eq!(store.get_descriptor("alice").unwrap(), None);

        let d = Descriptor::from_features(&[1.0, 2.0]);
        store.set_descriptor("alice", d.clone()).unwrap();
        assert_eq!(store.get_descriptor("alice").unwrap(), Some(d));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_set_descriptor_replaces() {
        let mut store = MemoryStore::new();
        store.set_descriptor("bob", Descriptor::from_features(&[1.0])).unwrap();
        store.set_descriptor("bob", Descriptor::from_features(&[2.0])).unwrap();
        let d = store.get_descriptor("bob").unwrap().unwrap();
        assert_eq!(d.values()[0], 2.0);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_hydrate_roster_keeps_order_and_gaps() {
        let mut store = MemoryStore::new();
        store.set_descriptor("2", Descriptor::from_features(&[0.5])).unwrap();

        let people = vec![
            EnrolledPerson::new("1", "Robert", "F001"),
            EnrolledPerson::new("2", "Chris", "F002"),
        ];
        let roster = hydrate_roster(people, &store).unwrap();
        assert_eq!(roster[0].id, "1");
        assert!(!roster[0].is_enrolled());
        assert_eq!(roster[1].id, "2");
        assert!(roster[1].is_enrolled());
    }
}
