//! Annotation keys and the per-container capping log

use std::collections::BTreeMap;

/// Summary of resource changes made at admission
pub const RESOURCE_UPDATES: &str = "vpaUpdates";

/// Comma-separated names of the containers seen at admission
pub const OBSERVED_CONTAINERS: &str = "vpaObservedContainers";

/// Set when the unit was admitted under an in-place update mode
pub const IN_PLACE_UPDATED: &str = "vpaInPlaceUpdated";

/// Original resources of containers that received a startup CPU boost
pub const STARTUP_CPU_BOOST: &str = "startup-cpu-boost";

/// Human-readable notes about values the engine adjusted, keyed by container
///
/// Notes keep insertion order per container. They are only rendered into an
/// annotation string when the edit list is assembled.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnnotationLog {
    entries: BTreeMap<String, Vec<String>>,
}

impl AnnotationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, container: &str, note: impl Into<String>) {
        self.entries
            .entry(container.to_string())
            .or_default()
            .push(note.into());
    }

    pub fn for_container(&self, container: &str) -> &[String] {
        self.entries
            .get(container)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.values().all(Vec::is_empty)
    }
}
