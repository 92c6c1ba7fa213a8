//! Lookup table from worker kind to launch spec

use std::collections::HashMap;

use crate::Result;
use crate::error::WorkerError;
use crate::kind::WorkerKind;
use crate::spec::WorkerSpec;

/// Launch specs for every known worker kind
///
/// Built once at startup and shared read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct WorkerCatalog {
    specs: HashMap<WorkerKind, WorkerSpec>,
}

impl WorkerCatalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a spec, replacing any previous spec for the same kind
    pub fn insert(&mut self, spec: WorkerSpec) {
        self.specs.insert(spec.kind, spec);
    }

    /// Builder form of [`WorkerCatalog::insert`]
    pub fn with_spec(mut self, spec: WorkerSpec) -> Self {
        self.insert(spec);
        self
    }

    /// Get the spec for a kind
    pub fn get(&self, kind: WorkerKind) -> Result<&WorkerSpec> {
        self.specs
            .get(&kind)
            .ok_or_else(|| WorkerError::UnknownWorker(kind.name().to_string()))
    }

    /// Get specs for several kinds, failing on the first missing one
    pub fn get_all(&self, kinds: &[WorkerKind]) -> Result<Vec<WorkerSpec>> {
        kinds
            .iter()
            .map(|kind| self.get(*kind).cloned())
            .collect()
    }

    pub fn contains(&self, kind: WorkerKind) -> bool {
        self.specs.contains_key(&kind)
    }

    /// Registered kinds in declaration order
    pub fn kinds(&self) -> Vec<WorkerKind> {
        let mut kinds: Vec<_> = self.specs.keys().copied().collect();
        kinds.sort();
        kinds
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_get() {
        let catalog = WorkerCatalog::new()
            .with_spec(WorkerSpec::new(WorkerKind::Lstm, "python"))
            .with_spec(WorkerSpec::new(WorkerKind::Mfi, "python"));

        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.get(WorkerKind::Mfi).unwrap().name(), "mfi");
        assert_eq!(catalog.kinds(), vec![WorkerKind::Mfi, WorkerKind::Lstm]);
    }

    #[test]
    fn test_missing_kind() {
        let catalog = WorkerCatalog::new().with_spec(WorkerSpec::new(WorkerKind::Rsi, "sh"));
        let err = catalog.get(WorkerKind::Garch).unwrap_err();
        assert!(matches!(err, WorkerError::UnknownWorker(ref name) if name == "garch"));

        assert!(catalog.get_all(&WorkerKind::COUPLED).is_err());
        assert_eq!(catalog.get_all(&[WorkerKind::Rsi]).unwrap().len(), 1);
    }

    #[test]
    fn test_insert_replaces() {
        let mut catalog = WorkerCatalog::new();
        catalog.insert(WorkerSpec::new(WorkerKind::Capm, "python"));
        catalog.insert(WorkerSpec::new(WorkerKind::Capm, "python3"));
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.get(WorkerKind::Capm).unwrap().command, "python3");
    }
}
