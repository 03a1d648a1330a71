//! Live sampling sessions and classification ledgers, keyed by name.
//!
//! Owned by the application context and passed to whatever needs it. Names
//! are the stem of the sample file the session produced or reads.

use std::collections::BTreeMap;

use crate::ledger::ClassificationLedger;
use crate::sampling::session::SamplingSession;

#[derive(Default)]
pub struct SessionRegistry {
    samplings: BTreeMap<String, SamplingSession>,
    ledgers: BTreeMap<String, ClassificationLedger>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a sampling under its summary name, replacing any previous one.
    pub fn register_sampling(&mut self, session: SamplingSession) -> Option<SamplingSession> {
        self.samplings.insert(session.name().to_string(), session)
    }

    pub fn sampling(&self, name: &str) -> Option<&SamplingSession> {
        self.samplings.get(name)
    }

    pub fn remove_sampling(&mut self, name: &str) -> Option<SamplingSession> {
        self.samplings.remove(name)
    }

    pub fn sampling_names(&self) -> impl Iterator<Item = &str> {
        self.samplings.keys().map(String::as_str)
    }

    pub fn insert_ledger(&mut self, name: &str, ledger: ClassificationLedger) -> Option<ClassificationLedger> {
        self.ledgers.insert(name.to_string(), ledger)
    }

    pub fn ledger(&self, name: &str) -> Option<&ClassificationLedger> {
        self.ledgers.get(name)
    }

    pub fn ledger_mut(&mut self, name: &str) -> Option<&mut ClassificationLedger> {
        self.ledgers.get_mut(name)
    }

    pub fn remove_ledger(&mut self, name: &str) -> Option<ClassificationLedger> {
        self.ledgers.remove(name)
    }

    /// The ledger of `name`, building it with `make` on first access.
    pub fn ledger_or_insert_with<F>(&mut self, name: &str, make: F) -> &mut ClassificationLedger
    where
        F: FnOnce() -> ClassificationLedger,
    {
        self.ledgers.entry(name.to_string()).or_insert_with(make)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::point::ClassificationPoint;
    use crate::raster::ClassRaster;
    use crate::sampling::session::{RasterRef, SamplingSummary};
    use crate::sampling::{Sampler, SamplingConfig, SamplingDesign};

    #[test]
    fn samplings_are_registered_by_name() {
        let r = ClassRaster::with_unit_pixels(vec![1; 25], 5, 5, None).unwrap();
        let config = SamplingConfig {
            design: SamplingDesign::Simple { num_samples: 4, categories: None },
            ..SamplingConfig::default()
        };
        let outcome = Sampler::new(&r, None).generate(&config).unwrap();
        let summary = SamplingSummary::new(
            "random_sampling_a",
            &config,
            &outcome,
            RasterRef { path: "map.tif".into(), nodata: None },
            None,
        );
        let session = SamplingSession::from_outcome(summary, outcome).unwrap();

        let mut registry = SessionRegistry::new();
        assert!(registry.register_sampling(session).is_none());
        assert_eq!(registry.sampling("random_sampling_a").unwrap().points.len(), 4);
        assert_eq!(registry.sampling_names().collect::<Vec<_>>(), vec!["random_sampling_a"]);
        assert!(registry.remove_sampling("random_sampling_a").is_some());
        assert!(registry.sampling("random_sampling_a").is_none());
    }

    #[test]
    fn ledgers_are_created_once() {
        let mut registry = SessionRegistry::new();
        let mut builds = 0;
        for _ in 0..2 {
            registry.ledger_or_insert_with("s", || {
                builds += 1;
                ClassificationLedger::new("s.geojson", vec![ClassificationPoint::new(1, 0.0, 0.0)], 0)
            });
        }
        assert_eq!(builds, 1);
        registry.ledger_mut("s").unwrap().set_current_index(5);
        assert_eq!(registry.ledger("s").unwrap().current_index(), 0);
        assert!(registry.remove_ledger("s").is_some());
        assert!(registry.ledger("s").is_none());
    }
}
