use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::core::ValueRequirement;
use crate::resolve::producer::{ResolutionProducer, ResolutionSource};
use crate::utils::lock;

/// Owns the producers of a resolution run, one per requirement.
///
/// Every [`get_or_create`](Self::get_or_create) hands out one reference that
/// must be given back through [`release`](Self::release). A producer that is
/// finished and no longer referenced is dropped from the cache, either when
/// the last reference goes through `release` or on the next
/// [`purge`](Self::purge) (references given back by consumers detaching are
/// released on the producer directly).
#[derive(Default)]
pub struct ProducerCache {
    producers: Mutex<HashMap<ValueRequirement, Arc<ResolutionProducer>>>,
}

impl ProducerCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the live producer for `requirement`, or installs a new one
    /// built around the source made by `source`.
    ///
    /// `source` runs without the cache locked, so it may resolve other
    /// requirements through this cache. If another thread installs a
    /// producer for `requirement` in the meantime, that one is returned and
    /// the new source is dropped.
    pub fn get_or_create<S, F>(&self, requirement: &ValueRequirement, source: F) -> Arc<ResolutionProducer>
    where
        S: ResolutionSource + 'static,
        F: FnOnce() -> S,
    {
        if let Some(producer) = self.acquire(requirement) {
            return producer;
        }

        let source = source();

        let mut producers = lock(&self.producers);
        if let Some(producer) = producers.get(requirement)
            && producer.try_add_ref()
        {
            return producer.clone();
        }

        tracing::debug!("creating producer for {}", requirement);
        let producer = ResolutionProducer::new(requirement.clone(), source);
        producers.insert(requirement.clone(), producer.clone());
        producer
    }

    fn acquire(&self, requirement: &ValueRequirement) -> Option<Arc<ResolutionProducer>> {
        let producers = lock(&self.producers);
        let producer = producers.get(requirement)?;
        producer.try_add_ref().then(|| producer.clone())
    }

    pub fn get(&self, requirement: &ValueRequirement) -> Option<Arc<ResolutionProducer>> {
        lock(&self.producers).get(requirement).cloned()
    }

    /// Gives back a reference obtained from `get_or_create`. Returns the
    /// remaining count, or `None` if the cache holds no such producer.
    pub fn release(&self, requirement: &ValueRequirement) -> Option<usize> {
        let mut producers = lock(&self.producers);
        let producer = producers.get(requirement)?;
        let remaining = producer.release();

        if remaining == 0 && producer.is_finished() {
            tracing::debug!("discarding {}", producer);
            producers.remove(requirement);
        }

        Some(remaining)
    }

    /// Drops every producer that is finished and unreferenced. Returns how
    /// many were dropped.
    pub fn purge(&self) -> usize {
        let mut producers = lock(&self.producers);
        let before = producers.len();
        producers.retain(|_, producer| producer.ref_count() > 0 || !producer.is_finished());
        before - producers.len()
    }

    pub fn len(&self) -> usize {
        lock(&self.producers).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.producers).is_empty()
    }
}
