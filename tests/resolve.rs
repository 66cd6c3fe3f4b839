use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use calcgraph::resolve::{
    ResolutionFailure, ResolutionProducer, ResolutionPump, ResolutionSource, ResolvedValueCallback,
};
use calcgraph::{
    ComputationTarget, ParameterizedFunction, ResolvedValue, ValueProperties, ValueRequirement,
    ValueSpecification,
};

fn requirement() -> ValueRequirement {
    ValueRequirement::new("PV", ComputationTarget::new("Trade-1"))
}

fn candidate(curve: &str) -> ResolvedValue {
    ResolvedValue::new(
        ValueSpecification::new(
            "PV",
            ComputationTarget::new("Trade-1"),
            ValueProperties::new().with("Curve", curve),
        ),
        ParameterizedFunction::new("present-value"),
    )
}

/// Hands out one scripted candidate per pump, then gives up. Clones share
/// the script, so a test can keep one to start the producer with.
#[derive(Clone)]
struct Scripted(Arc<Mutex<VecDeque<ResolvedValue>>>);

impl Scripted {
    fn new(curves: &[&str]) -> Self {
        Self(Arc::new(Mutex::new(curves.iter().map(|c| candidate(c)).collect())))
    }
}

impl ResolutionSource for Scripted {
    fn pump(&self, producer: &ResolutionProducer) {
        loop {
            let next = self.0.lock().unwrap().pop_front();
            match next {
                Some(value) => {
                    if producer.push_result(value) {
                        return;
                    }
                }
                None => {
                    producer.store_failure(&ResolutionFailure::no_functions(requirement()));
                    producer.finished();
                    return;
                }
            }
        }
    }
}

fn producer(curves: &[&str]) -> (Arc<ResolutionProducer>, Scripted) {
    let source = Scripted::new(curves);
    (ResolutionProducer::new(requirement(), source.clone()), source)
}

#[derive(Default)]
struct Consumer {
    values: Mutex<Vec<String>>,
    failure: Mutex<Option<Option<ResolutionFailure>>>,
    pump: Mutex<Option<ResolutionPump>>,
}

impl Consumer {
    fn pump(&self) {
        let pump = self.pump.lock().unwrap().clone().unwrap();
        pump.pump();
    }

    fn curves(&self) -> Vec<String> {
        self.values.lock().unwrap().clone()
    }
}

impl ResolvedValueCallback for Consumer {
    fn resolved(&self, _: &ValueRequirement, value: ResolvedValue, pump: ResolutionPump) {
        *self.pump.lock().unwrap() = Some(pump);
        let curve = value.specification.properties.get("Curve").unwrap_or_default();
        self.values.lock().unwrap().push(curve.to_string());
    }

    fn failed(&self, _: &ValueRequirement, failure: Option<ResolutionFailure>) {
        *self.failure.lock().unwrap() = Some(failure);
    }
}

fn attach(producer: &ResolutionProducer) -> Arc<Consumer> {
    let consumer = Arc::new(Consumer::default());
    let pump = producer.add_callback(consumer.clone());
    if let Some(pump) = pump {
        consumer.pump.lock().unwrap().get_or_insert(pump);
    }
    consumer
}

#[test]
fn consumers_share_candidates() {
    let (producer, source) = producer(&["USD", "USD", "EUR"]);
    let a = attach(&producer);
    let b = attach(&producer);
    assert_eq!(producer.ref_count(), 3);

    // Both are waiting, the first candidate goes to both.
    source.pump(&producer);
    assert_eq!(a.curves(), ["USD"]);
    assert_eq!(b.curves(), ["USD"]);

    // Duplicate specification skipped by the source.
    a.pump();
    assert_eq!(a.curves(), ["USD", "EUR"]);
    assert_eq!(b.curves(), ["USD"]);

    // Already known, delivered without touching the source.
    b.pump();
    assert_eq!(b.curves(), ["USD", "EUR"]);

    a.pump();
    let failure = a.failure.lock().unwrap().clone().unwrap().unwrap();
    assert!(failure.to_string().contains("EUR"));
    assert!(producer.is_finished());

    b.pump();
    assert!(b.failure.lock().unwrap().is_some());
    assert_eq!(producer.ref_count(), 1);
    assert_eq!(producer.results().len(), 2);
}

#[test]
fn late_consumer_replays_results() {
    let (producer, source) = producer(&["USD"]);
    let early = attach(&producer);
    source.pump(&producer);
    early.pump();
    assert!(producer.is_finished());
    assert!(early.failure.lock().unwrap().is_some());

    let late = attach(&producer);
    assert_eq!(late.curves(), ["USD"]);
    late.pump();

    let failure = late.failure.lock().unwrap().clone().unwrap();
    assert_eq!(failure, producer.failure());
    assert_eq!(producer.ref_count(), 1);
}

#[test]
fn finished_without_results_fails_on_attach() {
    let (producer, source) = producer(&[]);
    let first = attach(&producer);
    source.pump(&producer);
    assert!(first.failure.lock().unwrap().is_some());

    let consumer = Arc::new(Consumer::default());
    assert!(producer.add_callback(consumer.clone()).is_none());
    let failure = consumer.failure.lock().unwrap().clone().unwrap().unwrap();
    assert!(failure.to_string().starts_with("No functions available for PV"));
    assert_eq!(producer.ref_count(), 1);
}

#[test]
fn cancel_only_detaches_idle_consumers() {
    let (producer, source) = producer(&["USD", "EUR"]);
    let a = attach(&producer);
    let b = attach(&producer);
    source.pump(&producer);

    // b received a value and has not asked for another.
    let pump = b.pump.lock().unwrap().clone().unwrap();
    assert!(!pump.cancel());

    b.pump();
    assert_eq!(b.curves(), ["USD", "EUR"]);
    assert_eq!(a.curves(), ["USD"]);

    a.pump.lock().unwrap().clone().unwrap().close();
    assert_eq!(producer.ref_count(), 2);
}
