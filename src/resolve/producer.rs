//! Lazily growing, multi-consumer source of resolved values.
//!
//! A [`ResolutionProducer`] memoizes every [`ResolvedValue`] discovered for a
//! single [`ValueRequirement`]. Any number of consumers can attach to it, and
//! each one walks the shared result list at its own pace.
//!
//! ## Protocol
//!
//! 1. A consumer attaches with [`ResolutionProducer::add_callback`]. It gets
//!    the first known value straight away if there is one, otherwise it waits.
//! 2. Every delivered value comes with a [`ResolutionPump`]. The consumer
//!    calls [`ResolutionPump::pump`] when it wants the next candidate, or
//!    [`ResolutionPump::close`] when it is done.
//! 3. A consumer that asks for more than the producer currently knows becomes
//!    *pumped* (idle). The first consumer to go idle makes the producer ask its
//!    [`ResolutionSource`] for more, which eventually answers with
//!    [`push_result`](ResolutionProducer::push_result) or
//!    [`finished`](ResolutionProducer::finished).
//!
//! ## Locking
//!
//! The producer and every callback have their own lock. Code touching both
//! always takes the producer lock first; the locks are ranked so debug builds
//! catch any path that gets this wrong. Consumer code is never called while a
//! lock is held.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use crate::core::{ResolvedValue, ValueRequirement, ValueSpecification};
use crate::resolve::failure::ResolutionFailure;
use crate::utils::RankedMutex;

static NEXT_OBJECT_ID: AtomicUsize = AtomicUsize::new(0);

const RANK_PRODUCER: u8 = 0;
const RANK_CALLBACK: u8 = 1;

fn next_object_id() -> usize {
    NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed)
}

/// Receives the outcome of asking a producer for a value.
pub trait ResolvedValueCallback: Send + Sync {
    /// A new candidate. Call [`ResolutionPump::pump`] on `pump` for the next
    /// one, or [`ResolutionPump::close`] to stop.
    fn resolved(&self, requirement: &ValueRequirement, value: ResolvedValue, pump: ResolutionPump);

    /// No (further) candidates exist. The consumer is detached afterwards.
    fn failed(&self, requirement: &ValueRequirement, failure: Option<ResolutionFailure>);
}

/// Where a producer gets its candidates from.
pub trait ResolutionSource: Send + Sync {
    /// Called when a consumer is waiting and no unseen results remain. Must,
    /// now or later, lead to one or more [`ResolutionProducer::push_result`]
    /// calls or a single [`ResolutionProducer::finished`] call.
    fn pump(&self, producer: &ResolutionProducer);
}

struct CallbackState {
    results: Arc<[ResolvedValue]>,
    pushed: usize,
    closed: bool,
}

struct CallbackInner {
    id: usize,
    requirement: ValueRequirement,
    consumer: Arc<dyn ResolvedValueCallback>,
    state: RankedMutex<CallbackState>,
}

impl CallbackInner {
    fn take_buffered(&self) -> Option<ResolvedValue> {
        let mut state = self.state.lock();
        assert!(!state.closed, "pump called on closed callback {}", self.id);
        take_next(&mut state)
    }
}

fn take_next(state: &mut CallbackState) -> Option<ResolvedValue> {
    let value = state.results.get(state.pushed).cloned()?;
    state.pushed += 1;
    Some(value)
}

/// Handle a consumer uses to drive its subscription to a producer.
///
/// The handle only holds a weak link to the producer; what keeps the
/// producer alive is the reference count it took on attach, which is given
/// back by [`close`](Self::close), a successful [`cancel`](Self::cancel), or
/// a delivered failure.
#[derive(Clone)]
pub struct ResolutionPump {
    producer: Weak<ResolutionProducer>,
    callback: Arc<CallbackInner>,
}

impl ResolutionPump {
    /// Requests the next candidate. It is delivered synchronously when one is
    /// already known, otherwise the consumer goes idle until one arrives.
    ///
    /// # Panics
    /// If the callback was closed, or is already idle waiting for a value.
    pub fn pump(&self) {
        match self.producer.upgrade() {
            Some(producer) => producer.pump_callback(&self.callback),
            None => {
                tracing::warn!("pump on dropped producer for {}", self.callback.requirement);
                self.callback
                    .consumer
                    .failed(&self.callback.requirement, None);
            }
        }
    }

    /// Detaches an idle consumer. Returns `false` and changes nothing if the
    /// consumer is not idle, e.g. it already received a value.
    pub fn cancel(&self) -> bool {
        match self.producer.upgrade() {
            Some(producer) => producer.cancel_callback(&self.callback),
            None => false,
        }
    }

    /// Detaches the consumer for good.
    ///
    /// # Panics
    /// If the callback was already closed.
    pub fn close(&self) {
        if let Some(producer) = self.producer.upgrade() {
            producer.close_callback(&self.callback);
        }
    }
}

impl fmt::Debug for ResolutionPump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Callback{}[{}]",
            self.callback.id, self.callback.requirement
        )
    }
}

struct ProducerState {
    results: Arc<[ResolvedValue]>,
    emitted: HashSet<ValueSpecification>,
    pumped: BTreeMap<usize, Arc<CallbackInner>>,
    ref_count: usize,
    finished: bool,
    failure: Option<ResolutionFailure>,
}

pub struct ResolutionProducer {
    id: usize,
    requirement: ValueRequirement,
    source: Box<dyn ResolutionSource>,
    this: Weak<ResolutionProducer>,
    state: RankedMutex<ProducerState>,
}

enum Attach {
    First(ResolvedValue),
    Failed(Option<ResolutionFailure>),
    Waiting,
}

enum Pumped {
    Value(ResolvedValue),
    Failed(Option<ResolutionFailure>),
    Idle { pump_source: bool },
}

impl ResolutionProducer {
    /// Creates a producer holding one reference, owned by the caller.
    pub fn new(requirement: ValueRequirement, source: impl ResolutionSource + 'static) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            id: next_object_id(),
            requirement,
            source: Box::new(source),
            this: this.clone(),
            state: RankedMutex::new(
                RANK_PRODUCER,
                ProducerState {
                    results: Arc::from([]),
                    emitted: HashSet::new(),
                    pumped: BTreeMap::new(),
                    ref_count: 1,
                    finished: false,
                    failure: None,
                },
            ),
        })
    }

    pub fn requirement(&self) -> &ValueRequirement {
        &self.requirement
    }

    fn handle(&self, callback: &Arc<CallbackInner>) -> ResolutionPump {
        ResolutionPump {
            producer: self.this.clone(),
            callback: callback.clone(),
        }
    }

    /// Attaches a consumer, taking one reference on its behalf.
    ///
    /// Returns `None` when the producer has already finished without any
    /// result; the consumer has then been failed synchronously and the
    /// reference given back.
    pub fn add_callback(&self, consumer: Arc<dyn ResolvedValueCallback>) -> Option<ResolutionPump> {
        self.add_ref();

        let callback = Arc::new(CallbackInner {
            id: next_object_id(),
            requirement: self.requirement.clone(),
            consumer,
            state: RankedMutex::new(
                RANK_CALLBACK,
                CallbackState {
                    results: Arc::from([]),
                    pushed: 0,
                    closed: false,
                },
            ),
        });

        let attach = {
            let mut state = self.state.lock();
            let mut inner = callback.state.lock();
            tracing::debug!("added callback {} to {}", callback.id, self);

            inner.results = state.results.clone();
            if let Some(first) = take_next(&mut inner) {
                Attach::First(first)
            } else if state.finished {
                inner.closed = true;
                Attach::Failed(state.failure.clone())
            } else {
                state.pumped.insert(callback.id, callback.clone());
                Attach::Waiting
            }
        };

        let handle = self.handle(&callback);

        match attach {
            Attach::First(value) => {
                tracing::debug!("pushing first callback result {}", value);
                callback
                    .consumer
                    .resolved(&self.requirement, value, handle.clone());
                Some(handle)
            }
            Attach::Failed(failure) => {
                tracing::debug!("pushing failure to new callback {}", callback.id);
                callback.consumer.failed(&self.requirement, failure);
                self.release();
                None
            }
            Attach::Waiting => Some(handle),
        }
    }

    fn pump_callback(&self, callback: &Arc<CallbackInner>) {
        tracing::debug!("pump called on callback {}", callback.id);

        let outcome = match callback.take_buffered() {
            Some(value) => Pumped::Value(value),
            None => {
                let mut state = self.state.lock();
                let mut inner = callback.state.lock();

                inner.results = state.results.clone();
                if let Some(value) = take_next(&mut inner) {
                    Pumped::Value(value)
                } else if state.finished {
                    inner.closed = true;
                    Pumped::Failed(state.failure.clone())
                } else {
                    let pump_source = state.pumped.is_empty();
                    let previous = state.pumped.insert(callback.id, callback.clone());
                    assert!(
                        previous.is_none(),
                        "callback {} pumped twice without receiving a value",
                        callback.id
                    );
                    Pumped::Idle { pump_source }
                }
            }
        };

        match outcome {
            Pumped::Value(value) => {
                tracing::debug!("publishing value {}", value);
                callback
                    .consumer
                    .resolved(&self.requirement, value, self.handle(callback));
            }
            Pumped::Failed(failure) => {
                tracing::debug!("finished {}", self.requirement);
                callback.consumer.failed(&self.requirement, failure);
                self.release();
            }
            Pumped::Idle { pump_source: true } => {
                tracing::debug!("pumping source of {}", self);
                self.source.pump(self);
            }
            Pumped::Idle { pump_source: false } => {
                tracing::debug!("callback {} added to pump set", callback.id);
            }
        }
    }

    fn cancel_callback(&self, callback: &Arc<CallbackInner>) -> bool {
        tracing::debug!("cancelling callback {}", callback.id);
        {
            let mut state = self.state.lock();
            if state.pumped.remove(&callback.id).is_none() {
                return false;
            }
            callback.state.lock().closed = true;
        }
        self.release();
        true
    }

    fn close_callback(&self, callback: &Arc<CallbackInner>) {
        tracing::debug!("closing callback {}", callback.id);
        {
            let mut state = self.state.lock();
            let mut inner = callback.state.lock();
            assert!(!inner.closed, "callback {} closed twice", callback.id);
            inner.closed = true;
            state.pumped.remove(&callback.id);
        }
        self.release();
    }

    /// Publishes a new candidate value.
    ///
    /// Returns `false` without side effects if a value with the same
    /// specification was published before. Otherwise every idle consumer is
    /// handed the new value and leaves the idle set.
    ///
    /// # Panics
    /// If the producer has finished, or the value does not satisfy the
    /// requirement.
    pub fn push_result(&self, value: ResolvedValue) -> bool {
        assert!(
            self.requirement.is_satisfied_by(&value.specification),
            "{} does not satisfy {}",
            value.specification,
            self.requirement
        );

        let deliveries = {
            let mut state = self.state.lock();
            assert!(!state.finished, "result pushed to finished producer {}", self);

            if !state.emitted.insert(value.specification.clone()) {
                tracing::debug!("rejecting {} already available from {}", value, self);
                return false;
            }

            tracing::debug!("result {} available from {}", value, self);
            let mut results = state.results.to_vec();
            results.push(value);
            state.results = Arc::from(results);

            let pumped = std::mem::take(&mut state.pumped);
            let mut deliveries = Vec::with_capacity(pumped.len());
            for callback in pumped.into_values() {
                let mut inner = callback.state.lock();
                inner.results = state.results.clone();
                if let Some(next) = take_next(&mut inner) {
                    drop(inner);
                    deliveries.push((callback, next));
                }
            }
            deliveries
        };

        for (callback, value) in deliveries {
            tracing::debug!("pushing result to callback {}", callback.id);
            callback
                .consumer
                .resolved(&self.requirement, value, self.handle(&callback));
        }

        true
    }

    /// Marks the producer as exhausted. Idle consumers are failed with the
    /// accumulated failure and their references released.
    ///
    /// # Panics
    /// If called more than once.
    pub fn finished(&self) {
        tracing::debug!("finished producing results at {}", self);

        let (pumped, failure) = {
            let mut state = self.state.lock();
            assert!(!state.finished, "finished called twice on {}", self);
            state.finished = true;

            let pumped = std::mem::take(&mut state.pumped);
            for callback in pumped.values() {
                callback.state.lock().closed = true;
            }
            (pumped, state.failure.clone())
        };

        if pumped.is_empty() {
            tracing::debug!("no pumped callbacks");
        }

        for callback in pumped.into_values() {
            tracing::debug!("pushing failure to callback {}", callback.id);
            callback.consumer.failed(&self.requirement, failure.clone());
            self.release();
        }
    }

    /// Merges a failure cause into the accumulated failure, first recording
    /// every value this producer has already found so the tree shows what
    /// has been tried as well as what went wrong.
    pub fn store_failure(&self, failure: &ResolutionFailure) {
        let mut state = self.state.lock();
        let results = state.results.clone();

        if state.failure.is_none() && results.is_empty() {
            state.failure = Some(failure.clone());
            return;
        }

        let tree = state.failure.get_or_insert_with(|| {
            ResolutionFailure::resolved_value(self.requirement.clone(), results[0].clone())
        });

        while tree.result_count() < results.len() {
            tree.add_resolved_value(results[tree.result_count()].clone());
        }

        tree.merge(failure);
    }

    pub fn failure(&self) -> Option<ResolutionFailure> {
        self.state.lock().failure.clone()
    }

    /// All values produced.
    ///
    /// # Panics
    /// If the producer has not finished yet.
    pub fn results(&self) -> Arc<[ResolvedValue]> {
        let state = self.state.lock();
        assert!(state.finished, "results requested before {} finished", self);
        state.results.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.state.lock().finished
    }

    pub fn add_ref(&self) {
        let mut state = self.state.lock();
        assert!(state.ref_count > 0, "add_ref on released producer {}", self);
        state.ref_count += 1;
    }

    /// Takes a reference unless the count already dropped to zero.
    pub(crate) fn try_add_ref(&self) -> bool {
        let mut state = self.state.lock();
        if state.ref_count == 0 {
            return false;
        }
        state.ref_count += 1;
        true
    }

    /// Gives back one reference and returns how many remain. Never drops
    /// anything itself; that is up to whoever owns the producer.
    pub fn release(&self) -> usize {
        let mut state = self.state.lock();
        assert!(state.ref_count > 0, "release on released producer {}", self);
        tracing::debug!("release called on {}, ref_count={}", self, state.ref_count);
        state.ref_count -= 1;
        state.ref_count
    }

    pub fn ref_count(&self) -> usize {
        self.state.lock().ref_count
    }
}

impl fmt::Display for ResolutionProducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Producer{}[{}]", self.id, self.requirement)
    }
}

impl fmt::Debug for ResolutionProducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::core::{ComputationTarget, ParameterizedFunction, ValueProperties};

    pub(crate) fn requirement() -> ValueRequirement {
        ValueRequirement::new("PV", ComputationTarget::new("SWAP-1"))
    }

    pub(crate) fn value(curve: &str) -> ResolvedValue {
        ResolvedValue::new(
            ValueSpecification::new(
                "PV",
                ComputationTarget::new("SWAP-1"),
                ValueProperties::new().with("Curve", curve),
            ),
            ParameterizedFunction::new("pricer"),
        )
    }

    /// Source that only counts how often it was asked for more.
    #[derive(Clone, Default)]
    pub(crate) struct CountingSource(pub Arc<AtomicUsize>);

    impl ResolutionSource for CountingSource {
        fn pump(&self, _: &ResolutionProducer) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Debug, PartialEq)]
    pub(crate) enum Event {
        Resolved(String),
        Failed(bool),
    }

    /// Consumer that records what it got and keeps the last pump handle.
    #[derive(Default)]
    pub(crate) struct Recorder {
        pub events: Mutex<Vec<Event>>,
        pub pump: Mutex<Option<ResolutionPump>>,
    }

    impl Recorder {
        pub(crate) fn events(&self) -> Vec<Event> {
            std::mem::take(&mut *self.events.lock().unwrap())
        }

        pub(crate) fn pump(&self) -> ResolutionPump {
            self.pump.lock().unwrap().clone().unwrap()
        }
    }

    impl ResolvedValueCallback for Recorder {
        fn resolved(&self, _: &ValueRequirement, value: ResolvedValue, pump: ResolutionPump) {
            let curve = value.specification.properties.get("Curve").unwrap().to_string();
            *self.pump.lock().unwrap() = Some(pump);
            self.events.lock().unwrap().push(Event::Resolved(curve));
        }

        fn failed(&self, _: &ValueRequirement, failure: Option<ResolutionFailure>) {
            self.events.lock().unwrap().push(Event::Failed(failure.is_some()));
        }
    }

    fn producer() -> (Arc<ResolutionProducer>, CountingSource) {
        let source = CountingSource::default();
        (ResolutionProducer::new(requirement(), source.clone()), source)
    }

    #[test]
    fn test_waiting_consumer_receives_push() {
        let (producer, source) = producer();
        let consumer = Arc::new(Recorder::default());

        let handle = producer.add_callback(consumer.clone());
        assert!(handle.is_some());
        assert_eq!(producer.ref_count(), 2);
        assert!(consumer.events().is_empty());
        // Attaching alone does not ask the source for anything.
        assert_eq!(source.0.load(Ordering::SeqCst), 0);

        assert!(producer.push_result(value("USD")));
        assert_eq!(consumer.events(), vec![Event::Resolved("USD".into())]);

        // The consumer left the idle set, so the next push is not delivered.
        assert!(producer.push_result(value("EUR")));
        assert!(consumer.events().is_empty());

        consumer.pump().pump();
        assert_eq!(consumer.events(), vec![Event::Resolved("EUR".into())]);
    }

    #[test]
    fn test_duplicate_specification_rejected() {
        let (producer, _) = producer();
        let consumer = Arc::new(Recorder::default());
        producer.add_callback(consumer.clone());

        assert!(producer.push_result(value("USD")));
        assert!(!producer.push_result(value("USD")));

        consumer.pump().pump();
        producer.finished();

        assert_eq!(
            consumer.events(),
            vec![Event::Resolved("USD".into()), Event::Failed(false)]
        );
        assert_eq!(producer.results().len(), 1);
    }

    #[test]
    fn test_late_consumer_gets_buffered_values() {
        let (producer, source) = producer();
        producer.push_result(value("USD"));
        producer.push_result(value("EUR"));

        let consumer = Arc::new(Recorder::default());
        producer.add_callback(consumer.clone());
        assert_eq!(consumer.events(), vec![Event::Resolved("USD".into())]);

        consumer.pump().pump();
        assert_eq!(consumer.events(), vec![Event::Resolved("EUR".into())]);

        // Nothing buffered: goes idle and asks the source.
        consumer.pump().pump();
        assert!(consumer.events().is_empty());
        assert_eq!(source.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_only_first_idle_consumer_pumps_source() {
        let (producer, source) = producer();
        producer.push_result(value("USD"));

        let a = Arc::new(Recorder::default());
        let b = Arc::new(Recorder::default());
        producer.add_callback(a.clone());
        producer.add_callback(b.clone());

        a.pump().pump();
        b.pump().pump();
        assert_eq!(source.0.load(Ordering::SeqCst), 1);

        producer.push_result(value("EUR"));
        assert_eq!(a.events().last(), Some(&Event::Resolved("EUR".into())));
        assert_eq!(b.events().last(), Some(&Event::Resolved("EUR".into())));
    }

    #[test]
    fn test_finished_without_results_fails_new_consumer() {
        let (producer, _) = producer();
        producer.finished();

        let consumer = Arc::new(Recorder::default());
        assert!(producer.add_callback(consumer.clone()).is_none());
        assert_eq!(consumer.events(), vec![Event::Failed(false)]);
        assert_eq!(producer.ref_count(), 1);
    }

    #[test]
    fn test_finished_fails_idle_consumers() {
        let (producer, _) = producer();
        let a = Arc::new(Recorder::default());
        let b = Arc::new(Recorder::default());
        producer.add_callback(a.clone());
        producer.add_callback(b.clone());
        assert_eq!(producer.ref_count(), 3);

        producer.store_failure(&ResolutionFailure::no_functions(requirement()));
        producer.finished();

        assert_eq!(a.events(), vec![Event::Failed(true)]);
        assert_eq!(b.events(), vec![Event::Failed(true)]);
        assert_eq!(producer.ref_count(), 1);
    }

    #[test]
    fn test_pump_after_finish_delivers_failure() {
        let (producer, _) = producer();
        let consumer = Arc::new(Recorder::default());
        producer.add_callback(consumer.clone());
        producer.push_result(value("USD"));
        producer.finished();

        consumer.pump().pump();
        assert_eq!(
            consumer.events(),
            vec![Event::Resolved("USD".into()), Event::Failed(false)]
        );
        assert_eq!(producer.ref_count(), 1);
    }

    #[test]
    fn test_cancel_idle_consumer() {
        let (producer, _) = producer();
        let consumer = Arc::new(Recorder::default());
        let handle = producer.add_callback(consumer.clone()).unwrap();
        assert_eq!(producer.ref_count(), 2);

        assert!(handle.cancel());
        assert_eq!(producer.ref_count(), 1);
        assert!(!handle.cancel());

        producer.push_result(value("USD"));
        assert!(consumer.events().is_empty());
    }

    #[test]
    fn test_cancel_after_delivery_is_noop() {
        let (producer, _) = producer();
        producer.push_result(value("USD"));

        let consumer = Arc::new(Recorder::default());
        let handle = producer.add_callback(consumer.clone()).unwrap();
        assert_eq!(producer.ref_count(), 2);

        assert!(!handle.cancel());
        assert_eq!(producer.ref_count(), 2);

        handle.close();
        assert_eq!(producer.ref_count(), 1);
    }

    #[test]
    #[should_panic(expected = "finished producer")]
    fn test_push_after_finished_panics() {
        let (producer, _) = producer();
        producer.finished();
        producer.push_result(value("USD"));
    }

    #[test]
    #[should_panic(expected = "finished called twice")]
    fn test_double_finish_panics() {
        let (producer, _) = producer();
        producer.finished();
        producer.finished();
    }

    #[test]
    #[should_panic(expected = "closed twice")]
    fn test_double_close_panics() {
        let (producer, _) = producer();
        producer.push_result(value("USD"));
        let consumer = Arc::new(Recorder::default());
        let handle = producer.add_callback(consumer).unwrap();
        handle.close();
        handle.close();
    }

    #[test]
    #[should_panic(expected = "pumped twice")]
    fn test_double_pump_panics() {
        let (producer, _) = producer();
        let consumer = Arc::new(Recorder::default());
        let handle = producer.add_callback(consumer).unwrap();
        // Already idle after attaching to an empty producer.
        handle.pump();
    }

    #[test]
    fn test_store_failure_replays_results() {
        let (producer, _) = producer();
        producer.push_result(value("USD"));
        producer.push_result(value("EUR"));

        producer.store_failure(&ResolutionFailure::unsatisfied(requirement()));
        let failure = producer.failure().unwrap();
        assert_eq!(failure.result_count(), 2);

        producer.push_result(value("GBP"));
        producer.store_failure(&ResolutionFailure::no_functions(requirement()));
        let failure = producer.failure().unwrap();
        assert_eq!(failure.result_count(), 3);
        assert_eq!(failure.events().len(), 5);
    }

    #[test]
    fn test_store_failure_without_results_keeps_cause() {
        let (producer, _) = producer();
        let cause = ResolutionFailure::recursive_requirement(requirement());
        producer.store_failure(&cause);
        assert_eq!(producer.failure(), Some(cause));
    }

    /// Source that answers every pump synchronously from a fixed list.
    struct ListSource(Mutex<Vec<ResolvedValue>>);

    impl ResolutionSource for ListSource {
        fn pump(&self, producer: &ResolutionProducer) {
            let next = self.0.lock().unwrap().pop();
            match next {
                Some(value) => {
                    producer.push_result(value);
                }
                None => producer.finished(),
            }
        }
    }

    #[test]
    fn test_synchronous_source_drains() {
        let producer = ResolutionProducer::new(
            requirement(),
            ListSource(Mutex::new(vec![value("EUR"), value("USD")])),
        );
        let consumer = Arc::new(Recorder::default());
        producer.add_callback(consumer.clone());

        // Attaching registers the consumer as idle without pumping; drive the
        // first round by hand through the source.
        producer.source.pump(&producer);
        consumer.pump().pump();
        consumer.pump().pump();

        assert_eq!(
            consumer.events(),
            vec![
                Event::Resolved("USD".into()),
                Event::Resolved("EUR".into()),
                Event::Failed(false),
            ]
        );
        assert!(producer.is_finished());
        assert_eq!(producer.ref_count(), 1);
    }

    #[test]
    fn test_concurrent_push_and_pump() {
        let (producer, _) = producer();
        let consumers: Vec<_> = (0..8).map(|_| Arc::new(Recorder::default())).collect();
        for consumer in &consumers {
            producer.add_callback(consumer.clone());
        }

        std::thread::scope(|s| {
            s.spawn(|| {
                for i in 0..50 {
                    producer.push_result(value(&format!("C{i}")));
                }
            });
            for consumer in &consumers {
                s.spawn(|| {
                    let mut seen = 0;
                    while seen < 50 {
                        let got = consumer.events.lock().unwrap().len();
                        if got > seen {
                            seen = got;
                            if seen < 50 {
                                consumer.pump().pump();
                            }
                        } else {
                            std::thread::yield_now();
                        }
                    }
                });
            }
        });

        for consumer in &consumers {
            let events = consumer.events();
            let expected: Vec<_> = (0..50).map(|i| Event::Resolved(format!("C{i}"))).collect();
            assert_eq!(events, expected);
        }
    }
}
