//! Accumulated reasons why a value requirement could not be resolved.
//!
//! A [`ResolutionFailure`] is a log of every attempt made for one
//! requirement. Attempts that went through a function carry the nested
//! failures of the inputs that function could not get, so the whole structure
//! is a tree rooted at the requirement the caller originally asked for.
//!
//! Failures are plain values. They are delivered to consumers through the
//! producer callback protocol and are never raised as errors.

use std::collections::BTreeMap;
use std::fmt;

use crate::core::{ParameterizedFunction, ResolvedValue, ValueRequirement, ValueSpecification};
use crate::resolve::printer::ResolutionFailurePrinter;

/// A function that was considered for producing a requirement.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FunctionApplication {
    pub function: ParameterizedFunction,
    pub desired_output: ValueSpecification,
    /// Inputs that were successfully resolved, keyed by the specification
    /// they resolved to.
    pub satisfied: BTreeMap<ValueSpecification, ValueRequirement>,
}

impl FunctionApplication {
    pub fn new(function: ParameterizedFunction, desired_output: ValueSpecification) -> Self {
        Self {
            function,
            desired_output,
            satisfied: BTreeMap::new(),
        }
    }

    pub fn with_satisfied(
        mut self,
        satisfied: impl IntoIterator<Item = (ValueSpecification, ValueRequirement)>,
    ) -> Self {
        self.satisfied.extend(satisfied);
        self
    }
}

/// One recorded attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FailureEvent {
    CouldNotResolve,
    NoFunctions,
    RecursiveRequirement,
    Unsatisfied,
    /// A value that *was* found. Kept so the tree shows what has been tried.
    ResolvedValue(ResolvedValue),
    SuccessfulFunction(FunctionApplication),
    FailedFunction {
        application: FunctionApplication,
        unsatisfied: Vec<ResolutionFailure>,
    },
    GetRequirementsFailed(FunctionApplication),
    GetResultsFailed(FunctionApplication),
    GetAdditionalRequirementsFailed(FunctionApplication),
    LateResolutionFailure(FunctionApplication),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolutionFailure {
    requirement: ValueRequirement,
    events: Vec<FailureEvent>,
}

impl ResolutionFailure {
    fn of(requirement: ValueRequirement, event: FailureEvent) -> Self {
        Self {
            requirement,
            events: vec![event],
        }
    }

    pub fn could_not_resolve(requirement: ValueRequirement) -> Self {
        Self::of(requirement, FailureEvent::CouldNotResolve)
    }

    pub fn no_functions(requirement: ValueRequirement) -> Self {
        Self::of(requirement, FailureEvent::NoFunctions)
    }

    pub fn recursive_requirement(requirement: ValueRequirement) -> Self {
        Self::of(requirement, FailureEvent::RecursiveRequirement)
    }

    pub fn unsatisfied(requirement: ValueRequirement) -> Self {
        Self::of(requirement, FailureEvent::Unsatisfied)
    }

    pub fn resolved_value(requirement: ValueRequirement, value: ResolvedValue) -> Self {
        Self::of(requirement, FailureEvent::ResolvedValue(value))
    }

    pub fn successful_function(
        requirement: ValueRequirement,
        application: FunctionApplication,
    ) -> Self {
        Self::of(requirement, FailureEvent::SuccessfulFunction(application))
    }

    pub fn failed_function(
        requirement: ValueRequirement,
        application: FunctionApplication,
        unsatisfied: impl IntoIterator<Item = ResolutionFailure>,
    ) -> Self {
        Self::of(
            requirement,
            FailureEvent::FailedFunction {
                application,
                unsatisfied: unsatisfied.into_iter().collect(),
            },
        )
    }

    pub fn get_requirements_failed(
        requirement: ValueRequirement,
        application: FunctionApplication,
    ) -> Self {
        Self::of(requirement, FailureEvent::GetRequirementsFailed(application))
    }

    pub fn get_results_failed(
        requirement: ValueRequirement,
        application: FunctionApplication,
    ) -> Self {
        Self::of(requirement, FailureEvent::GetResultsFailed(application))
    }

    pub fn get_additional_requirements_failed(
        requirement: ValueRequirement,
        application: FunctionApplication,
    ) -> Self {
        Self::of(
            requirement,
            FailureEvent::GetAdditionalRequirementsFailed(application),
        )
    }

    pub fn late_resolution_failure(
        requirement: ValueRequirement,
        application: FunctionApplication,
    ) -> Self {
        Self::of(requirement, FailureEvent::LateResolutionFailure(application))
    }

    pub fn requirement(&self) -> &ValueRequirement {
        &self.requirement
    }

    pub fn events(&self) -> &[FailureEvent] {
        &self.events
    }

    /// Number of resolved values recorded in this failure.
    pub fn result_count(&self) -> usize {
        self.events
            .iter()
            .filter(|event| matches!(event, FailureEvent::ResolvedValue(_)))
            .count()
    }

    /// Records a value that was resolved for this requirement.
    pub fn add_resolved_value(&mut self, value: ResolvedValue) {
        self.events.push(FailureEvent::ResolvedValue(value));
    }

    /// Folds another failure for the same requirement into this one.
    ///
    /// Identical events are kept once. Failed applications of the same
    /// function to the same output have their nested causes merged per input
    /// requirement instead of being listed twice.
    ///
    /// # Panics
    /// If `other` describes a different requirement.
    pub fn merge(&mut self, other: &ResolutionFailure) {
        assert_eq!(
            self.requirement, other.requirement,
            "merging failures of different requirements"
        );

        for event in &other.events {
            if let FailureEvent::FailedFunction {
                application,
                unsatisfied,
            } = event
                && let Some(existing) = self.failed_function_mut(application)
            {
                merge_causes(existing, unsatisfied);
                continue;
            }

            if !self.events.contains(event) {
                self.events.push(event.clone());
            }
        }
    }

    fn failed_function_mut(
        &mut self,
        target: &FunctionApplication,
    ) -> Option<&mut Vec<ResolutionFailure>> {
        self.events.iter_mut().find_map(|event| match event {
            FailureEvent::FailedFunction {
                application,
                unsatisfied,
            } if application == target => Some(unsatisfied),
            _ => None,
        })
    }

    /// Walks the recorded events in order, handing each one to the matching
    /// visitor method.
    pub fn accept<V>(&self, visitor: &mut V) -> Vec<V::Output>
    where
        V: ResolutionFailureVisitor,
    {
        let requirement = &self.requirement;

        self.events
            .iter()
            .map(|event| match event {
                FailureEvent::CouldNotResolve => visitor.visit_could_not_resolve(requirement),
                FailureEvent::NoFunctions => visitor.visit_no_functions(requirement),
                FailureEvent::RecursiveRequirement => {
                    visitor.visit_recursive_requirement(requirement)
                }
                FailureEvent::Unsatisfied => visitor.visit_unsatisfied(requirement),
                FailureEvent::ResolvedValue(value) => {
                    visitor.visit_resolved_value(requirement, value)
                }
                FailureEvent::SuccessfulFunction(application) => {
                    visitor.visit_successful_function(requirement, application)
                }
                FailureEvent::FailedFunction {
                    application,
                    unsatisfied,
                } => visitor.visit_failed_function(requirement, application, unsatisfied),
                FailureEvent::GetRequirementsFailed(application) => {
                    visitor.visit_get_requirements_failed(requirement, application)
                }
                FailureEvent::GetResultsFailed(application) => {
                    visitor.visit_get_results_failed(requirement, application)
                }
                FailureEvent::GetAdditionalRequirementsFailed(application) => {
                    visitor.visit_get_additional_requirements_failed(requirement, application)
                }
                FailureEvent::LateResolutionFailure(application) => {
                    visitor.visit_late_resolution_failure(requirement, application)
                }
            })
            .collect()
    }
}

fn merge_causes(existing: &mut Vec<ResolutionFailure>, incoming: &[ResolutionFailure]) {
    for cause in incoming {
        match existing
            .iter_mut()
            .find(|known| known.requirement == cause.requirement)
        {
            Some(known) => known.merge(cause),
            None => existing.push(cause.clone()),
        }
    }
}

impl fmt::Display for ResolutionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut buffer = String::new();
        ResolutionFailurePrinter::new(&mut buffer).print(self)?;
        f.write_str(buffer.trim_end())
    }
}

/// Inspects a [`ResolutionFailure`] one event at a time.
///
/// Every kind of event has its own method, and [`ResolutionFailure::accept`]
/// dispatches through an exhaustive match, so adding a kind is a compile
/// error for every visitor rather than a runtime surprise.
pub trait ResolutionFailureVisitor {
    type Output;

    fn visit_could_not_resolve(&mut self, requirement: &ValueRequirement) -> Self::Output;

    fn visit_no_functions(&mut self, requirement: &ValueRequirement) -> Self::Output;

    fn visit_recursive_requirement(&mut self, requirement: &ValueRequirement) -> Self::Output;

    fn visit_unsatisfied(&mut self, requirement: &ValueRequirement) -> Self::Output;

    fn visit_resolved_value(
        &mut self,
        requirement: &ValueRequirement,
        value: &ResolvedValue,
    ) -> Self::Output;

    fn visit_successful_function(
        &mut self,
        requirement: &ValueRequirement,
        application: &FunctionApplication,
    ) -> Self::Output;

    fn visit_failed_function(
        &mut self,
        requirement: &ValueRequirement,
        application: &FunctionApplication,
        unsatisfied: &[ResolutionFailure],
    ) -> Self::Output;

    fn visit_get_requirements_failed(
        &mut self,
        requirement: &ValueRequirement,
        application: &FunctionApplication,
    ) -> Self::Output;

    fn visit_get_results_failed(
        &mut self,
        requirement: &ValueRequirement,
        application: &FunctionApplication,
    ) -> Self::Output;

    fn visit_get_additional_requirements_failed(
        &mut self,
        requirement: &ValueRequirement,
        application: &FunctionApplication,
    ) -> Self::Output;

    fn visit_late_resolution_failure(
        &mut self,
        requirement: &ValueRequirement,
        application: &FunctionApplication,
    ) -> Self::Output;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ComputationTarget, ValueProperties};

    fn requirement(name: &str) -> ValueRequirement {
        ValueRequirement::new(name, ComputationTarget::new("T"))
    }

    fn spec(name: &str) -> ValueSpecification {
        ValueSpecification::new(name, ComputationTarget::new("T"), ValueProperties::new())
    }

    fn application(function: &str, output: &str) -> FunctionApplication {
        FunctionApplication::new(ParameterizedFunction::new(function), spec(output))
    }

    #[test]
    fn test_merge_deduplicates() {
        let mut a = ResolutionFailure::no_functions(requirement("PV"));
        let b = ResolutionFailure::no_functions(requirement("PV"));
        a.merge(&b);
        assert_eq!(a.events().len(), 1);

        let c = ResolutionFailure::recursive_requirement(requirement("PV"));
        a.merge(&c);
        assert_eq!(
            a.events(),
            &[FailureEvent::NoFunctions, FailureEvent::RecursiveRequirement]
        );
    }

    #[test]
    fn test_merge_nested_causes() {
        let mut a = ResolutionFailure::failed_function(
            requirement("PV"),
            application("pricer", "PV"),
            [ResolutionFailure::no_functions(requirement("Curve"))],
        );
        let b = ResolutionFailure::failed_function(
            requirement("PV"),
            application("pricer", "PV"),
            [
                ResolutionFailure::unsatisfied(requirement("Curve")),
                ResolutionFailure::could_not_resolve(requirement("Spot")),
            ],
        );

        a.merge(&b);

        assert_eq!(a.events().len(), 1);
        let FailureEvent::FailedFunction { unsatisfied, .. } = &a.events()[0] else {
            panic!("expected a failed function event");
        };
        assert_eq!(unsatisfied.len(), 2);
        assert_eq!(
            unsatisfied[0].events(),
            &[FailureEvent::NoFunctions, FailureEvent::Unsatisfied]
        );
        assert_eq!(unsatisfied[1].requirement(), &requirement("Spot"));
    }

    #[test]
    fn test_merge_keeps_distinct_functions() {
        let mut a = ResolutionFailure::failed_function(
            requirement("PV"),
            application("pricer-a", "PV"),
            [],
        );
        let b = ResolutionFailure::failed_function(
            requirement("PV"),
            application("pricer-b", "PV"),
            [],
        );
        a.merge(&b);
        assert_eq!(a.events().len(), 2);
    }

    #[test]
    #[should_panic(expected = "different requirements")]
    fn test_merge_wrong_requirement() {
        let mut a = ResolutionFailure::no_functions(requirement("PV"));
        a.merge(&ResolutionFailure::no_functions(requirement("Delta")));
    }

    #[test]
    fn test_result_count() {
        let value = ResolvedValue::new(spec("PV"), ParameterizedFunction::new("pricer"));
        let mut failure = ResolutionFailure::resolved_value(requirement("PV"), value.clone());
        failure.add_resolved_value(value);
        failure.merge(&ResolutionFailure::unsatisfied(requirement("PV")));
        assert_eq!(failure.result_count(), 2);
    }

    struct Counter(usize);

    impl ResolutionFailureVisitor for Counter {
        type Output = ();

        fn visit_could_not_resolve(&mut self, _: &ValueRequirement) {
            self.0 += 1;
        }
        fn visit_no_functions(&mut self, _: &ValueRequirement) {
            self.0 += 1;
        }
        fn visit_recursive_requirement(&mut self, _: &ValueRequirement) {
            self.0 += 1;
        }
        fn visit_unsatisfied(&mut self, _: &ValueRequirement) {
            self.0 += 1;
        }
        fn visit_resolved_value(&mut self, _: &ValueRequirement, _: &ResolvedValue) {
            self.0 += 1;
        }
        fn visit_successful_function(&mut self, _: &ValueRequirement, _: &FunctionApplication) {
            self.0 += 1;
        }
        fn visit_failed_function(
            &mut self,
            _: &ValueRequirement,
            _: &FunctionApplication,
            unsatisfied: &[ResolutionFailure],
        ) {
            self.0 += 1;
            for cause in unsatisfied {
                cause.accept(self);
            }
        }
        fn visit_get_requirements_failed(&mut self, _: &ValueRequirement, _: &FunctionApplication) {
            self.0 += 1;
        }
        fn visit_get_results_failed(&mut self, _: &ValueRequirement, _: &FunctionApplication) {
            self.0 += 1;
        }
        fn visit_get_additional_requirements_failed(
            &mut self,
            _: &ValueRequirement,
            _: &FunctionApplication,
        ) {
            self.0 += 1;
        }
        fn visit_late_resolution_failure(&mut self, _: &ValueRequirement, _: &FunctionApplication) {
            self.0 += 1;
        }
    }

    #[test]
    fn test_visitor_walks_depth_first() {
        let failure = ResolutionFailure::failed_function(
            requirement("PV"),
            application("pricer", "PV"),
            [
                ResolutionFailure::no_functions(requirement("Curve")),
                ResolutionFailure::failed_function(
                    requirement("Spot"),
                    application("spot", "Spot"),
                    [ResolutionFailure::could_not_resolve(requirement("Quote"))],
                ),
            ],
        );

        let mut counter = Counter(0);
        failure.accept(&mut counter);
        assert_eq!(counter.0, 4);
    }
}
