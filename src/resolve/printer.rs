use std::collections::BTreeMap;
use std::fmt::{self, Write};

use crate::core::{ResolvedValue, ValueRequirement, ValueSpecification};
use crate::resolve::failure::{FunctionApplication, ResolutionFailure, ResolutionFailureVisitor};

/// Renders a [`ResolutionFailure`] as indented text, one line per event.
/// Nested causes of a failed function are printed below a `Caused by:` line
/// and indented by two more spaces.
pub struct ResolutionFailurePrinter<'w, W: Write> {
    out: &'w mut W,
    depth: usize,
}

impl<'w, W: Write> ResolutionFailurePrinter<'w, W> {
    pub fn new(out: &'w mut W) -> Self {
        Self { out, depth: 0 }
    }

    pub fn print(&mut self, failure: &ResolutionFailure) -> fmt::Result {
        failure.accept(self).into_iter().collect()
    }

    fn indented(&mut self) -> ResolutionFailurePrinter<'_, W> {
        ResolutionFailurePrinter {
            out: &mut *self.out,
            depth: self.depth + 1,
        }
    }

    fn println(&mut self, line: fmt::Arguments<'_>) -> fmt::Result {
        for _ in 0..self.depth {
            self.out.write_str("  ")?;
        }
        self.out.write_fmt(line)?;
        self.out.write_char('\n')
    }
}

fn requirements(map: &BTreeMap<ValueSpecification, ValueRequirement>) -> String {
    if map.is_empty() {
        return "EMPTY".into();
    }

    let inner = map
        .keys()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ");

    format!("{{{inner}}}")
}

fn failures(list: &[ResolutionFailure]) -> String {
    if list.is_empty() {
        return "EMPTY".into();
    }

    let inner = list
        .iter()
        .map(|failure| failure.requirement().to_string())
        .collect::<Vec<_>>()
        .join(", ");

    format!("{{{inner}}}")
}

impl<W: Write> ResolutionFailureVisitor for ResolutionFailurePrinter<'_, W> {
    type Output = fmt::Result;

    fn visit_could_not_resolve(&mut self, requirement: &ValueRequirement) -> fmt::Result {
        self.println(format_args!("Could not resolve {requirement}"))
    }

    fn visit_no_functions(&mut self, requirement: &ValueRequirement) -> fmt::Result {
        self.println(format_args!("No functions available for {requirement}"))
    }

    fn visit_recursive_requirement(&mut self, requirement: &ValueRequirement) -> fmt::Result {
        self.println(format_args!(
            "Recursive requirement on {requirement} for function(s) producing it"
        ))
    }

    fn visit_unsatisfied(&mut self, requirement: &ValueRequirement) -> fmt::Result {
        self.println(format_args!("Unsatisfied requirement {requirement}"))
    }

    fn visit_resolved_value(
        &mut self,
        requirement: &ValueRequirement,
        value: &ResolvedValue,
    ) -> fmt::Result {
        self.println(format_args!("Resolved {requirement} to {value}"))
    }

    fn visit_successful_function(
        &mut self,
        requirement: &ValueRequirement,
        application: &FunctionApplication,
    ) -> fmt::Result {
        self.println(format_args!(
            "Applied {} for {requirement}",
            application.function
        ))
    }

    fn visit_failed_function(
        &mut self,
        _: &ValueRequirement,
        application: &FunctionApplication,
        unsatisfied: &[ResolutionFailure],
    ) -> fmt::Result {
        self.println(format_args!(
            "Couldn't satisfy {} to produce {}",
            failures(unsatisfied),
            application.desired_output
        ))?;
        self.println(format_args!("Caused by:"))?;

        let mut nested = self.indented();
        for cause in unsatisfied {
            nested.print(cause)?;
        }

        Ok(())
    }

    fn visit_get_requirements_failed(
        &mut self,
        _: &ValueRequirement,
        application: &FunctionApplication,
    ) -> fmt::Result {
        self.println(format_args!(
            "getRequirements method failed on {} for {}",
            application.function, application.desired_output
        ))
    }

    fn visit_get_results_failed(
        &mut self,
        _: &ValueRequirement,
        application: &FunctionApplication,
    ) -> fmt::Result {
        self.println(format_args!(
            "getResults method failed on {}",
            application.function
        ))
    }

    fn visit_get_additional_requirements_failed(
        &mut self,
        _: &ValueRequirement,
        application: &FunctionApplication,
    ) -> fmt::Result {
        self.println(format_args!(
            "getAdditionalRequirements method failed on {} with inputs {}",
            application.function,
            requirements(&application.satisfied)
        ))
    }

    fn visit_late_resolution_failure(
        &mut self,
        _: &ValueRequirement,
        application: &FunctionApplication,
    ) -> fmt::Result {
        self.println(format_args!(
            "Provisional result {} not in function output after late resolution",
            application.desired_output
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ComputationTarget, ParameterizedFunction, ValueProperties};

    fn requirement(name: &str) -> ValueRequirement {
        ValueRequirement::new(name, ComputationTarget::new("T"))
    }

    fn spec(name: &str) -> ValueSpecification {
        ValueSpecification::new(name, ComputationTarget::new("T"), ValueProperties::new())
    }

    #[test]
    fn test_print_nested() {
        let failure = ResolutionFailure::failed_function(
            requirement("PV"),
            FunctionApplication::new(ParameterizedFunction::new("pricer"), spec("PV")),
            [
                ResolutionFailure::no_functions(requirement("Curve")),
                ResolutionFailure::could_not_resolve(requirement("Spot")),
            ],
        );

        let expected = "\
Couldn't satisfy {Curve on T, Spot on T} to produce PV {} on T
Caused by:
  No functions available for Curve on T
  Could not resolve Spot on T
";

        let mut out = String::new();
        ResolutionFailurePrinter::new(&mut out).print(&failure).unwrap();
        assert_eq!(out, expected);
    }

    #[test]
    fn test_print_application_cases() {
        let application = FunctionApplication::new(ParameterizedFunction::new("fx"), spec("Spot"))
            .with_satisfied([(spec("Quote"), requirement("Quote"))]);

        let mut failure =
            ResolutionFailure::get_additional_requirements_failed(requirement("Spot"), application.clone());
        failure.merge(&ResolutionFailure::late_resolution_failure(
            requirement("Spot"),
            application.clone(),
        ));
        failure.merge(&ResolutionFailure::get_results_failed(
            requirement("Spot"),
            application,
        ));

        assert_eq!(
            failure.to_string(),
            "getAdditionalRequirements method failed on fx with inputs {Quote {} on T}\n\
             Provisional result Spot {} on T not in function output after late resolution\n\
             getResults method failed on fx"
        );
    }
}
