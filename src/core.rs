use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// A type-erased, thread-safe container.
pub type Dynamic = Arc<dyn Any + Send + Sync>;

/// Atomic reference-counted string type used for identifiers.
pub type ArcStr = Arc<str>;

/// Identifies the object a value is computed for (a trade, a curve, a
/// portfolio node...). The engine treats it as an opaque key.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ComputationTarget(ArcStr);

impl ComputationTarget {
    pub fn new(id: impl Into<ArcStr>) -> Self {
        Self(id.into())
    }

    pub fn id(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ComputationTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A sorted set of `name=value` properties.
///
/// On a [`ValueRequirement`] these act as constraints, on a
/// [`ValueSpecification`] they describe what was actually produced. A
/// constraint with an empty value is a wildcard: it is satisfied by any
/// specification that defines the property at all.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ValueProperties {
    properties: BTreeMap<ArcStr, ArcStr>,
}

impl ValueProperties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<ArcStr>, value: impl Into<ArcStr>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    pub fn with_any(self, name: impl Into<ArcStr>) -> Self {
        self.with(name, "")
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.properties.get(name).map(AsRef::as_ref)
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.properties
            .iter()
            .map(|(key, value)| (key.as_ref(), value.as_ref()))
    }

    /// Checks whether every constraint in `self` is met by `properties`.
    pub fn is_satisfied_by(&self, properties: &ValueProperties) -> bool {
        self.properties
            .iter()
            .all(|(name, constraint)| match properties.get(name) {
                Some(_) if constraint.is_empty() => true,
                Some(value) => value == constraint.as_ref(),
                None => false,
            })
    }
}

impl fmt::Display for ValueProperties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (name, value)) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            if value.is_empty() {
                write!(f, "{name}")?;
            } else {
                write!(f, "{name}={value}")?;
            }
        }
        f.write_str("}")
    }
}

/// What a caller needs computed: a named value on a target, optionally
/// narrowed by constraints.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ValueRequirement {
    pub value_name: ArcStr,
    pub target: ComputationTarget,
    pub constraints: ValueProperties,
}

impl ValueRequirement {
    pub fn new(value_name: impl Into<ArcStr>, target: ComputationTarget) -> Self {
        Self {
            value_name: value_name.into(),
            target,
            constraints: ValueProperties::default(),
        }
    }

    pub fn with_constraints(mut self, constraints: ValueProperties) -> Self {
        self.constraints = constraints;
        self
    }

    pub fn is_satisfied_by(&self, specification: &ValueSpecification) -> bool {
        self.value_name == specification.value_name
            && self.target == specification.target
            && self.constraints.is_satisfied_by(&specification.properties)
    }
}

impl fmt::Display for ValueRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value_name)?;
        if !self.constraints.is_empty() {
            write!(f, " {}", self.constraints)?;
        }
        write!(f, " on {}", self.target)
    }
}

/// A concrete value that some function application will produce.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ValueSpecification {
    pub value_name: ArcStr,
    pub target: ComputationTarget,
    pub properties: ValueProperties,
}

impl ValueSpecification {
    pub fn new(
        value_name: impl Into<ArcStr>,
        target: ComputationTarget,
        properties: ValueProperties,
    ) -> Self {
        Self {
            value_name: value_name.into(),
            target,
            properties,
        }
    }
}

impl fmt::Display for ValueSpecification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} on {}",
            self.value_name, self.properties, self.target
        )
    }
}

/// A function together with the parameters it is invoked with.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ParameterizedFunction {
    pub function_id: ArcStr,
    pub parameters: ValueProperties,
}

impl ParameterizedFunction {
    pub fn new(function_id: impl Into<ArcStr>) -> Self {
        Self {
            function_id: function_id.into(),
            parameters: ValueProperties::default(),
        }
    }
}

impl fmt::Display for ParameterizedFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.parameters.is_empty() {
            f.write_str(&self.function_id)
        } else {
            write!(f, "{}{}", self.function_id, self.parameters)
        }
    }
}

/// One candidate answer to a [`ValueRequirement`]: the specification that
/// will be produced and the function application producing it.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ResolvedValue {
    pub specification: ValueSpecification,
    pub function: ParameterizedFunction,
    pub inputs: Vec<ValueSpecification>,
}

impl ResolvedValue {
    pub fn new(specification: ValueSpecification, function: ParameterizedFunction) -> Self {
        Self {
            specification,
            function,
            inputs: Vec::new(),
        }
    }

    pub fn with_inputs(mut self, inputs: impl IntoIterator<Item = ValueSpecification>) -> Self {
        self.inputs = inputs.into_iter().collect();
        self
    }
}

impl fmt::Display for ResolvedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.specification.fmt(f)
    }
}
