//! Function registry and overload resolution.
//!
//! The registry is populated through `&mut self` during startup and then
//! shared read-only (typically behind an `Arc`), so lookups on the
//! invocation path take no locks.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use fus_common::{FusError, Result};
use fus_types::{TypeDescriptor, Value, format_type_list};
use tracing::debug;

use crate::function::{FunctionDefinition, FunctionResult, TableRows};
use crate::signature::FunctionKind;

/// Mapping from function name to its overloads, in registration order.
#[derive(Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, Vec<Arc<FunctionDefinition>>>,
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("names", &self.functions.len())
            .field("definitions", &self.len())
            .finish()
    }
}

impl FunctionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a prebuilt definition.
    ///
    /// Fails with [`FusError::DuplicateSignature`] when the name already has an
    /// overload with identical input types.
    pub fn register(&mut self, definition: FunctionDefinition) -> Result<Arc<FunctionDefinition>> {
        let signature = definition.signature();
        if definition.kind() == FunctionKind::Table && signature.output_types().is_empty() {
            return Err(FusError::TypeSyntax {
                fragment: definition.name().to_string(),
                message: "table function needs at least one output type".to_string(),
            });
        }

        let overloads = self
            .functions
            .entry(definition.name().to_string())
            .or_default();
        if overloads
            .iter()
            .any(|existing| existing.signature().inputs() == signature.inputs())
        {
            return Err(FusError::DuplicateSignature {
                name: definition.name().to_string(),
                inputs: format_type_list(signature.inputs()),
            });
        }

        debug!(
            function = definition.name(),
            kind = definition.kind().as_str(),
            signature = %signature,
            "registered function"
        );
        let definition = Arc::new(definition);
        overloads.push(Arc::clone(&definition));
        Ok(definition)
    }

    /// Parse type names and register a scalar function.
    pub fn register_scalar<F>(
        &mut self,
        name: &str,
        input_types: &[&str],
        output_type: &str,
        body: F,
    ) -> Result<Arc<FunctionDefinition>>
    where
        F: Fn(&[Value]) -> FunctionResult<Value> + Send + Sync + 'static,
    {
        let inputs = parse_types(input_types)?;
        let output = TypeDescriptor::parse(output_type)?;
        self.register(FunctionDefinition::scalar(name, inputs, output, body))
    }

    /// Parse type names and register a table function.
    pub fn register_table<F>(
        &mut self,
        name: &str,
        input_types: &[&str],
        output_types: &[&str],
        body: F,
    ) -> Result<Arc<FunctionDefinition>>
    where
        F: Fn(&[Value]) -> FunctionResult<TableRows> + Send + Sync + 'static,
    {
        let inputs = parse_types(input_types)?;
        let outputs = parse_types(output_types)?;
        self.register(FunctionDefinition::table(name, inputs, outputs, body))
    }

    /// Remove the overload of `name` with exactly these input types.
    ///
    /// Returns `true` when a definition was removed.
    pub fn deregister(&mut self, name: &str, inputs: &[TypeDescriptor]) -> bool {
        let Some(overloads) = self.functions.get_mut(name) else {
            return false;
        };
        let before = overloads.len();
        overloads.retain(|d| d.signature().inputs() != inputs);
        let removed = overloads.len() != before;
        if overloads.is_empty() {
            self.functions.remove(name);
        }
        removed
    }

    /// Exact-match lookup on name and ordered input types. No coercion.
    pub fn resolve(
        &self,
        name: &str,
        inputs: &[TypeDescriptor],
    ) -> Result<Arc<FunctionDefinition>> {
        let overloads = self
            .functions
            .get(name)
            .ok_or_else(|| FusError::FunctionNotFound(name.to_string()))?;
        overloads
            .iter()
            .find(|d| d.signature().inputs() == inputs)
            .cloned()
            .ok_or_else(|| FusError::SignatureMismatch {
                name: name.to_string(),
                inputs: format_type_list(inputs),
            })
    }

    /// All overloads registered under `name` (empty when unknown).
    pub fn overloads(&self, name: &str) -> &[Arc<FunctionDefinition>] {
        self.functions.get(name).map(Vec::as_slice).unwrap_or_default()
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> Vec<String> {
        let mut names = self.functions.keys().cloned().collect::<Vec<_>>();
        names.sort();
        names
    }

    /// Every definition, sorted by name, overloads in registration order.
    pub fn definitions(&self) -> Vec<Arc<FunctionDefinition>> {
        self.names()
            .iter()
            .flat_map(|name| self.overloads(name).iter().cloned())
            .collect()
    }

    /// Number of definitions of the given kind.
    pub fn count(&self, kind: FunctionKind) -> usize {
        self.functions
            .values()
            .flatten()
            .filter(|d| d.kind() == kind)
            .count()
    }

    /// Total number of definitions across all names.
    pub fn len(&self) -> usize {
        self.functions.values().map(Vec::len).sum()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

fn parse_types(names: &[&str]) -> Result<Vec<TypeDescriptor>> {
    names.iter().map(|name| TypeDescriptor::parse(name)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constant(v: i32) -> impl Fn(&[Value]) -> FunctionResult<Value> + Send + Sync + 'static {
        move |_args: &[Value]| Ok(Value::Int32(v))
    }

    #[test]
    fn resolves_overloads_by_input_types() {
        let mut registry = FunctionRegistry::new();
        registry
            .register_scalar("gcd", &["INT", "INT"], "INT", constant(2))
            .unwrap();
        registry
            .register_scalar("gcd", &["INT", "INT", "INT"], "INT", constant(3))
            .unwrap();

        let two = registry
            .resolve("gcd", &[TypeDescriptor::Int32, TypeDescriptor::Int32])
            .unwrap();
        assert_eq!(two.signature().inputs().len(), 2);
        let three = registry
            .resolve("gcd", &vec![TypeDescriptor::Int32; 3])
            .unwrap();
        assert_eq!(three.signature().inputs().len(), 3);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.names(), vec!["gcd".to_string()]);
    }

    #[test]
    fn duplicate_signature_is_rejected_and_original_kept() {
        let mut registry = FunctionRegistry::new();
        registry
            .register_scalar("f", &["VARCHAR"], "INT", constant(1))
            .unwrap();
        let err = registry
            .register_scalar("f", &["varchar"], "BIGINT", constant(2))
            .unwrap_err();
        assert!(matches!(err, FusError::DuplicateSignature { .. }), "{err}");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn names_are_case_sensitive() {
        let mut registry = FunctionRegistry::new();
        registry.register_scalar("Upper", &[], "INT", constant(1)).unwrap();
        registry.register_scalar("upper", &[], "INT", constant(1)).unwrap();
        assert_eq!(registry.names(), vec!["Upper".to_string(), "upper".to_string()]);
    }

    #[test]
    fn resolve_distinguishes_missing_name_from_missing_overload() {
        let mut registry = FunctionRegistry::new();
        registry.register_scalar("f", &["INT"], "INT", constant(1)).unwrap();

        assert!(matches!(
            registry.resolve("g", &[TypeDescriptor::Int32]),
            Err(FusError::FunctionNotFound(_))
        ));
        assert!(matches!(
            registry.resolve("f", &[TypeDescriptor::Int64]),
            Err(FusError::SignatureMismatch { .. })
        ));
    }

    #[test]
    fn registration_surfaces_type_errors() {
        let mut registry = FunctionRegistry::new();
        assert!(matches!(
            registry.register_scalar("f", &["INTEGRAL"], "INT", constant(1)),
            Err(FusError::UnknownType(_))
        ));
        assert!(matches!(
            registry.register_scalar("f", &["INT"], "VARCHAR[", constant(1)),
            Err(FusError::TypeSyntax { .. })
        ));
        assert!(matches!(
            registry.register_table("t", &["INT"], &[], |_args: &[Value]| {
                Ok(Box::new(std::iter::empty()) as TableRows)
            }),
            Err(FusError::TypeSyntax { .. })
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn deregister_removes_only_the_matching_overload() {
        let mut registry = FunctionRegistry::new();
        registry.register_scalar("f", &["INT"], "INT", constant(1)).unwrap();
        registry.register_scalar("f", &["BIGINT"], "INT", constant(1)).unwrap();

        assert!(registry.deregister("f", &[TypeDescriptor::Int32]));
        assert!(!registry.deregister("f", &[TypeDescriptor::Int32]));
        assert_eq!(registry.overloads("f").len(), 1);
        assert!(registry.deregister("f", &[TypeDescriptor::Int64]));
        assert!(registry.overloads("f").is_empty());
        assert!(registry.is_empty());
    }
}
