// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::errors::ConfigError;
use crate::operator::{noop, Operator, OperatorConfig};

/// Turns a config block into a built operator, or rejects it.
pub type BuildFn =
    Arc<dyn Fn(&OperatorConfig) -> Result<Box<dyn Operator>, ConfigError> + Send + Sync>;

/// Maps operator type names to their builders.
///
/// Registries are plain values: create one, register the types the embedder
/// supports, and pass it to the receiver. There is no process-global table.
#[derive(Clone, Default)]
pub struct Registry {
    builders: HashMap<String, BuildFn>,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the operator types shipped in this crate.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry
            .builders
            .insert(noop::OPERATOR_TYPE.to_string(), Arc::new(noop::NoopOperator::build));
        registry
    }

    /// # Errors
    ///
    /// [`ConfigError::DuplicateType`] if `operator_type` is already taken.
    pub fn register<F>(&mut self, operator_type: impl Into<String>, build: F) -> Result<(), ConfigError>
    where
        F: Fn(&OperatorConfig) -> Result<Box<dyn Operator>, ConfigError> + Send + Sync + 'static,
    {
        let operator_type = operator_type.into();
        if self.builders.contains_key(&operator_type) {
            return Err(ConfigError::DuplicateType(operator_type));
        }
        debug!("REGISTRY | Registered operator type {}", operator_type);
        self.builders.insert(operator_type, Arc::new(build));
        Ok(())
    }

    #[must_use]
    pub fn lookup(&self, operator_type: &str) -> Option<BuildFn> {
        self.builders.get(operator_type).cloned()
    }

    /// Builds one operator from its config block.
    ///
    /// # Errors
    ///
    /// [`ConfigError::UnknownType`] for unregistered types, otherwise
    /// whatever the type's builder rejects.
    pub fn build(&self, config: &OperatorConfig) -> Result<Box<dyn Operator>, ConfigError> {
        let build = self
            .builders
            .get(&config.operator_type)
            .ok_or_else(|| ConfigError::UnknownType(config.operator_type.clone()))?;
        build(config)
    }

    /// Registered type names, sorted.
    #[must_use]
    pub fn types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.builders.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry").field("types", &self.types()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_contain_noop() {
        let registry = Registry::with_builtins();
        assert_eq!(registry.types(), vec!["noop"]);
        assert!(registry.lookup("noop").is_some());
        assert!(registry.lookup("regex_parser").is_none());
    }

    #[test]
    fn test_build_unknown_type() {
        let registry = Registry::with_builtins();
        match registry.build(&OperatorConfig::new("regex_parser")) {
            Err(ConfigError::UnknownType(name)) => assert_eq!(name, "regex_parser"),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("unknown type must not build"),
        }
    }

    #[test]
    fn test_register_duplicate_type() {
        let mut registry = Registry::with_builtins();
        let err = registry
            .register("noop", noop::NoopOperator::build)
            .expect_err("duplicate");
        assert!(matches!(err, ConfigError::DuplicateType(ref t) if t == "noop"));
    }

    #[test]
    fn test_register_custom_type() {
        let mut registry = Registry::new();
        registry
            .register("passthrough", noop::NoopOperator::build)
            .expect("register");

        let operator = registry
            .build(&OperatorConfig::new("passthrough").with_id("p1"))
            .expect("build");
        assert_eq!(operator.id(), "p1");
        assert_eq!(operator.operator_type(), "passthrough");
    }
}
