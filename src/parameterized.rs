//! Stages that need external configuration before they can run.
//!
//! A parameterized stage moves `Unconfigured -> Configuring -> Ready` inside
//! [`Parameterized::apply_parameters`]. Applying parameters to a `Ready`
//! stage first falls back to `Unconfigured` and releases the previous
//! resource; the stage never leaves `Ready` on its own.

use crate::config::StageParameters;
use crate::error::ConfigurationError;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterState {
    Unconfigured,
    /// Parameters are being validated and the resource opened
    Configuring,
    Ready,
}

impl ParameterState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            2 => ParameterState::Ready,
            1 => ParameterState::Configuring,
            _ => ParameterState::Unconfigured,
        }
    }
}

/// Owner side of a parameter state, kept by the stage
#[derive(Debug, Default)]
pub struct StateCell(Arc<AtomicU8>);

impl StateCell {
    pub fn new() -> Self {
        Self(Arc::new(AtomicU8::new(ParameterState::Unconfigured as u8)))
    }

    pub fn get(&self) -> ParameterState {
        ParameterState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn set(&self, state: ParameterState) {
        self.0.store(state as u8, Ordering::Release);
    }

    /// Read-only handle that stays valid after the stage moves to its thread
    pub fn watch(&self) -> StateWatcher {
        StateWatcher(Arc::clone(&self.0))
    }
}

/// Read-only view of a stage's parameter state
#[derive(Debug, Clone)]
pub struct StateWatcher(Arc<AtomicU8>);

impl StateWatcher {
    pub fn get(&self) -> ParameterState {
        ParameterState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn is_ready(&self) -> bool {
        self.get() == ParameterState::Ready
    }
}

/// A required parameter and its human-readable description
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParameterSpec {
    pub key: &'static str,
    pub description: &'static str,
}

/// Declared keys plus their current values
#[derive(Debug, Clone)]
pub struct ParameterSet {
    specs: &'static [ParameterSpec],
    values: BTreeMap<&'static str, String>,
}

impl ParameterSet {
    pub fn new(specs: &'static [ParameterSpec]) -> Self {
        Self {
            specs,
            values: BTreeMap::new(),
        }
    }

    pub fn specs(&self) -> &'static [ParameterSpec] {
        self.specs
    }

    /// Set a declared key; unknown keys are rejected and leave the set unchanged
    pub fn set(&mut self, key: &str, value: impl Into<String>) -> bool {
        match self.specs.iter().find(|spec| spec.key == key) {
            Some(spec) => {
                self.values.insert(spec.key, value.into());
                true
            }
            None => false,
        }
    }

    pub fn set_all(&mut self, params: &StageParameters) -> Result<(), ConfigurationError> {
        if let Some(unknown) = params
            .keys()
            .find(|key| !self.specs.iter().any(|spec| spec.key == key.as_str()))
        {
            return Err(ConfigurationError::UnknownParameter(unknown.clone()));
        }
        for (key, value) in params {
            self.set(key, value.as_str());
        }
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Value of a required key; absent or blank values are configuration errors
    pub fn require(&self, key: &str) -> Result<&str, ConfigurationError> {
        match self.get(key) {
            Some(value) if !value.trim().is_empty() => Ok(value),
            _ => Err(ConfigurationError::MissingParameter(key.to_string())),
        }
    }

    /// Declared keys that have no usable value, in declaration order
    pub fn missing(&self) -> Vec<&'static str> {
        self.specs
            .iter()
            .filter(|spec| self.require(spec.key).is_err())
            .map(|spec| spec.key)
            .collect()
    }

    /// Every declared key with its value (empty when unset), in declaration order
    pub fn values(&self) -> Vec<(String, String)> {
        self.specs
            .iter()
            .map(|spec| {
                (
                    spec.key.to_string(),
                    self.get(spec.key).unwrap_or_default().to_string(),
                )
            })
            .collect()
    }

    pub fn describe(&self, key: &str) -> Option<&'static str> {
        self.specs
            .iter()
            .find(|spec| spec.key == key)
            .map(|spec| spec.description)
    }
}

/// Configuration surface of a stage that depends on an external resource
pub trait Parameterized {
    fn parameters(&self) -> &ParameterSet;

    fn parameters_mut(&mut self) -> &mut ParameterSet;

    /// Explanation of the parameters for operators
    fn help(&self) -> &str;

    /// Validate parameters and (re)open the downstream resource
    fn apply_parameters(&mut self) -> Result<(), ConfigurationError>;

    fn state(&self) -> ParameterState;

    fn is_ready(&self) -> bool {
        self.state() == ParameterState::Ready
    }

    fn parameter_specs(&self) -> &'static [ParameterSpec] {
        self.parameters().specs()
    }

    fn parameter_values(&self) -> Vec<(String, String)> {
        self.parameters().values()
    }

    fn set_parameter(&mut self, key: &str, value: &str) -> bool {
        self.parameters_mut().set(key, value)
    }

    fn set_parameters(&mut self, params: &StageParameters) -> Result<(), ConfigurationError> {
        self.parameters_mut().set_all(params)
    }

    fn describe_parameter(&self, key: &str) -> Option<&'static str> {
        self.parameters().describe(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPECS: &[ParameterSpec] = &[
        ParameterSpec {
            key: "host",
            description: "Server host",
        },
        ParameterSpec {
            key: "port",
            description: "Server port",
        },
    ];

    #[test]
    fn test_set_rejects_unknown_key() {
        let mut set = ParameterSet::new(SPECS);
        assert!(set.set("host", "localhost"));
        assert!(!set.set("colour", "blue"));
        assert_eq!(set.get("host"), Some("localhost"));
        assert_eq!(set.get("colour"), None);
    }

    #[test]
    fn test_require_and_missing() {
        let mut set = ParameterSet::new(SPECS);
        set.set("port", "  ");
        assert_eq!(set.missing(), vec!["host", "port"]);
        assert_eq!(
            set.require("port"),
            Err(ConfigurationError::MissingParameter("port".into()))
        );
        set.set("host", "db");
        set.set("port", "5432");
        assert!(set.missing().is_empty());
        assert_eq!(set.require("port"), Ok("5432"));
    }

    #[test]
    fn test_values_in_declaration_order() {
        let mut set = ParameterSet::new(SPECS);
        set.set("port", "1");
        assert_eq!(
            set.values(),
            vec![
                ("host".to_string(), String::new()),
                ("port".to_string(), "1".to_string())
            ]
        );
        assert_eq!(set.describe("port"), Some("Server port"));
    }

    #[test]
    fn test_set_all_is_atomic_on_unknown_key() {
        let mut set = ParameterSet::new(SPECS);
        let mut params = StageParameters::new();
        params.insert("host".into(), "db".into());
        params.insert("bogus".into(), "x".into());
        assert_eq!(
            set.set_all(&params),
            Err(ConfigurationError::UnknownParameter("bogus".into()))
        );
        assert_eq!(set.get("host"), None);
    }

    #[test]
    fn test_state_watcher_follows_cell() {
        let cell = StateCell::new();
        let watcher = cell.watch();
        assert_eq!(watcher.get(), ParameterState::Unconfigured);
        cell.set(ParameterState::Configuring);
        assert!(!watcher.is_ready());
        cell.set(ParameterState::Ready);
        assert!(watcher.is_ready());
    }
}
