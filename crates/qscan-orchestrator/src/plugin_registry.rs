//! Step Registry — catalogue of named, instantiable workflow steps.
//!
//! A `functionName` on a [`crate::WorkflowNode`] is resolved against this
//! registry rather than a raw function pointer, so that a workflow
//! definition round-trips through persisted config and step
//! implementations can be swapped or tested independently of the
//! orchestrator loop. Each lookup produces a fresh, independently-stateful
//! step instance so that two cycled lists using the same step name never
//! share mutable state.

use crate::step::Step;

/// A thread-safe factory closure that produces a fresh step instance.
pub type StepFactory = Box<dyn Fn() -> Box<dyn Step> + Send + Sync>;

/// Static metadata for a registered step, queryable without instantiating it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StepMeta {
    pub name: String,
    pub version: String,
    pub description: String,
}

impl StepMeta {
    pub fn new(name: impl Into<String>, version: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            description: description.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RegistryError {
    DuplicateName { name: String },
    UnknownStep { name: String },
    EmptyName,
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateName { name } => write!(f, "step '{name}' is already registered"),
            Self::UnknownStep { name } => write!(f, "no step named '{name}' is registered"),
            Self::EmptyName => write!(f, "step name must not be empty"),
        }
    }
}

impl std::error::Error for RegistryError {}

struct RegistryEntry {
    meta: StepMeta,
    factory: StepFactory,
}

/// Catalogue of available steps and their factories, in insertion order.
pub struct StepRegistry {
    entries: Vec<RegistryEntry>,
}

impl Default for StepRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl StepRegistry {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    pub fn register<F>(&mut self, meta: StepMeta, factory: F) -> Result<(), RegistryError>
    where
        F: Fn() -> Box<dyn Step> + Send + Sync + 'static,
    {
        if meta.name.trim().is_empty() {
            return Err(RegistryError::EmptyName);
        }
        if self.contains(&meta.name) {
            return Err(RegistryError::DuplicateName { name: meta.name.clone() });
        }
        self.entries.push(RegistryEntry {
            meta,
            factory: Box::new(factory),
        });
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|e| e.meta.name == name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn list(&self) -> Vec<&StepMeta> {
        self.entries.iter().map(|e| &e.meta).collect()
    }

    pub fn lookup(&self, name: &str) -> Result<&StepMeta, RegistryError> {
        self.entries
            .iter()
            .find(|e| e.meta.name == name)
            .map(|e| &e.meta)
            .ok_or_else(|| RegistryError::UnknownStep { name: name.to_string() })
    }

    /// Instantiate a step by name. Each call produces a fresh instance.
    pub fn instantiate(&self, name: &str) -> Result<Box<dyn Step>, RegistryError> {
        let entry = self
            .entries
            .iter()
            .find(|e| e.meta.name == name)
            .ok_or_else(|| RegistryError::UnknownStep { name: name.to_string() })?;
        Ok((entry.factory)())
    }
}
