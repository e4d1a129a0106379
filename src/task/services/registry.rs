//! Type-indexed handler and completion callback registry.

use crate::config::EngineConfig;
use crate::task::{
    domain::TaskType,
    ports::{CompletionCallback, TaskHandler},
};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Errors detected while building a [`HandlerRegistry`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// A handler was registered for a type with no completion callback.
    #[error("handler {task_type}/{script_name} has no completion callback for its task type")]
    HandlerWithoutCallback {
        /// Task type of the orphaned handler.
        task_type: TaskType,
        /// Script name of the orphaned handler.
        script_name: String,
    },
    /// The same `(type, script name)` pair was registered twice.
    #[error("handler {task_type}/{script_name} registered more than once")]
    DuplicateHandler {
        /// Task type of the duplicated handler.
        task_type: TaskType,
        /// Script name of the duplicated handler.
        script_name: String,
    },
    /// A task type received more than one completion callback.
    #[error("completion callback for task type {0} registered more than once")]
    DuplicateCallback(TaskType),
}

/// No handler module exists for a task's type and script name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolutionError {
    /// No handler is registered under the requested key.
    #[error("no handler registered for task type {task_type} with script {script_name}")]
    HandlerNotFound {
        /// Requested task type.
        task_type: TaskType,
        /// Requested script name, after applying the default.
        script_name: String,
    },
}

/// The task type has no registered completion callback.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown task type: {0}")]
pub struct UnknownTaskType(pub TaskType);

/// Immutable mapping from task types to completion callbacks and from
/// `(type, script name)` to handler modules.
#[derive(Clone)]
pub struct HandlerRegistry {
    default_script_name: String,
    callbacks: HashMap<TaskType, Arc<dyn CompletionCallback>>,
    handlers: HashMap<(TaskType, String), Arc<dyn TaskHandler>>,
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<&str> = self.callbacks.keys().map(TaskType::as_str).collect();
        types.sort_unstable();
        let mut handlers: Vec<String> = self
            .handlers
            .keys()
            .map(|(task_type, script)| format!("{task_type}/{script}"))
            .collect();
        handlers.sort_unstable();
        f.debug_struct("HandlerRegistry")
            .field("default_script_name", &self.default_script_name)
            .field("task_types", &types)
            .field("handlers", &handlers)
            .finish()
    }
}

impl HandlerRegistry {
    /// Starts a registry whose default script name comes from `config`.
    #[must_use]
    pub fn builder(config: &EngineConfig) -> HandlerRegistryBuilder {
        HandlerRegistryBuilder {
            default_script_name: config.default_script_name.clone(),
            callbacks: Vec::new(),
            handlers: Vec::new(),
        }
    }

    /// Fails unless `task_type` has a completion callback.
    ///
    /// # Errors
    ///
    /// Returns [`UnknownTaskType`] for unregistered types.
    pub fn ensure_registered(&self, task_type: &TaskType) -> Result<(), UnknownTaskType> {
        if self.callbacks.contains_key(task_type) {
            Ok(())
        } else {
            Err(UnknownTaskType(task_type.clone()))
        }
    }

    /// Resolves the handler for a task type and optional script name.
    ///
    /// # Errors
    ///
    /// Returns [`ResolutionError::HandlerNotFound`] when nothing is
    /// registered under the key.
    pub fn resolve(
        &self,
        task_type: &TaskType,
        script_name: Option<&str>,
    ) -> Result<Arc<dyn TaskHandler>, ResolutionError> {
        let script = script_name.unwrap_or(&self.default_script_name);
        self.handlers
            .get(&(task_type.clone(), script.to_owned()))
            .cloned()
            .ok_or_else(|| ResolutionError::HandlerNotFound {
                task_type: task_type.clone(),
                script_name: script.to_owned(),
            })
    }

    /// Returns the completion callback for `task_type`.
    ///
    /// # Errors
    ///
    /// Returns [`UnknownTaskType`] for unregistered types.
    pub fn callback(
        &self,
        task_type: &TaskType,
    ) -> Result<Arc<dyn CompletionCallback>, UnknownTaskType> {
        self.callbacks
            .get(task_type)
            .cloned()
            .ok_or_else(|| UnknownTaskType(task_type.clone()))
    }
}

/// Builder collecting registrations for a [`HandlerRegistry`].
pub struct HandlerRegistryBuilder {
    default_script_name: String,
    callbacks: Vec<(TaskType, Arc<dyn CompletionCallback>)>,
    handlers: Vec<(TaskType, String, Arc<dyn TaskHandler>)>,
}

impl HandlerRegistryBuilder {
    /// Registers the completion callback for `task_type`.
    #[must_use]
    pub fn on_complete(
        mut self,
        task_type: TaskType,
        callback: Arc<dyn CompletionCallback>,
    ) -> Self {
        self.callbacks.push((task_type, callback));
        self
    }

    /// Registers a handler module under `(task_type, script_name)`.
    #[must_use]
    pub fn handler(
        mut self,
        task_type: TaskType,
        script_name: impl Into<String>,
        handler: Arc<dyn TaskHandler>,
    ) -> Self {
        self.handlers.push((task_type, script_name.into(), handler));
        self
    }

    /// Registers a handler module under the default script name.
    #[must_use]
    pub fn default_handler(self, task_type: TaskType, handler: Arc<dyn TaskHandler>) -> Self {
        let script_name = self.default_script_name.clone();
        self.handler(task_type, script_name, handler)
    }

    /// Validates the registrations and freezes them.
    ///
    /// # Errors
    ///
    /// Returns a [`RegistryError`] for duplicate registrations or handlers
    /// whose type has no completion callback.
    pub fn build(self) -> Result<HandlerRegistry, RegistryError> {
        let mut callbacks = HashMap::with_capacity(self.callbacks.len());
        for (task_type, callback) in self.callbacks {
            if callbacks.contains_key(&task_type) {
                return Err(RegistryError::DuplicateCallback(task_type));
            }
            callbacks.insert(task_type, callback);
        }

        let mut seen = HashSet::with_capacity(self.handlers.len());
        let mut handlers = HashMap::with_capacity(self.handlers.len());
        for (task_type, script_name, handler) in self.handlers {
            if !callbacks.contains_key(&task_type) {
                return Err(RegistryError::HandlerWithoutCallback {
                    task_type,
                    script_name,
                });
            }
            if !seen.insert((task_type.clone(), script_name.clone())) {
                return Err(RegistryError::DuplicateHandler {
                    task_type,
                    script_name,
                });
            }
            handlers.insert((task_type, script_name), handler);
        }

        Ok(HandlerRegistry {
            default_script_name: self.default_script_name,
            callbacks,
            handlers,
        })
    }
}
