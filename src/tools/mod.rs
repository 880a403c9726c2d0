//! Capability registry and dispatch.
//!
//! A capability is a named, schema-described, synchronous function over the
//! shared [`DatasetContext`]. The registry is validated when capabilities
//! are registered, so a model is only ever offered names that resolve.

pub mod activity;
mod dispatcher;

pub use activity::register_activity_capabilities;
pub use dispatcher::{ResultSummarizer, ToolDispatcher, TRUNCATION_MARKER};

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::error;

use crate::dataset::DatasetContext;
use crate::error::{CapabilityError, CapabilityResult};
use crate::llm::ToolDefinition;

/// Function backing a capability.
pub type CapabilityHandler =
    Arc<dyn Fn(&DatasetContext, Value) -> CapabilityResult<Value> + Send + Sync>;

const MAX_NAME_LEN: usize = 64;

/// A registered capability: name, description, argument schema, handler.
#[derive(Clone)]
pub struct CapabilityDescriptor {
    name: String,
    description: String,
    parameters: Value,
    handler: CapabilityHandler,
}

impl CapabilityDescriptor {
    /// Create a descriptor from a raw JSON schema and an untyped handler.
    pub fn new<F>(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        handler: F,
    ) -> Self
    where
        F: Fn(&DatasetContext, Value) -> CapabilityResult<Value> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            handler: Arc::new(handler),
        }
    }

    /// Create a descriptor whose schema is derived from the argument type.
    pub fn typed<A, R, F>(name: &str, description: &str, handler: F) -> Self
    where
        A: DeserializeOwned + JsonSchema,
        R: Serialize,
        F: Fn(&DatasetContext, A) -> R + Send + Sync + 'static,
    {
        let owned_name = name.to_string();
        Self::new(
            name,
            description,
            argument_schema::<A>(),
            move |context, args| {
                let args: A =
                    serde_json::from_value(args).map_err(|e| CapabilityError::InvalidArguments {
                        name: owned_name.clone(),
                        message: e.to_string(),
                    })?;
                serde_json::to_value(handler(context, args)).map_err(|e| {
                    CapabilityError::Execution {
                        name: owned_name.clone(),
                        message: e.to_string(),
                    }
                })
            },
        )
    }

    /// Capability name as offered to the model.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Human-readable description.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// JSON schema of the argument object.
    pub fn parameters(&self) -> &Value {
        &self.parameters
    }

    /// Invoke the capability.
    pub fn invoke(&self, context: &DatasetContext, args: Value) -> CapabilityResult<Value> {
        (self.handler)(context, args)
    }

    /// Schema handed to the model.
    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition::function(&self.name, &self.description, self.parameters.clone())
    }
}

impl fmt::Debug for CapabilityDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityDescriptor")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

/// Object schema for `A` without the draft and title keys providers reject.
fn argument_schema<A: JsonSchema>() -> Value {
    let mut schema = serde_json::to_value(schemars::schema_for!(A)).unwrap_or_default();
    if let Some(object) = schema.as_object_mut() {
        object.remove("$schema");
        object.remove("title");
    }
    schema
}

/// Name-indexed set of capabilities, in registration order.
#[derive(Debug, Clone, Default)]
pub struct CapabilityRegistry {
    capabilities: Vec<CapabilityDescriptor>,
    index: HashMap<String, usize>,
}

impl CapabilityRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding the built-in activity capabilities.
    pub fn with_builtin_capabilities() -> Self {
        let mut registry = Self::new();
        if let Err(e) = register_activity_capabilities(&mut registry) {
            error!(
                error = %e,
                "Failed to register builtin capability - this indicates a programming error"
            );
        }
        registry
    }

    /// Register a capability.
    ///
    /// # Errors
    /// Returns error if the name is empty, not a valid function name, already
    /// taken, or the schema is not an object schema.
    pub fn register(&mut self, capability: CapabilityDescriptor) -> CapabilityResult<()> {
        let name = capability.name();
        if name.is_empty() {
            return Err(CapabilityError::Registration {
                message: "Capability name is required".to_string(),
            });
        }
        if name.len() > MAX_NAME_LEN
            || !name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(CapabilityError::Registration {
                message: format!("Invalid capability name '{}'", name),
            });
        }
        if self.index.contains_key(name) {
            return Err(CapabilityError::Registration {
                message: format!("Capability '{}' already exists", name),
            });
        }
        if !capability.parameters().is_object() {
            return Err(CapabilityError::Registration {
                message: format!("Capability '{}' must declare an object schema", name),
            });
        }

        self.index.insert(name.to_string(), self.capabilities.len());
        self.capabilities.push(capability);
        Ok(())
    }

    /// Look up a capability by name.
    pub fn get(&self, name: &str) -> Option<&CapabilityDescriptor> {
        self.index.get(name).map(|&i| &self.capabilities[i])
    }

    /// Whether `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Number of registered capabilities.
    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }

    /// Registered names in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.capabilities.iter().map(|c| c.name()).collect()
    }

    /// Schemas of every capability, for attaching to a model request.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.capabilities.iter().map(|c| c.definition()).collect()
    }

    /// One `- name: description` line per capability.
    pub fn catalog(&self) -> String {
        self.capabilities
            .iter()
            .map(|c| format!("- {}: {}", c.name(), c.description()))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Deserialize, JsonSchema)]
    struct EchoArgs {
        /// Text to echo back.
        text: String,
    }

    fn echo() -> CapabilityDescriptor {
        CapabilityDescriptor::typed("echo", "Echo the input", |_ctx: &DatasetContext, args: EchoArgs| {
            args.text
        })
    }

    #[test]
    fn test_typed_descriptor_schema_and_invoke() {
        let capability = echo();
        let schema = capability.parameters();
        assert_eq!(schema["type"], "object");
        assert!(schema["properties"]["text"].is_object());
        assert!(schema.get("$schema").is_none());

        let out = capability
            .invoke(&DatasetContext::default(), json!({"text": "hi"}))
            .unwrap();
        assert_eq!(out, json!("hi"));
    }

    #[test]
    fn test_typed_descriptor_rejects_bad_arguments() {
        let err = echo()
            .invoke(&DatasetContext::default(), json!({"wrong": 1}))
            .unwrap_err();
        assert!(matches!(err, CapabilityError::InvalidArguments { .. }));
    }

    #[test]
    fn test_register_rejects_duplicates_and_bad_names() {
        let mut registry = CapabilityRegistry::new();
        registry.register(echo()).unwrap();
        assert!(registry.register(echo()).is_err());

        let bad = CapabilityDescriptor::new("has space", "d", json!({"type": "object"}), |_, v| Ok(v));
        assert!(registry.register(bad).is_err());

        let empty = CapabilityDescriptor::new("", "d", json!({"type": "object"}), |_, v| Ok(v));
        assert!(registry.register(empty).is_err());

        let no_schema = CapabilityDescriptor::new("x", "d", json!("string"), |_, v| Ok(v));
        assert!(registry.register(no_schema).is_err());

        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_builtin_registry() {
        let registry = CapabilityRegistry::with_builtin_capabilities();
        assert_eq!(registry.len(), 12);
        assert!(registry.contains("get_user_total_karma"));
        assert!(registry.contains("get_community_post_frequency"));
        assert_eq!(registry.names()[0], "get_user_post_activity");

        let definitions = registry.definitions();
        assert_eq!(definitions.len(), 12);
        assert!(definitions.iter().all(|d| d.kind == "function"));
        assert!(registry.catalog().contains("- get_user_top_posts: "));
    }
}
