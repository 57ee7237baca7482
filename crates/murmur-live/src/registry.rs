//! Tool registration.
//!
//! Tools are registered before the session starts and are immutable for
//! its duration. Raw JSON schemas are converted once, at registration
//! time, into a typed `ParamSchema` tree so schema problems surface
//! here instead of at call time.

use std::collections::BTreeMap;
use std::sync::Arc;

use murmur_common::ToolError;

/// Handler signature: raw JSON arguments in, JSON result or error
/// string out. Handlers must be idempotent; delivery is at-least-once.
pub type ToolHandler =
    Arc<dyn Fn(&serde_json::Value) -> Result<serde_json::Value, String> + Send + Sync>;

/// Typed parameter schema tree.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamKind {
    String,
    Number,
    Integer,
    Boolean,
    Array {
        items: Box<ParamSchema>,
    },
    Object {
        properties: BTreeMap<String, ParamSchema>,
        required: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParamSchema {
    pub kind: ParamKind,
    pub description: Option<String>,
}

impl ParamSchema {
    /// Convert a raw JSON schema into the typed tree, rejecting
    /// unsupported constructs.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, String> {
        let obj = value
            .as_object()
            .ok_or_else(|| "schema must be a JSON object".to_string())?;

        let type_name = obj
            .get("type")
            .and_then(|t| t.as_str())
            .ok_or_else(|| "schema is missing a 'type' string".to_string())?;

        let description = obj
            .get("description")
            .and_then(|d| d.as_str())
            .map(|d| d.to_string());

        let kind = match type_name {
            "string" => ParamKind::String,
            "number" => ParamKind::Number,
            "integer" => ParamKind::Integer,
            "boolean" => ParamKind::Boolean,
            "array" => {
                let items = obj
                    .get("items")
                    .ok_or_else(|| "array schema is missing 'items'".to_string())?;
                ParamKind::Array {
                    items: Box::new(Self::from_json(items)?),
                }
            }
            "object" => {
                let mut properties = BTreeMap::new();
                if let Some(props) = obj.get("properties") {
                    let props = props
                        .as_object()
                        .ok_or_else(|| "'properties' must be an object".to_string())?;
                    for (name, prop) in props {
                        properties.insert(name.clone(), Self::from_json(prop)?);
                    }
                }
                let required = match obj.get("required") {
                    None => Vec::new(),
                    Some(serde_json::Value::Array(names)) => {
                        let mut required = Vec::new();
                        for name in names {
                            let name = name
                                .as_str()
                                .ok_or_else(|| "'required' entries must be strings".to_string())?;
                            if !properties.contains_key(name) {
                                return Err(format!(
                                    "required property '{name}' is not declared in 'properties'"
                                ));
                            }
                            required.push(name.to_string());
                        }
                        required
                    }
                    Some(_) => return Err("'required' must be an array".to_string()),
                };
                ParamKind::Object {
                    properties,
                    required,
                }
            }
            other => return Err(format!("unsupported type '{other}'")),
        };

        Ok(Self { kind, description })
    }

    /// Render back to JSON for the function declarations sent at setup.
    pub fn to_json(&self) -> serde_json::Value {
        let mut obj = serde_json::Map::new();
        match &self.kind {
            ParamKind::String => {
                obj.insert("type".into(), "string".into());
            }
            ParamKind::Number => {
                obj.insert("type".into(), "number".into());
            }
            ParamKind::Integer => {
                obj.insert("type".into(), "integer".into());
            }
            ParamKind::Boolean => {
                obj.insert("type".into(), "boolean".into());
            }
            ParamKind::Array { items } => {
                obj.insert("type".into(), "array".into());
                obj.insert("items".into(), items.to_json());
            }
            ParamKind::Object {
                properties,
                required,
            } => {
                obj.insert("type".into(), "object".into());
                let props: serde_json::Map<String, serde_json::Value> = properties
                    .iter()
                    .map(|(name, schema)| (name.clone(), schema.to_json()))
                    .collect();
                obj.insert("properties".into(), props.into());
                if !required.is_empty() {
                    obj.insert("required".into(), required.clone().into());
                }
            }
        }
        if let Some(description) = &self.description {
            obj.insert("description".into(), description.clone().into());
        }
        obj.into()
    }
}

/// A named local capability the model may invoke.
#[derive(Clone)]
pub struct RegisteredTool {
    pub name: String,
    pub description: String,
    pub schema: ParamSchema,
    pub handler: ToolHandler,
    pub available: bool,
}

/// Registration-ordered tool catalogue. Populated before the session
/// starts; no re-registration during a session.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<RegisteredTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, validating name, description and schema.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        schema: serde_json::Value,
        handler: ToolHandler,
    ) -> Result<(), ToolError> {
        let name = name.into();
        let description = description.into();

        if name.trim().is_empty() {
            return Err(ToolError::EmptyName);
        }
        if description.trim().is_empty() {
            return Err(ToolError::EmptyDescription(name));
        }
        if self.tools.iter().any(|t| t.name == name) {
            return Err(ToolError::DuplicateName(name));
        }
        let schema = ParamSchema::from_json(&schema).map_err(|reason| ToolError::InvalidSchema {
            name: name.clone(),
            reason,
        })?;

        self.tools.push(RegisteredTool {
            name,
            description,
            schema,
            handler,
            available: true,
        });
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredTool> {
        self.tools.iter().find(|t| t.name == name)
    }

    pub fn set_available(&mut self, name: &str, available: bool) -> Result<(), ToolError> {
        match self.tools.iter_mut().find(|t| t.name == name) {
            Some(tool) => {
                tool.available = available;
                Ok(())
            }
            None => Err(ToolError::UnknownTool(name.to_string())),
        }
    }

    /// Function declarations for session setup, registration order,
    /// available tools only.
    pub fn declarations(&self) -> Vec<serde_json::Value> {
        self.tools
            .iter()
            .filter(|t| t.available)
            .map(|t| {
                serde_json::json!({
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.schema.to_json(),
                })
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo_handler() -> ToolHandler {
        Arc::new(|args| Ok(args.clone()))
    }

    fn string_param(description: &str) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "text": {"type": "string", "description": description}
            },
            "required": ["text"]
        })
    }

    #[test]
    fn registers_valid_tool() {
        let mut registry = ToolRegistry::new();
        registry
            .register("echo", "Echo the input.", string_param("text to echo"), echo_handler())
            .unwrap();

        let tool = registry.get("echo").unwrap();
        assert!(tool.available);
        match &tool.schema.kind {
            ParamKind::Object {
                properties,
                required,
            } => {
                assert!(properties.contains_key("text"));
                assert_eq!(required, &["text".to_string()]);
            }
            other => panic!("expected object schema, got {other:?}"),
        }
    }

    #[test]
    fn rejects_empty_name_and_description() {
        let mut registry = ToolRegistry::new();
        assert!(matches!(
            registry.register("  ", "desc", string_param("x"), echo_handler()),
            Err(ToolError::EmptyName)
        ));
        assert!(matches!(
            registry.register("t", "", string_param("x"), echo_handler()),
            Err(ToolError::EmptyDescription(_))
        ));
    }

    #[test]
    fn rejects_duplicate_name() {
        let mut registry = ToolRegistry::new();
        registry
            .register("echo", "Echo.", string_param("x"), echo_handler())
            .unwrap();
        assert!(matches!(
            registry.register("echo", "Echo again.", string_param("x"), echo_handler()),
            Err(ToolError::DuplicateName(_))
        ));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn rejects_unsupported_type() {
        let mut registry = ToolRegistry::new();
        let err = registry
            .register(
                "bad",
                "Bad schema.",
                serde_json::json!({"type": "tuple"}),
                echo_handler(),
            )
            .unwrap_err();
        assert!(err.to_string().contains("tuple"));
    }

    #[test]
    fn rejects_required_for_undeclared_property() {
        let schema = serde_json::json!({
            "type": "object",
            "properties": {"a": {"type": "string"}},
            "required": ["b"]
        });
        let err = ParamSchema::from_json(&schema).unwrap_err();
        assert!(err.contains("'b'"));
    }

    #[test]
    fn rejects_array_without_items() {
        let err = ParamSchema::from_json(&serde_json::json!({"type": "array"})).unwrap_err();
        assert!(err.contains("items"));
    }

    #[test]
    fn nested_schema_round_trips() {
        let schema = serde_json::json!({
            "type": "object",
            "properties": {
                "tags": {
                    "type": "array",
                    "items": {"type": "string"}
                },
                "point": {
                    "type": "object",
                    "properties": {
                        "x": {"type": "number"},
                        "y": {"type": "number"}
                    },
                    "required": ["x", "y"]
                }
            }
        });
        let parsed = ParamSchema::from_json(&schema).unwrap();
        let rendered = parsed.to_json();
        assert_eq!(rendered["type"], "object");
        assert_eq!(rendered["properties"]["tags"]["items"]["type"], "string");
        assert_eq!(rendered["properties"]["point"]["required"][0], "x");
    }

    #[test]
    fn declarations_skip_unavailable_tools() {
        let mut registry = ToolRegistry::new();
        registry
            .register("echo", "Echo.", string_param("x"), echo_handler())
            .unwrap();
        registry
            .register("time", "Current time.", serde_json::json!({"type": "object"}), echo_handler())
            .unwrap();
        registry.set_available("echo", false).unwrap();

        let decls = registry.declarations();
        assert_eq!(decls.len(), 1);
        assert_eq!(decls[0]["name"], "time");
    }
}
