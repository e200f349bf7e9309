//! The tool catalog.
//!
//! A [`ToolRegistry`] is the single source of truth for what the agent may
//! ask a model to call and which calls need a human's approval first.  Each
//! definition's parameter schema is compiled once (JSON Schema draft 7) and
//! used to validate arguments before dispatch.

use std::collections::HashMap;
use std::sync::Arc;

use jsonschema::{Draft, JSONSchema};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::{AgentError, Result};
use crate::llm::types::{ToolCall, ToolSpec};

/// Grouping used when presenting tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCategory {
    Book,
    Chapter,
    Entity,
}

impl ToolCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Book => "book",
            Self::Chapter => "chapter",
            Self::Entity => "entity",
        }
    }
}

/// An immutable catalog entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Unique tool name.
    pub name: String,
    /// Description shown to the model and at approval time.
    pub description: String,
    pub category: ToolCategory,
    /// Mutating tools set this; `write_only` approval gates on it.
    pub requires_approval: bool,
    /// JSON Schema for the arguments object.
    pub parameters: Value,
}

impl ToolDefinition {
    /// The provider-facing view of this definition.
    pub fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.parameters.clone(),
        }
    }

    fn required(&self) -> Vec<&str> {
        self.parameters["required"]
            .as_array()
            .map(|r| r.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Catalog of tools with compiled argument validators.
#[derive(Clone)]
pub struct ToolRegistry {
    tools: Vec<ToolDefinition>,
    validators: HashMap<String, Arc<JSONSchema>>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}

impl ToolRegistry {
    /// Build a registry, compiling every parameter schema.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::ConfigError`] on duplicate names or schemas
    /// that do not compile.
    pub fn new(tools: Vec<ToolDefinition>) -> Result<Self> {
        let mut validators = HashMap::with_capacity(tools.len());
        for tool in &tools {
            let schema = JSONSchema::options()
                .with_draft(Draft::Draft7)
                .compile(&tool.parameters)
                .map_err(|e| AgentError::ConfigError {
                    reason: format!("failed to compile schema for `{}`: {e}", tool.name),
                })?;
            if validators.insert(tool.name.clone(), Arc::new(schema)).is_some() {
                return Err(AgentError::ConfigError {
                    reason: format!("duplicate tool name: {}", tool.name),
                });
            }
        }
        Ok(Self { tools, validators })
    }

    /// The built-in catalog over the Store Access contract.
    pub fn builtin() -> Result<Self> {
        Self::new(builtin_definitions())
    }

    /// A registry restricted to `enabled` tools, in catalog order.
    pub fn filtered(&self, enabled: &[String]) -> Self {
        let tools: Vec<ToolDefinition> = self
            .tools
            .iter()
            .filter(|t| enabled.iter().any(|e| e == &t.name))
            .cloned()
            .collect();
        let validators = tools
            .iter()
            .filter_map(|t| {
                self.validators
                    .get(&t.name)
                    .map(|v| (t.name.clone(), Arc::clone(v)))
            })
            .collect();
        Self { tools, validators }
    }

    pub fn get(&self, name: &str) -> Option<&ToolDefinition> {
        self.tools.iter().find(|t| t.name == name)
    }

    pub fn definitions(&self) -> &[ToolDefinition] {
        &self.tools
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Provider-facing tool specs.
    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools.iter().map(ToolDefinition::spec).collect()
    }

    /// Check a call's arguments against its tool's schema.
    ///
    /// # Errors
    ///
    /// [`AgentError::UnknownTool`] when the tool is not in this registry,
    /// [`AgentError::InvalidArguments`] when validation fails.
    pub fn validate(&self, call: &ToolCall) -> Result<&ToolDefinition> {
        let tool = self.get(&call.name).ok_or_else(|| AgentError::UnknownTool {
            tool_name: call.name.clone(),
        })?;
        if let Some(schema) = self.validators.get(&call.name)
            && let Err(errors) = schema.validate(&call.arguments)
        {
            let messages: Vec<String> = errors
                .map(|e| {
                    let path = e.instance_path.to_string();
                    if path.is_empty() {
                        e.to_string()
                    } else {
                        format!("{path}: {e}")
                    }
                })
                .collect();
            return Err(AgentError::InvalidArguments {
                tool_name: call.name.clone(),
                reason: messages.join(", "),
            });
        }
        Ok(tool)
    }

    /// Render a call for a human deciding whether to approve it.
    pub fn describe_call(&self, call: &ToolCall) -> String {
        let Some(tool) = self.get(&call.name) else {
            return format!("{} (unknown tool)\n", call.name);
        };
        let required = tool.required();
        let mut out = format!("{}: {}\n", tool.name, tool.description);

        let mut names: Vec<&str> = tool.parameters["properties"]
            .as_object()
            .map(|p| p.keys().map(String::as_str).collect())
            .unwrap_or_default();
        if let Some(args) = call.arguments.as_object() {
            for key in args.keys() {
                if !names.contains(&key.as_str()) {
                    names.push(key.as_str());
                }
            }
        }

        for name in names {
            let Some(value) = call.arguments.get(name) else {
                continue;
            };
            let marker = if required.contains(&name) { "*" } else { "" };
            out.push_str(&format!("  {name}{marker} = {}\n", preview(value)));
        }
        out
    }
}

/// Short single-line rendering of an argument value.
fn preview(value: &Value) -> String {
    const LIMIT: usize = 120;
    let text = match value {
        Value::String(s) => format!("{s:?}"),
        other => other.to_string(),
    };
    if text.chars().count() <= LIMIT {
        return text;
    }
    let cut: String = text.chars().take(LIMIT).collect();
    format!("{cut}… ({} chars)", text.chars().count())
}

// ---------------------------------------------------------------------------
// Built-in catalog
// ---------------------------------------------------------------------------

fn slug_param(what: &str) -> Value {
    json!({"type": "string", "minLength": 1, "description": format!("Slug of the {what}")})
}

fn object(properties: Value, required: &[&str]) -> Value {
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
        "additionalProperties": false,
    })
}

fn tool(
    name: &str,
    description: &str,
    category: ToolCategory,
    requires_approval: bool,
    parameters: Value,
) -> ToolDefinition {
    ToolDefinition {
        name: name.to_owned(),
        description: description.to_owned(),
        category,
        requires_approval,
        parameters,
    }
}

/// Names of every built-in tool.
pub const BUILTIN_TOOLS: [&str; 9] = [
    "get_book",
    "read_chapter",
    "create_chapter",
    "update_chapter",
    "delete_chapter",
    "read_entity",
    "create_entity",
    "update_entity",
    "delete_entity",
];

/// Definitions for the built-in tools.
pub fn builtin_definitions() -> Vec<ToolDefinition> {
    use ToolCategory::{Book, Chapter, Entity};

    vec![
        tool(
            "get_book",
            "Get a book's title, description, chapter list and entity list.",
            Book,
            false,
            object(json!({"bookSlug": slug_param("book")}), &["bookSlug"]),
        ),
        tool(
            "read_chapter",
            "Read the full text of a chapter.",
            Chapter,
            false,
            object(
                json!({"bookSlug": slug_param("book"), "chapterSlug": slug_param("chapter")}),
                &["bookSlug", "chapterSlug"],
            ),
        ),
        tool(
            "create_chapter",
            "Create a new chapter at the end of a book.",
            Chapter,
            true,
            object(
                json!({
                    "bookSlug": slug_param("book"),
                    "title": {"type": "string", "minLength": 1, "description": "Chapter title"},
                    "content": {"type": "string", "description": "Chapter text in markdown"},
                }),
                &["bookSlug", "title"],
            ),
        ),
        tool(
            "update_chapter",
            "Replace a chapter's title and/or text.",
            Chapter,
            true,
            object(
                json!({
                    "bookSlug": slug_param("book"),
                    "chapterSlug": slug_param("chapter"),
                    "title": {"type": "string", "minLength": 1, "description": "New title"},
                    "content": {"type": "string", "description": "New chapter text in markdown"},
                }),
                &["bookSlug", "chapterSlug"],
            ),
        ),
        tool(
            "delete_chapter",
            "Delete a chapter permanently.",
            Chapter,
            true,
            object(
                json!({"bookSlug": slug_param("book"), "chapterSlug": slug_param("chapter")}),
                &["bookSlug", "chapterSlug"],
            ),
        ),
        tool(
            "read_entity",
            "Read an entity (character, location, item, ...) of a book.",
            Entity,
            false,
            object(
                json!({"bookSlug": slug_param("book"), "entitySlug": slug_param("entity")}),
                &["bookSlug", "entitySlug"],
            ),
        ),
        tool(
            "create_entity",
            "Create a new entity in a book.",
            Entity,
            true,
            object(
                json!({
                    "bookSlug": slug_param("book"),
                    "name": {"type": "string", "minLength": 1, "description": "Entity name"},
                    "kind": {"type": "string", "minLength": 1, "description": "Entity type, e.g. character or location"},
                    "description": {"type": "string", "description": "Notes about the entity"},
                }),
                &["bookSlug", "name", "kind"],
            ),
        ),
        tool(
            "update_entity",
            "Change an entity's name, type and/or description.",
            Entity,
            true,
            object(
                json!({
                    "bookSlug": slug_param("book"),
                    "entitySlug": slug_param("entity"),
                    "name": {"type": "string", "minLength": 1},
                    "kind": {"type": "string", "minLength": 1},
                    "description": {"type": "string"},
                }),
                &["bookSlug", "entitySlug"],
            ),
        ),
        tool(
            "delete_entity",
            "Delete an entity permanently.",
            Entity,
            true,
            object(
                json!({"bookSlug": slug_param("book"), "entitySlug": slug_param("entity")}),
                &["bookSlug", "entitySlug"],
            ),
        ),
    ]
}
