//! Tool execution against a Store Access handle.
//!
//! Handlers are registered once in a name-keyed dispatch table.  Every
//! failure (unknown tool, invalid arguments, store error) becomes an error
//! [`ToolResult`] so one failing call never aborts its siblings.

use std::collections::HashMap;

use futures::future::BoxFuture;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{AgentError, Result};
use crate::llm::types::{ToolCall, ToolResult};
use crate::tools::registry::ToolRegistry;
use crate::tools::store::{
    Book, Chapter, ChapterPatch, Entity, EntityPatch, NewChapter, NewEntity, StoreAccess,
};

type Handler = for<'a> fn(&'a Value, &'a dyn StoreAccess) -> BoxFuture<'a, Result<String>>;

/// Runs tool calls through a dispatch table.
pub struct ToolExecutor {
    registry: ToolRegistry,
    handlers: HashMap<&'static str, Handler>,
}

impl std::fmt::Debug for ToolExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolExecutor")
            .field("registry", &self.registry)
            .finish()
    }
}

impl ToolExecutor {
    /// Create an executor for the tools in `registry`.
    pub fn new(registry: ToolRegistry) -> Self {
        let mut handlers: HashMap<&'static str, Handler> = HashMap::new();
        handlers.insert("get_book", get_book);
        handlers.insert("read_chapter", read_chapter);
        handlers.insert("create_chapter", create_chapter);
        handlers.insert("update_chapter", update_chapter);
        handlers.insert("delete_chapter", delete_chapter);
        handlers.insert("read_entity", read_entity);
        handlers.insert("create_entity", create_entity);
        handlers.insert("update_entity", update_entity);
        handlers.insert("delete_entity", delete_entity);

        for name in registry.names() {
            if !handlers.contains_key(name) {
                tracing::warn!(tool = name, "tool has no handler and will always fail");
            }
        }

        Self { registry, handlers }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Execute a single call.
    pub async fn execute(&self, call: &ToolCall, store: &dyn StoreAccess) -> ToolResult {
        tracing::debug!(tool = %call.name, call_id = %call.id, "executing tool");
        match self.try_execute(call, store).await {
            Ok(content) => ToolResult::ok(&call.id, content),
            Err(e) => {
                tracing::warn!(tool = %call.name, call_id = %call.id, error = %e, "tool execution failed");
                ToolResult::error(&call.id, format!("Error: {e}"))
            }
        }
    }

    async fn try_execute(&self, call: &ToolCall, store: &dyn StoreAccess) -> Result<String> {
        self.registry.validate(call)?;
        let handler = self
            .handlers
            .get(call.name.as_str())
            .ok_or_else(|| AgentError::UnknownTool {
                tool_name: call.name.clone(),
            })?;
        handler(&call.arguments, store).await
    }
}

// ---------------------------------------------------------------------------
// Arguments
// ---------------------------------------------------------------------------

fn args<T: DeserializeOwned>(tool: &str, value: &Value) -> Result<T> {
    serde_json::from_value(value.clone()).map_err(|e| AgentError::InvalidArguments {
        tool_name: tool.to_owned(),
        reason: e.to_string(),
    })
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BookArgs {
    book_slug: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChapterArgs {
    book_slug: String,
    chapter_slug: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateChapterArgs {
    book_slug: String,
    title: String,
    #[serde(default)]
    content: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateChapterArgs {
    book_slug: String,
    chapter_slug: String,
    title: Option<String>,
    content: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EntityArgs {
    book_slug: String,
    entity_slug: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateEntityArgs {
    book_slug: String,
    name: String,
    kind: String,
    #[serde(default)]
    description: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateEntityArgs {
    book_slug: String,
    entity_slug: String,
    name: Option<String>,
    kind: Option<String>,
    description: Option<String>,
}

// ---------------------------------------------------------------------------
// Output formats
// ---------------------------------------------------------------------------

/// Render a chapter as markdown with its title as heading.
pub fn format_chapter(chapter: &Chapter) -> String {
    format!("# {}\n\n{}", chapter.title, chapter.content)
}

/// Render an entity with its type.
pub fn format_entity(entity: &Entity) -> String {
    format!("# {} ({})\n\n{}", entity.name, entity.kind, entity.description)
}

/// Render a book overview.
pub fn format_book(book: &Book) -> String {
    let mut out = format!("# {}\n", book.title);
    if !book.description.is_empty() {
        out.push('\n');
        out.push_str(&book.description);
        out.push('\n');
    }
    out.push_str("\n## Chapters\n");
    if book.chapters.is_empty() {
        out.push_str("(none)\n");
    }
    for c in &book.chapters {
        out.push_str(&format!("- {} ({})\n", c.title, c.slug));
    }
    out.push_str("\n## Entities\n");
    if book.entities.is_empty() {
        out.push_str("(none)\n");
    }
    for e in &book.entities {
        out.push_str(&format!("- {} [{}] ({})\n", e.name, e.kind, e.slug));
    }
    out
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

fn get_book<'a>(value: &'a Value, store: &'a dyn StoreAccess) -> BoxFuture<'a, Result<String>> {
    Box::pin(async move {
        let a: BookArgs = args("get_book", value)?;
        let book = store.get_book(&a.book_slug).await?;
        Ok(format_book(&book))
    })
}

fn read_chapter<'a>(value: &'a Value, store: &'a dyn StoreAccess) -> BoxFuture<'a, Result<String>> {
    Box::pin(async move {
        let a: ChapterArgs = args("read_chapter", value)?;
        let chapter = store.get_chapter(&a.book_slug, &a.chapter_slug).await?;
        Ok(format_chapter(&chapter))
    })
}

fn create_chapter<'a>(
    value: &'a Value,
    store: &'a dyn StoreAccess,
) -> BoxFuture<'a, Result<String>> {
    Box::pin(async move {
        let a: CreateChapterArgs = args("create_chapter", value)?;
        let chapter = store
            .add_chapter(
                &a.book_slug,
                NewChapter {
                    slug: None,
                    title: a.title,
                    content: a.content,
                },
            )
            .await?;
        Ok(format!("Created chapter `{}` in `{}`.", chapter.slug, a.book_slug))
    })
}

fn update_chapter<'a>(
    value: &'a Value,
    store: &'a dyn StoreAccess,
) -> BoxFuture<'a, Result<String>> {
    Box::pin(async move {
        let a: UpdateChapterArgs = args("update_chapter", value)?;
        let patch = ChapterPatch {
            title: a.title,
            content: a.content,
        };
        if patch.is_empty() {
            return Err(AgentError::InvalidArguments {
                tool_name: "update_chapter".into(),
                reason: "nothing to update: pass `title` and/or `content`".into(),
            });
        }
        let chapter = store
            .update_chapter(&a.book_slug, &a.chapter_slug, patch)
            .await?;
        Ok(format!("Updated chapter `{}` in `{}`.", chapter.slug, a.book_slug))
    })
}

fn delete_chapter<'a>(
    value: &'a Value,
    store: &'a dyn StoreAccess,
) -> BoxFuture<'a, Result<String>> {
    Box::pin(async move {
        let a: ChapterArgs = args("delete_chapter", value)?;
        store.delete_chapter(&a.book_slug, &a.chapter_slug).await?;
        Ok(format!("Deleted chapter `{}` from `{}`.", a.chapter_slug, a.book_slug))
    })
}

fn read_entity<'a>(value: &'a Value, store: &'a dyn StoreAccess) -> BoxFuture<'a, Result<String>> {
    Box::pin(async move {
        let a: EntityArgs = args("read_entity", value)?;
        let entity = store.get_entity(&a.book_slug, &a.entity_slug).await?;
        Ok(format_entity(&entity))
    })
}

fn create_entity<'a>(
    value: &'a Value,
    store: &'a dyn StoreAccess,
) -> BoxFuture<'a, Result<String>> {
    Box::pin(async move {
        let a: CreateEntityArgs = args("create_entity", value)?;
        let entity = store
            .add_entity(
                &a.book_slug,
                NewEntity {
                    slug: None,
                    name: a.name,
                    kind: a.kind,
                    description: a.description,
                },
            )
            .await?;
        Ok(format!("Created entity `{}` in `{}`.", entity.slug, a.book_slug))
    })
}

fn update_entity<'a>(
    value: &'a Value,
    store: &'a dyn StoreAccess,
) -> BoxFuture<'a, Result<String>> {
    Box::pin(async move {
        let a: UpdateEntityArgs = args("update_entity", value)?;
        let patch = EntityPatch {
            name: a.name,
            kind: a.kind,
            description: a.description,
        };
        if patch.is_empty() {
            return Err(AgentError::InvalidArguments {
                tool_name: "update_entity".into(),
                reason: "nothing to update: pass `name`, `kind` or `description`".into(),
            });
        }
        let entity = store
            .update_entity(&a.book_slug, &a.entity_slug, patch)
            .await?;
        Ok(format!("Updated entity `{}` in `{}`.", entity.slug, a.book_slug))
    })
}

fn delete_entity<'a>(
    value: &'a Value,
    store: &'a dyn StoreAccess,
) -> BoxFuture<'a, Result<String>> {
    Box::pin(async move {
        let a: EntityArgs = args("delete_entity", value)?;
        store.delete_entity(&a.book_slug, &a.entity_slug).await?;
        Ok(format!("Deleted entity `{}` from `{}`.", a.entity_slug, a.book_slug))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::testing::FixtureStore;
    use serde_json::json;

    fn executor() -> ToolExecutor {
        ToolExecutor::new(ToolRegistry::builtin().unwrap())
    }

    #[tokio::test]
    async fn read_chapter_round_trip() {
        let store = FixtureStore::with_chapter("b", "c", "Hello");
        let call = ToolCall::new(
            "t1",
            "read_chapter",
            json!({"bookSlug": "b", "chapterSlug": "c"}),
        );
        let result = executor().execute(&call, &store).await;
        assert_eq!(result, ToolResult::ok("t1", "# c\n\nHello"));
    }

    #[tokio::test]
    async fn get_book_lists_contents() {
        let store = FixtureStore::with_chapter("b", "c", "Hello");
        let call = ToolCall::new("t2", "get_book", json!({"bookSlug": "b"}));
        let result = executor().execute(&call, &store).await;
        assert!(!result.is_error);
        assert!(result.content.starts_with("# b\n"));
        assert!(result.content.contains("- c (c)\n"));
        assert!(result.content.contains("## Entities\n(none)\n"));
    }

    #[tokio::test]
    async fn create_then_read_chapter() {
        let store = FixtureStore::with_chapter("b", "c", "Hello");
        let exec = executor();
        let created = exec
            .execute(
                &ToolCall::new(
                    "t3",
                    "create_chapter",
                    json!({"bookSlug": "b", "title": "The Storm", "content": "Rain."}),
                ),
                &store,
            )
            .await;
        assert_eq!(created.content, "Created chapter `the-storm` in `b`.");

        let read = exec
            .execute(
                &ToolCall::new(
                    "t4",
                    "read_chapter",
                    json!({"bookSlug": "b", "chapterSlug": "the-storm"}),
                ),
                &store,
            )
            .await;
        assert_eq!(read.content, "# The Storm\n\nRain.");
    }

    #[tokio::test]
    async fn store_errors_become_error_results() {
        let store = FixtureStore::with_chapter("b", "c", "Hello");
        let call = ToolCall::new(
            "t5",
            "read_chapter",
            json!({"bookSlug": "b", "chapterSlug": "missing"}),
        );
        let result = executor().execute(&call, &store).await;
        assert!(result.is_error);
        assert_eq!(result.tool_call_id, "t5");
        assert!(result.content.contains("chapter not found: missing"));
    }

    #[tokio::test]
    async fn invalid_and_unknown_calls_fail_without_touching_store() {
        let store = FixtureStore::with_chapter("b", "c", "Hello");
        let exec = executor();

        let result = exec
            .execute(&ToolCall::new("t6", "read_chapter", json!({})), &store)
            .await;
        assert!(result.is_error);
        assert!(result.content.contains("invalid arguments"));

        let result = exec
            .execute(&ToolCall::new("t7", "format_disk", json!({})), &store)
            .await;
        assert!(result.is_error);
        assert!(result.content.contains("unknown tool: format_disk"));
    }

    #[tokio::test]
    async fn empty_update_is_rejected() {
        let store = FixtureStore::with_chapter("b", "c", "Hello");
        let result = executor()
            .execute(
                &ToolCall::new("t8", "update_chapter", json!({"bookSlug": "b", "chapterSlug": "c"})),
                &store,
            )
            .await;
        assert!(result.is_error);
        assert!(result.content.contains("nothing to update"));
    }

    #[test]
    fn entity_format() {
        let entity = Entity {
            slug: "mira".into(),
            name: "Mira".into(),
            kind: "character".into(),
            description: "A cartographer.".into(),
        };
        assert_eq!(format_entity(&entity), "# Mira (character)\n\nA cartographer.");
    }
}
