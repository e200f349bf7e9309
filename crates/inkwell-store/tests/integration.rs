//! Integration tests for inkwell-store.
//!
//! Drive the store through the agent's tool executor the way a run does,
//! and check that changes survive a save and reload.

use std::sync::Arc;

use inkwell_agent::{StoreAccess, ToolCall, ToolExecutor, ToolRegistry};
use inkwell_store::{BookRecord, Library, MemoryStore};
use serde_json::json;
use tempfile::tempdir;

fn library() -> Library {
    let mut book = BookRecord::new("lighthouse", "The Lighthouse");
    book.description = "A keeper and a storm.".into();
    book.chapters.push(inkwell_agent::Chapter {
        slug: "arrival".into(),
        title: "Arrival".into(),
        content: "The fog came in at dusk.".into(),
    });
    Library { books: vec![book] }
}

fn executor() -> ToolExecutor {
    ToolExecutor::new(ToolRegistry::builtin().unwrap())
}

#[tokio::test]
async fn tool_calls_edit_the_library() {
    let store = Arc::new(MemoryStore::new(library()));
    let executor = executor();

    let created = executor
        .execute(
            &ToolCall::new(
                "t1",
                "create_chapter",
                json!({"bookSlug": "lighthouse", "title": "The Storm", "content": "Rain."}),
            ),
            store.as_ref(),
        )
        .await;
    assert!(!created.is_error, "{}", created.content);
    assert!(created.content.contains("the-storm"));

    let entity = executor
        .execute(
            &ToolCall::new(
                "t2",
                "create_entity",
                json!({"bookSlug": "lighthouse", "name": "Mara", "kind": "character"}),
            ),
            store.as_ref(),
        )
        .await;
    assert!(!entity.is_error, "{}", entity.content);

    let book = executor
        .execute(
            &ToolCall::new("t3", "get_book", json!({"bookSlug": "lighthouse"})),
            store.as_ref(),
        )
        .await;
    assert!(book.content.starts_with("# The Lighthouse"));
    assert!(book.content.contains("the-storm"));
    assert!(book.content.contains("Mara"));

    let read = executor
        .execute(
            &ToolCall::new(
                "t4",
                "read_chapter",
                json!({"bookSlug": "lighthouse", "chapterSlug": "the-storm"}),
            ),
            store.as_ref(),
        )
        .await;
    assert_eq!(read.content, "# The Storm\n\nRain.");
}

#[tokio::test]
async fn store_failures_surface_as_error_results() {
    let store = MemoryStore::new(library());
    let result = executor()
        .execute(
            &ToolCall::new(
                "t1",
                "delete_chapter",
                json!({"bookSlug": "lighthouse", "chapterSlug": "epilogue"}),
            ),
            &store,
        )
        .await;
    assert!(result.is_error);
    assert!(result.content.starts_with("Error: "));
    assert!(result.content.contains("epilogue"));
    assert!(!store.is_dirty());
}

#[tokio::test]
async fn edits_survive_save_and_reload() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("library.json");
    library().save(&path).unwrap();

    let store = MemoryStore::open(&path).unwrap();
    store
        .update_chapter(
            "lighthouse",
            "arrival",
            inkwell_agent::ChapterPatch {
                content: Some("The fog lifted.".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    store.save(&path).await.unwrap();

    let reopened = MemoryStore::open(&path).unwrap();
    let chapter = reopened.get_chapter("lighthouse", "arrival").await.unwrap();
    assert_eq!(chapter.content, "The fog lifted.");
}
