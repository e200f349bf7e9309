//! In-memory [`StoreAccess`] implementation.
//!
//! [`MemoryStore`] serves a [`Library`] behind a `tokio` read-write lock.
//! Every successful write marks the store dirty so front ends know when a
//! save is due.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use inkwell_agent::error::StoreError;
use inkwell_agent::tools::{
    Book, Chapter, ChapterPatch, Entity, EntityPatch, NewChapter, NewEntity, StoreAccess,
    StoreResult, slugify,
};
use tokio::sync::RwLock;
use tracing::{debug, instrument};

use crate::library::{BookRecord, Library};

// ═══════════════════════════════════════════════════════════════════════
//  MemoryStore
// ═══════════════════════════════════════════════════════════════════════

/// A library held in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    library: RwLock<Library>,
    dirty: AtomicBool,
}

impl MemoryStore {
    /// Serve `library`.
    pub fn new(library: Library) -> Self {
        Self {
            library: RwLock::new(library),
            dirty: AtomicBool::new(false),
        }
    }

    /// Load a library file.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        Library::load(path).map(Self::new)
    }

    /// Write the current library to `path` and clear the dirty flag.
    pub async fn save(&self, path: impl AsRef<Path>) -> StoreResult<()> {
        let library = self.library.read().await;
        library.save(path)?;
        self.dirty.store(false, Ordering::Release);
        Ok(())
    }

    /// Whether anything changed since the last load or save.
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// A copy of the current library.
    pub async fn snapshot(&self) -> Library {
        self.library.read().await.clone()
    }

    /// Summaries of every book.
    pub async fn books(&self) -> Vec<Book> {
        self.library
            .read()
            .await
            .books
            .iter()
            .map(BookRecord::summary)
            .collect()
    }

    /// Add a book.
    pub async fn add_book(&self, book: BookRecord) -> StoreResult<()> {
        self.library.write().await.insert(book)?;
        self.touch();
        Ok(())
    }

    fn touch(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    async fn read_book<T>(
        &self,
        book: &str,
        f: impl FnOnce(&BookRecord) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let library = self.library.read().await;
        let record = library.book(book).ok_or_else(|| not_found("book", book))?;
        f(record)
    }

    async fn write_book<T>(
        &self,
        book: &str,
        f: impl FnOnce(&mut BookRecord) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let mut library = self.library.write().await;
        let record = library
            .book_mut(book)
            .ok_or_else(|| not_found("book", book))?;
        let out = f(record)?;
        self.touch();
        Ok(out)
    }
}

fn not_found(kind: &'static str, slug: &str) -> StoreError {
    StoreError::NotFound {
        kind,
        slug: slug.to_owned(),
    }
}

/// Pick the slug for a new record and make sure it is usable and free.
fn claim_slug(
    kind: &'static str,
    explicit: Option<String>,
    label: &str,
    taken: impl Fn(&str) -> bool,
) -> StoreResult<String> {
    if label.trim().is_empty() {
        return Err(StoreError::Invalid(format!("{kind} needs a non-empty name")));
    }
    let slug = explicit
        .map(|s| s.trim().to_owned())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| slugify(label));
    if taken(&slug) {
        return Err(StoreError::AlreadyExists { kind, slug });
    }
    Ok(slug)
}

// ═══════════════════════════════════════════════════════════════════════
//  StoreAccess
// ═══════════════════════════════════════════════════════════════════════

#[async_trait]
impl StoreAccess for MemoryStore {
    async fn get_book(&self, book: &str) -> StoreResult<Book> {
        self.read_book(book, |b| Ok(b.summary())).await
    }

    async fn get_chapter(&self, book: &str, chapter: &str) -> StoreResult<Chapter> {
        self.read_book(book, |b| {
            b.chapters
                .iter()
                .find(|c| c.slug == chapter)
                .cloned()
                .ok_or_else(|| not_found("chapter", chapter))
        })
        .await
    }

    #[instrument(skip(self, chapter), fields(title = %chapter.title))]
    async fn add_chapter(&self, book: &str, chapter: NewChapter) -> StoreResult<Chapter> {
        let created = self
            .write_book(book, |b| {
                let slug = claim_slug("chapter", chapter.slug, &chapter.title, |s| {
                    b.chapters.iter().any(|c| c.slug == s)
                })?;
                let created = Chapter {
                    slug,
                    title: chapter.title,
                    content: chapter.content,
                };
                b.chapters.push(created.clone());
                Ok(created)
            })
            .await?;
        debug!(chapter = %created.slug, "chapter created");
        Ok(created)
    }

    #[instrument(skip(self, patch))]
    async fn update_chapter(
        &self,
        book: &str,
        chapter: &str,
        patch: ChapterPatch,
    ) -> StoreResult<Chapter> {
        if patch.title.as_deref().is_some_and(|t| t.trim().is_empty()) {
            return Err(StoreError::Invalid("chapter title cannot be empty".into()));
        }
        let updated = self
            .write_book(book, |b| {
                let c = b
                    .chapters
                    .iter_mut()
                    .find(|c| c.slug == chapter)
                    .ok_or_else(|| not_found("chapter", chapter))?;
                if let Some(title) = patch.title {
                    c.title = title;
                }
                if let Some(content) = patch.content {
                    c.content = content;
                }
                Ok(c.clone())
            })
            .await?;
        debug!("chapter updated");
        Ok(updated)
    }

    #[instrument(skip(self))]
    async fn delete_chapter(&self, book: &str, chapter: &str) -> StoreResult<()> {
        self.write_book(book, |b| {
            let index = b
                .chapters
                .iter()
                .position(|c| c.slug == chapter)
                .ok_or_else(|| not_found("chapter", chapter))?;
            b.chapters.remove(index);
            Ok(())
        })
        .await?;
        debug!("chapter deleted");
        Ok(())
    }

    async fn get_entity(&self, book: &str, entity: &str) -> StoreResult<Entity> {
        self.read_book(book, |b| {
            b.entities
                .iter()
                .find(|e| e.slug == entity)
                .cloned()
                .ok_or_else(|| not_found("entity", entity))
        })
        .await
    }

    #[instrument(skip(self, entity), fields(name = %entity.name))]
    async fn add_entity(&self, book: &str, entity: NewEntity) -> StoreResult<Entity> {
        let created = self
            .write_book(book, |b| {
                let slug = claim_slug("entity", entity.slug, &entity.name, |s| {
                    b.entities.iter().any(|e| e.slug == s)
                })?;
                let created = Entity {
                    slug,
                    name: entity.name,
                    kind: entity.kind,
                    description: entity.description,
                };
                b.entities.push(created.clone());
                Ok(created)
            })
            .await?;
        debug!(entity = %created.slug, "entity created");
        Ok(created)
    }

    #[instrument(skip(self, patch))]
    async fn update_entity(
        &self,
        book: &str,
        entity: &str,
        patch: EntityPatch,
    ) -> StoreResult<Entity> {
        if patch.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
            return Err(StoreError::Invalid("entity name cannot be empty".into()));
        }
        let updated = self
            .write_book(book, |b| {
                let e = b
                    .entities
                    .iter_mut()
                    .find(|e| e.slug == entity)
                    .ok_or_else(|| not_found("entity", entity))?;
                if let Some(name) = patch.name {
                    e.name = name;
                }
                if let Some(kind) = patch.kind {
                    e.kind = kind;
                }
                if let Some(description) = patch.description {
                    e.description = description;
                }
                Ok(e.clone())
            })
            .await?;
        debug!("entity updated");
        Ok(updated)
    }

    #[instrument(skip(self))]
    async fn delete_entity(&self, book: &str, entity: &str) -> StoreResult<()> {
        self.write_book(book, |b| {
            let before = b.entities.len();
            b.entities.retain(|e| e.slug != entity);
            if b.entities.len() == before {
                return Err(not_found("entity", entity));
            }
            Ok(())
        })
        .await?;
        debug!("entity deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn store() -> MemoryStore {
        let mut book = BookRecord::new("b", "The Lighthouse");
        book.chapters.push(Chapter {
            slug: "arrival".into(),
            title: "Arrival".into(),
            content: "Fog.".into(),
        });
        MemoryStore::new(Library { books: vec![book] })
    }

    #[tokio::test]
    async fn chapters_with_non_latin_titles_get_slugs() {
        let store = store();
        let accented = store
            .add_chapter(
                "b",
                NewChapter {
                    title: "Élan".into(),
                    ..NewChapter::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(accented.slug, "élan");

        let symbols = store
            .add_chapter(
                "b",
                NewChapter {
                    title: "***".into(),
                    ..NewChapter::default()
                },
            )
            .await
            .unwrap();
        assert!(symbols.slug.starts_with("untitled-"));
        assert_eq!(store.get_chapter("b", &symbols.slug).await.unwrap().title, "***");
    }

    #[tokio::test]
    async fn chapter_lifecycle() {
        let store = store();
        assert!(!store.is_dirty());

        let created = store
            .add_chapter(
                "b",
                NewChapter {
                    title: "The Storm".into(),
                    content: "Rain.".into(),
                    ..NewChapter::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(created.slug, "the-storm");
        assert!(store.is_dirty());

        let book = store.get_book("b").await.unwrap();
        let order: Vec<&str> = book.chapters.iter().map(|c| c.slug.as_str()).collect();
        assert_eq!(order, vec!["arrival", "the-storm"]);

        let updated = store
            .update_chapter(
                "b",
                "the-storm",
                ChapterPatch {
                    content: Some("Thunder.".into()),
                    ..ChapterPatch::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.title, "The Storm");
        assert_eq!(updated.content, "Thunder.");

        store.delete_chapter("b", "arrival").await.unwrap();
        assert!(matches!(
            store.get_chapter("b", "arrival").await,
            Err(StoreError::NotFound { kind: "chapter", .. })
        ));
    }

    #[tokio::test]
    async fn rejects_duplicates_and_blank_names() {
        let store = store();
        let dup = store
            .add_chapter(
                "b",
                NewChapter {
                    title: "Arrival".into(),
                    ..NewChapter::default()
                },
            )
            .await;
        assert!(matches!(dup, Err(StoreError::AlreadyExists { .. })));

        let blank = store
            .add_entity(
                "b",
                NewEntity {
                    name: "  ".into(),
                    kind: "character".into(),
                    ..NewEntity::default()
                },
            )
            .await;
        assert!(matches!(blank, Err(StoreError::Invalid(_))));
        assert!(!store.is_dirty());
    }

    #[tokio::test]
    async fn entity_lifecycle() {
        let store = store();
        let mara = store
            .add_entity(
                "b",
                NewEntity {
                    name: "Mara Quill".into(),
                    kind: "character".into(),
                    description: "The keeper.".into(),
                    ..NewEntity::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(mara.slug, "mara-quill");

        let moved = store
            .update_entity(
                "b",
                "mara-quill",
                EntityPatch {
                    description: Some("The former keeper.".into()),
                    ..EntityPatch::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(moved.kind, "character");
        assert_eq!(moved.description, "The former keeper.");

        store.delete_entity("b", "mara-quill").await.unwrap();
        assert!(store.delete_entity("b", "mara-quill").await.is_err());
    }

    #[tokio::test]
    async fn unknown_book_is_not_found() {
        let store = store();
        assert!(matches!(
            store.get_book("nope").await,
            Err(StoreError::NotFound { kind: "book", .. })
        ));
    }

    #[tokio::test]
    async fn save_clears_dirty_flag() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("library.json");
        let store = store();
        store.add_book(BookRecord::new("second", "Second")).await.unwrap();
        assert!(store.is_dirty());

        store.save(&path).await.unwrap();
        assert!(!store.is_dirty());

        let reopened = MemoryStore::open(&path).unwrap();
        assert_eq!(reopened.books().await.len(), 2);
    }
}
