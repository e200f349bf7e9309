//! In-memory [`StoreAccess`] fixture for unit tests.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::tools::store::{
    Book, Chapter, ChapterPatch, ChapterSummary, Entity, EntityPatch, EntitySummary, NewChapter,
    NewEntity, StoreAccess, StoreResult, slugify,
};

#[derive(Default)]
struct FixtureBook {
    chapters: Vec<Chapter>,
    entities: BTreeMap<String, Entity>,
}

/// A tiny store holding books keyed by slug.
#[derive(Default)]
pub struct FixtureStore {
    books: Mutex<BTreeMap<String, FixtureBook>>,
}

impl FixtureStore {
    /// A store with one book holding one chapter titled after its slug.
    pub fn with_chapter(book: &str, chapter: &str, content: &str) -> Self {
        let store = Self::default();
        store.books.lock().unwrap().insert(
            book.to_owned(),
            FixtureBook {
                chapters: vec![Chapter {
                    slug: chapter.to_owned(),
                    title: chapter.to_owned(),
                    content: content.to_owned(),
                }],
                entities: BTreeMap::new(),
            },
        );
        store
    }

    pub fn chapter_count(&self, book: &str) -> usize {
        self.books
            .lock()
            .unwrap()
            .get(book)
            .map_or(0, |b| b.chapters.len())
    }

    fn with_book<T>(
        &self,
        book: &str,
        f: impl FnOnce(&mut FixtureBook) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let mut books = self.books.lock().unwrap();
        let b = books.get_mut(book).ok_or_else(|| StoreError::NotFound {
            kind: "book",
            slug: book.to_owned(),
        })?;
        f(b)
    }
}

fn missing(kind: &'static str, slug: &str) -> StoreError {
    StoreError::NotFound {
        kind,
        slug: slug.to_owned(),
    }
}

#[async_trait]
impl StoreAccess for FixtureStore {
    async fn get_book(&self, book: &str) -> StoreResult<Book> {
        self.with_book(book, |b| {
            Ok(Book {
                slug: book.to_owned(),
                title: book.to_owned(),
                description: String::new(),
                chapters: b
                    .chapters
                    .iter()
                    .map(|c| ChapterSummary {
                        slug: c.slug.clone(),
                        title: c.title.clone(),
                    })
                    .collect(),
                entities: b
                    .entities
                    .values()
                    .map(|e| EntitySummary {
                        slug: e.slug.clone(),
                        name: e.name.clone(),
                        kind: e.kind.clone(),
                    })
                    .collect(),
            })
        })
    }

    async fn get_chapter(&self, book: &str, chapter: &str) -> StoreResult<Chapter> {
        self.with_book(book, |b| {
            b.chapters
                .iter()
                .find(|c| c.slug == chapter)
                .cloned()
                .ok_or_else(|| missing("chapter", chapter))
        })
    }

    async fn add_chapter(&self, book: &str, chapter: NewChapter) -> StoreResult<Chapter> {
        self.with_book(book, |b| {
            let slug = chapter.slug.unwrap_or_else(|| slugify(&chapter.title));
            if b.chapters.iter().any(|c| c.slug == slug) {
                return Err(StoreError::AlreadyExists {
                    kind: "chapter",
                    slug,
                });
            }
            let created = Chapter {
                slug,
                title: chapter.title,
                content: chapter.content,
            };
            b.chapters.push(created.clone());
            Ok(created)
        })
    }

    async fn update_chapter(
        &self,
        book: &str,
        chapter: &str,
        patch: ChapterPatch,
    ) -> StoreResult<Chapter> {
        self.with_book(book, |b| {
            let c = b
                .chapters
                .iter_mut()
                .find(|c| c.slug == chapter)
                .ok_or_else(|| missing("chapter", chapter))?;
            if let Some(title) = patch.title {
                c.title = title;
            }
            if let Some(content) = patch.content {
                c.content = content;
            }
            Ok(c.clone())
        })
    }

    async fn delete_chapter(&self, book: &str, chapter: &str) -> StoreResult<()> {
        self.with_book(book, |b| {
            let before = b.chapters.len();
            b.chapters.retain(|c| c.slug != chapter);
            if b.chapters.len() == before {
                return Err(missing("chapter", chapter));
            }
            Ok(())
        })
    }

    async fn get_entity(&self, book: &str, entity: &str) -> StoreResult<Entity> {
        self.with_book(book, |b| {
            b.entities
                .get(entity)
                .cloned()
                .ok_or_else(|| missing("entity", entity))
        })
    }

    async fn add_entity(&self, book: &str, entity: NewEntity) -> StoreResult<Entity> {
        self.with_book(book, |b| {
            let slug = entity.slug.unwrap_or_else(|| slugify(&entity.name));
            let created = Entity {
                slug: slug.clone(),
                name: entity.name,
                kind: entity.kind,
                description: entity.description,
            };
            b.entities.insert(slug, created.clone());
            Ok(created)
        })
    }

    async fn update_entity(
        &self,
        book: &str,
        entity: &str,
        patch: EntityPatch,
    ) -> StoreResult<Entity> {
        self.with_book(book, |b| {
            let e = b
                .entities
                .get_mut(entity)
                .ok_or_else(|| missing("entity", entity))?;
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
    }

    async fn delete_entity(&self, book: &str, entity: &str) -> StoreResult<()> {
        self.with_book(book, |b| {
            b.entities
                .remove(entity)
                .map(|_| ())
                .ok_or_else(|| missing("entity", entity))
        })
    }
}
