//! The on-disk library format.
//!
//! A library file is a single JSON document:
//!
//! ```json
//! {
//!   "books": [
//!     {
//!       "slug": "the-lighthouse",
//!       "title": "The Lighthouse",
//!       "description": "A keeper and a storm.",
//!       "chapters": [{ "slug": "arrival", "title": "Arrival", "content": "…" }],
//!       "entities": [{ "slug": "mara", "name": "Mara", "kind": "character", "description": "…" }]
//!     }
//!   ]
//! }
//! ```

use std::collections::HashSet;
use std::path::Path;

use inkwell_agent::error::StoreError;
use inkwell_agent::tools::{Book, Chapter, ChapterSummary, Entity, EntitySummary, StoreResult};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

// ═══════════════════════════════════════════════════════════════════════
//  Types
// ═══════════════════════════════════════════════════════════════════════

/// A book with its full contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookRecord {
    pub slug: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// Chapters in reading order.
    #[serde(default)]
    pub chapters: Vec<Chapter>,
    #[serde(default)]
    pub entities: Vec<Entity>,
}

impl BookRecord {
    /// An empty book.
    pub fn new(slug: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            slug: slug.into(),
            title: title.into(),
            description: String::new(),
            chapters: Vec::new(),
            entities: Vec::new(),
        }
    }

    /// The table-of-contents view served to tools.
    pub fn summary(&self) -> Book {
        Book {
            slug: self.slug.clone(),
            title: self.title.clone(),
            description: self.description.clone(),
            chapters: self
                .chapters
                .iter()
                .map(|c| ChapterSummary {
                    slug: c.slug.clone(),
                    title: c.title.clone(),
                })
                .collect(),
            entities: self
                .entities
                .iter()
                .map(|e| EntitySummary {
                    slug: e.slug.clone(),
                    name: e.name.clone(),
                    kind: e.kind.clone(),
                })
                .collect(),
        }
    }

    fn check(&self) -> StoreResult<()> {
        if self.slug.trim().is_empty() {
            return Err(StoreError::Invalid(format!(
                "book `{}` has an empty slug",
                self.title
            )));
        }
        unique("chapter", self.chapters.iter().map(|c| c.slug.as_str()))?;
        unique("entity", self.entities.iter().map(|e| e.slug.as_str()))
    }
}

/// All books known to the store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Library {
    #[serde(default)]
    pub books: Vec<BookRecord>,
}

// ═══════════════════════════════════════════════════════════════════════
//  Loading and saving
// ═══════════════════════════════════════════════════════════════════════

impl Library {
    /// Parse a library from JSON text and check slug uniqueness.
    pub fn from_json(text: &str) -> StoreResult<Self> {
        let library: Self = serde_json::from_str(text)?;
        library.check()?;
        Ok(library)
    }

    /// Read a library file.
    pub fn load(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let library = Self::from_json(&text)?;
        info!(path = %path.display(), books = library.books.len(), "library loaded");
        Ok(library)
    }

    /// Write the library as pretty JSON.
    ///
    /// The file is written next to its destination first and then renamed
    /// over it, so a failed save never truncates an existing library.
    pub fn save(&self, path: impl AsRef<Path>) -> StoreResult<()> {
        let path = path.as_ref();
        let text = serde_json::to_string_pretty(self)?;
        let staging = path.with_extension("json.tmp");
        std::fs::write(&staging, text)?;
        std::fs::rename(&staging, path)?;
        debug!(path = %path.display(), books = self.books.len(), "library saved");
        Ok(())
    }

    /// Look up a book by slug.
    pub fn book(&self, slug: &str) -> Option<&BookRecord> {
        self.books.iter().find(|b| b.slug == slug)
    }

    /// Mutable lookup by slug.
    pub fn book_mut(&mut self, slug: &str) -> Option<&mut BookRecord> {
        self.books.iter_mut().find(|b| b.slug == slug)
    }

    /// Add a book.  Fails when the slug is taken or the book is malformed.
    pub fn insert(&mut self, book: BookRecord) -> StoreResult<()> {
        book.check()?;
        if self.book(&book.slug).is_some() {
            return Err(StoreError::AlreadyExists {
                kind: "book",
                slug: book.slug,
            });
        }
        self.books.push(book);
        Ok(())
    }

    fn check(&self) -> StoreResult<()> {
        unique("book", self.books.iter().map(|b| b.slug.as_str()))?;
        self.books.iter().try_for_each(BookRecord::check)
    }
}

fn unique<'a>(kind: &'static str, slugs: impl Iterator<Item = &'a str>) -> StoreResult<()> {
    let mut seen = HashSet::new();
    for slug in slugs {
        if !seen.insert(slug) {
            return Err(StoreError::AlreadyExists {
                kind,
                slug: slug.to_owned(),
            });
        }
    }
    Ok(())
}
