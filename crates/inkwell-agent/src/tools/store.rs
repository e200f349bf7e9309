//! The Store Access contract.
//!
//! The agent never owns manuscript data.  Tools read and write books,
//! chapters and entities through a [`StoreAccess`] handle supplied by the
//! caller when a run starts (or when an approval is granted).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Result alias for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// A book with its table of contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Book {
    pub slug: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub chapters: Vec<ChapterSummary>,
    #[serde(default)]
    pub entities: Vec<EntitySummary>,
}

/// Chapter entry in a book's table of contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterSummary {
    pub slug: String,
    pub title: String,
}

/// Entity entry in a book's index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySummary {
    pub slug: String,
    pub name: String,
    pub kind: String,
}

/// A chapter with its full text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chapter {
    pub slug: String,
    pub title: String,
    #[serde(default)]
    pub content: String,
}

/// A character, place, item or other named thing in a book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub slug: String,
    pub name: String,
    /// Free-form type label, e.g. `character` or `location`.
    pub kind: String,
    #[serde(default)]
    pub description: String,
}

/// Input for [`StoreAccess::add_chapter`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct NewChapter {
    /// Explicit slug; derived from the title when absent.
    pub slug: Option<String>,
    pub title: String,
    #[serde(default)]
    pub content: String,
}

/// Partial update for [`StoreAccess::update_chapter`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ChapterPatch {
    pub title: Option<String>,
    pub content: Option<String>,
}

/// Input for [`StoreAccess::add_entity`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct NewEntity {
    pub slug: Option<String>,
    pub name: String,
    pub kind: String,
    #[serde(default)]
    pub description: String,
}

/// Partial update for [`StoreAccess::update_entity`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct EntityPatch {
    pub name: Option<String>,
    pub kind: Option<String>,
    pub description: Option<String>,
}

impl ChapterPatch {
    /// Whether the patch changes nothing.
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.content.is_none()
    }
}

impl EntityPatch {
    /// Whether the patch changes nothing.
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.kind.is_none() && self.description.is_none()
    }
}

// ---------------------------------------------------------------------------
// Contract
// ---------------------------------------------------------------------------

/// Read/write access to the manuscript data layer.
#[async_trait]
pub trait StoreAccess: Send + Sync {
    async fn get_book(&self, book: &str) -> StoreResult<Book>;

    async fn get_chapter(&self, book: &str, chapter: &str) -> StoreResult<Chapter>;

    async fn add_chapter(&self, book: &str, chapter: NewChapter) -> StoreResult<Chapter>;

    async fn update_chapter(
        &self,
        book: &str,
        chapter: &str,
        patch: ChapterPatch,
    ) -> StoreResult<Chapter>;

    async fn delete_chapter(&self, book: &str, chapter: &str) -> StoreResult<()>;

    async fn get_entity(&self, book: &str, entity: &str) -> StoreResult<Entity>;

    async fn add_entity(&self, book: &str, entity: NewEntity) -> StoreResult<Entity>;

    async fn update_entity(&self, book: &str, entity: &str, patch: EntityPatch)
    -> StoreResult<Entity>;

    async fn delete_entity(&self, book: &str, entity: &str) -> StoreResult<()>;
}

/// Derive a slug from a title.
///
/// Lowercases letters and digits (any script), collapses every other run of
/// characters into a single `-`, and trims dashes at both ends.  A title
/// without any letters or digits gets a generated `untitled-…` slug.
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut pending_dash = false;
    for c in title.chars() {
        if c.is_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.extend(c.to_lowercase());
        } else {
            pending_dash = true;
        }
    }
    if slug.is_empty() {
        let id = uuid::Uuid::now_v7().simple().to_string();
        // The tail of a v7 id is random; the head is a timestamp.
        slug = format!("untitled-{}", &id[id.len() - 8..]);
    }
    slug
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_titles() {
        assert_eq!(slugify("Chapter One"), "chapter-one");
        assert_eq!(slugify("  The -- Storm!  "), "the-storm");
        assert_eq!(slugify("Élan"), "élan");
        assert_eq!(slugify("Über die Brücke"), "über-die-brücke");
        assert_eq!(slugify("第一章"), "第一章");
    }

    #[test]
    fn slugify_without_letters_generates_one() {
        let a = slugify("???");
        let b = slugify("!!!");
        assert!(a.starts_with("untitled-"));
        assert_eq!(a.len(), "untitled-".len() + 8);
        assert_ne!(a, b);
    }

    #[test]
    fn empty_patches() {
        assert!(ChapterPatch::default().is_empty());
        assert!(
            !EntityPatch {
                kind: Some("location".into()),
                ..EntityPatch::default()
            }
            .is_empty()
        );
    }
}
