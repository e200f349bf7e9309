//! Tools the agent can call and the store contract they operate on.
//!
//! - [`store`] -- The Store Access contract and its record types.
//! - [`registry`] -- The tool catalog with argument validation.
//! - [`executor`] -- Name-keyed dispatch of tool calls to the store.

pub mod executor;
pub mod registry;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

pub use executor::ToolExecutor;
pub use registry::{BUILTIN_TOOLS, ToolCategory, ToolDefinition, ToolRegistry};
pub use store::{
    Book, Chapter, ChapterPatch, ChapterSummary, Entity, EntityPatch, EntitySummary, NewChapter,
    NewEntity, StoreAccess, StoreResult, slugify,
};
