//! # inkwell-store
//!
//! Manuscript storage for Inkwell.
//!
//! Holds a library of books (each with ordered chapters and an entity
//! index) in memory and serves it to the agent through the
//! [`StoreAccess`](inkwell_agent::StoreAccess) contract.  A library is
//! loaded from and saved to a single JSON file.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │  StoreAccess (inkwell-agent contract)    │
//! ├─────────────────────────────────────────┤
//! │  MemoryStore (tokio RwLock, dirty flag)  │
//! ├─────────────────────────────────────────┤
//! │  Library (serde JSON file)               │
//! └─────────────────────────────────────────┘
//! ```
//!
//! ## Quick start
//!
//! ```ignore
//! use inkwell_store::MemoryStore;
//!
//! let store = MemoryStore::open("library.json")?;
//! let book = store.get_book("the-lighthouse").await?;
//! store.save("library.json").await?;
//! ```

pub mod library;
pub mod memory;

// ── re-exports ───────────────────────────────────────────────────────

pub use inkwell_agent::error::StoreError;
pub use inkwell_agent::tools::StoreResult;
pub use library::{BookRecord, Library};
pub use memory::MemoryStore;
