//! Persistence layer — drafts and resumes behind async traits, with a
//! libSQL backend and an in-memory store.

pub mod libsql_backend;
pub mod memory;
mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use memory::MemoryStore;
pub use traits::{ProfileStore, ResumeSink};
