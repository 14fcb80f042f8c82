// Implementations for the moderation system.

pub mod in_memory;
pub mod sqlite_content_store;
pub mod sqlite_moderation_store;

// Re-export for convenience
pub use in_memory::InMemoryModerationStore;
pub use sqlite_content_store::SqliteVisibilityStore;
pub use sqlite_moderation_store::SqliteModerationStore;
