// Content capabilities - how moderation reaches back into the records it judged.
//
// Reports only hold a weak `ContentRef`. To hide or restore the underlying
// record, each content kind registers a `Moderatable` handler here.

use super::moderation_models::{ContentKind, ContentRef};
use super::moderation_service::ModerationError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Implemented by every subsystem whose content can be moderated.
#[async_trait]
pub trait Moderatable: Send + Sync {
    /// Show (`true`) or hide (`false`) a record.
    ///
    /// Returns `false` if the record no longer exists.
    async fn set_approved(&self, content_id: u64, approved: bool) -> Result<bool, ModerationError>;
}

/// Maps each content kind to its `Moderatable` handler.
#[derive(Clone, Default)]
pub struct ContentRegistry {
    handlers: HashMap<ContentKind, Arc<dyn Moderatable>>,
}

impl ContentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the handler for one kind.
    pub fn register(&mut self, kind: ContentKind, handler: Arc<dyn Moderatable>) {
        self.handlers.insert(kind, handler);
    }

    /// Builder-style `register`.
    pub fn with(mut self, kind: ContentKind, handler: Arc<dyn Moderatable>) -> Self {
        self.register(kind, handler);
        self
    }

    /// Register one handler for every content kind.
    pub fn with_all(mut self, handler: Arc<dyn Moderatable>) -> Self {
        for kind in ContentKind::ALL {
            self.register(kind, Arc::clone(&handler));
        }
        self
    }

    pub fn handles(&self, kind: ContentKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    /// Apply the block/unblock side effect. Kinds without a handler are a no-op.
    pub async fn set_approved(
        &self,
        content: ContentRef,
        approved: bool,
    ) -> Result<(), ModerationError> {
        let Some(handler) = self.handlers.get(&content.kind) else {
            tracing::warn!(content = %content, "No moderation handler registered for content kind");
            return Ok(());
        };

        let found = handler.set_approved(content.id, approved).await?;
        if found {
            tracing::info!(content = %content, approved, "Updated content visibility");
        } else {
            tracing::warn!(content = %content, "Moderated content no longer exists");
        }
        Ok(())
    }
}
