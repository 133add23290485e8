use std::sync::Arc;

use crate::db::store::{ListingStore, PgStore, TaskStore};
use crate::services::classifier::Classifier;
use crate::services::queue::WorkPublisher;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub tasks: Arc<dyn TaskStore>,
    pub listings: Arc<dyn ListingStore>,
    pub queue: Arc<dyn WorkPublisher>,
    /// `None` when the model failed to load; scoring paths answer 503.
    pub model: Option<Arc<dyn Classifier>>,
}

impl AppState {
    pub fn new(
        store: PgStore,
        queue: impl WorkPublisher + 'static,
        model: Option<impl Classifier + 'static>,
    ) -> Self {
        let store = Arc::new(store);
        Self {
            tasks: store.clone(),
            listings: store,
            queue: Arc::new(queue),
            model: model.map(|m| Arc::new(m) as Arc<dyn Classifier>),
        }
    }

    /// Assemble state from already shared parts.
    pub fn from_parts(
        tasks: Arc<dyn TaskStore>,
        listings: Arc<dyn ListingStore>,
        queue: Arc<dyn WorkPublisher>,
        model: Option<Arc<dyn Classifier>>,
    ) -> Self {
        Self {
            tasks,
            listings,
            queue,
            model,
        }
    }

    /// The loaded classifier, or `ServiceUnavailable`.
    pub fn classifier(&self) -> Result<&Arc<dyn Classifier>, crate::error::ModerationError> {
        self.model
            .as_ref()
            .ok_or(crate::error::ModerationError::ServiceUnavailable)
    }
}
