//! Application state shared across handlers.

use crate::metrics::MetricsObserver;
use parcel_core::config::AppConfig;
use parcel_store::DocumentStore;
use parcel_upload::Uploader;
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Upload session manager.
    pub uploader: Arc<Uploader>,
    /// Document store, shared with the uploader.
    pub store: Arc<dyn DocumentStore>,
}

impl AppState {
    /// Create the application state around an initialized store.
    ///
    /// The configuration is expected to have been validated by the caller.
    pub fn new(config: AppConfig, store: Arc<dyn DocumentStore>) -> Self {
        let uploader = Uploader::new(config.upload.clone(), Arc::clone(&store))
            .with_observer(Arc::new(MetricsObserver));
        let uploader = Arc::new(uploader);
        Self {
            config: Arc::new(config),
            uploader,
            store,
        }
    }
}
