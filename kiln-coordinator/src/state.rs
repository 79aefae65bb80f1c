//! Shared application state

use kiln_blob::BlobStore;
use kiln_queue::WorkQueue;
use std::sync::Arc;

use crate::config::Config;
use crate::provider::ProviderRegistry;
use crate::storage::Storage;

/// Collaborators every handler and service works through
#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<dyn Storage>,
    pub queue: Arc<dyn WorkQueue>,
    pub blobs: Arc<dyn BlobStore>,
    pub providers: Arc<ProviderRegistry>,
    pub config: Arc<Config>,
}

impl AppState {
    /// Base of every pipeline target URL; the pipeline ID is appended
    pub fn pipeline_url_base(&self) -> String {
        format!("{}/pipelines/", self.config.external_url)
    }
}
