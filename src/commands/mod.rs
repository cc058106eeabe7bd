pub mod evals;
pub mod seats;
pub mod snapshot;
pub mod sync;

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;

use regsync::cache::{self, Republisher};
use regsync::config::Config;
use regsync::reconcile::{ReconcileOptions, Reconciler};
use regsync::storage::{SnapshotStore, SqliteSnapshotStore};
use regsync::upstream::{HttpUpstreamClient, UpstreamClient};

// Re-export command functions for convenience
pub use evals::evals;
pub use seats::seats;
pub use snapshot::snapshot;
pub use sync::{backfill, sync, terms};

/// Configuration and store shared by every command
pub struct AppContext {
    pub config: Config,
    pub store: Arc<dyn SnapshotStore>,
}

impl AppContext {
    /// Load configuration from `path` (or the environment), validate it and
    /// open the snapshot store
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = load_config(path)?;
        let store = SqliteSnapshotStore::new(&config.database.sqlite_path).with_context(|| {
            format!(
                "Failed to open snapshot store at {}",
                config.database.sqlite_path.display()
            )
        })?;

        Ok(Self {
            config,
            store: Arc::new(store),
        })
    }

    /// Authenticated registrar client; fails fast without an API token
    pub fn upstream(&self) -> Result<Arc<dyn UpstreamClient>> {
        let token = self.config.require_api_token()?;
        let client = HttpUpstreamClient::new(&self.config.upstream, &self.config.pipeline, token)
            .context("Failed to create registrar client")?;
        Ok(Arc::new(client))
    }

    /// Reconciler over the configured pipeline; a non-empty `departments`
    /// overrides the configured list
    pub fn reconciler(&self, departments: &[String]) -> Result<Reconciler> {
        let mut options = ReconcileOptions::from(&self.config.pipeline);
        if !departments.is_empty() {
            options.departments = departments.to_vec();
        }
        Ok(Reconciler::new(self.upstream()?, Arc::clone(&self.store), options))
    }

    pub async fn republisher(&self) -> Republisher {
        let cache = cache::connect(&self.config.cache).await;
        Republisher::new(cache, Arc::clone(&self.store), &self.config.cache)
    }
}

/// Configuration from a TOML file when given, otherwise from the environment
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };
    config.validate().context("Invalid configuration")?;
    Ok(config)
}
