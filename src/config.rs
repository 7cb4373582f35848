use std::{path::PathBuf, time::Duration};

use indexmap::IndexMap;
use serde::Deserialize;
use tracing::warn;

use crate::{Error, LoadOrigin, TableRegistry};

fn default_url_timeout_secs() -> u64 {
    10
}

fn default_refresh_interval_ms() -> u64 {
    1000
}

#[derive(Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    pub data_root: PathBuf,
    #[serde(default)]
    pub table_configs: Vec<PathBuf>,
    #[serde(default)]
    pub shed_table_configs: Vec<PathBuf>,
    /// Managed file receiving definitions of installed repositories.
    #[serde(default)]
    pub shed_definitions: Option<PathBuf>,
    #[serde(default)]
    pub other_config: IndexMap<String, String>,
    #[serde(default = "default_url_timeout_secs")]
    pub url_timeout_secs: u64,
    #[serde(default = "default_refresh_interval_ms")]
    pub refresh_interval_ms: u64,
}

impl Settings {
    pub fn from_yaml(src: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(src)
    }

    pub fn url_timeout(&self) -> Duration {
        Duration::from_secs(self.url_timeout_secs)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }

    pub fn registry(&self) -> TableRegistry {
        TableRegistry::new(&self.data_root)
            .with_other_config(self.other_config.clone())
            .with_url_timeout(self.url_timeout())
            .with_refresh_interval(self.refresh_interval())
    }

    /// Build a registry from every configured source. Core configs must exist;
    /// missing shed configs are skipped.
    pub fn open_registry(&self) -> Result<TableRegistry, Error> {
        let mut registry = self.registry();
        registry.load_from_configs(&self.table_configs, LoadOrigin::Core)?;
        for path in &self.shed_table_configs {
            if !path.exists() {
                warn!(path = %path.display(), "Skipping missing shed tool data table config");
                continue;
            }
            registry.load_from_config(path, LoadOrigin::Shed)?;
        }
        Ok(registry)
    }
}
