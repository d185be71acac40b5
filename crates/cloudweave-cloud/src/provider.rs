//! Provider abstraction and registry
//!
//! Each provider ships a [`ProviderFactory`]. Factories are registered in a
//! [`ProviderRegistry`] built at start-up and passed to whoever needs to
//! instantiate providers.

use crate::error::{CloudError, Result};
use crate::graph::Region;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Cloud provider abstraction trait
///
/// All providers implement this trait to expose their regions; the
/// per-resource capability traits live in [`crate::resource`].
#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Returns the provider name (e.g., "sim", "huawei")
    fn name(&self) -> &str;

    /// Returns the provider display name for UI
    fn display_name(&self) -> &str;

    async fn regions(&self) -> Result<Vec<Arc<Region>>>;

    async fn region_by_id(&self, region_id: &str) -> Result<Arc<Region>> {
        self.regions()
            .await?
            .into_iter()
            .find(|region| region.id() == region_id)
            .ok_or_else(|| CloudError::NotFound(format!("region {}", region_id)))
    }
}

/// Account-level settings handed to a factory.
///
/// Credentials travel inside `options` as opaque strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Account id
    pub id: String,

    /// Factory id this account belongs to
    pub provider: String,

    pub name: String,

    /// API endpoint, when the provider needs one
    #[serde(default)]
    pub url: Option<String>,

    #[serde(default)]
    pub options: HashMap<String, String>,
}

impl ProviderConfig {
    pub fn new(id: impl Into<String>, provider: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            provider: provider.into(),
            name: name.into(),
            url: None,
            options: HashMap::new(),
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    pub fn option(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }

    pub fn require_option(&self, key: &str) -> Result<&str> {
        self.option(key).ok_or_else(|| {
            CloudError::InvalidConfig(format!(
                "provider account {} is missing option '{}'",
                self.id, key
            ))
        })
    }
}

/// Creates provider instances from account settings
pub trait ProviderFactory: Send + Sync {
    fn id(&self) -> &str;

    fn display_name(&self) -> &str;

    fn validate_config(&self, _config: &ProviderConfig) -> Result<()> {
        Ok(())
    }

    fn create_provider(&self, config: &ProviderConfig) -> Result<Arc<dyn CloudProvider>>;
}

/// Registered provider factories, keyed by factory id
#[derive(Default)]
pub struct ProviderRegistry {
    factories: BTreeMap<String, Arc<dyn ProviderFactory>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, factory: Arc<dyn ProviderFactory>) -> Result<()> {
        let id = factory.id().to_string();
        if self.factories.contains_key(&id) {
            return Err(CloudError::DuplicateId(format!("provider factory {}", id)));
        }
        tracing::debug!("Registered provider factory {}", id);
        self.factories.insert(id, factory);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<Arc<dyn ProviderFactory>> {
        self.factories
            .get(id)
            .cloned()
            .ok_or_else(|| CloudError::ProviderNotFound(id.to_string()))
    }

    pub fn is_registered(&self, id: &str) -> bool {
        self.factories.contains_key(id)
    }

    /// Factory ids in sorted order
    pub fn ids(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    /// Validate `config` with its factory and build the provider
    pub fn create(&self, config: &ProviderConfig) -> Result<Arc<dyn CloudProvider>> {
        let factory = self.get(&config.provider)?;
        factory.validate_config(config)?;
        let provider = factory.create_provider(config)?;
        tracing::info!(
            "Created {} provider for account {} ({})",
            factory.display_name(),
            config.name,
            config.id
        );
        Ok(provider)
    }
}
