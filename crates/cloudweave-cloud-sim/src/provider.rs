//! Simulated cloud provider implementation

use crate::seed::SimSeed;
use crate::world::{SimCloud, Timing};
use async_trait::async_trait;
use cloudweave_cloud::{
    CloudError, CloudProvider, ProviderConfig, ProviderFactory, Region, Result, TopologySource,
};
use std::sync::{Arc, OnceLock};

/// Factory id of the simulator
pub const SIM_PROVIDER_ID: &str = "sim";

/// Simulated cloud provider
///
/// Regions are built once and then shared, so the child caches of the
/// region graph survive across `regions()` calls.
pub struct SimProvider {
    name: String,
    cloud: SimCloud,
    regions: OnceLock<Vec<Arc<Region>>>,
}

impl SimProvider {
    pub fn new(name: impl Into<String>, cloud: SimCloud) -> Self {
        Self {
            name: name.into(),
            cloud,
            regions: OnceLock::new(),
        }
    }

    /// The world behind this provider
    pub fn cloud(&self) -> &SimCloud {
        &self.cloud
    }
}

#[async_trait]
impl CloudProvider for SimProvider {
    fn name(&self) -> &str {
        SIM_PROVIDER_ID
    }

    fn display_name(&self) -> &str {
        &self.name
    }

    async fn regions(&self) -> Result<Vec<Arc<Region>>> {
        let regions = self.regions.get_or_init(|| {
            let source: Arc<dyn TopologySource> = Arc::new(self.cloud.topology());
            let infos: Vec<_> = self.cloud.lock().regions.values().cloned().collect();
            tracing::debug!("Simulated provider {} has {} regions", self.name, infos.len());
            infos
                .into_iter()
                .map(|info| Region::new(info, source.clone()))
                .collect()
        });
        Ok(regions.clone())
    }
}

/// Builds one simulated world per account from a shared seed.
///
/// Accounts may override the seed's timing with the `transition_refreshes`
/// and `job_polls` options.
pub struct SimProviderFactory {
    seed: SimSeed,
}

impl SimProviderFactory {
    pub fn new(seed: SimSeed) -> Self {
        Self { seed }
    }

    fn timing(&self, config: &ProviderConfig) -> Result<Timing> {
        let mut timing = self.seed.timing;
        if let Some(value) = config.option("transition_refreshes") {
            timing.transition_refreshes = parse_count(config, "transition_refreshes", value)?;
        }
        if let Some(value) = config.option("job_polls") {
            timing.job_polls = parse_count(config, "job_polls", value)?;
        }
        Ok(timing)
    }
}

fn parse_count(config: &ProviderConfig, key: &str, value: &str) -> Result<u32> {
    value.parse().map_err(|_| {
        CloudError::InvalidConfig(format!(
            "provider account {}: option '{}' must be a non-negative integer, got '{}'",
            config.id, key, value
        ))
    })
}

impl ProviderFactory for SimProviderFactory {
    fn id(&self) -> &str {
        SIM_PROVIDER_ID
    }

    fn display_name(&self) -> &str {
        "Simulated Cloud"
    }

    fn validate_config(&self, config: &ProviderConfig) -> Result<()> {
        self.timing(config).map(|_| ())
    }

    fn create_provider(&self, config: &ProviderConfig) -> Result<Arc<dyn CloudProvider>> {
        let cloud = SimCloud::from_seed(&self.seed)?;
        cloud.set_timing(self.timing(config)?);
        Ok(Arc::new(SimProvider::new(&config.name, cloud)))
    }
}
