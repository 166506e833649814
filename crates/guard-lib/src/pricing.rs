//! Tiered pricing resolution
//!
//! A [`PricingConfig`] carries default unit prices, per-instance-type
//! overrides and per-region multipliers. Resolution is pure and total: every
//! node gets a price for every resource type, falling back to defaults and a
//! 1.0 multiplier wherever the table has gaps.

use crate::error::PricingError;
use crate::models::Node;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Multiplier applied when a node's region is unknown or unlisted
pub const DEFAULT_REGION_MULTIPLIER: f64 = 1.0;

/// Unit prices (hourly) used when an instance type has no override
///
/// CPU is priced per core, memory and storage per GiB, network per node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DefaultPricing {
    pub cpu: f64,
    pub memory: f64,
    #[serde(default)]
    pub storage: f64,
    #[serde(default)]
    pub network: f64,
    /// Hourly price per GPU, keyed by GPU model
    #[serde(default)]
    pub gpu_pricing: BTreeMap<String, f64>,
}

/// Per-instance-type overrides; absent fields fall back to the defaults
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstancePricing {
    pub cpu: Option<f64>,
    pub memory: Option<f64>,
    pub storage: Option<f64>,
    pub network: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PricingConfig {
    pub defaults: DefaultPricing,
    #[serde(default)]
    pub instance_types: BTreeMap<String, InstancePricing>,
    #[serde(default)]
    pub region_multipliers: BTreeMap<String, f64>,
}

/// Where a resolved unit price came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceSource {
    InstanceType,
    Default,
}

/// GPU price for a node; unrecognized models are zero-priced and flagged
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpuPrice {
    pub model: String,
    pub count: u32,
    /// Hourly price per GPU after the region multiplier
    pub unit_price: f64,
    pub recognized: bool,
}

/// Hourly unit prices resolved for one node, region multiplier applied
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedPrices {
    pub cpu: f64,
    pub memory: f64,
    pub storage: f64,
    pub network: f64,
    pub gpu: Option<GpuPrice>,
    pub region_multiplier: f64,
    pub cpu_source: PriceSource,
    pub memory_source: PriceSource,
    pub storage_source: PriceSource,
    pub network_source: PriceSource,
}

impl ResolvedPrices {
    /// True when the node advertises a GPU model missing from the table
    pub fn needs_attention(&self) -> bool {
        self.gpu.as_ref().is_some_and(|g| !g.recognized)
    }
}

impl PricingConfig {
    /// Load and validate a JSON pricing document
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, PricingError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| PricingError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self, PricingError> {
        let config: PricingConfig = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject negative prices and non-positive multipliers
    pub fn validate(&self) -> Result<(), PricingError> {
        let d = &self.defaults;
        let mut prices: Vec<(String, f64)> = vec![
            ("defaults.cpu".into(), d.cpu),
            ("defaults.memory".into(), d.memory),
            ("defaults.storage".into(), d.storage),
            ("defaults.network".into(), d.network),
        ];
        prices.extend(
            d.gpu_pricing
                .iter()
                .map(|(model, price)| (format!("defaults.gpuPricing.{}", model), *price)),
        );
        for (instance_type, p) in &self.instance_types {
            for (resource, value) in [("cpu", p.cpu), ("memory", p.memory), ("storage", p.storage), ("network", p.network)] {
                if let Some(value) = value {
                    prices.push((format!("instanceTypes.{}.{}", instance_type, resource), value));
                }
            }
        }

        if let Some((field, value)) = prices.into_iter().find(|(_, v)| !v.is_finite() || *v < 0.0) {
            return Err(PricingError::InvalidPrice { field, value });
        }
        if let Some((region, value)) = self
            .region_multipliers
            .iter()
            .find(|(_, m)| !m.is_finite() || **m <= 0.0)
        {
            return Err(PricingError::InvalidMultiplier {
                region: region.clone(),
                value: *value,
            });
        }
        Ok(())
    }

    pub fn region_multiplier(&self, region: Option<&str>) -> f64 {
        region
            .and_then(|r| self.region_multipliers.get(r))
            .copied()
            .unwrap_or(DEFAULT_REGION_MULTIPLIER)
    }

    /// Resolve hourly unit prices for a node
    pub fn resolve(&self, node: &Node) -> ResolvedPrices {
        let overrides = node.instance_type().and_then(|t| self.instance_types.get(t));
        let multiplier = self.region_multiplier(node.region());

        let pick = |value: Option<f64>, default: f64| match value {
            Some(price) => (price * multiplier, PriceSource::InstanceType),
            None => (default * multiplier, PriceSource::Default),
        };
        let (cpu, cpu_source) = pick(overrides.and_then(|o| o.cpu), self.defaults.cpu);
        let (memory, memory_source) = pick(overrides.and_then(|o| o.memory), self.defaults.memory);
        let (storage, storage_source) = pick(overrides.and_then(|o| o.storage), self.defaults.storage);
        let (network, network_source) = pick(overrides.and_then(|o| o.network), self.defaults.network);

        let gpu = node
            .allocatable
            .as_ref()
            .and_then(|a| a.gpu.as_ref())
            .filter(|g| g.count > 0)
            .map(|g| match self.defaults.gpu_pricing.get(&g.model) {
                Some(price) => GpuPrice {
                    model: g.model.clone(),
                    count: g.count,
                    unit_price: price * multiplier,
                    recognized: true,
                },
                None => GpuPrice {
                    model: g.model.clone(),
                    count: g.count,
                    unit_price: 0.0,
                    recognized: false,
                },
            });

        ResolvedPrices {
            cpu,
            memory,
            storage,
            network,
            gpu,
            region_multiplier: multiplier,
            cpu_source,
            memory_source,
            storage_source,
            network_source,
        }
    }
}
