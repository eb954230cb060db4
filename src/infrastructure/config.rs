use crate::application::topology_discoverer::{DiscoveryOptions, PhaseBounds};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub store: StoreSettings,
    #[serde(default)]
    pub discovery: DiscoverySettings,
    #[serde(default)]
    pub server: ServerSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreSettings {
    pub url: String,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DiscoverySettings {
    #[serde(default = "default_time_zone")]
    pub default_time_zone: String,
    #[serde(default = "default_true")]
    pub write_back: bool,
    #[serde(default = "default_write_concurrency")]
    pub write_concurrency: usize,
    #[serde(default)]
    pub progress: ProgressSettings,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            default_time_zone: default_time_zone(),
            write_back: true,
            write_concurrency: default_write_concurrency(),
            progress: ProgressSettings::default(),
        }
    }
}

/// Where the setup, base-scan and target-scan phases end on the `[0, 1]` scale.
#[derive(Debug, Deserialize, Clone)]
pub struct ProgressSettings {
    #[serde(default = "default_setup")]
    pub setup: f64,
    #[serde(default = "default_base_scan")]
    pub base_scan: f64,
    #[serde(default = "default_target_scan")]
    pub target_scan: f64,
}

impl Default for ProgressSettings {
    fn default() -> Self {
        Self {
            setup: default_setup(),
            base_scan: default_base_scan(),
            target_scan: default_target_scan(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { bind: default_bind() }
    }
}

fn default_page_size() -> usize {
    100
}

fn default_time_zone() -> String {
    "UTC".to_string()
}

fn default_true() -> bool {
    true
}

fn default_write_concurrency() -> usize {
    4
}

fn default_setup() -> f64 {
    0.1
}

fn default_base_scan() -> f64 {
    0.3
}

fn default_target_scan() -> f64 {
    0.9
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

impl AppConfig {
    /// Phase bounds must be increasing within `[0, 1]`.
    pub fn validate(&self) -> anyhow::Result<()> {
        let p = &self.discovery.progress;
        if !(0.0 <= p.setup && p.setup <= p.base_scan && p.base_scan <= p.target_scan && p.target_scan <= 1.0) {
            anyhow::bail!(
                "discovery.progress bounds must increase within [0, 1], got {} / {} / {}",
                p.setup,
                p.base_scan,
                p.target_scan
            );
        }
        if self.store.page_size == 0 || self.discovery.write_concurrency == 0 {
            anyhow::bail!("store.page_size and discovery.write_concurrency must be positive");
        }
        Ok(())
    }

    pub fn discovery_options(&self) -> DiscoveryOptions {
        DiscoveryOptions {
            default_time_zone: self.discovery.default_time_zone.clone(),
            write_back: self.discovery.write_back,
            write_concurrency: self.discovery.write_concurrency,
            page_size: self.store.page_size,
            phases: PhaseBounds {
                setup: self.discovery.progress.setup,
                base_scan: self.discovery.progress.base_scan,
                target_scan: self.discovery.progress.target_scan,
            },
        }
    }
}

/// Loads `config/aggregation.*`, with `AGGREGATION__`-prefixed environment overrides.
pub fn load_app_config() -> anyhow::Result<AppConfig> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name("config/aggregation"))
        .add_source(config::Environment::with_prefix("AGGREGATION").separator("__"))
        .build()?;

    let app: AppConfig = settings.try_deserialize()?;
    app.validate()?;
    Ok(app)
}
