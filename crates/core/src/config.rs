use std::{
    collections::HashMap,
    env,
    fs::File,
    io::{self, BufReader},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::models::ResolvedDistribution;

/// Immutable service configuration, built once at startup and shared via `Arc`.
///
/// Loaded from an optional `config.yml`, then overlaid with process
/// environment variables. See [`Config::load`].
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub unity: UnityConfig,
    pub appcenter: AppCenterConfig,
    pub relay: RelayConfig,
    pub distribution: DistributionMapping,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self { Self { port: 80 } }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UnityConfig {
    /// Base URL the webhook's `api_self` link is resolved against.
    pub api_base: Url,
    /// Sent as `Authorization: Basic <key>` on build API requests.
    pub api_key: String,
    /// When set, incoming webhook signatures are verified against this secret.
    pub webhook_secret: Option<String>,
}

impl Default for UnityConfig {
    fn default() -> Self {
        Self {
            api_base: Url::parse("https://build-api.cloud.unity3d.com").unwrap(),
            api_key: String::new(),
            webhook_secret: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AppCenterConfig {
    /// Path to the `appcenter` CLI binary.
    pub cli: PathBuf,
    pub token: String,
    pub owner: String,
    pub app: String,
}

impl Default for AppCenterConfig {
    fn default() -> Self {
        Self {
            cli: PathBuf::from("appcenter"),
            token: String::new(),
            owner: String::new(),
            app: String::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Root under which each invocation creates its own scratch directory.
    pub scratch_dir: PathBuf,
}

impl Default for RelayConfig {
    fn default() -> Self { Self { scratch_dir: env::temp_dir() } }
}

/// Build-target name → distribution settings. Immutable after load.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(transparent)]
pub struct DistributionMapping(pub HashMap<String, DistributionTarget>);

/// A mapping entry is either a bare distribution group name, or a record
/// with per-target App Center credentials overriding the global section.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum DistributionTarget {
    Group(String),
    Full(DistributionOverride),
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DistributionOverride {
    pub group: String,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub app: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
}

impl DistributionMapping {
    pub fn is_empty(&self) -> bool { self.0.is_empty() }

    pub fn contains(&self, build_target: &str) -> bool { self.0.contains_key(build_target) }

    /// Resolve the distribution settings for a build target, filling in any
    /// per-target gaps from the global App Center section. `None` when the
    /// target has no mapping entry.
    pub fn resolve(
        &self,
        build_target: &str,
        defaults: &AppCenterConfig,
    ) -> Option<ResolvedDistribution> {
        Some(match self.0.get(build_target)? {
            DistributionTarget::Group(group) => ResolvedDistribution {
                group: group.clone(),
                owner: defaults.owner.clone(),
                app: defaults.app.clone(),
                token: defaults.token.clone(),
            },
            DistributionTarget::Full(target) => ResolvedDistribution {
                group: target.group.clone(),
                owner: target.owner.clone().unwrap_or_else(|| defaults.owner.clone()),
                app: target.app.clone().unwrap_or_else(|| defaults.app.clone()),
                token: target.token.clone().unwrap_or_else(|| defaults.token.clone()),
            },
        })
    }
}

impl Config {
    /// Load configuration from `path` (missing file means all defaults),
    /// overlay process environment variables, and validate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config: Self = match File::open(path) {
            Ok(file) => serde_yaml::from_reader(BufReader::new(file))
                .with_context(|| format!("Failed to parse {}", path.display()))?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => Self::default(),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to open {}", path.display()));
            }
        };
        config.apply_env(|key| env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay environment variables onto the file-based configuration.
    /// `var` is injected so tests don't have to mutate the process environment.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(port) = var("PORT") {
            self.server.port = port.parse().context("Invalid PORT")?;
        }
        if let Some(base) = var("UNITYCLOUD_API_BASE") {
            self.unity.api_base = base.parse().context("Invalid UNITYCLOUD_API_BASE")?;
        }
        if let Some(key) = var("UNITYCLOUD_KEY") {
            self.unity.api_key = key;
        }
        if let Some(secret) = var("UCB_WEBHOOK_SECRET") {
            self.unity.webhook_secret = Some(secret);
        }
        if let Some(token) = var("APPCENTER_API_TOKEN") {
            self.appcenter.token = token;
        }
        if let Some(owner) = var("APP_CENTER_OWNER") {
            self.appcenter.owner = owner;
        }
        if let Some(app) = var("APP_CENTER_APPNAME") {
            self.appcenter.app = app;
        }
        if let Some(cli) = var("APPCENTER_CLI") {
            self.appcenter.cli = cli.into();
        }
        if let Some(dir) = var("SCRATCH_DIR") {
            self.relay.scratch_dir = dir.into();
        }
        if let Some(map) = var("DISTRIB_MAP") {
            self.distribution = serde_json::from_str(&map).context("Invalid DISTRIB_MAP")?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.unity.api_key.is_empty() {
            bail!("Unity Cloud Build API key is not set (unity.api_key / UNITYCLOUD_KEY)");
        }
        // Global App Center credentials are only required if some mapping
        // entry doesn't carry its own.
        let needs_defaults = self.distribution.0.values().any(|target| match target {
            DistributionTarget::Group(_) => true,
            DistributionTarget::Full(t) => {
                t.owner.is_none() || t.app.is_none() || t.token.is_none()
            }
        });
        if needs_defaults {
            if self.appcenter.token.is_empty() {
                bail!("App Center API token is not set (appcenter.token / APPCENTER_API_TOKEN)");
            }
            if self.appcenter.owner.is_empty() {
                bail!("App Center owner is not set (appcenter.owner / APP_CENTER_OWNER)");
            }
            if self.appcenter.app.is_empty() {
                bail!("App Center app name is not set (appcenter.app / APP_CENTER_APPNAME)");
            }
        }
        Ok(())
    }
}
