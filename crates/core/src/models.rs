use serde::Deserialize;

/// A hyperlink object in Unity Cloud Build payloads. Extra fields
/// (`method`, `meta`, ...) are ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct Link {
    pub href: String,
}

/// The `links` block shared by webhook events and build detail responses.
/// Every link is optional on the wire; validation decides which are required.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BuildLinks {
    pub api_self: Option<Link>,
    pub download_primary: Option<Link>,
    pub download_dsym: Option<Link>,
}

/// Incoming build-completion webhook payload. Transient, one per invocation.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEvent {
    #[serde(default)]
    pub links: BuildLinks,
    pub build_target_name: String,
    #[serde(default)]
    pub build: Option<u64>,
    #[serde(default)]
    pub project_name: Option<String>,
}

/// Build metadata fetched from the build API via the webhook's callback link.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildDetails {
    #[serde(default)]
    pub links: BuildLinks,
    pub build: u64,
    pub build_target_name: String,
}

impl BuildDetails {
    /// Release notes attached to the distributed build, e.g. `ios-release #42`.
    pub fn release_notes(&self) -> String {
        format!("{} #{}", self.build_target_name, self.build)
    }
}

/// Distribution settings for one build target after mapping resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedDistribution {
    pub group: String,
    pub owner: String,
    pub app: String,
    pub token: String,
}

impl ResolvedDistribution {
    /// The `--app` argument form, `<owner>/<appname>`.
    pub fn app_slug(&self) -> String {
        format!("{}/{}", self.owner, self.app)
    }
}
