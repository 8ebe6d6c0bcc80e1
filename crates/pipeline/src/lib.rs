//! The relay pipeline: validate an incoming build event, fetch build
//! details, download artifacts to scratch storage, and hand them to the
//! distribution CLI. Strictly sequential; one invocation per webhook event.

mod errors;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
pub use errors::RelayError;
use ucb_relay_core::{
    config::Config,
    models::{BuildDetails, Link, ResolvedDistribution, WebhookEvent},
    util::artifact_filename,
};
use url::Url;
use uuid::Uuid;

/// Client for the cloud build service's REST API.
#[async_trait]
pub trait BuildApi: Send + Sync {
    /// Fetch build metadata via the webhook's callback link (a path relative
    /// to the API base).
    async fn build_details(&self, href: &str) -> Result<BuildDetails, RelayError>;

    /// Stream a binary artifact to `dest`, replacing any stale file there.
    async fn download(&self, url: &Url, dest: &Path) -> Result<(), RelayError>;
}

/// Publishes a release (and its debug symbols) to the distribution service.
#[async_trait]
pub trait Distributor: Send + Sync {
    async fn distribute_release(
        &self,
        file: &Path,
        details: &BuildDetails,
        distribution: &ResolvedDistribution,
    ) -> Result<(), RelayError>;

    async fn upload_symbols(
        &self,
        symbol: &Path,
        distribution: &ResolvedDistribution,
    ) -> Result<(), RelayError>;
}

/// Result of one pipeline invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The build was downloaded and handed to the distribution CLI.
    Distributed { build_target: String, build: u64 },
    /// The event's build target has no distribution mapping; nothing was done.
    Skipped { build_target: String },
}

/// Run the full relay pipeline for one webhook event.
///
/// Validation happens before any network call; artifacts are written to a
/// per-invocation scratch directory that is removed unconditionally once the
/// pipeline finishes, whether it succeeded or not.
pub async fn run_invocation(
    config: &Config,
    api: &impl BuildApi,
    distributor: &impl Distributor,
    event: &WebhookEvent,
) -> Result<Outcome, RelayError> {
    let Some(build_link) =
        event.links.api_self.as_ref().map(|l| l.href.as_str()).filter(|href| !href.is_empty())
    else {
        return Err(RelayError::MissingBuildLink);
    };

    let Some(distribution) =
        config.distribution.resolve(&event.build_target_name, &config.appcenter)
    else {
        tracing::info!("No distribution for {}", event.build_target_name);
        return Ok(Outcome::Skipped { build_target: event.build_target_name.clone() });
    };

    let scratch = Scratch::create(&config.relay.scratch_dir).await?;
    let result = relay(api, distributor, build_link, &distribution, scratch.path()).await;
    scratch.cleanup().await;
    result
}

async fn relay(
    api: &impl BuildApi,
    distributor: &impl Distributor,
    build_link: &str,
    distribution: &ResolvedDistribution,
    scratch: &Path,
) -> Result<Outcome, RelayError> {
    let details = api.build_details(build_link).await?;

    let Some(primary) = &details.links.download_primary else {
        return Err(RelayError::Fetch {
            message: "build details carry no download_primary link".into(),
        });
    };
    let primary_url = download_url(primary)?;
    let primary_path = artifact_path(scratch, &primary_url)?;
    api.download(&primary_url, &primary_path).await?;

    // The debug-symbol archive only exists for some build targets.
    let mut symbol_path = None;
    if let Some(dsym) = &details.links.download_dsym {
        let dsym_url = download_url(dsym)?;
        let dsym_path = artifact_path(scratch, &dsym_url)?;
        api.download(&dsym_url, &dsym_path).await?;
        symbol_path = Some(dsym_path);
    }

    tracing::info!("Uploading app file {}", primary_path.display());
    distributor.distribute_release(&primary_path, &details, distribution).await?;

    if let Some(symbol_path) = &symbol_path {
        tracing::info!("Uploading symbol file {}", symbol_path.display());
        distributor.upload_symbols(symbol_path, distribution).await?;
    }

    Ok(Outcome::Distributed {
        build_target: details.build_target_name.clone(),
        build: details.build,
    })
}

fn download_url(link: &Link) -> Result<Url, RelayError> {
    Url::parse(&link.href).map_err(|e| RelayError::Fetch {
        message: format!("invalid download link {}: {e}", link.href),
    })
}

fn artifact_path(scratch: &Path, url: &Url) -> Result<PathBuf, RelayError> {
    let filename = artifact_filename(url).ok_or_else(|| RelayError::Fetch {
        message: format!("no filename in download link {url}"),
    })?;
    Ok(scratch.join(filename))
}

/// Per-invocation scratch directory, keyed by a fresh UUID so concurrent
/// invocations can never collide on artifact filenames.
struct Scratch {
    dir: PathBuf,
}

impl Scratch {
    async fn create(root: &Path) -> Result<Self, RelayError> {
        let dir = root.join(format!("ucb-relay-{}", Uuid::new_v4()));
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| RelayError::Scratch { path: dir.clone(), source })?;
        Ok(Self { dir })
    }

    fn path(&self) -> &Path { &self.dir }

    /// Best-effort removal of the directory and everything in it. Failures
    /// are logged, never propagated; cleanup must not mask a pipeline error.
    async fn cleanup(self) {
        match tokio::fs::remove_dir_all(&self.dir).await {
            Ok(()) => tracing::debug!("Deleted scratch directory {}", self.dir.display()),
            Err(e) => {
                tracing::warn!("Failed to delete scratch directory {}: {}", self.dir.display(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    };

    use ucb_relay_core::{
        config::{DistributionMapping, DistributionTarget},
        models::BuildLinks,
    };

    use super::*;

    struct FakeApi {
        details: BuildDetails,
        fail_download: bool,
        calls: AtomicUsize,
        downloads: Mutex<Vec<PathBuf>>,
    }

    impl FakeApi {
        fn new(details: BuildDetails) -> Self {
            Self {
                details,
                fail_download: false,
                calls: AtomicUsize::new(0),
                downloads: Mutex::new(Vec::new()),
            }
        }

        fn network_calls(&self) -> usize { self.calls.load(Ordering::SeqCst) }
    }

    #[async_trait]
    impl BuildApi for FakeApi {
        async fn build_details(&self, _href: &str) -> Result<BuildDetails, RelayError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.details.clone())
        }

        async fn download(&self, url: &Url, dest: &Path) -> Result<(), RelayError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_download {
                return Err(RelayError::Download {
                    url: url.to_string(),
                    source: std::io::Error::other("connection reset mid-stream").into(),
                });
            }
            tokio::fs::write(dest, b"binary").await.unwrap();
            self.downloads.lock().unwrap().push(dest.to_path_buf());
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeDistributor {
        fail_release: bool,
        /// (path, did the file exist at upload time)
        releases: Mutex<Vec<(PathBuf, bool)>>,
        symbols: Mutex<Vec<(PathBuf, bool)>>,
    }

    #[async_trait]
    impl Distributor for FakeDistributor {
        async fn distribute_release(
            &self,
            file: &Path,
            _details: &BuildDetails,
            _distribution: &ResolvedDistribution,
        ) -> Result<(), RelayError> {
            self.releases.lock().unwrap().push((file.to_path_buf(), file.exists()));
            if self.fail_release {
                return Err(RelayError::Upload {
                    command: "appcenter distribute release".into(),
                    message: "exited with exit status: 1: upload rejected".into(),
                });
            }
            Ok(())
        }

        async fn upload_symbols(
            &self,
            symbol: &Path,
            _distribution: &ResolvedDistribution,
        ) -> Result<(), RelayError> {
            self.symbols.lock().unwrap().push((symbol.to_path_buf(), symbol.exists()));
            Ok(())
        }
    }

    fn test_config(scratch: &Path) -> Config {
        let mut config = Config::default();
        config.unity.api_key = "unity-key".into();
        config.appcenter.token = "ac-token".into();
        config.appcenter.owner = "acme".into();
        config.appcenter.app = "Game".into();
        config.relay.scratch_dir = scratch.to_path_buf();
        config.distribution = DistributionMapping(
            [("ios-release".to_string(), DistributionTarget::Group("beta-testers".to_string()))]
                .into(),
        );
        config
    }

    fn event(api_self: Option<&str>, build_target: &str) -> WebhookEvent {
        WebhookEvent {
            links: BuildLinks {
                api_self: api_self.map(|href| Link { href: href.to_string() }),
                download_primary: None,
                download_dsym: None,
            },
            build_target_name: build_target.to_string(),
            build: Some(42),
            project_name: Some("Space Game".to_string()),
        }
    }

    fn details(primary: &str, dsym: Option<&str>) -> BuildDetails {
        BuildDetails {
            links: BuildLinks {
                api_self: None,
                download_primary: Some(Link { href: primary.to_string() }),
                download_dsym: dsym.map(|href| Link { href: href.to_string() }),
            },
            build: 42,
            build_target_name: "ios-release".to_string(),
        }
    }

    #[tokio::test]
    async fn test_missing_build_link_fails_before_network() {
        let scratch = tempfile::tempdir().unwrap();
        let config = test_config(scratch.path());
        let api = FakeApi::new(details("https://x/y/app.ipa", None));
        let distributor = FakeDistributor::default();

        let err = run_invocation(&config, &api, &distributor, &event(None, "ios-release"))
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::MissingBuildLink));
        assert_eq!(api.network_calls(), 0);

        // An empty href is as good as a missing one.
        let err = run_invocation(&config, &api, &distributor, &event(Some(""), "ios-release"))
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::MissingBuildLink));
        assert_eq!(api.network_calls(), 0);
    }

    #[tokio::test]
    async fn test_unmapped_target_skips_without_error() {
        let scratch = tempfile::tempdir().unwrap();
        let config = test_config(scratch.path());
        let api = FakeApi::new(details("https://x/y/app.ipa", None));
        let distributor = FakeDistributor::default();

        let outcome = run_invocation(
            &config,
            &api,
            &distributor,
            &event(Some("/api/v1/builds/42"), "windows-release"),
        )
        .await
        .unwrap();
        assert_eq!(outcome, Outcome::Skipped { build_target: "windows-release".into() });
        assert_eq!(api.network_calls(), 0);
        assert!(distributor.releases.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_download_targets_filename_from_url() {
        let scratch = tempfile::tempdir().unwrap();
        let config = test_config(scratch.path());
        let api = FakeApi::new(details("https://x/y/app.ipa", None));
        let distributor = FakeDistributor::default();

        let outcome = run_invocation(
            &config,
            &api,
            &distributor,
            &event(Some("/api/v1/builds/42"), "ios-release"),
        )
        .await
        .unwrap();
        assert_eq!(
            outcome,
            Outcome::Distributed { build_target: "ios-release".into(), build: 42 }
        );

        let downloads = api.downloads.lock().unwrap();
        assert_eq!(downloads.len(), 1);
        assert_eq!(downloads[0].file_name().unwrap(), "app.ipa");

        // The file must exist while the CLI runs...
        let releases = distributor.releases.lock().unwrap();
        assert_eq!(releases.len(), 1);
        assert!(releases[0].1);
        // ...and be gone, along with its scratch directory, afterwards.
        assert!(!releases[0].0.exists());
        assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_dsym_downloaded_and_uploaded_when_present() {
        let scratch = tempfile::tempdir().unwrap();
        let config = test_config(scratch.path());
        let api = FakeApi::new(details(
            "https://x/y/app.ipa",
            Some("https://x/y/app.dSYM.zip"),
        ));
        let distributor = FakeDistributor::default();

        run_invocation(&config, &api, &distributor, &event(Some("/api/v1/builds/42"), "ios-release"))
            .await
            .unwrap();

        assert_eq!(api.downloads.lock().unwrap().len(), 2);
        let symbols = distributor.symbols.lock().unwrap();
        assert_eq!(symbols.len(), 1);
        assert_eq!(symbols[0].0.file_name().unwrap(), "app.dSYM.zip");
        assert!(symbols[0].1);
    }

    #[tokio::test]
    async fn test_download_error_aborts_before_cli() {
        let scratch = tempfile::tempdir().unwrap();
        let config = test_config(scratch.path());
        let mut api = FakeApi::new(details("https://x/y/app.ipa", None));
        api.fail_download = true;
        let distributor = FakeDistributor::default();

        let err = run_invocation(
            &config,
            &api,
            &distributor,
            &event(Some("/api/v1/builds/42"), "ios-release"),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, RelayError::Download { .. }));
        assert!(distributor.releases.lock().unwrap().is_empty());
        // Cleanup still ran.
        assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_cli_failure_propagates_and_still_cleans_up() {
        let scratch = tempfile::tempdir().unwrap();
        let config = test_config(scratch.path());
        let api = FakeApi::new(details("https://x/y/app.ipa", None));
        let distributor = FakeDistributor { fail_release: true, ..Default::default() };

        let err = run_invocation(
            &config,
            &api,
            &distributor,
            &event(Some("/api/v1/builds/42"), "ios-release"),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, RelayError::Upload { .. }));
        assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_details_without_primary_link_fail() {
        let scratch = tempfile::tempdir().unwrap();
        let config = test_config(scratch.path());
        let mut details = details("https://x/y/app.ipa", None);
        details.links.download_primary = None;
        let api = FakeApi::new(details);
        let distributor = FakeDistributor::default();

        let err = run_invocation(
            &config,
            &api,
            &distributor,
            &event(Some("/api/v1/builds/42"), "ios-release"),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, RelayError::Fetch { .. }));
    }
}
