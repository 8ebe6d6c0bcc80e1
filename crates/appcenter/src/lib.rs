use std::{
    ffi::OsString,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use tokio::process::Command;
use ucb_relay_core::{
    config::AppCenterConfig,
    models::{BuildDetails, ResolvedDistribution},
};
use ucb_relay_pipeline::{Distributor, RelayError};

/// Invokes the App Center CLI to publish releases and upload crash symbols.
/// One subprocess per operation; a non-zero exit is fatal for the invocation.
#[derive(Debug, Clone)]
pub struct AppCenterCli {
    program: PathBuf,
}

impl AppCenterCli {
    pub fn new(config: &AppCenterConfig) -> Self {
        Self { program: config.cli.clone() }
    }

    /// Run the CLI with `args`, waiting for it to exit. `command` is the
    /// token-free subcommand description used for logging and errors.
    async fn run(&self, command: &str, args: Vec<OsString>) -> Result<(), RelayError> {
        tracing::debug!("Running {}", command);
        let output = Command::new(&self.program).args(&args).output().await.map_err(|e| {
            RelayError::Upload {
                command: command.to_string(),
                message: format!("failed to spawn {}: {e}", self.program.display()),
            }
        })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RelayError::Upload {
                command: command.to_string(),
                message: format!("exited with {}: {}", output.status, stderr.trim()),
            });
        }
        tracing::debug!("{} finished", command);
        Ok(())
    }
}

#[async_trait]
impl Distributor for AppCenterCli {
    async fn distribute_release(
        &self,
        file: &Path,
        details: &BuildDetails,
        distribution: &ResolvedDistribution,
    ) -> Result<(), RelayError> {
        self.run("appcenter distribute release", release_args(file, details, distribution)).await
    }

    async fn upload_symbols(
        &self,
        symbol: &Path,
        distribution: &ResolvedDistribution,
    ) -> Result<(), RelayError> {
        self.run("appcenter crashes upload-symbols", symbol_args(symbol, distribution)).await
    }
}

fn release_args(
    file: &Path,
    details: &BuildDetails,
    distribution: &ResolvedDistribution,
) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        "distribute".into(),
        "release".into(),
        "--file".into(),
        file.into(),
        "--group".into(),
        distribution.group.as_str().into(),
        "--build-version".into(),
        details.build.to_string().into(),
        "--release-notes".into(),
        details.release_notes().into(),
    ];
    args.extend(credential_args(distribution));
    args
}

fn symbol_args(symbol: &Path, distribution: &ResolvedDistribution) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        "crashes".into(),
        "upload-symbols".into(),
        "--symbol".into(),
        symbol.into(),
    ];
    args.extend(credential_args(distribution));
    args
}

fn credential_args(distribution: &ResolvedDistribution) -> Vec<OsString> {
    vec![
        "--token".into(),
        distribution.token.as_str().into(),
        "--app".into(),
        distribution.app_slug().into(),
    ]
}
