use std::{io, path::PathBuf};

use thiserror::Error;

/// Failures that abort a relay invocation.
///
/// An unmapped build target is not an error; it surfaces as
/// [`crate::Outcome::Skipped`]. There are no retries anywhere: every variant
/// propagates to the webhook handler, which translates it to an HTTP
/// response.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The webhook payload carried no build API callback link. Raised before
    /// any network call.
    #[error("No build link in webhook payload")]
    MissingBuildLink,

    /// The build API request failed, returned non-2xx, or produced an
    /// unusable payload.
    #[error("Failed to fetch build details: {message}")]
    Fetch { message: String },

    /// An artifact download failed, before or mid-stream.
    #[error("Failed to download {url}: {source}")]
    Download {
        url: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The distribution CLI could not be spawned or exited with a non-zero
    /// status.
    #[error("{command} failed: {message}")]
    Upload { command: String, message: String },

    /// The invocation's scratch directory could not be created.
    #[error("Failed to create scratch directory {}: {source}", .path.display())]
    Scratch {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}
