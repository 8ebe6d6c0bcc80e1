use std::{fmt::Display, sync::Arc};

use axum::{
    Json,
    body::Bytes,
    extract::{FromRef, FromRequest, Request},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use ucb_relay_core::{ApiMessage, config::Config, models::WebhookEvent};

/// Verify and extract a Unity Cloud Build webhook payload.
///
/// When a webhook secret is configured, the `X-UnityCloudBuild-Signature`
/// HMAC-SHA256 hex digest is verified against the raw body before parsing;
/// without a secret, the body is parsed as-is.
#[derive(Clone)]
#[must_use]
pub struct UnityEvent {
    pub event: WebhookEvent,
}

impl<S> FromRequest<S> for UnityEvent
where
    Arc<Config>: FromRef<S>,
    S: Send + Sync + Clone,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        fn err(m: impl Display) -> Response {
            tracing::error!("{m}");
            (StatusCode::BAD_REQUEST, Json(ApiMessage::err(m.to_string()))).into_response()
        }
        let config = <Arc<Config>>::from_ref(state);
        let body = if let Some(secret) = &config.unity.webhook_secret {
            let signature = req
                .headers()
                .get("X-UnityCloudBuild-Signature")
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| err("X-UnityCloudBuild-Signature missing"))?
                .to_string();
            let body =
                Bytes::from_request(req, state).await.map_err(|_| err("error reading body"))?;
            if !verify_signature(secret, &body, &signature) {
                return Err(err("signature mismatch"));
            }
            body
        } else {
            Bytes::from_request(req, state).await.map_err(|_| err("error reading body"))?
        };
        let event = serde_json::from_slice(&body)
            .map_err(|e| err(format!("error parsing webhook body: {e}")))?;
        Ok(UnityEvent { event })
    }
}

/// Constant-time verification of a hex-encoded HMAC-SHA256 body signature.
pub fn verify_signature(secret: &str, body: &[u8], signature_hex: &str) -> bool {
    let Ok(signature) = hex::decode(signature_hex) else {
        return false;
    };
    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(body);
    mac.verify_slice(&signature).is_ok()
}
