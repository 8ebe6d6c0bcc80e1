use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use ucb_relay_core::ApiMessage;
use ucb_relay_pipeline::{Outcome, RelayError, run_invocation};
use ucb_relay_unity::webhook::UnityEvent;

use crate::AppState;

pub fn build_router() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/unitycloudbuildwebhook", post(webhook))
}

async fn healthz() -> &'static str { "ok" }

/// Receive a build-completion event and relay the build to App Center.
/// The whole pipeline runs inside the request; the response reports the
/// final outcome.
async fn webhook(State(state): State<AppState>, UnityEvent { event }: UnityEvent) -> Response {
    let project = event.project_name.as_deref().unwrap_or("[unknown]").to_string();
    tracing::info!("Received build event for '{}' target '{}'", project, event.build_target_name);

    match run_invocation(&state.config, &state.unity, &state.appcenter, &event).await {
        Ok(Outcome::Distributed { build_target, build }) => {
            tracing::info!("Distributed '{}' build #{}", build_target, build);
            Json(ApiMessage::ok(format!("Success! '{project}' platform '{build_target}'.")))
                .into_response()
        }
        Ok(Outcome::Skipped { build_target }) => Json(ApiMessage::ok(format!(
            "No distribution configured for '{build_target}'."
        )))
        .into_response(),
        Err(e) => {
            tracing::error!("Relay failed: {e}");
            let status = match &e {
                RelayError::MissingBuildLink => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            (status, Json(ApiMessage::err(e.to_string()))).into_response()
        }
    }
}
