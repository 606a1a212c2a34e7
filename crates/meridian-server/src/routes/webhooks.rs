//! Inbound HTTP surface for the two webhook endpoints (`spec.md` §4.10,
//! §6): GitHub's signed deliveries and GitLab's token-header deliveries.
//! Both accept any Content-Type, so the body is read raw and parsed as
//! JSON downstream rather than relying on Axum's `Json` extractor.

use crate::state::AppState;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use meridian_webhooks::WebhookResult;

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

pub async fn github(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Json<WebhookResult> {
    let signature = header_str(&headers, "x-hub-signature-256").unwrap_or("");
    let event_type = header_str(&headers, "x-github-event").unwrap_or("");
    let result = state
        .webhooks
        .handle_github_delivery(&state.pool, &state.importer, &body, signature, event_type)
        .await;
    Json(result)
}

pub async fn gitlab(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Json<WebhookResult> {
    let token = header_str(&headers, "x-gitlab-token");
    let result = state
        .webhooks
        .handle_gitlab_delivery(&state.pool, &state.importer, &body, token)
        .await;
    Json(result)
}
