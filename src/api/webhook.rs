//! Webhook endpoints, one per provider

use axum::{
    body::Bytes,
    extract::{Path, State as AxumState},
    http::{HeaderMap, StatusCode},
};
use tracing::warn;

use crate::SharedState;
use crate::dispatcher::DispatchOutcome;
use crate::error::HookError;
use crate::provider::Provider;

/// POST /hook/github/{repo}
pub async fn github_hook(
    AxumState(state): AxumState<SharedState>,
    Path(repo): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, HookError> {
    handle_hook(&state, Provider::Github, repo, &headers, body)
}

/// POST /hook/gitee/{repo}
pub async fn gitee_hook(
    AxumState(state): AxumState<SharedState>,
    Path(repo): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, HookError> {
    handle_hook(&state, Provider::Gitee, repo, &headers, body)
}

/// POST /hook/coding/{repo}
pub async fn coding_hook(
    AxumState(state): AxumState<SharedState>,
    Path(repo): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, HookError> {
    handle_hook(&state, Provider::Coding, repo, &headers, body)
}

/// Shared path for all providers. Answers as soon as the script is queued;
/// the script's own result is only logged.
fn handle_hook(
    state: &SharedState,
    provider: Provider,
    repo: String,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<StatusCode, HookError> {
    let outcome = state
        .dispatcher
        .receive(provider, repo.clone(), headers, body);

    match outcome {
        Ok(DispatchOutcome::Queued { .. }) => Ok(StatusCode::OK),
        Ok(DispatchOutcome::SkippedNoScript { .. }) => Ok(StatusCode::NO_CONTENT),
        Err(e) => {
            warn!("Rejected {} delivery for repo '{}': {}", provider, repo, e);
            Err(e)
        }
    }
}
