pub mod api;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod logging;
pub mod provider;
pub mod script;
pub mod signature;

use axum::{Router, routing};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Instant;

pub use config::{HookConfig, load_config};
pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use error::HookError;

pub struct AppState {
    pub config: Arc<HookConfig>,
    pub dispatcher: Dispatcher,
    pub start_time: Instant,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// Build the state and start the dispatcher's workers.
    pub fn new(config: HookConfig) -> Self {
        let config = Arc::new(config);
        Self {
            dispatcher: Dispatcher::start(Arc::clone(&config)),
            config,
            start_time: Instant::now(),
            started_at: Utc::now(),
        }
    }
}

pub type SharedState = Arc<AppState>;

pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/", routing::get(api::root))
        .route("/hook/github/{repo}", routing::post(api::github_hook))
        .route("/hook/gitee/{repo}", routing::post(api::gitee_hook))
        .route("/hook/coding/{repo}", routing::post(api::coding_hook))
        .with_state(state)
}
