//! # homelink-api
//!
//! HTTP surface of the bridge: the OAuth account-linking flow, the
//! smart-home device API the voice platform calls, the Telegram provisioning
//! webhook, and the upstream skill callbacks. The user/code/token registry
//! lives here too and doubles as the hub session authorizer.

pub mod registry;
pub mod routes;
pub mod skill;
pub mod stats;

use axum::Router;
use homelink_db::Database;
use registry::UserRegistry;
use skill::SkillClient;
use stats::Stats;
use std::sync::Arc;

/// Shared application state available to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<UserRegistry>,
    pub db: Database,
    pub skill: SkillClient,
    /// Shared outbound HTTP client (Telegram sends).
    pub http: reqwest::Client,
    pub stats: Arc<Stats>,
}

/// Build the complete front-door router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(routes::auth::router())
        .merge(routes::devices::router())
        .merge(routes::telegram::router())
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}
